use crate::dependents::{DependentKind, DependentObject};
use crate::error::Result;
use crate::ownership::{attach, ownership_of, Ownership, ParentRef};
use crate::store::{CreateOutcome, ObjectStore};
use crate::types::{JsonServer, ObjectKey};
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug, PartialEq)]
pub enum EnsureOutcome {
    /// The dependent was absent and has been created.
    Created(DependentObject),
    /// The dependent exists and points back at the parent.
    AlreadyPresentOwned(DependentObject),
    /// Something else holds the name. It is never touched.
    Foreign,
    /// The create lost a race but the winner could not be read back. Its
    /// ownership is unknown until the next attempt.
    Contended,
}

/// Makes sure the `kind` dependent of `parent` exists.
///
/// Existing objects are only classified, never patched: a dependent that
/// drifted from its parent after creation stays as it is.
pub async fn ensure<S>(
    store: &S,
    parent: &JsonServer,
    kind: DependentKind,
) -> Result<EnsureOutcome>
where
    S: ObjectStore + ?Sized,
{
    let key = parent.key();
    let parent_ref = ParentRef::of(parent)?;

    if let Some(existing) = read(store, kind, &key).await? {
        return Ok(classify(&parent_ref, existing));
    }

    info!(%key, %kind, "dependent not found, creating");
    let mut desired = kind.build(parent);
    attach(parent, &mut desired)?;

    match store.create_dependent(desired).await {
        Ok(CreateOutcome::Created(created)) => {
            info!(%key, %kind, "created dependent");
            Ok(EnsureOutcome::Created(created))
        }
        Ok(CreateOutcome::AlreadyExists) => {
            info!(%key, %kind, "dependent already exists, reading it back");
            Ok(match read(store, kind, &key).await? {
                Some(winner) => classify(&parent_ref, winner),
                None => {
                    warn!(%key, %kind, "dependent vanished after a conflicting create");
                    EnsureOutcome::Contended
                }
            })
        }
        Err(e) => {
            error!(%key, %kind, error = %e, "failed to create dependent");
            Err(e)
        }
    }
}

async fn read<S>(
    store: &S,
    kind: DependentKind,
    key: &ObjectKey,
) -> Result<Option<DependentObject>>
where
    S: ObjectStore + ?Sized,
{
    store.get_dependent(kind, key).await.map_err(|e| {
        error!(%key, %kind, error = %e, "failed to fetch dependent");
        e
    })
}

fn classify(parent_ref: &ParentRef, existing: DependentObject) -> EnsureOutcome {
    let kind = existing.kind();
    match ownership_of(parent_ref, &existing) {
        Ownership::Owned => {
            debug!(%kind, name = existing.name(), "dependent present");
            EnsureOutcome::AlreadyPresentOwned(existing)
        }
        Ownership::Foreign => {
            warn!(
                %kind,
                name = existing.name(),
                "dependent exists without a back-reference to its JsonServer"
            );
            EnsureOutcome::Foreign
        }
    }
}
