use crate::error::Result;
use crate::store::ObjectStore;
use crate::types::{JsonServer, ObjectKey};
use kube::Resource;
use tracing::{debug, error, info};

/// Fetches the latest desired state for `key`.
///
/// `Ok(None)` covers both a parent that is gone and one that is being
/// deleted; in either case there is nothing left to converge and the garbage
/// collector owns the dependents.
pub async fn fetch_parent<S>(store: &S, key: &ObjectKey) -> Result<Option<JsonServer>>
where
    S: ObjectStore + ?Sized,
{
    match store.get_parent(key).await {
        Ok(Some(parent)) if parent.meta().deletion_timestamp.is_some() => {
            info!(%key, "JsonServer is being deleted");
            Ok(None)
        }
        Ok(Some(parent)) => {
            debug!(%key, generation = ?parent.meta().generation, "fetched JsonServer");
            Ok(Some(parent))
        }
        Ok(None) => {
            info!(%key, "JsonServer not found");
            Ok(None)
        }
        Err(e) => {
            error!(%key, error = %e, "failed to fetch JsonServer");
            Err(e)
        }
    }
}
