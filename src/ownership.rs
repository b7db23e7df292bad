//! Owner back-references from dependents to their `JsonServer`.
//!
//! The back-reference is what the API server's garbage collector follows to
//! delete dependents once the parent is gone, and what the synchronizer checks
//! before treating an existing object as its own.

use crate::dependents::DependentObject;
use crate::error::{Error, Result};
use crate::types::JsonServer;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

/// Identity of the parent a dependent must point back to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
}

impl ParentRef {
    /// Fails if the parent has not been persisted yet (no uid).
    pub fn of(parent: &JsonServer) -> Result<Self> {
        let uid = parent.uid().ok_or(Error::MissingField("metadata.uid"))?;
        Ok(Self {
            api_version: JsonServer::api_version(&()).to_string(),
            kind: JsonServer::kind(&()).to_string(),
            name: parent.name_any(),
            uid,
        })
    }

    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// True when `reference` points at this parent. The API version is
    /// compared by group only so a served-version bump keeps ownership.
    pub fn is_referenced_by(&self, reference: &OwnerReference) -> bool {
        reference.uid == self.uid
            && reference.kind == self.kind
            && reference.name == self.name
            && api_group(&reference.api_version) == api_group(&self.api_version)
    }
}

fn api_group(api_version: &str) -> &str {
    api_version.rsplit_once('/').map(|(g, _)| g).unwrap_or("")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    Owned,
    Foreign,
}

/// Classifies an existing dependent against the expected parent.
pub fn ownership_of(parent: &ParentRef, dependent: &DependentObject) -> Ownership {
    let owned = dependent
        .meta()
        .owner_references
        .iter()
        .flatten()
        .any(|r| parent.is_referenced_by(r));
    if owned {
        Ownership::Owned
    } else {
        Ownership::Foreign
    }
}

/// Stamps `dependent` with a controller back-reference to `parent`.
///
/// Refuses to take over an object that already names a different controller.
pub fn attach(parent: &JsonServer, dependent: &mut DependentObject) -> Result<()> {
    let parent_ref = ParentRef::of(parent)?;
    let kind = dependent.kind();
    let name = dependent.name().to_string();
    let refs = dependent.meta_mut().owner_references.get_or_insert_with(Vec::new);

    if refs
        .iter()
        .any(|r| r.controller == Some(true) && !parent_ref.is_referenced_by(r))
    {
        return Err(Error::Foreign { kind, name });
    }

    refs.retain(|r| !parent_ref.is_referenced_by(r));
    refs.push(parent_ref.owner_reference());
    Ok(())
}
