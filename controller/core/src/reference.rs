use crate::{GroupKind, ObjectSource};

/// Failures resolving a reference from one object to another.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("{} {}/{} not found", .0.kind, .0.namespace, .0.name)]
    NotFound(ObjectSource),

    #[error("reference to {} {}/{} not permitted by any ReferenceGrant", .0.kind, .0.namespace, .0.name)]
    MissingReferenceGrant(ObjectSource),

    #[error("port is not allowed on {} {}/{}", .0.kind, .0.namespace, .0.name)]
    BackendPortNotAllowed(ObjectSource),

    #[error("unknown backend kind {0}")]
    UnknownBackendKind(GroupKind),

    #[error("cyclic reference detected while evaluating delegated routes")]
    CyclicReference,

    #[error("unresolved reference")]
    UnresolvedReference,
}

impl ReferenceError {
    /// The route condition reason reported for this error.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound(_)
            | Self::BackendPortNotAllowed(_)
            | Self::UnresolvedReference
            | Self::CyclicReference => "BackendNotFound",
            Self::MissingReferenceGrant(_) => "RefNotPermitted",
            Self::UnknownBackendKind(_) => "InvalidKind",
        }
    }
}
