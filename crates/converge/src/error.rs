//! Error types for the converge crate
//!
//! Every failure the engine can report falls into one of the categories
//! below. Structural, cycle and drift errors are raised before the host is
//! touched; the remaining variants come out of applying a plan.

use crate::resource::ResourceKey;
use thiserror::Error;

/// Errors that can occur while building, planning or applying blueprints
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed resource declaration
    #[error("invalid {key}: {message}")]
    Validation { key: ResourceKey, message: String },

    /// The same (kind, id) was declared twice in one blueprint
    #[error("duplicate resource: {0}")]
    DuplicateResource(ResourceKey),

    /// No kind with this name is registered
    #[error("unknown resource kind: {0}")]
    UnknownKind(String),

    /// The declaration order of the resources cannot be satisfied
    #[error("dependency cycle between steps: {}", .steps.join(", "))]
    Cycle { steps: Vec<String> },

    /// The host no longer matches the last applied blueprint
    #[error(
        "host state drifted from the last applied blueprint: {}; run `restore` to re-apply it",
        .resources.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    )]
    Drift { resources: Vec<ResourceKey> },

    /// A previous run left a staged target blueprint behind
    #[error("a previous run did not complete; run `rollback` before making new changes")]
    InterruptedRun,

    /// No original snapshot was ever saved for this resource
    #[error("no original state recorded for {0}")]
    MissingOriginal(ResourceKey),

    /// Error reported by the host transport or a resource kind
    #[error("{context}: {source:#}")]
    Host {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// Error reading or writing the state store
    #[error("store: {context}: {source:#}")]
    Store {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// Persisted record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Re-loading a resource right after applying it did not match the plan
    #[error("{key} does not match its planned state after apply: {changes}")]
    Inconsistent { key: ResourceKey, changes: String },

    /// A kind returned a resource that fails its own validation
    #[error("{operation} of {key} produced an invalid resource: {message}")]
    ImplementationBug {
        operation: &'static str,
        key: ResourceKey,
        message: String,
    },

    /// Applying failed and the host was rolled back successfully
    #[error("apply failed and was rolled back: {0}")]
    RolledBack(#[source] Box<Error>),

    /// Applying failed and so did the rollback
    #[error(
        "apply failed: {apply}; rollback ALSO failed: {rollback}; the host is in an unknown state, inspect it and run `rollback` again once fixed"
    )]
    RollbackFailed {
        apply: Box<Error>,
        #[source]
        rollback: Box<Error>,
    },
}

impl Error {
    /// Wrap a transport or kind error with context
    pub fn host(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Host {
            context: context.into(),
            source,
        }
    }

    /// Wrap a store error with context
    pub fn store(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Store {
            context: context.into(),
            source,
        }
    }

    /// Errors detected before any host mutation
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::DuplicateResource(_)
                | Self::UnknownKind(_)
                | Self::Cycle { .. }
        )
    }
}

/// Result type for converge operations
pub type Result<T> = std::result::Result<T, Error>;
