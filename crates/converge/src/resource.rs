//! Resources, resource kinds and the kind registry
//!
//! A [`Resource`] is plain data: a kind name, an id unique within that kind
//! and the desired (or observed) state as a JSON object. `None` state is the
//! "absent" sentinel shared by every kind.
//!
//! Behaviour lives in kinds. A kind is either *single* (each instance is
//! applied on its own) or *group* (all instances of the kind are applied in
//! one transactional call, e.g. a package manager). Kinds are looked up in an
//! explicit [`Registry`] that callers pass around; there is no global state.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::host::Host;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Identity of a resource: `(kind, id)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: String,
    pub id: String,
}

impl ResourceKey {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.id)
    }
}

/// A unit of desired or observed configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resource {
    pub kind: String,
    pub id: String,
    /// Kind-specific parameters, `None` when the resource must not exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

impl Resource {
    pub fn new(kind: impl Into<String>, id: impl Into<String>, state: Value) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            state: Some(state),
        }
    }

    /// A resource that must not exist on the host
    pub fn absent(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            state: None,
        }
    }

    /// Build a resource from a kind's typed state
    pub fn from_typed<T: Serialize>(
        kind: impl Into<String>,
        id: impl Into<String>,
        state: Option<&T>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            kind: kind.into(),
            id: id.into(),
            state: state.map(serde_json::to_value).transpose()?,
        })
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.kind, &self.id)
    }

    pub fn is_absent(&self) -> bool {
        self.state.is_none()
    }

    /// Same identity with a different state
    pub fn with_state(&self, state: Option<Value>) -> Self {
        Self {
            kind: self.kind.clone(),
            id: self.id.clone(),
            state,
        }
    }

    /// Parse the state into a kind's typed representation
    ///
    /// Kinds should deny unknown fields on `T` so typos in declarations
    /// are rejected instead of silently ignored.
    pub fn typed_state<T: DeserializeOwned>(&self) -> anyhow::Result<Option<T>> {
        self.state
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.id)
    }
}

/// Behaviour of a kind whose instances are applied one at a time
pub trait SingleKind: Send + Sync {
    /// Kind name as used in declarations (e.g. "file")
    fn name(&self) -> &'static str;

    /// Structural validation of id and state, no host access
    fn validate(&self, resource: &Resource) -> anyhow::Result<()>;

    /// Fill in values that can only be computed against the host
    ///
    /// Must be idempotent and must return a resource with the same identity.
    fn resolve(
        &self,
        _ctx: &Context,
        _host: &dyn Host,
        resource: &Resource,
    ) -> anyhow::Result<Resource> {
        Ok(resource.clone())
    }

    /// Observe the current state of `id` on the host
    fn load(&self, ctx: &Context, host: &dyn Host, id: &str) -> anyhow::Result<Resource>;

    /// Converge the host to `resource`
    fn apply(&self, ctx: &Context, host: &dyn Host, resource: &Resource) -> anyhow::Result<()>;
}

/// Behaviour of a kind whose instances must be applied together
pub trait GroupKind: Send + Sync {
    /// Kind name as used in declarations (e.g. "apt")
    fn name(&self) -> &'static str;

    /// Structural validation of id and state, no host access
    fn validate(&self, resource: &Resource) -> anyhow::Result<()>;

    /// Fill in host-derived values for every instance
    fn resolve(
        &self,
        _ctx: &Context,
        _host: &dyn Host,
        resources: &[Resource],
    ) -> anyhow::Result<Vec<Resource>> {
        Ok(resources.to_vec())
    }

    /// Observe the current state of every id, in one host round-trip if possible
    fn load(&self, ctx: &Context, host: &dyn Host, ids: &[String])
    -> anyhow::Result<Vec<Resource>>;

    /// Converge all given instances in one transactional call
    fn apply(&self, ctx: &Context, host: &dyn Host, resources: &[Resource])
    -> anyhow::Result<()>;
}

/// A registered kind
#[derive(Clone)]
pub enum Kind {
    Single(Arc<dyn SingleKind>),
    Group(Arc<dyn GroupKind>),
}

impl Kind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Single(kind) => kind.name(),
            Self::Group(kind) => kind.name(),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }

    fn validate(&self, resource: &Resource) -> anyhow::Result<()> {
        match self {
            Self::Single(kind) => kind.validate(resource),
            Self::Group(kind) => kind.validate(resource),
        }
    }
}

impl fmt::Debug for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(kind) => write!(f, "Single({})", kind.name()),
            Self::Group(kind) => write!(f, "Group({})", kind.name()),
        }
    }
}

/// Maps kind names to their behaviour
#[derive(Debug, Clone, Default)]
pub struct Registry {
    kinds: BTreeMap<String, Kind>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_single(&mut self, kind: impl SingleKind + 'static) -> &mut Self {
        self.kinds
            .insert(kind.name().to_string(), Kind::Single(Arc::new(kind)));
        self
    }

    pub fn register_group(&mut self, kind: impl GroupKind + 'static) -> &mut Self {
        self.kinds
            .insert(kind.name().to_string(), Kind::Group(Arc::new(kind)));
        self
    }

    /// Look up a kind by name
    pub fn get(&self, name: &str) -> Result<&Kind> {
        self.kinds
            .get(name)
            .ok_or_else(|| Error::UnknownKind(name.to_string()))
    }

    pub fn is_group(&self, name: &str) -> Result<bool> {
        Ok(self.get(name)?.is_group())
    }

    /// Registered kind names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    /// Check a resource against its kind's structural rules
    pub fn validate(&self, resource: &Resource) -> Result<()> {
        let kind = self.get(&resource.kind)?;
        if resource.id.is_empty() {
            return Err(Error::Validation {
                key: resource.key(),
                message: "id must not be empty".to_string(),
            });
        }
        if let Some(state) = &resource.state
            && !state.is_object()
        {
            return Err(Error::Validation {
                key: resource.key(),
                message: format!("state must be a table, got {state}"),
            });
        }
        kind.validate(resource).map_err(|e| Error::Validation {
            key: resource.key(),
            message: format!("{e:#}"),
        })
    }
}
