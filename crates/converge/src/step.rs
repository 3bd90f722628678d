//! Steps: the scheduling unit of a blueprint
//!
//! A step holds either one single resource or every instance of one group
//! kind. Steps never change after they are built except for the edges added
//! while [`new_steps`] walks the declarations; resolving or loading a step
//! returns a new step with the same identity and edges.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::resource::{Kind, Registry, Resource, ResourceKey};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Position of a step inside its blueprint
pub type StepIndex = usize;

/// One single resource, or all instances of one group kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    Single {
        resource: Resource,
        /// Steps that must run after this one
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        required_by: Vec<StepIndex>,
    },
    Group {
        kind: String,
        /// Instances, sorted by id
        resources: Vec<Resource>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        required_by: Vec<StepIndex>,
    },
}

impl Step {
    pub fn single(resource: Resource) -> Self {
        Self::Single {
            resource,
            required_by: Vec::new(),
        }
    }

    pub fn group(kind: impl Into<String>) -> Self {
        Self::Group {
            kind: kind.into(),
            resources: Vec::new(),
            required_by: Vec::new(),
        }
    }

    /// Resource kind of everything in this step
    pub fn kind(&self) -> &str {
        match self {
            Self::Single { resource, .. } => &resource.kind,
            Self::Group { kind, .. } => kind,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group { .. })
    }

    /// Contained resources in canonical order
    pub fn resources(&self) -> &[Resource] {
        match self {
            Self::Single { resource, .. } => std::slice::from_ref(resource),
            Self::Group { resources, .. } => resources,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = ResourceKey> + '_ {
        self.resources().iter().map(Resource::key)
    }

    /// Indices of the steps that depend on this one
    pub fn required_by(&self) -> &[StepIndex] {
        match self {
            Self::Single { required_by, .. } | Self::Group { required_by, .. } => required_by,
        }
    }

    fn required_by_mut(&mut self) -> &mut Vec<StepIndex> {
        match self {
            Self::Single { required_by, .. } | Self::Group { required_by, .. } => required_by,
        }
    }

    /// Record that `dependent` must run after this step
    pub(crate) fn add_required_by(&mut self, dependent: StepIndex) {
        let required_by = self.required_by_mut();
        if !required_by.contains(&dependent) {
            required_by.push(dependent);
        }
    }

    /// Rewrite edges after the blueprint reordered its steps
    pub(crate) fn remap_edges(&mut self, position: &[StepIndex]) {
        let required_by = self.required_by_mut();
        for index in required_by.iter_mut() {
            *index = position[*index];
        }
        required_by.sort_unstable();
    }

    /// Append a group instance, keeping instances sorted by id
    pub(crate) fn append_group_resource(&mut self, resource: Resource) {
        if let Self::Group { resources, .. } = self {
            let at = resources.partition_point(|r| r.id < resource.id);
            resources.insert(at, resource);
        }
    }

    /// Same identity and edges, different resources
    pub(crate) fn with_resources(&self, mut new: Vec<Resource>) -> Self {
        match self {
            Self::Single { required_by, .. } => Self::Single {
                resource: new.remove(0),
                required_by: required_by.clone(),
            },
            Self::Group {
                kind, required_by, ..
            } => {
                new.sort_by(|a, b| a.id.cmp(&b.id));
                Self::Group {
                    kind: kind.clone(),
                    resources: new,
                    required_by: required_by.clone(),
                }
            }
        }
    }

    /// Check that the step's shape agrees with the registry
    pub fn validate(&self, registry: &Registry) -> Result<()> {
        let kind = registry.get(self.kind())?;
        if kind.is_group() != self.is_group() {
            return Err(Error::Validation {
                key: self.first_key(),
                message: format!(
                    "kind {} is a {} kind but the step is a {} step",
                    kind.name(),
                    if kind.is_group() { "group" } else { "single" },
                    if self.is_group() { "group" } else { "single" },
                ),
            });
        }
        if let Self::Group { resources, .. } = self {
            if resources.is_empty() {
                return Err(Error::Validation {
                    key: self.first_key(),
                    message: "group step has no resources".to_string(),
                });
            }
            if resources.windows(2).any(|w| w[0].id >= w[1].id) {
                return Err(Error::Validation {
                    key: self.first_key(),
                    message: "group resources must be unique and sorted by id".to_string(),
                });
            }
        }
        for resource in self.resources() {
            if resource.kind != self.kind() {
                return Err(Error::Validation {
                    key: resource.key(),
                    message: format!("resource does not belong in a {} step", self.kind()),
                });
            }
            registry.validate(resource)?;
        }
        Ok(())
    }

    fn first_key(&self) -> ResourceKey {
        self.resources()
            .first()
            .map_or_else(|| ResourceKey::new(self.kind(), ""), Resource::key)
    }

    /// Fill in host-derived values, returning a new step
    pub fn resolve(&self, ctx: &Context, host: &dyn Host, registry: &Registry) -> Result<Self> {
        let resolved = match registry.get(self.kind())? {
            Kind::Single(kind) => {
                let resource = &self.resources()[0];
                vec![
                    kind.resolve(ctx, host, resource)
                        .map_err(|e| host_error(ctx, format!("resolving {resource}"), e))?,
                ]
            }
            Kind::Group(kind) => kind
                .resolve(ctx, host, self.resources())
                .map_err(|e| host_error(ctx, format!("resolving {self}"), e))?,
        };
        self.checked("resolve", resolved, registry)
    }

    /// Observe the host state of this step's resources, returning a new step
    pub fn load(&self, ctx: &Context, host: &dyn Host, registry: &Registry) -> Result<Self> {
        ctx.check()?;
        let loaded = match registry.get(self.kind())? {
            Kind::Single(kind) => {
                let resource = &self.resources()[0];
                vec![
                    kind.load(ctx, host, &resource.id)
                        .map_err(|e| host_error(ctx, format!("loading {resource}"), e))?,
                ]
            }
            Kind::Group(kind) => {
                let ids: Vec<String> = self.resources().iter().map(|r| r.id.clone()).collect();
                kind.load(ctx, host, &ids)
                    .map_err(|e| host_error(ctx, format!("loading {self}"), e))?
            }
        };
        self.checked("load", loaded, registry)
    }

    /// Verify a kind returned exactly our identities in a valid shape
    fn checked(
        &self,
        operation: &'static str,
        resources: Vec<Resource>,
        registry: &Registry,
    ) -> Result<Self> {
        let expected: HashSet<ResourceKey> = self.keys().collect();
        let returned: HashSet<ResourceKey> = resources.iter().map(Resource::key).collect();
        if resources.len() != expected.len() || returned != expected {
            return Err(Error::ImplementationBug {
                operation,
                key: self.first_key(),
                message: format!(
                    "expected {} resource(s) with the same identities, got {}",
                    expected.len(),
                    resources.len()
                ),
            });
        }
        let step = self.with_resources(resources);
        step.validate(registry).map_err(|e| Error::ImplementationBug {
            operation,
            key: step.first_key(),
            message: e.to_string(),
        })?;
        Ok(step)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single { resource, .. } => write!(f, "{resource}"),
            Self::Group {
                kind, resources, ..
            } => {
                let ids: Vec<&str> = resources.iter().map(|r| r.id.as_str()).collect();
                write!(f, "{kind}[{}]", ids.join(", "))
            }
        }
    }
}

/// Map a kind/transport failure, reporting cancellation as such
pub(crate) fn host_error(ctx: &Context, context: String, error: anyhow::Error) -> Error {
    if ctx.is_cancelled() {
        Error::Cancelled
    } else {
        Error::host(context, error)
    }
}

/// Load the host state of a single resource of any kind
pub(crate) fn load_resource(
    ctx: &Context,
    host: &dyn Host,
    registry: &Registry,
    resource: &Resource,
) -> Result<Resource> {
    let step = if registry.is_group(&resource.kind)? {
        let mut step = Step::group(&resource.kind);
        step.append_group_resource(resource.clone());
        step
    } else {
        Step::single(resource.clone())
    };
    let mut loaded = step.load(ctx, host, registry)?;
    Ok(match &mut loaded {
        Step::Single { resource, .. } => resource.clone(),
        Step::Group { resources, .. } => resources.remove(0),
    })
}

/// Build unsorted steps from resources in declaration order
///
/// Every new step depends on the frontier: the steps declared since the
/// last new step was created. Instances of a group kind all land in one
/// step; a later instance joins that step without adding an edge, and the
/// step rejoins the frontier so whatever is declared next still follows
/// it. Edges only ever point from a lower index to a higher one.
pub fn new_steps(registry: &Registry, resources: &[Resource]) -> Result<Vec<Step>> {
    let mut steps: Vec<Step> = Vec::new();
    let mut group_steps: HashMap<String, StepIndex> = HashMap::new();
    let mut seen: HashSet<ResourceKey> = HashSet::new();
    let mut frontier: Vec<StepIndex> = Vec::new();

    for resource in resources {
        registry.validate(resource)?;
        if !seen.insert(resource.key()) {
            return Err(Error::DuplicateResource(resource.key()));
        }

        let existing = if registry.is_group(&resource.kind)? {
            group_steps.get(&resource.kind).copied()
        } else {
            None
        };

        match existing {
            Some(index) => {
                steps[index].append_group_resource(resource.clone());
                if !frontier.contains(&index) {
                    frontier.push(index);
                }
            }
            None => {
                let index = steps.len();
                if registry.is_group(&resource.kind)? {
                    let mut step = Step::group(&resource.kind);
                    step.append_group_resource(resource.clone());
                    steps.push(step);
                    group_steps.insert(resource.kind.clone(), index);
                } else {
                    steps.push(Step::single(resource.clone()));
                }
                for previous in frontier.drain(..) {
                    steps[previous].add_required_by(index);
                }
                frontier.push(index);
            }
        }
    }

    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{file, package, registry};

    #[test]
    fn test_single_resources_chain_in_order() {
        let steps = new_steps(&registry(), &[file("/a", "1"), file("/b", "2")]).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].required_by(), &[1]);
        assert!(steps[1].required_by().is_empty());
    }

    #[test]
    fn test_group_instances_share_one_sorted_step() {
        let steps = new_steps(
            &registry(),
            &[
                package("zsh", "5"),
                package("curl", "8"),
                file("/a", "1"),
                file("/b", "1"),
            ],
        )
        .unwrap();
        assert_eq!(steps.len(), 3);
        assert!(steps[0].is_group());
        let ids: Vec<&str> = steps[0].resources().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["curl", "zsh"]);
        assert_eq!(steps[0].required_by(), &[1]);
    }

    #[test]
    fn test_interleaved_group_instance_adds_no_back_edge() {
        let steps = new_steps(
            &registry(),
            &[package("a", "1"), file("/x", "1"), package("b", "1")],
        )
        .unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].required_by(), &[1]);
        assert!(steps[1].required_by().is_empty());
        assert_eq!(steps[0].resources().len(), 2);
    }

    #[test]
    fn test_joined_group_step_rejoins_frontier() {
        let steps = new_steps(
            &registry(),
            &[
                package("curl", "8"),
                file("/etc/curlrc", "1"),
                package("nginx", "1"),
                file("/etc/nginx.conf", "1"),
            ],
        )
        .unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].required_by(), &[1, 2]);
        assert_eq!(steps[1].required_by(), &[2]);
        assert!(steps[2].required_by().is_empty());
    }

    #[test]
    fn test_duplicate_resource_rejected() {
        let err = new_steps(&registry(), &[file("/a", "1"), file("/a", "2")]).unwrap_err();
        assert!(matches!(err, Error::DuplicateResource(key) if key.id == "/a"));
    }

    #[test]
    fn test_display() {
        let steps = new_steps(&registry(), &[package("b", "1"), package("a", "1")]).unwrap();
        assert_eq!(steps[0].to_string(), "package[a, b]");
    }

    #[test]
    fn test_serialized_discriminator() {
        let step = Step::single(file("/a", "x"));
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "single");
        let back: Step = serde_json::from_value(json).unwrap();
        assert_eq!(back, step);

        let unknown = serde_json::json!({
            "type": "group",
            "kind": "package",
            "resources": [],
            "extra": true
        });
        assert!(serde_json::from_value::<Step>(unknown).is_err());
    }

    #[test]
    fn test_validate_rejects_class_mismatch() {
        let step = Step::single(package("curl", "8"));
        assert!(matches!(
            step.validate(&registry()),
            Err(Error::Validation { .. })
        ));
    }
}
