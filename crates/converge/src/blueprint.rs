//! Blueprints: topologically sorted steps describing a whole host
//!
//! A blueprint is built once from a flat resource list and never mutated
//! afterwards. Resolving or loading it returns a structurally identical copy
//! carrying different resource states.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::resource::{Registry, Resource, ResourceKey};
use crate::step::{Step, StepIndex, new_steps};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Where a resource lives inside a blueprint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Location {
    step: StepIndex,
    position: usize,
}

/// An ordered, acyclic sequence of steps
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "BlueprintRecord", into = "BlueprintRecord")]
pub struct Blueprint {
    steps: Vec<Step>,
    index: HashMap<ResourceKey, Location>,
}

/// On-disk shape of a blueprint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BlueprintRecord {
    steps: Vec<Step>,
}

impl Blueprint {
    /// A blueprint managing nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build and sort a blueprint from resources in declaration order
    pub fn new(registry: &Registry, resources: &[Resource]) -> Result<Self> {
        let steps = new_steps(registry, resources)?;
        Self::from_steps(steps)
    }

    /// Sort steps by their dependency edges
    pub fn from_steps(steps: Vec<Step>) -> Result<Self> {
        let steps = sort_steps(steps)?;
        Self::indexed(steps)
    }

    /// Steps already in apply order, with edges only pointing forward
    pub(crate) fn from_sorted(steps: Vec<Step>) -> Result<Self> {
        let len = steps.len();
        for (index, step) in steps.iter().enumerate() {
            if let Some(&bad) = step
                .required_by()
                .iter()
                .find(|&&dependent| dependent <= index || dependent >= len)
            {
                return Err(Error::Cycle {
                    steps: vec![step.to_string(), format!("step #{bad}")],
                });
            }
        }
        Self::indexed(steps)
    }

    /// Build the key index, rejecting duplicate identities
    fn indexed(steps: Vec<Step>) -> Result<Self> {
        let mut index = HashMap::new();
        for (step_index, step) in steps.iter().enumerate() {
            for (position, resource) in step.resources().iter().enumerate() {
                let location = Location {
                    step: step_index,
                    position,
                };
                if index.insert(resource.key(), location).is_some() {
                    return Err(Error::DuplicateResource(resource.key()));
                }
            }
        }
        Ok(Self { steps, index })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// All resources in apply order
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.steps.iter().flat_map(Step::resources)
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&Resource> {
        let location = self.index.get(key)?;
        self.steps[location.step].resources().get(location.position)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.index.contains_key(key)
    }

    /// Number of resources
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Check every step and resource against the registry
    pub fn validate(&self, registry: &Registry) -> Result<()> {
        self.steps.iter().try_for_each(|step| step.validate(registry))
    }

    /// Fill in host-derived values, returning a new blueprint
    pub fn resolve(&self, ctx: &Context, host: &dyn Host, registry: &Registry) -> Result<Self> {
        let steps = self
            .steps
            .iter()
            .map(|step| step.resolve(ctx, host, registry))
            .collect::<Result<Vec<_>>>()?;
        Self::indexed(steps)
    }

    /// Observe the host state of every resource, returning a new blueprint
    ///
    /// Steps are loaded concurrently, bounded by `ctx.jobs`. Loading only
    /// reads from the host so completion order does not matter; the result
    /// keeps this blueprint's order.
    pub fn load(&self, ctx: &Context, host: &dyn Host, registry: &Registry) -> Result<Self> {
        let steps = if ctx.jobs <= 1 || self.steps.len() <= 1 {
            self.steps
                .iter()
                .map(|step| step.load(ctx, host, registry))
                .collect::<Result<Vec<_>>>()?
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(ctx.jobs)
                .build()
                .map_err(|e| Error::host("creating load thread pool", e.into()))?;
            pool.install(|| {
                self.steps
                    .par_iter()
                    .map(|step| step.load(ctx, host, registry))
                    .collect::<Result<Vec<_>>>()
            })?
        };
        log::debug!("Loaded {} step(s) from {}", steps.len(), host.name());
        Self::indexed(steps)
    }
}

impl PartialEq for Blueprint {
    fn eq(&self, other: &Self) -> bool {
        self.steps == other.steps
    }
}

impl TryFrom<BlueprintRecord> for Blueprint {
    type Error = Error;

    fn try_from(record: BlueprintRecord) -> Result<Self> {
        Self::from_sorted(record.steps)
    }
}

impl From<Blueprint> for BlueprintRecord {
    fn from(blueprint: Blueprint) -> Self {
        Self {
            steps: blueprint.steps,
        }
    }
}

/// Kahn's algorithm over `required_by` edges
///
/// Ties are broken in FIFO order starting from the input order, so sorting
/// the same steps twice yields the same order. Edges are rewritten to the
/// new positions.
fn sort_steps(steps: Vec<Step>) -> Result<Vec<Step>> {
    let len = steps.len();
    let mut in_degree = vec![0usize; len];
    for step in &steps {
        for &dependent in step.required_by() {
            match in_degree.get_mut(dependent) {
                Some(count) => *count += 1,
                None => {
                    return Err(Error::Validation {
                        key: step.keys().next().unwrap_or_else(|| {
                            ResourceKey::new(step.kind(), "")
                        }),
                        message: format!("edge to missing step #{dependent}"),
                    });
                }
            }
        }
    }

    let mut queue: VecDeque<StepIndex> = (0..len).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(len);
    while let Some(index) = queue.pop_front() {
        order.push(index);
        for &dependent in steps[index].required_by() {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() < len {
        let stuck = (0..len)
            .filter(|&i| in_degree[i] > 0)
            .map(|i| steps[i].to_string())
            .collect();
        return Err(Error::Cycle { steps: stuck });
    }

    let mut position = vec![0; len];
    for (new, &old) in order.iter().enumerate() {
        position[old] = new;
    }

    let mut slots: Vec<Option<Step>> = steps.into_iter().map(Some).collect();
    Ok(order
        .iter()
        .filter_map(|&old| slots[old].take())
        .map(|mut step| {
            step.remap_edges(&position);
            step
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{file, package, registry};

    #[test]
    fn test_new_keeps_declaration_order() {
        let bp = Blueprint::new(
            &registry(),
            &[file("/c", "1"), file("/a", "1"), file("/b", "1")],
        )
        .unwrap();
        let ids: Vec<&str> = bp.resources().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["/c", "/a", "/b"]);
        assert_eq!(bp.len(), 3);
    }

    #[test]
    fn test_sort_reorders_by_edges() {
        let mut first = Step::single(file("/first", "1"));
        let second = Step::single(file("/second", "1"));
        let mut third = Step::single(file("/third", "1"));
        // third -> first -> second
        third.add_required_by(1);
        first.add_required_by(0);
        let bp = Blueprint::from_steps(vec![second, first, third]).unwrap();
        let ids: Vec<&str> = bp.resources().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["/third", "/first", "/second"]);
        assert_eq!(bp.steps()[0].required_by(), &[1]);
        assert_eq!(bp.steps()[1].required_by(), &[2]);
    }

    #[test]
    fn test_cycle_is_an_error() {
        let mut a = Step::single(file("/a", "1"));
        let mut b = Step::single(file("/b", "1"));
        let c = Step::single(file("/c", "1"));
        a.add_required_by(1);
        b.add_required_by(0);
        let err = Blueprint::from_steps(vec![a, b, c]).unwrap_err();
        match err {
            Error::Cycle { steps } => {
                assert_eq!(steps, ["file[/a]", "file[/b]"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_group_declared_around_configs_sorts_first() {
        let bp = Blueprint::new(
            &registry(),
            &[
                package("curl", "8"),
                file("/etc/curlrc", "1"),
                package("nginx", "1"),
                file("/etc/nginx.conf", "1"),
            ],
        )
        .unwrap();
        let order: Vec<String> = bp.steps().iter().map(ToString::to_string).collect();
        assert_eq!(
            order,
            ["package[curl, nginx]", "file[/etc/curlrc]", "file[/etc/nginx.conf]"]
        );
    }

    #[test]
    fn test_from_sorted_rejects_backward_edges() {
        let mut a = Step::single(file("/a", "1"));
        a.add_required_by(0);
        assert!(matches!(Blueprint::from_sorted(vec![a]), Err(Error::Cycle { .. })));
    }

    #[test]
    fn test_get_by_key() {
        let bp = Blueprint::new(
            &registry(),
            &[package("b", "2"), package("a", "1"), file("/x", "x")],
        )
        .unwrap();
        let key = ResourceKey::new("package", "b");
        assert_eq!(bp.get(&key), Some(&package("b", "2")));
        assert!(bp.contains(&ResourceKey::new("file", "/x")));
        assert!(bp.get(&ResourceKey::new("file", "/y")).is_none());
    }

    #[test]
    fn test_serde_round_trip_rebuilds_index() {
        let bp = Blueprint::new(&registry(), &[package("a", "1"), file("/x", "x")]).unwrap();
        let json = serde_json::to_string(&bp).unwrap();
        let back: Blueprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bp);
        assert!(back.contains(&ResourceKey::new("package", "a")));
    }

    #[test]
    fn test_deserialize_rejects_backward_edges() {
        let json = r#"{"steps":[
            {"type":"single","resource":{"kind":"file","id":"/a"},"required_by":[1]},
            {"type":"single","resource":{"kind":"file","id":"/b"},"required_by":[0]}
        ]}"#;
        assert!(serde_json::from_str::<Blueprint>(json).is_err());
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        assert!(serde_json::from_str::<Blueprint>(r#"{"steps":[],"name":"x"}"#).is_err());
    }
}
