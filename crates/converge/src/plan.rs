//! Plan computation
//!
//! A plan pairs every step of a blueprint with the state each resource is in
//! *before* the plan runs, and records what applying the step will change.

use crate::blueprint::Blueprint;
use crate::diff::{DiffSummary, ResourceDiff, Verdict};
use crate::error::{Error, Result};
use crate::resource::{Registry, Resource, ResourceKey};
use crate::step::Step;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// What must happen to one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Resource kind of the step
    pub kind: String,
    /// Whether the step applies a group kind in one call
    pub group: bool,
    /// One diff per resource in the step, in step order
    pub diffs: Vec<ResourceDiff>,
    /// Planned resources that need applying (verdict other than no-op)
    pub apply: Vec<Resource>,
}

impl Action {
    fn new(step: &Step, before: &HashMap<ResourceKey, Resource>) -> Result<Self> {
        let mut diffs = Vec::with_capacity(step.resources().len());
        let mut apply = Vec::new();
        for planned in step.resources() {
            let key = planned.key();
            let before = before.get(&key).ok_or(Error::MissingOriginal(key))?;
            let diff = ResourceDiff::new(before, planned);
            if !diff.is_empty() {
                apply.push(planned.clone());
            }
            diffs.push(diff);
        }
        Ok(Self {
            kind: step.kind().to_string(),
            group: step.is_group(),
            diffs,
            apply,
        })
    }

    pub fn is_noop(&self) -> bool {
        self.apply.is_empty()
    }

    /// Diffs that change something
    pub fn changes(&self) -> impl Iterator<Item = &ResourceDiff> {
        self.diffs.iter().filter(|d| d.verdict.is_change())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.diffs.iter().map(|d| d.key.id.as_str()).collect();
        write!(f, "{}[{}]", self.kind, ids.join(", "))
    }
}

/// The ordered actions needed to move a host to a blueprint
#[derive(Debug, Clone)]
pub struct Plan {
    target: Blueprint,
    planned: Blueprint,
    actions: Vec<Action>,
}

impl Plan {
    /// Plan `target` against the last committed blueprint
    ///
    /// Resources already in `last` start from their last committed value.
    /// New resources start from their original value, obtained through
    /// `load_original` (which is expected to persist it on first use).
    /// Resources in `last` but no longer in `target` are restored to their
    /// original value.
    pub fn compute<F>(
        registry: &Registry,
        target: &Blueprint,
        last: Option<&Blueprint>,
        mut load_original: F,
    ) -> Result<Self>
    where
        F: FnMut(&Resource) -> Result<Resource>,
    {
        let mut before: HashMap<ResourceKey, Resource> = HashMap::new();
        for resource in target.resources() {
            let key = resource.key();
            let value = match last.and_then(|l| l.get(&key)) {
                Some(committed) => committed.clone(),
                None => load_original(resource)?,
            };
            before.insert(key, value);
        }

        let mut orphans = Vec::new();
        if let Some(last) = last {
            for committed in last.resources() {
                let key = committed.key();
                if target.contains(&key) {
                    continue;
                }
                log::debug!("{key} is no longer declared, restoring its original state");
                orphans.push(load_original(committed)?);
                before.insert(key, committed.clone());
            }
        }

        let planned = if orphans.is_empty() {
            target.clone()
        } else {
            merge_orphans(registry, target, last, orphans)?
        };

        Self::build(target.clone(), planned, &before)
    }

    /// Plan `target` against an observed blueprint with the same resources
    ///
    /// Used to converge a host whose current state was just loaded, e.g.
    /// when restoring or rolling back.
    pub fn against(target: &Blueprint, current: &Blueprint) -> Result<Self> {
        let before: HashMap<ResourceKey, Resource> = current
            .resources()
            .map(|r| (r.key(), r.clone()))
            .collect();
        Self::build(target.clone(), target.clone(), &before)
    }

    fn build(
        target: Blueprint,
        planned: Blueprint,
        before: &HashMap<ResourceKey, Resource>,
    ) -> Result<Self> {
        let actions = planned
            .steps()
            .iter()
            .map(|step| Action::new(step, before))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            target,
            planned,
            actions,
        })
    }

    /// The blueprint that becomes "last" once this plan is applied
    pub fn target(&self) -> &Blueprint {
        &self.target
    }

    /// Target plus restored orphans, in apply order
    pub fn planned(&self) -> &Blueprint {
        &self.planned
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Verdict counts across all actions
    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for diff in self.actions.iter().flat_map(|a| &a.diffs) {
            summary.add(diff.verdict);
        }
        summary
    }

    pub fn is_noop(&self) -> bool {
        self.actions.iter().all(Action::is_noop)
    }

    /// Diff of one resource, if planned
    pub fn diff(&self, key: &ResourceKey) -> Option<&ResourceDiff> {
        self.actions
            .iter()
            .flat_map(|a| &a.diffs)
            .find(|d| &d.key == key)
    }

    /// Number of resources with the given verdict
    pub fn count(&self, verdict: Verdict) -> usize {
        self.actions
            .iter()
            .flat_map(|a| &a.diffs)
            .filter(|d| d.verdict == verdict)
            .count()
    }
}

/// Add restored resources to the target's steps without adding edges
///
/// An orphan of a group kind joins the step of its kind when there is one.
/// Any other orphan gets a step of its own right after the step holding the
/// closest resource that preceded it in `last`. Orphans with no such
/// neighbour go first, keeping their relative order.
pub(crate) fn merge_orphans(
    registry: &Registry,
    target: &Blueprint,
    last: Option<&Blueprint>,
    orphans: Vec<Resource>,
) -> Result<Blueprint> {
    let mut steps: Vec<Step> = target.steps().to_vec();
    let last_order: Vec<ResourceKey> = last
        .map(|l| l.resources().map(Resource::key).collect())
        .unwrap_or_default();
    let mut orphans: HashMap<ResourceKey, Resource> =
        orphans.into_iter().map(|r| (r.key(), r)).collect();
    let mut front = 0;

    for (position, key) in last_order.iter().enumerate() {
        let Some(orphan) = orphans.remove(key) else {
            continue;
        };
        let group = registry.is_group(&orphan.kind)?;
        if group
            && let Some(step) = steps
                .iter_mut()
                .find(|s| s.is_group() && s.kind() == orphan.kind)
        {
            step.append_group_resource(orphan);
            continue;
        }

        let anchor = last_order[..position]
            .iter()
            .rev()
            .find_map(|prev| steps.iter().position(|s| s.keys().any(|k| &k == prev)));
        let at = match anchor {
            Some(at) => at + 1,
            None => {
                front += 1;
                front - 1
            }
        };
        let step = if group {
            let mut step = Step::group(&orphan.kind);
            step.append_group_resource(orphan);
            step
        } else {
            Step::single(orphan)
        };
        insert_step(&mut steps, at, step);
    }
    Blueprint::from_sorted(steps)
}

/// Insert an unconnected step, shifting the edges of the steps after it
fn insert_step(steps: &mut Vec<Step>, at: usize, step: Step) {
    let position: Vec<usize> = (0..steps.len())
        .map(|index| if index < at { index } else { index + 1 })
        .collect();
    for existing in steps.iter_mut() {
        existing.remap_edges(&position);
    }
    steps.insert(at, step);
}
