//! Reconciliation engine
//!
//! Ties blueprints, plans and the store together:
//! - refuses to plan while a previous run is staged or the host drifted
//! - applies actions strictly in plan order, re-loading every applied
//!   step to verify it reached the planned state
//! - rolls back everything the failed plan touched
//! - commits the target as "last" only after a fully successful apply

use crate::blueprint::Blueprint;
use crate::context::{Context, ProgressCallback};
use crate::diff::{DiffSummary, ResourceDiff};
use crate::error::{Error, Result};
use crate::host::Host;
use crate::plan::{Action, Plan, merge_orphans};
use crate::resource::{Kind, Registry, Resource};
use crate::step::{Step, host_error, load_resource};
use crate::store::Store;

/// Drives one host towards declared blueprints
pub struct Engine<'a> {
    ctx: &'a Context,
    host: &'a dyn Host,
    registry: &'a Registry,
    store: &'a dyn Store,
}

impl<'a> Engine<'a> {
    pub fn new(
        ctx: &'a Context,
        host: &'a dyn Host,
        registry: &'a Registry,
        store: &'a dyn Store,
    ) -> Self {
        Self {
            ctx,
            host,
            registry,
            store,
        }
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    /// Fail if a previous run left a staged target behind
    pub fn check_interrupted(&self) -> Result<()> {
        if self.store.has_target_blueprint()? {
            return Err(Error::InterruptedRun);
        }
        Ok(())
    }

    /// Build a blueprint from declarations and resolve it against the host
    pub fn prepare(&self, resources: &[Resource]) -> Result<Blueprint> {
        let blueprint = Blueprint::new(self.registry, resources)?;
        blueprint.resolve(self.ctx, self.host, self.registry)
    }

    /// Differences between the last applied blueprint and the host
    ///
    /// Each diff goes from the last committed value to the observed one.
    /// Empty when nothing was ever applied.
    pub fn drift(&self) -> Result<Vec<ResourceDiff>> {
        let Some(last) = self.store.load_last_blueprint()? else {
            return Ok(Vec::new());
        };
        let observed = last.load(self.ctx, self.host, self.registry)?;
        Ok(last
            .resources()
            .filter_map(|committed| {
                let current = observed.get(&committed.key())?;
                let diff = ResourceDiff::new(committed, current);
                (!diff.is_empty()).then_some(diff)
            })
            .collect())
    }

    /// Load the last blueprint, failing if the host no longer matches it
    pub fn validate_drift(&self) -> Result<Option<Blueprint>> {
        let drifted = self.drift()?;
        if !drifted.is_empty() {
            for diff in &drifted {
                log::warn!("{} drifted: {}", diff.key, diff.changed_paths());
            }
            return Err(Error::Drift {
                resources: drifted.into_iter().map(|d| d.key).collect(),
            });
        }
        self.store.load_last_blueprint()
    }

    /// Plan a resolved target against the last committed blueprint
    pub fn plan(&self, target: &Blueprint, last: Option<&Blueprint>) -> Result<Plan> {
        Plan::compute(self.registry, target, last, |resource| {
            self.original_of(resource)
        })
    }

    /// Guarded plan for declarations: interrupted-run and drift checks first
    pub fn plan_apply(&self, resources: &[Resource]) -> Result<Plan> {
        self.check_interrupted()?;
        let target = self.prepare(resources)?;
        let last = self.validate_drift()?;
        self.plan(&target, last.as_ref())
    }

    /// Plan returning every managed resource to its original state
    pub fn plan_destroy(&self) -> Result<Plan> {
        self.check_interrupted()?;
        let last = self.validate_drift()?;
        self.plan(&Blueprint::empty(), last.as_ref())
    }

    /// Plan re-applying the last blueprint over whatever the host holds now
    pub fn plan_restore(&self) -> Result<Plan> {
        self.check_interrupted()?;
        let last = self.store.load_last_blueprint()?.unwrap_or_default();
        let current = last.load(self.ctx, self.host, self.registry)?;
        Plan::against(&last, &current)
    }

    /// Plan undoing an interrupted run from its staged target
    ///
    /// Resources of the staged target go back to their last committed value,
    /// or to their original value when they were never committed.
    pub fn plan_rollback(&self) -> Result<Plan> {
        let target = self.store.load_target_blueprint()?;
        let last = self.store.load_last_blueprint()?;
        let rollback = self.rollback_blueprint(&target, last.as_ref())?;
        let current = rollback.load(self.ctx, self.host, self.registry)?;
        Plan::against(&rollback, &current)
    }

    /// The staged target's steps carrying last or original values, plus orphans
    fn rollback_blueprint(
        &self,
        target: &Blueprint,
        last: Option<&Blueprint>,
    ) -> Result<Blueprint> {
        let mut steps = Vec::with_capacity(target.steps().len());
        for step in target.steps() {
            let mut resources = Vec::with_capacity(step.resources().len());
            for resource in step.resources() {
                let key = resource.key();
                match last.and_then(|l| l.get(&key)) {
                    Some(committed) => resources.push(committed.clone()),
                    None => resources.push(self.store.load_original_resource(&key)?),
                }
            }
            steps.push(step.with_resources(resources));
        }
        let restored = Blueprint::from_sorted(steps)?;
        let orphans: Vec<Resource> = last
            .into_iter()
            .flat_map(|l| l.resources())
            .filter(|r| !target.contains(&r.key()))
            .cloned()
            .collect();
        if orphans.is_empty() {
            return Ok(restored);
        }
        merge_orphans(self.registry, &restored, last, orphans)
    }

    /// Original state of a resource, captured from the host on first use
    fn original_of(&self, resource: &Resource) -> Result<Resource> {
        let key = resource.key();
        if self.store.has_original_resource(&key)? {
            return self.store.load_original_resource(&key);
        }
        let original = load_resource(self.ctx, self.host, self.registry, resource)?;
        log::debug!("Recording original state of {key}");
        self.store.save_original_resource(&original)?;
        Ok(original)
    }

    /// Apply a plan and commit its target as the last blueprint
    ///
    /// On failure everything the plan touched is rolled back and the error
    /// is wrapped in [`Error::RolledBack`] or [`Error::RollbackFailed`].
    /// A cancelled run is not rolled back: the target stays staged and the
    /// next run must `rollback` first.
    pub fn apply<P: ProgressCallback>(&self, plan: &Plan, progress: &mut P) -> Result<DiffSummary> {
        self.store.save_target_blueprint(plan.target())?;

        let mut touched = Vec::new();
        match self.apply_actions(plan, progress, &mut touched) {
            Ok(()) => {
                self.store.save_last_blueprint(plan.target())?;
                self.store.delete_target_blueprint()?;
                log::info!("Applied {} resource(s)", plan.target().len());
                Ok(plan.summary())
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) => {
                log::warn!("Apply failed, rolling back {} resource(s): {err}", touched.len());
                progress.on_rollback_start(&err);
                match self.roll_back(&touched, progress) {
                    Ok(()) => {
                        self.store.delete_target_blueprint()?;
                        Err(Error::RolledBack(Box::new(err)))
                    }
                    Err(rollback) => Err(Error::RollbackFailed {
                        apply: Box::new(err),
                        rollback: Box::new(rollback),
                    }),
                }
            }
        }
    }

    /// Apply a plan from [`Engine::plan_rollback`] and clear the staged target
    ///
    /// The last blueprint is left as is.
    pub fn apply_rollback<P: ProgressCallback>(
        &self,
        plan: &Plan,
        progress: &mut P,
    ) -> Result<DiffSummary> {
        self.apply_actions(plan, progress, &mut Vec::new())?;
        self.store.delete_target_blueprint()?;
        Ok(plan.summary())
    }

    /// Restore the pre-plan state of touched resources
    fn roll_back<P: ProgressCallback>(&self, touched: &[Resource], progress: &mut P) -> Result<()> {
        let blueprint = Blueprint::new(self.registry, touched)?;
        let current = blueprint.load(self.ctx, self.host, self.registry)?;
        let plan = Plan::against(&blueprint, &current)?;
        self.apply_actions(&plan, progress, &mut Vec::new())
    }

    /// Apply actions in order, recording the before-state of each changed resource
    fn apply_actions<P: ProgressCallback>(
        &self,
        plan: &Plan,
        progress: &mut P,
        touched: &mut Vec<Resource>,
    ) -> Result<()> {
        let total = plan.actions().iter().filter(|a| !a.is_noop()).count();
        let steps = plan.planned().steps().iter().zip(plan.actions());
        for (index, (step, action)) in steps.filter(|(_, a)| !a.is_noop()).enumerate() {
            self.ctx.check()?;
            touched.extend(action.changes().map(|diff| Resource {
                kind: diff.key.kind.clone(),
                id: diff.key.id.clone(),
                state: diff.before.clone(),
            }));

            progress.on_step_start(index, total, action);
            self.apply_action(action)?;
            self.verify(step, action)?;
            progress.on_step_complete(index, action);
        }
        Ok(())
    }

    fn apply_action(&self, action: &Action) -> Result<()> {
        log::debug!("Applying {action}");
        match self.registry.get(&action.kind)? {
            Kind::Single(kind) => action.apply.iter().try_for_each(|resource| {
                kind.apply(self.ctx, self.host, resource)
                    .map_err(|e| host_error(self.ctx, format!("applying {resource}"), e))
            }),
            Kind::Group(kind) => kind
                .apply(self.ctx, self.host, &action.apply)
                .map_err(|e| host_error(self.ctx, format!("applying {action}"), e)),
        }
    }

    /// Re-load an applied step and compare it with the planned state
    fn verify(&self, step: &Step, action: &Action) -> Result<()> {
        let observed = step.load(self.ctx, self.host, self.registry)?;
        for planned in &action.apply {
            let Some(current) = observed.resources().iter().find(|r| r.id == planned.id) else {
                continue;
            };
            let diff = ResourceDiff::new(planned, current);
            if !diff.is_empty() {
                return Err(Error::Inconsistent {
                    key: diff.key.clone(),
                    changes: diff.changed_paths(),
                });
            }
        }
        Ok(())
    }
}
