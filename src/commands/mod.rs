//! Subcommand implementations
//!
//! Every command opens a [`Session`]: settings, the local host, the kind
//! registry and the store location. Engines borrow from the session, so
//! they are built per command with [`Session::with_engine`].

pub mod apply;
pub mod check;
pub mod destroy;
pub mod plan;
pub mod restore;
pub mod rollback;

use anyhow::{Result, bail};
use converge::{Engine, HostStore, Plan, Registry, Resource};
use std::path::PathBuf;

use crate::Context;
use crate::config::{self, Settings};
use crate::engine::{display_plan, print_summary};
use crate::host::LocalHost;
use crate::progress::ApplyProgress;
use crate::{resource, ui};

/// Everything a command needs to drive the engine
pub struct Session {
    run: converge::Context,
    host: LocalHost,
    registry: Registry,
    store_dir: PathBuf,
    settings: Settings,
}

impl Session {
    pub fn open(ctx: &Context) -> Result<Self> {
        let settings = Settings::load()?;
        let store_dir = match &ctx.store {
            Some(dir) => dir.clone(),
            None => settings.store_dir()?,
        };
        let mut run = converge::Context::with_cancel(ctx.cancel.clone());
        if let Some(jobs) = ctx.jobs.or(settings.jobs) {
            run = run.with_jobs(jobs);
        }
        log::debug!("Store: {}", store_dir.display());
        Ok(Self {
            run,
            host: LocalHost::new(),
            registry: resource::registry(),
            store_dir,
            settings,
        })
    }

    /// Declarations from `paths`, or from the configured paths when empty
    pub fn declarations(&self, paths: &[PathBuf]) -> Result<Vec<Resource>> {
        let paths = if paths.is_empty() {
            self.settings.resource_paths()
        } else {
            paths.to_vec()
        };
        if paths.is_empty() {
            bail!(
                "no declarations given; pass files or directories, or set `resources` in {}",
                config::SETTINGS_FILE
            );
        }
        config::load_declarations(&paths)
    }

    /// Run `f` with an engine bound to this session's store
    pub fn with_engine<T>(&self, f: impl FnOnce(&Engine<'_>) -> Result<T>) -> Result<T> {
        let store = HostStore::new(&self.run, &self.host, &self.registry, &self.store_dir);
        let engine = Engine::new(&self.run, &self.host, &self.registry, &store);
        f(&engine)
    }
}

/// Show a plan, confirm it and apply it
///
/// A plan without changes is still applied so its target becomes the last
/// applied state.
fn confirm_and_apply(
    ctx: &Context,
    engine: &Engine<'_>,
    plan: &Plan,
    prompt: &str,
    yes: bool,
) -> Result<()> {
    // the plan is shown before any prompt, even when quiet
    if !ctx.quiet || !yes {
        display_plan(plan, ctx.verbose > 0);
    }
    if !plan.is_noop() && !ui::confirm(prompt, yes)? {
        println!();
        ui::warn("Aborted, nothing was changed");
        return Ok(());
    }

    let mut progress = ApplyProgress::new(ctx.quiet);
    let result = engine.apply(plan, &mut progress);
    progress.finish();
    let summary = result?;
    if !ctx.quiet {
        print_summary(&summary);
    }
    Ok(())
}
