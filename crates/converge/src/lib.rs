//! # Converge
//!
//! A reconciliation engine for declarative host configuration.
//!
//! Users declare the resources a host should have; the engine builds a
//! dependency-ordered [`Blueprint`], compares it with what was applied last
//! time and what was there before management started, and converges the
//! host one [`Step`] at a time.
//!
//! ## Core Concepts
//!
//! - **Resource**: `(kind, id)` plus a JSON state, `None` meaning absent
//! - **Kind**: behaviour for a resource type, either *single* (applied one
//!   instance at a time) or *group* (all instances applied together)
//! - **Step**: one single resource, or every instance of one group kind
//! - **Blueprint**: topologically sorted steps for a whole host
//! - **Plan**: one [`Action`] per step, with a [`Verdict`] per resource
//! - **Store**: original, last and staged target records
//!
//! ## Example
//!
//! ```ignore
//! use converge::{Context, Engine, HostStore, NoProgress, Registry};
//!
//! let ctx = Context::new();
//! let mut registry = Registry::new();
//! registry.register_single(FileKind).register_group(AptKind);
//!
//! let store = HostStore::new(&ctx, &host, &registry, "/var/lib/hostward");
//! let engine = Engine::new(&ctx, &host, &registry, &store);
//!
//! let plan = engine.plan_apply(&declared)?;
//! let summary = engine.apply(&plan, &mut NoProgress)?;
//! ```
//!
//! ## Provider Traits
//!
//! - [`Host`]: runs commands and touches files on the managed machine
//! - [`SingleKind`] / [`GroupKind`]: resource behaviour
//! - [`Store`]: durable engine state
//! - [`ProgressCallback`]: receives progress updates

pub mod blueprint;
pub mod context;
pub mod diff;
pub mod engine;
pub mod error;
pub mod host;
pub mod plan;
pub mod resource;
pub mod step;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types at crate root
pub use blueprint::Blueprint;
pub use context::{CancelToken, Context, NoProgress, ProgressCallback};
pub use diff::{DiffSummary, FieldChange, ResourceDiff, Verdict, diff_states};
pub use engine::Engine;
pub use error::{Error, Result};
pub use host::{Cmd, CmdOutput, FileKind, FileStat, Host};
pub use plan::{Action, Plan};
pub use resource::{GroupKind, Kind, Registry, Resource, ResourceKey, SingleKind};
pub use step::{Step, StepIndex, new_steps};
pub use store::{HostStore, Store};
