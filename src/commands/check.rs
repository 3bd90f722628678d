//! `hostward check`: compare the host with the last applied state

use anyhow::{Result, bail};

use super::Session;
use crate::Context;
use crate::engine::display_drift;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let drifted = session.with_engine(|engine| {
        if let Err(converge::Error::InterruptedRun) = engine.check_interrupted() {
            ui::warn("A previous run did not complete; run `hostward rollback` to undo it.");
        }
        Ok(engine.drift()?)
    })?;

    if !ctx.quiet || !drifted.is_empty() {
        display_drift(&drifted);
    }
    if !drifted.is_empty() {
        bail!("{} resource(s) drifted from the last applied state", drifted.len());
    }
    Ok(())
}
