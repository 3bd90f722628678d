//! `hostward rollback`: undo a run that was interrupted or failed to roll back

use anyhow::Result;
use converge::Error;

use super::Session;
use crate::Context;
use crate::cli::ConfirmArgs;
use crate::engine::{display_plan, print_summary};
use crate::progress::ApplyProgress;
use crate::ui;

pub fn run(ctx: &Context, args: ConfirmArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    session.with_engine(|engine| {
        match engine.check_interrupted() {
            Ok(()) => {
                ui::success("No interrupted run, nothing to roll back");
                return Ok(());
            }
            Err(Error::InterruptedRun) => {}
            Err(e) => return Err(e.into()),
        }

        let plan = engine.plan_rollback()?;
        display_plan(&plan, ctx.verbose > 0);
        if !plan.is_noop() && !ui::confirm("Roll these resources back?", args.yes)? {
            println!();
            ui::warn("Aborted, the interrupted run is still staged");
            return Ok(());
        }

        let mut progress = ApplyProgress::new(ctx.quiet);
        let result = engine.apply_rollback(&plan, &mut progress);
        progress.finish();
        let summary = result?;
        if !ctx.quiet {
            print_summary(&summary);
        }
        ui::success("Interrupted run rolled back");
        Ok(())
    })
}
