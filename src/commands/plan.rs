//! `hostward plan`: show what apply would change

use anyhow::Result;

use super::Session;
use crate::Context;
use crate::cli::PlanArgs;
use crate::engine::display_plan;
use crate::ui;

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let declared = session.declarations(&args.paths)?;
    log::info!("Planning {} declared resource(s)", declared.len());

    let plan = session.with_engine(|engine| Ok(engine.plan_apply(&declared)?))?;
    display_plan(&plan, ctx.verbose > 0);
    if !plan.is_noop() && !ctx.quiet {
        println!();
        ui::dim("Run `hostward apply` to make these changes.");
    }
    Ok(())
}
