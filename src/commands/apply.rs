//! `hostward apply`: converge the host to the declarations

use anyhow::Result;

use super::{Session, confirm_and_apply};
use crate::Context;
use crate::cli::ApplyArgs;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let declared = session.declarations(&args.paths)?;
    log::info!("Applying {} declared resource(s)", declared.len());

    session.with_engine(|engine| {
        let plan = engine.plan_apply(&declared)?;
        confirm_and_apply(ctx, engine, &plan, "Apply these changes?", args.yes)
    })
}
