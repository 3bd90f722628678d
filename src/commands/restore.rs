//! `hostward restore`: re-apply the last applied state over manual changes

use anyhow::Result;

use super::{Session, confirm_and_apply};
use crate::Context;
use crate::cli::ConfirmArgs;

pub fn run(ctx: &Context, args: ConfirmArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    session.with_engine(|engine| {
        let plan = engine.plan_restore()?;
        confirm_and_apply(
            ctx,
            engine,
            &plan,
            "Overwrite these manual changes?",
            args.yes,
        )
    })
}
