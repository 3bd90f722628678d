//! `hostward destroy`: hand every managed resource back in its original state

use anyhow::Result;

use super::{Session, confirm_and_apply};
use crate::Context;
use crate::cli::ConfirmArgs;

pub fn run(ctx: &Context, args: ConfirmArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    session.with_engine(|engine| {
        let plan = engine.plan_destroy()?;
        confirm_and_apply(
            ctx,
            engine,
            &plan,
            "Return every managed resource to its original state?",
            args.yes,
        )
    })
}
