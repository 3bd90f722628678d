mod cli;
mod commands;
mod config;
mod engine;
mod host;
mod paths;
mod progress;
mod resource;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use converge::CancelToken;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Store directory from `--store`, overriding the settings file
    pub store: Option<PathBuf>,
    pub jobs: Option<usize>,
    /// Cancelled on Ctrl-C
    pub cancel: CancelToken,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        log::warn!("Interrupted, stopping after the current operation");
        handler_token.cancel();
    }) {
        log::warn!("Could not install Ctrl-C handler: {e}");
    }

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        store: cli.store,
        jobs: cli.jobs,
        cancel,
    };

    match run(&ctx, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Plan(args) => commands::plan::run(ctx, args),
        Command::Apply(args) => commands::apply::run(ctx, args),
        Command::Destroy(args) => commands::destroy::run(ctx, args),
        Command::Check => commands::check::run(ctx),
        Command::Restore(args) => commands::restore::run(ctx, args),
        Command::Rollback(args) => commands::rollback::run(ctx, args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "hostward", &mut io::stdout());
            Ok(())
        }
    }
}
