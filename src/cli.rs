use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hostward")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(
    about = "Declarative host configuration with drift detection and rollback",
    long_about = None
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Directory holding engine state (original, last and staged records)
    #[arg(long, global = true, env = "HOSTWARD_STORE_DIR")]
    pub store: Option<PathBuf>,

    /// Number of steps loaded concurrently when reading host state
    #[arg(short, long, global = true)]
    pub jobs: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change, without changing anything
    Plan(PlanArgs),

    /// Converge the host to the declared resources
    Apply(ApplyArgs),

    /// Return every managed resource to its original state
    Destroy(ConfirmArgs),

    /// Check the host against the last applied state
    Check,

    /// Re-apply the last applied state over manual changes
    Restore(ConfirmArgs),

    /// Undo a run that was interrupted or failed to roll back
    Rollback(ConfirmArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Arguments
// ============================================================================

#[derive(Args)]
pub struct PlanArgs {
    /// Declaration files or directories (default: from hostward.toml)
    pub paths: Vec<PathBuf>,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Declaration files or directories (default: from hostward.toml)
    pub paths: Vec<PathBuf>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct ConfirmArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply() {
        let cli = Cli::try_parse_from(["hostward", "-vv", "apply", "a.toml", "conf.d", "--yes"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Apply(args) => {
                assert!(args.yes);
                assert_eq!(args.paths, [PathBuf::from("a.toml"), PathBuf::from("conf.d")]);
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["hostward", "check", "--store", "/tmp/s", "-j", "2"])
            .unwrap();
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/s")));
        assert_eq!(cli.jobs, Some(2));
        assert!(matches!(cli.command, Command::Check));
    }
}
