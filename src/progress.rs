//! Terminal progress while a plan is applied

use colored::Colorize;
use converge::{Action, Error, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::ui;

/// Spinner showing the step being applied, with a line per finished step
pub struct ApplyProgress {
    pb: ProgressBar,
    quiet: bool,
    rolling_back: bool,
}

impl ApplyProgress {
    pub fn new(quiet: bool) -> Self {
        let pb = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        Self {
            pb,
            quiet,
            rolling_back: false,
        }
    }

    /// Remove the spinner from the terminal
    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }

    fn line(&self, msg: &str) {
        if !self.quiet {
            self.pb.suspend(|| println!("  {msg}"));
        }
    }
}

impl ProgressCallback for ApplyProgress {
    fn on_step_start(&mut self, index: usize, total: usize, action: &Action) {
        let verb = if self.rolling_back {
            "Rolling back"
        } else {
            "Applying"
        };
        self.pb.set_message(format!(
            "{} {verb} {}",
            ui::step_counter(index + 1, total),
            ui::truncate(&action.to_string(), 60)
        ));
    }

    fn on_step_complete(&mut self, _index: usize, action: &Action) {
        let symbol = if self.rolling_back {
            "↺".yellow()
        } else {
            "✓".green()
        };
        self.line(&format!("{symbol} {action}"));
    }

    fn on_rollback_start(&mut self, error: &Error) {
        self.rolling_back = true;
        self.line(&format!("{} {error}", "✗".red()));
        self.line(&format!("{} Rolling back touched resources", "⚠".yellow()));
    }
}

impl Drop for ApplyProgress {
    fn drop(&mut self) {
        if !self.pb.is_finished() {
            self.pb.finish_and_clear();
        }
    }
}
