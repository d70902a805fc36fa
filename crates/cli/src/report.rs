//! Terminal output for check results.

use colored::Colorize;
use lattice_healthcheck::CheckResult;

/// Prints one line per result as the runner delivers them, with a summary
/// line at the end of the run.
pub struct Reporter {
    failed: usize,
}

impl Reporter {
    #[must_use]
    pub fn new() -> Self {
        Self { failed: 0 }
    }

    pub fn report(&mut self, result: &CheckResult) {
        let label = format!("{}: {}", result.category, result.description);
        match (&result.error, result.retry) {
            (Some(err), true) => {
                println!("{} {label} -- {err} {}", "~".yellow(), "(retrying)".yellow());
            }
            (Some(err), false) => {
                self.failed += 1;
                println!("{} {label} -- {}", "×".red(), err.to_string().red());
            }
            (None, _) => {
                println!("{} {label}", "√".green());
            }
        }
    }

    pub fn finish(&self, success: bool) {
        println!();
        if success {
            println!("{}", "Status check results are √".green());
        } else {
            println!(
                "{} ({} failed)",
                "Status check results are ×".red(),
                self.failed
            );
        }
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}
