//! Aggregated outcome of one invocation

use crate::provider::Outcome;
use serde::Serialize;

pub const EXIT_OK: i32 = 0;
/// At least one processing or internal error was recorded
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
/// Another invocation holds the process lock; nothing was touched
pub const EXIT_LOCKED: i32 = 3;

/// What an outcome was the result of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Publish,
    Delete,
    Hash,
    Pivot,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RunReport {
    pub published: usize,
    pub deleted: usize,
    /// AlreadyUp / NotLive; retried later, never a failure
    pub skipped: usize,
    pub recoverable: usize,
    pub failures: usize,
    /// Domains whose dane symlinks went back to live
    pub pivoted_to_live: Vec<String>,
    /// One line per failure, for the summary
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn record(&mut self, domain: &str, action: Action, outcome: &Outcome) {
        match outcome {
            Outcome::Success => match action {
                Action::Publish => self.published += 1,
                Action::Delete => self.deleted += 1,
                Action::Hash | Action::Pivot => {}
            },
            Outcome::AlreadyUp(_) | Outcome::NotLive(_) => self.skipped += 1,
            Outcome::Recoverable(_) => self.recoverable += 1,
            Outcome::Processing(_) | Outcome::Internal(_) => {
                self.failures += 1;
                self.errors.push(format!("{}: {}", domain, outcome));
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            EXIT_OK
        } else {
            EXIT_FAILURE
        }
    }
}
