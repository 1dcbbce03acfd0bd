//! Stall detection over consecutive iterations.

use crate::{AppError, Result};

/// Trips after a run of iterations without effective change.
///
/// An iteration counts as no progress when its action was ineffective or
/// repeats the previous action verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreaker {
    threshold: u32,
    streak: u32,
    last_fingerprint: Option<String>,
}

impl CircuitBreaker {
    /// Create a breaker; a threshold of 0 never trips.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self::resume(threshold, 0)
    }

    /// Create a breaker continuing a streak recorded by an earlier run.
    #[must_use]
    pub fn resume(threshold: u32, streak: u32) -> Self {
        Self {
            threshold,
            streak,
            last_fingerprint: None,
        }
    }

    /// Current no-progress streak.
    #[must_use]
    pub fn streak(&self) -> u32 {
        self.streak
    }

    /// Record one iteration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Stalled` once the streak reaches the threshold.
    pub fn record(&mut self, fingerprint: &str, effective: bool) -> Result<()> {
        let repeated = self.last_fingerprint.as_deref() == Some(fingerprint);
        self.last_fingerprint = Some(fingerprint.to_owned());

        if effective && !repeated {
            self.streak = 0;
            return Ok(());
        }

        self.streak += 1;
        if self.threshold > 0 && self.streak >= self.threshold {
            return Err(AppError::Stalled(self.streak));
        }
        Ok(())
    }

    /// Forget the streak, e.g. after a completion claim.
    pub fn reset(&mut self) {
        self.streak = 0;
        self.last_fingerprint = None;
    }
}
