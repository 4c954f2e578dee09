//! Bounded attempt accounting for the correction loop.

use serde::{Deserialize, Serialize};

/// Default number of corrective rounds after the initial execution.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Counts corrective rounds consumed by failures.
///
/// Invariant: `0 <= attempts <= max_attempts`. A run performs at most
/// `max_attempts + 1` executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptBudget {
    attempts: u32,
    max_attempts: u32,
}

impl AttemptBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True once every corrective round has been spent.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Consume one corrective round. Returns `false` (and leaves the counter
    /// untouched) when the budget is already exhausted.
    pub fn record_failure(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.attempts += 1;
        true
    }
}

impl Default for AttemptBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_never_exceeds_max() {
        let mut budget = AttemptBudget::new(2);
        assert!(budget.record_failure());
        assert!(budget.record_failure());
        assert!(budget.is_exhausted());
        assert!(!budget.record_failure());
        assert_eq!(budget.attempts(), 2);
    }

    #[test]
    fn zero_budget_is_exhausted_immediately() {
        let mut budget = AttemptBudget::new(0);
        assert!(budget.is_exhausted());
        assert!(!budget.record_failure());
        assert_eq!(budget.attempts(), 0);
    }

    #[test]
    fn default_allows_three_corrections() {
        let budget = AttemptBudget::default();
        assert_eq!(budget.max_attempts(), 3);
        assert_eq!(budget.attempts(), 0);
    }
}
