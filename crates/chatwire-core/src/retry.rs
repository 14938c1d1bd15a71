use std::time::Duration;

/// Bounded counter governing automatic reconnection attempts.
///
/// Attempts are spaced at a constant `base_delay` up to `max` attempts.
/// The counter resets on every successful open; once exhausted, automatic
/// reconnection stops until an external trigger resets the budget.
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    attempts: u32,
    max: u32,
    base_delay: Duration,
}

impl RetryBudget {
    /// Create a budget allowing `max` attempts spaced `base_delay` apart.
    pub fn new(max: u32, base_delay: Duration) -> Self {
        Self {
            attempts: 0,
            max,
            base_delay,
        }
    }

    /// Attempts consumed since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Maximum attempts before automatic reconnection stops.
    pub fn max(&self) -> u32 {
        self.max
    }

    /// Configured inter-attempt spacing.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Whether automatic reconnection has stopped.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max
    }

    /// Consume one attempt and return the delay before it, or `None` when
    /// the budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.base_delay)
    }

    /// Zero the attempt counter (successful open or external trigger).
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(2))
    }
}
