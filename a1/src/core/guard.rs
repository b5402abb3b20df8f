//! Context-window budget guard.

/// Default model context window in tokens.
pub const DEFAULT_WINDOW_SIZE: u64 = 200_000;
/// Default fraction of the window at which a session is checkpointed and stopped.
pub const DEFAULT_THRESHOLD: f64 = 0.70;

/// Outcome of feeding one usage observation to the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Below,
    /// The threshold was crossed for the first time this session.
    Tripped,
    /// The threshold is still crossed but the guard already fired.
    AlreadyTripped,
}

/// Tracks context usage for one session and fires at most once.
#[derive(Debug, Clone)]
pub struct ContextGuard {
    window_size: u64,
    threshold: f64,
    fired: bool,
}

impl ContextGuard {
    pub fn new(window_size: u64, threshold: f64) -> Self {
        Self {
            window_size,
            threshold,
            fired: false,
        }
    }

    pub fn percent(&self, tokens_in: u64) -> f64 {
        if self.window_size == 0 {
            return 0.0;
        }
        tokens_in as f64 / self.window_size as f64
    }

    pub fn observe(&mut self, tokens_in: u64) -> GuardDecision {
        if self.percent(tokens_in) < self.threshold {
            return GuardDecision::Below;
        }
        if self.fired {
            return GuardDecision::AlreadyTripped;
        }
        self.fired = true;
        GuardDecision::Tripped
    }

    pub fn fired(&self) -> bool {
        self.fired
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Default for ContextGuard {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE, DEFAULT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_exactly_once_per_session() {
        let mut guard = ContextGuard::default();
        assert_eq!(guard.observe(100_000), GuardDecision::Below);
        assert_eq!(guard.observe(140_000), GuardDecision::Tripped);
        assert_eq!(guard.observe(150_000), GuardDecision::AlreadyTripped);
        assert!(guard.fired());

        let mut next_session = ContextGuard::default();
        assert_eq!(next_session.observe(140_000), GuardDecision::Tripped);
    }

    #[test]
    fn zero_window_never_fires() {
        let mut guard = ContextGuard::new(0, 0.5);
        assert_eq!(guard.observe(1_000_000), GuardDecision::Below);
    }
}
