use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Cooperative stop flag. Clones share the same flag.
///
/// Workers only look at it between iterations, so raising it never interrupts a rollout that is
/// already running.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::StopToken;

    #[test]
    fn clones_share_the_flag() {
        let token = StopToken::new();
        let clone = token.clone();
        assert!(!clone.is_raised());
        token.raise();
        assert!(clone.is_raised());
    }
}
