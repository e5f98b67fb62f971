//! Per-contract reentrancy guard.

use crate::error::EscrowError;

/// Set for the duration of a state-mutating call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReentrancyLock {
    entered: bool,
}

impl ReentrancyLock {
    /// Creates an unlocked guard.
    #[must_use]
    pub const fn new() -> Self {
        Self { entered: false }
    }

    /// Whether a call is in progress.
    #[must_use]
    pub const fn is_entered(&self) -> bool {
        self.entered
    }

    /// Marks a call as in progress.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::Reentrancy`] if a call is already in progress.
    pub const fn acquire(&mut self) -> Result<(), EscrowError> {
        if self.entered {
            return Err(EscrowError::Reentrancy);
        }
        self.entered = true;
        Ok(())
    }

    /// Ends the current call.
    pub const fn release(&mut self) {
        self.entered = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected() {
        let mut lock = ReentrancyLock::new();
        lock.acquire().unwrap();
        assert_eq!(lock.acquire(), Err(EscrowError::Reentrancy));
        lock.release();
        assert!(!lock.is_entered());
        assert!(lock.acquire().is_ok());
    }
}
