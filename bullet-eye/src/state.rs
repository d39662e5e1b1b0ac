//! Shared detection state

use parking_lot::RwLock;

/// Loop flag and last-frame bullet count, shared between the detector loop and its controller.
#[derive(Debug)]
pub struct DetectionState {
    active: RwLock<bool>,
    bullets_detected: RwLock<usize>,
}

/// Point-in-time copy of [`DetectionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionSnapshot {
    pub active: bool,
    pub bullets_detected: usize,
}

impl Default for DetectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionState {
    /// Active, with no bullets counted yet.
    pub fn new() -> Self {
        Self {
            active: RwLock::new(true),
            bullets_detected: RwLock::new(0),
        }
    }

    pub fn is_active(&self) -> bool {
        *self.active.read()
    }

    pub fn set_active(&self, active: bool) {
        *self.active.write() = active;
    }

    /// Clear the loop flag. Running loops exit at their next iteration.
    pub fn stop(&self) {
        self.set_active(false);
    }

    pub fn bullets_detected(&self) -> usize {
        *self.bullets_detected.read()
    }

    pub fn set_bullets_detected(&self, count: usize) {
        *self.bullets_detected.write() = count;
    }

    pub fn snapshot(&self) -> DetectionSnapshot {
        DetectionSnapshot {
            active: self.is_active(),
            bullets_detected: self.bullets_detected(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_state_starts_active() {
        let state = DetectionState::new();
        assert!(state.is_active());
        assert_eq!(state.bullets_detected(), 0);
    }

    #[test]
    fn test_state_stop() {
        let state = DetectionState::default();
        state.stop();
        assert!(!state.is_active());
        state.set_active(true);
        assert!(state.is_active());
    }

    #[test]
    fn test_state_count_is_overwritten() {
        let state = DetectionState::new();
        state.set_bullets_detected(4);
        state.set_bullets_detected(1);
        assert_eq!(state.bullets_detected(), 1);
    }

    #[test]
    fn test_state_shared_across_threads() {
        let state = Arc::new(DetectionState::new());
        let remote = state.clone();
        std::thread::spawn(move || {
            remote.set_bullets_detected(3);
            remote.stop();
        })
        .join()
        .unwrap();

        assert_eq!(
            state.snapshot(),
            DetectionSnapshot {
                active: false,
                bullets_detected: 3
            }
        );
    }
}
