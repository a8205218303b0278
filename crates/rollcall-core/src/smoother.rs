//! Quorum smoothing of per-frame recognitions.
//!
//! A single frame's classification is noisy. Each slot keeps the last `K`
//! observations and only reports an identity once at least `K - 1` of them
//! agree.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Default quorum window.
pub const DEFAULT_WINDOW: usize = 3;

#[derive(Debug, Clone, PartialEq)]
struct Observation {
    key: String,
    confidence: f32,
}

/// An identity that reached quorum in its slot's window.
#[derive(Debug, Clone, PartialEq)]
pub struct StableRecognition {
    pub key: String,
    /// Mean confidence of the agreeing observations in the window.
    pub confidence: f32,
}

/// Per-slot rolling recognition history.
#[derive(Debug)]
pub struct RecognitionSmoother<S> {
    window: usize,
    buffers: HashMap<S, VecDeque<Observation>>,
}

impl<S: Eq + Hash> Default for RecognitionSmoother<S> {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl<S: Eq + Hash> RecognitionSmoother<S> {
    /// Create a smoother with quorum window `window` (clamped to at least 1).
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            buffers: HashMap::new(),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Agreeing observations required within the window.
    pub fn quorum(&self) -> usize {
        self.window - 1
    }

    /// Record one observation for `slot` and report a stable identity if the
    /// window now holds a quorum.
    ///
    /// Ties in frequency go to the identity seen first in the window.
    pub fn observe(&mut self, slot: S, key: &str, confidence: f32) -> Option<StableRecognition> {
        let window = self.window;
        let quorum = self.quorum();

        let history = self.buffers.entry(slot).or_default();
        history.push_back(Observation {
            key: key.to_string(),
            confidence,
        });
        while history.len() > window {
            history.pop_front();
        }

        if history.len() < window {
            return None;
        }

        // (key, count, confidence sum) in first-seen order
        let mut tally: Vec<(&str, usize, f32)> = Vec::with_capacity(window);
        for obs in history.iter() {
            match tally.iter_mut().find(|(k, _, _)| *k == obs.key) {
                Some(entry) => {
                    entry.1 += 1;
                    entry.2 += obs.confidence;
                }
                None => tally.push((obs.key.as_str(), 1, obs.confidence)),
            }
        }

        let mut best = tally.first()?;
        for entry in &tally[1..] {
            if entry.1 > best.1 {
                best = entry;
            }
        }

        let (best_key, count, sum) = *best;
        if count >= quorum {
            Some(StableRecognition {
                key: best_key.to_string(),
                confidence: sum / count as f32,
            })
        } else {
            None
        }
    }

    /// Drop the history of a slot that no longer exists.
    pub fn forget(&mut self, slot: &S) {
        self.buffers.remove(slot);
    }

    /// Number of slots currently holding history.
    pub fn slot_count(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{a} != {b}");
    }

    #[test]
    fn test_silent_until_window_full() {
        let mut s = RecognitionSmoother::new(3);
        assert_eq!(s.observe("face_0", "Alice_001", 40.0), None);
        assert_eq!(s.observe("face_0", "Alice_001", 42.0), None);
    }

    #[test]
    fn test_two_of_three_quorum() {
        let mut s = RecognitionSmoother::new(3);
        s.observe("face_0", "Alice_001", 40.0);
        s.observe("face_0", "Alice_001", 42.0);
        let stable = s.observe("face_0", "Bob_002", 50.0).unwrap();
        assert_eq!(stable.key, "Alice_001");
        assert_close(stable.confidence, 41.0);
    }

    #[test]
    fn test_quorum_with_outlier_first() {
        let mut s = RecognitionSmoother::new(3);
        s.observe(0u64, "Bob_002", 90.0);
        s.observe(0u64, "Alice_001", 30.0);
        let stable = s.observe(0u64, "Alice_001", 50.0).unwrap();
        assert_eq!(stable.key, "Alice_001");
        assert_close(stable.confidence, 40.0);
    }

    #[test]
    fn test_sub_quorum_is_silent() {
        let mut s = RecognitionSmoother::new(3);
        s.observe(1u64, "Alice_001", 40.0);
        s.observe(1u64, "Bob_002", 40.0);
        assert_eq!(s.observe(1u64, "Carol_003", 40.0), None);
    }

    #[test]
    fn test_window_slides() {
        let mut s = RecognitionSmoother::new(3);
        s.observe(0u64, "Alice_001", 10.0);
        s.observe(0u64, "Bob_002", 20.0);
        s.observe(0u64, "Carol_003", 30.0);
        // Window is now [Bob, Carol, Bob]
        let stable = s.observe(0u64, "Bob_002", 40.0).unwrap();
        assert_eq!(stable.key, "Bob_002");
        assert_close(stable.confidence, 30.0);
    }

    #[test]
    fn test_keeps_reporting_while_quorum_holds() {
        let mut s = RecognitionSmoother::new(3);
        for _ in 0..2 {
            s.observe(0u64, "Alice_001", 40.0);
        }
        for _ in 0..4 {
            assert!(s.observe(0u64, "Alice_001", 40.0).is_some());
        }
    }

    #[test]
    fn test_slots_are_independent() {
        let mut s = RecognitionSmoother::new(3);
        s.observe(0u64, "Alice_001", 40.0);
        s.observe(1u64, "Bob_002", 40.0);
        s.observe(0u64, "Alice_001", 40.0);
        s.observe(1u64, "Bob_002", 40.0);
        assert_eq!(s.observe(0u64, "Alice_001", 40.0).unwrap().key, "Alice_001");
        assert_eq!(s.observe(1u64, "Bob_002", 40.0).unwrap().key, "Bob_002");
        assert_eq!(s.slot_count(), 2);
    }

    #[test]
    fn test_tie_goes_to_first_seen() {
        // K = 2 needs one agreeing observation, so every full window ties.
        let mut s = RecognitionSmoother::new(2);
        s.observe(0u64, "Bob_002", 10.0);
        let stable = s.observe(0u64, "Alice_001", 20.0).unwrap();
        assert_eq!(stable.key, "Bob_002");
        assert_close(stable.confidence, 10.0);
    }

    #[test]
    fn test_larger_window_quorum() {
        let mut s = RecognitionSmoother::new(5);
        for key in ["A_1", "A_1", "B_2", "A_1"] {
            assert_eq!(s.observe(0u64, key, 10.0), None);
        }
        // Window [A, A, B, A, B]: A has 3 < 4
        assert_eq!(s.observe(0u64, "B_2", 10.0), None);
        // Window [A, B, A, B, A]: A has 3 < 4
        assert_eq!(s.observe(0u64, "A_1", 10.0), None);
        let mut s = RecognitionSmoother::new(5);
        for key in ["A_1", "A_1", "B_2", "A_1"] {
            s.observe(0u64, key, 10.0);
        }
        assert_eq!(s.observe(0u64, "A_1", 10.0).unwrap().key, "A_1");
    }

    #[test]
    fn test_forget_resets_slot() {
        let mut s = RecognitionSmoother::new(3);
        s.observe(0u64, "Alice_001", 40.0);
        s.observe(0u64, "Alice_001", 40.0);
        s.forget(&0u64);
        assert_eq!(s.slot_count(), 0);
        assert_eq!(s.observe(0u64, "Alice_001", 40.0), None);
    }

    #[test]
    fn test_window_of_one_reports_immediately() {
        let mut s = RecognitionSmoother::new(0);
        assert_eq!(s.window(), 1);
        let stable = s.observe(0u64, "Alice_001", 12.5).unwrap();
        assert_close(stable.confidence, 12.5);
    }
}
