//! Gate confidence scoring
//!
//! Weighted sum of proximity, heading and dwell signals, rounded and clamped
//! to [0,100]. Pure: the scorer holds only its weights.

use crate::domain::error::ConfigError;
use crate::domain::types::{GateSet, ScoreVector, SignalBundle, SignalSnapshot};

/// Scoring weights for the three signal components
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub proximity: f64,
    pub heading: f64,
    pub dwell: f64,
}

impl ScoreWeights {
    pub fn new(proximity: f64, heading: f64, dwell: f64) -> Result<Self, ConfigError> {
        for (name, value) in [("proximity", proximity), ("heading", heading), ("dwell", dwell)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidWeight { name, value });
            }
        }
        Ok(Self { proximity, heading, dwell })
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self { proximity: 0.4, heading: 0.4, dwell: 0.2 }
    }
}

/// Computes per-gate confidence from signal bundles
#[derive(Debug, Clone, Default)]
pub struct GateScorer {
    weights: ScoreWeights,
}

impl GateScorer {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    /// Score a single gate's signals
    #[inline]
    pub fn score(&self, bundle: &SignalBundle) -> u8 {
        let w = &self.weights;
        let raw = w.proximity * bundle.proximity
            + w.heading * bundle.heading_score
            + w.dwell * bundle.dwell_score;

        if !raw.is_finite() {
            return 0;
        }
        raw.round().clamp(0.0, 100.0) as u8
    }

    /// Score every configured gate, in configured order
    pub fn score_all(&self, gates: &GateSet, snapshot: &SignalSnapshot) -> ScoreVector {
        let mut scores = ScoreVector::default();
        for gate in gates.iter() {
            // Fusion sources build one bundle per configured gate
            let score = snapshot.get(gate).map(|b| self.score(b)).unwrap_or(0);
            scores.push(gate.clone(), score);
        }
        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Gate;
    use std::convert::Infallible;

    fn bundle(p: f64, h: f64, d: f64) -> SignalBundle {
        SignalBundle { proximity: p, heading_score: h, dwell_score: d }
    }

    #[test]
    fn test_weighted_sum() {
        let scorer = GateScorer::default();
        // 0.4*80 + 0.4*90 + 0.2*50 = 78
        assert_eq!(scorer.score(&bundle(80.0, 90.0, 50.0)), 78);
    }

    #[test]
    fn test_rounds_to_nearest() {
        let scorer = GateScorer::default();
        // 0.4*91 + 0.4*91 + 0.2*92 = 91.2
        assert_eq!(scorer.score(&bundle(91.0, 91.0, 92.0)), 91);
        // 0.4*96 + 0.4*96 + 0.2*98 = 96.4
        assert_eq!(scorer.score(&bundle(96.0, 96.0, 98.0)), 96);
        // 0.4*1 + 0.4*1 + 0.2*0.5 = 0.9
        assert_eq!(scorer.score(&bundle(1.0, 1.0, 0.5)), 1);
    }

    #[test]
    fn test_clamped_to_range() {
        let scorer = GateScorer::default();
        assert_eq!(scorer.score(&bundle(500.0, 500.0, 500.0)), 100);
        assert_eq!(scorer.score(&bundle(-50.0, -10.0, 0.0)), 0);
        assert_eq!(scorer.score(&bundle(f64::NAN, 10.0, 10.0)), 0);
        assert_eq!(scorer.score(&bundle(f64::INFINITY, 10.0, 10.0)), 0);
    }

    #[test]
    fn test_always_in_range() {
        let scorer = GateScorer::default();
        let values = [-1e9, -100.0, -0.5, 0.0, 0.49, 50.0, 99.9, 100.0, 250.0, 1e9];
        for &p in &values {
            for &h in &values {
                for &d in &values {
                    assert!(scorer.score(&bundle(p, h, d)) <= 100);
                }
            }
        }
    }

    #[test]
    fn test_score_all_one_entry_per_gate() {
        let gates = GateSet::default();
        let snapshot = SignalSnapshot::build(&gates, |gate: &Gate| {
            let v = if gate.as_str() == "C" { 95.0 } else { 10.0 };
            Ok::<_, Infallible>(bundle(v, v, v))
        })
        .unwrap();

        let scores = GateScorer::default().score_all(&gates, &snapshot);
        assert_eq!(scores.len(), gates.len());
        assert_eq!(scores.get("C"), Some(95));
        assert_eq!(scores.get("A"), Some(10));
        assert_eq!(scores.leader().unwrap().0.as_str(), "C");
    }

    #[test]
    fn test_invalid_weights_rejected() {
        assert!(ScoreWeights::new(0.4, f64::NAN, 0.2).is_err());
        assert!(ScoreWeights::new(-0.1, 0.4, 0.2).is_err());
        assert!(ScoreWeights::new(0.5, 0.3, 0.2).is_ok());
    }
}
