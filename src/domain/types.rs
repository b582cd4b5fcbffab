//! Shared types for gate prediction

use crate::domain::error::ConfigError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use smallvec::SmallVec;
use std::sync::Arc;

/// Most sites have a handful of exit gates; keep score vectors inline up to this many
const INLINE_GATES: usize = 8;

/// Newtype wrapper for user identifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Candidate destination gate identifier
///
/// Cheap to clone; gate ids are shared between every score vector and record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Gate(Arc<str>);

impl Gate {
    pub fn new(id: &str) -> Self {
        Self(Arc::from(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Serialize for Gate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl std::fmt::Display for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered, non-empty set of configured gates
///
/// The order is significant: it is the tie-break order for predictions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateSet {
    gates: Vec<Gate>,
}

impl GateSet {
    pub fn new<S: AsRef<str>>(ids: &[S]) -> Result<Self, ConfigError> {
        if ids.is_empty() {
            return Err(ConfigError::EmptyGateSet);
        }

        let mut gates: Vec<Gate> = Vec::with_capacity(ids.len());
        for id in ids {
            let id = id.as_ref().trim();
            if id.is_empty() {
                return Err(ConfigError::BlankGateId);
            }
            if gates.iter().any(|g| g.as_str() == id) {
                return Err(ConfigError::DuplicateGate(id.to_string()));
            }
            gates.push(Gate::new(id));
        }

        Ok(Self { gates })
    }

    /// Look up a configured gate by id
    pub fn get(&self, id: &str) -> Option<&Gate> {
        self.gates.iter().find(|g| g.as_str() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Gate> {
        self.gates.iter()
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}

impl Default for GateSet {
    fn default() -> Self {
        Self { gates: ["A", "B", "C", "D"].iter().map(|id| Gate::new(id)).collect() }
    }
}

/// Raw per-gate signal values fed into the scorer
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalBundle {
    pub proximity: f64,
    pub heading_score: f64,
    pub dwell_score: f64,
}

/// One signal bundle per configured gate, in configured order
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSnapshot {
    entries: SmallVec<[(Gate, SignalBundle); INLINE_GATES]>,
}

impl SignalSnapshot {
    /// Build a snapshot, calling `bundle` once per configured gate
    pub fn build<E>(
        gates: &GateSet,
        mut bundle: impl FnMut(&Gate) -> Result<SignalBundle, E>,
    ) -> Result<Self, E> {
        let mut entries = SmallVec::new();
        for gate in gates.iter() {
            entries.push((gate.clone(), bundle(gate)?));
        }
        Ok(Self { entries })
    }

    pub fn get(&self, gate: &Gate) -> Option<&SignalBundle> {
        self.entries.iter().find(|(g, _)| g == gate).map(|(_, b)| b)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Gate, &SignalBundle)> {
        self.entries.iter().map(|(g, b)| (g, b))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for SignalSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (gate, bundle) in &self.entries {
            map.serialize_entry(gate.as_str(), bundle)?;
        }
        map.end()
    }
}

/// Per-gate confidence in [0,100], one entry per configured gate, in configured order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScoreVector {
    entries: SmallVec<[(Gate, u8); INLINE_GATES]>,
}

impl ScoreVector {
    pub(crate) fn push(&mut self, gate: Gate, score: u8) {
        self.entries.push((gate, score));
    }

    pub fn get(&self, gate: &str) -> Option<u8> {
        self.entries.iter().find(|(g, _)| g.as_str() == gate).map(|(_, s)| *s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Gate, u8)> {
        self.entries.iter().map(|(g, s)| (g, *s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Arg-max of the scores; the first gate in configured order wins ties
    pub fn leader(&self) -> Option<(&Gate, u8)> {
        let mut best: Option<(&Gate, u8)> = None;
        for (gate, score) in self.iter() {
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((gate, score)),
            }
        }
        best
    }
}

impl Serialize for ScoreVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (gate, score) in &self.entries {
            map.serialize_entry(gate.as_str(), score)?;
        }
        map.end()
    }
}

/// One scored submission in a user's history
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySample {
    /// Milliseconds on the predictor clock
    pub timestamp: u64,
    pub scores: ScoreVector,
    pub predicted_gate: Gate,
    pub confidence: u8,
}

impl HistorySample {
    /// Build a sample from a score vector, selecting the leading gate
    ///
    /// Returns None only for an empty score vector, which a valid gate set never produces.
    pub fn from_scores(timestamp: u64, scores: ScoreVector) -> Option<Self> {
        let (gate, confidence) = scores.leader().map(|(g, s)| (g.clone(), s))?;
        Some(Self { timestamp, scores, predicted_gate: gate, confidence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(values: &[(&str, u8)]) -> ScoreVector {
        let mut v = ScoreVector::default();
        for (g, s) in values {
            v.push(Gate::new(g), *s);
        }
        v
    }

    #[test]
    fn test_gate_set_rejects_empty() {
        let ids: [&str; 0] = [];
        assert!(matches!(GateSet::new(&ids), Err(ConfigError::EmptyGateSet)));
    }

    #[test]
    fn test_gate_set_rejects_duplicates() {
        assert!(matches!(
            GateSet::new(&["A", "B", "A"]),
            Err(ConfigError::DuplicateGate(ref g)) if g == "A"
        ));
    }

    #[test]
    fn test_gate_set_preserves_order() {
        let gates = GateSet::new(&["D", "B", "C"]).unwrap();
        let ids: Vec<&str> = gates.iter().map(Gate::as_str).collect();
        assert_eq!(ids, vec!["D", "B", "C"]);
        assert!(gates.contains("B"));
        assert!(!gates.contains("A"));
    }

    #[test]
    fn test_leader_first_gate_wins_ties() {
        let v = scores(&[("A", 40), ("B", 80), ("C", 80), ("D", 10)]);
        let (gate, score) = v.leader().unwrap();
        assert_eq!(gate.as_str(), "B");
        assert_eq!(score, 80);

        // Repeatable
        for _ in 0..10 {
            assert_eq!(v.leader().unwrap().0.as_str(), "B");
        }
    }

    #[test]
    fn test_leader_all_equal_picks_first() {
        let v = scores(&[("C", 50), ("A", 50), ("B", 50)]);
        assert_eq!(v.leader().unwrap().0.as_str(), "C");
    }

    #[test]
    fn test_score_vector_serializes_as_ordered_map() {
        let v = scores(&[("A", 12), ("B", 95)]);
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"{"A":12,"B":95}"#);
    }

    #[test]
    fn test_history_sample_from_scores() {
        let sample = HistorySample::from_scores(7000, scores(&[("A", 3), ("B", 96)])).unwrap();
        assert_eq!(sample.predicted_gate.as_str(), "B");
        assert_eq!(sample.confidence, 96);
        assert!(HistorySample::from_scores(0, ScoreVector::default()).is_none());
    }
}
