//! Signal fusion sources
//!
//! A fusion source turns one inbound sensor submission into a complete
//! per-gate signal snapshot. The decision engine does not care how the
//! snapshot is produced; the source is injected into the predictor.
//!
//! Two implementations:
//! - `SimulatedFusion` fills any signal the device did not report with a
//!   uniform random value in [0,100). Demo and load-test mode.
//! - `DirectFusion` uses only reported values, substituting a configured
//!   fallback or rejecting the submission when a value is missing.

use crate::domain::error::PredictError;
use crate::domain::types::{Gate, GateSet, SignalBundle, SignalSnapshot, UserId};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// User id applied when a submission does not name one
pub const DEFAULT_USER_ID: &str = "demoUser";

fn default_user_id() -> UserId {
    UserId::new(DEFAULT_USER_ID)
}

/// Parsed sensor submission
///
/// Per-gate maps are keyed by gate id. GPS and IMU readings are opaque to the
/// core and only echoed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorInputs {
    #[serde(default = "default_user_id")]
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imu: Option<serde_json::Value>,
    /// BLE beacon proximity per gate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ble: Option<FxHashMap<String, f64>>,
    /// Wi-Fi proximity per gate, used when BLE has no reading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wifi: Option<FxHashMap<String, f64>>,
    /// Dwell score per gate (time in the approach geofence)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dwell: Option<FxHashMap<String, f64>>,
    /// Movement vector score per gate (heading toward the gate)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<FxHashMap<String, f64>>,
    /// Device timestamp in ms; the predictor clock is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl SensorInputs {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            gps: None,
            imu: None,
            ble: None,
            wifi: None,
            dwell: None,
            vector: None,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }

    pub fn with_ble(mut self, gate: &str, value: f64) -> Self {
        self.ble.get_or_insert_with(FxHashMap::default).insert(gate.to_string(), value);
        self
    }

    pub fn with_wifi(mut self, gate: &str, value: f64) -> Self {
        self.wifi.get_or_insert_with(FxHashMap::default).insert(gate.to_string(), value);
        self
    }

    pub fn with_dwell(mut self, gate: &str, value: f64) -> Self {
        self.dwell.get_or_insert_with(FxHashMap::default).insert(gate.to_string(), value);
        self
    }

    pub fn with_vector(mut self, gate: &str, value: f64) -> Self {
        self.vector.get_or_insert_with(FxHashMap::default).insert(gate.to_string(), value);
        self
    }

    /// Set all three signal families for a gate to the same value
    pub fn with_uniform(self, gate: &str, value: f64) -> Self {
        self.with_ble(gate, value).with_vector(gate, value).with_dwell(gate, value)
    }

    fn signal_maps(&self) -> [(&'static str, Option<&FxHashMap<String, f64>>); 4] {
        [
            ("ble", self.ble.as_ref()),
            ("wifi", self.wifi.as_ref()),
            ("dwell", self.dwell.as_ref()),
            ("vector", self.vector.as_ref()),
        ]
    }
}

/// Supplies per-gate signal snapshots for a submission
pub trait SignalFusionSource: Send + Sync {
    /// Produce one signal bundle per configured gate
    fn fuse(&self, gates: &GateSet, inputs: &SensorInputs) -> Result<SignalSnapshot, PredictError>;

    /// Short name for logging
    fn name(&self) -> &'static str;
}

/// Reject signal maps that name gates outside the configured set
pub fn check_known_gates(gates: &GateSet, inputs: &SensorInputs) -> Result<(), PredictError> {
    for (field, map) in inputs.signal_maps() {
        let Some(map) = map else { continue };
        // Sorted so the reported gate is stable across runs
        let mut unknown: Vec<&String> = map.keys().filter(|k| !gates.contains(k)).collect();
        unknown.sort();
        if let Some(gate) = unknown.first() {
            return Err(PredictError::UnknownGate { gate: (*gate).clone(), field });
        }
    }
    Ok(())
}

/// Read one reported value, rejecting NaN and infinities
fn reported(
    map: Option<&FxHashMap<String, f64>>,
    gate: &Gate,
    field: &'static str,
) -> Result<Option<f64>, PredictError> {
    match map.and_then(|m| m.get(gate.as_str())) {
        Some(v) if !v.is_finite() => {
            Err(PredictError::NonFiniteSignal { gate: gate.to_string(), field })
        }
        Some(v) => Ok(Some(*v)),
        None => Ok(None),
    }
}

/// Proximity prefers BLE and falls back to Wi-Fi
fn reported_proximity(inputs: &SensorInputs, gate: &Gate) -> Result<Option<f64>, PredictError> {
    match reported(inputs.ble.as_ref(), gate, "ble")? {
        Some(v) => Ok(Some(v)),
        None => reported(inputs.wifi.as_ref(), gate, "wifi"),
    }
}

/// Fills unreported signals with uniform random values
pub struct SimulatedFusion {
    rng: Mutex<StdRng>,
}

impl SimulatedFusion {
    pub fn new() -> Self {
        Self { rng: Mutex::new(StdRng::from_entropy()) }
    }

    /// Deterministic sequence for reproducible simulations
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl Default for SimulatedFusion {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalFusionSource for SimulatedFusion {
    fn fuse(&self, gates: &GateSet, inputs: &SensorInputs) -> Result<SignalSnapshot, PredictError> {
        check_known_gates(gates, inputs)?;

        let mut rng = self.rng.lock();
        SignalSnapshot::build(gates, |gate| {
            let proximity = reported_proximity(inputs, gate)?;
            let heading = reported(inputs.vector.as_ref(), gate, "vector")?;
            let dwell = reported(inputs.dwell.as_ref(), gate, "dwell")?;
            Ok(SignalBundle {
                proximity: proximity.unwrap_or_else(|| rng.gen_range(0.0..100.0)),
                heading_score: heading.unwrap_or_else(|| rng.gen_range(0.0..100.0)),
                dwell_score: dwell.unwrap_or_else(|| rng.gen_range(0.0..100.0)),
            })
        })
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

/// Uses reported signals only
#[derive(Debug, Clone, Default)]
pub struct DirectFusion {
    /// Value substituted for a missing signal; None rejects the submission
    fallback: Option<f64>,
}

impl DirectFusion {
    pub fn new(fallback: Option<f64>) -> Self {
        Self { fallback }
    }

    fn require(&self, value: Option<f64>, gate: &Gate, field: &'static str) -> Result<f64, PredictError> {
        value
            .or(self.fallback)
            .ok_or_else(|| PredictError::MalformedSnapshot { gate: gate.to_string(), field })
    }
}

impl SignalFusionSource for DirectFusion {
    fn fuse(&self, gates: &GateSet, inputs: &SensorInputs) -> Result<SignalSnapshot, PredictError> {
        check_known_gates(gates, inputs)?;

        SignalSnapshot::build(gates, |gate| {
            Ok(SignalBundle {
                proximity: self.require(reported_proximity(inputs, gate)?, gate, "proximity")?,
                heading_score: self.require(
                    reported(inputs.vector.as_ref(), gate, "vector")?,
                    gate,
                    "vector",
                )?,
                dwell_score: self.require(
                    reported(inputs.dwell.as_ref(), gate, "dwell")?,
                    gate,
                    "dwell",
                )?,
            })
        })
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}
