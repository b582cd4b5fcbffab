//! Dispatch record model
//!
//! A user's dispatch record is a tagged state plus the timestamp of the sample
//! that produced it. Records are replaced wholesale on every evaluation; each
//! transition builds its variant explicitly so no field leaks between states.

use crate::domain::types::{Gate, ScoreVector};
use serde::Serialize;

/// Message carried by the signal-lost state
pub const SIGNAL_LOST_MESSAGE: &str = "No sensor data for over 90 seconds.";

/// Advisory attached to an in-transit dispatch when the user heads elsewhere
pub fn in_transit_advisory(gate: &Gate) -> String {
    format!("Vehicle already in transit to gate {gate}; instruct user to proceed there.")
}

/// Dispatch state machine states
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DispatchState {
    /// No dispatch committed yet
    Pending,
    /// Vehicle committed to a gate
    Dispatched {
        gate: Gate,
        dispatched_at: u64,
        last_scores: ScoreVector,
        in_transit: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        advisory: Option<String>,
    },
    /// Committed gate changed before the vehicle left
    Redirected {
        from_gate: Gate,
        to_gate: Gate,
        redirected_at: u64,
        last_scores: ScoreVector,
        in_transit: bool,
    },
    /// Sensor stream went stale
    SignalLost { message: String },
}

impl DispatchState {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchState::Pending => "pending",
            DispatchState::Dispatched { .. } => "dispatched",
            DispatchState::Redirected { .. } => "redirected",
            DispatchState::SignalLost { .. } => "signal_lost",
        }
    }

    /// Gate the vehicle is currently committed to, if any
    pub fn target_gate(&self) -> Option<&Gate> {
        match self {
            DispatchState::Dispatched { gate, .. } => Some(gate),
            DispatchState::Redirected { to_gate, .. } => Some(to_gate),
            DispatchState::Pending | DispatchState::SignalLost { .. } => None,
        }
    }
}

/// Per-user dispatch record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRecord {
    #[serde(flatten)]
    pub state: DispatchState,
    /// Timestamp of the most recent sample that produced this record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<u64>,
}

impl DispatchRecord {
    /// Record for a user with no accepted submissions
    pub fn pending() -> Self {
        Self { state: DispatchState::Pending, last_update: None }
    }

    pub fn new(state: DispatchState, last_update: u64) -> Self {
        Self { state, last_update: Some(last_update) }
    }

    #[inline]
    pub fn status(&self) -> &'static str {
        self.state.as_str()
    }

    pub fn is_dispatched(&self) -> bool {
        matches!(self.state, DispatchState::Dispatched { .. })
    }
}

impl Default for DispatchRecord {
    fn default() -> Self {
        Self::pending()
    }
}
