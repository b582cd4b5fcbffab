//! Dispatch decision engine
//!
//! Hysteresis-gated state machine over a user's prediction history. Rules are
//! evaluated in priority order on every accepted submission:
//!
//! 1. Signal loss: more than `signal_loss_ms` since the prior record's update
//!    moves the user to `SignalLost`, whatever the new sample says.
//! 2. Commit (any state except `Dispatched`): the two newest samples agree on a
//!    gate, both exceed the confidence threshold, and are spaced within
//!    `min_spacing_ms..=max_spacing_ms`.
//! 3. Redirect (`Dispatched` only): the newest sample confidently names another
//!    gate. Redirects before the vehicle leaves; afterwards only attaches an
//!    advisory to the existing dispatch.
//! 4. Otherwise the prior record is carried forward with a fresh `last_update`.
//!
//! The engine holds configuration only. `evaluate` is a pure function of the
//! history and prior record; "now" is the newest sample's timestamp.

use crate::domain::dispatch::{
    in_transit_advisory, DispatchRecord, DispatchState, SIGNAL_LOST_MESSAGE,
};
use crate::domain::error::ConfigError;
use crate::domain::types::{Gate, HistorySample};
use crate::services::history::HistoryTracker;

/// Thresholds for the dispatch state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Samples must score strictly above this to count as confident
    pub confidence_threshold: u8,
    /// Minimum spacing between the two confirming samples (inclusive)
    pub min_spacing_ms: u64,
    /// Maximum spacing between the two confirming samples (inclusive)
    pub max_spacing_ms: u64,
    /// Gap since the last update after which the stream is declared lost
    pub signal_loss_ms: u64,
    /// Treat a dispatch as in transit this long after commit (None: explicit only)
    pub in_transit_after_ms: Option<u64>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_spacing_ms > self.max_spacing_ms {
            return Err(ConfigError::InvalidSpacing {
                min_ms: self.min_spacing_ms,
                max_ms: self.max_spacing_ms,
            });
        }
        if self.confidence_threshold >= 100 {
            return Err(ConfigError::InvalidThreshold(self.confidence_threshold));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 90,
            min_spacing_ms: 5_000,
            max_spacing_ms: 15_000,
            signal_loss_ms: 90_000,
            in_transit_after_ms: None,
        }
    }
}

/// What an evaluation did, for logging and egress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Prior record carried forward
    Unchanged,
    /// New dispatch committed
    Committed,
    /// Pending dispatch moved to another gate
    Redirected,
    /// In-transit dispatch kept, advisory attached
    Advisory,
    /// Stream declared stale
    SignalLost,
}

impl Outcome {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Unchanged => "unchanged",
            Outcome::Committed => "dispatched",
            Outcome::Redirected => "redirected",
            Outcome::Advisory => "advisory",
            Outcome::SignalLost => "signal_lost",
        }
    }
}

/// Result of one evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub record: DispatchRecord,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchDecisionEngine {
    config: EngineConfig,
}

impl DispatchDecisionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Next dispatch record for a history that already contains the newest sample
    pub fn evaluate(&self, history: &HistoryTracker, prior: &DispatchRecord) -> DispatchRecord {
        self.decide(history, prior).record
    }

    /// Next dispatch record plus what changed
    pub fn decide(&self, history: &HistoryTracker, prior: &DispatchRecord) -> Decision {
        let Some(latest) = history.latest() else {
            return Decision { record: prior.clone(), outcome: Outcome::Unchanged };
        };
        let now = latest.timestamp;

        if let Some(last_update) = prior.last_update {
            if now.saturating_sub(last_update) > self.config.signal_loss_ms {
                return Decision {
                    record: DispatchRecord::new(
                        DispatchState::SignalLost { message: SIGNAL_LOST_MESSAGE.to_string() },
                        now,
                    ),
                    outcome: Outcome::SignalLost,
                };
            }
        }

        match &prior.state {
            DispatchState::Dispatched { gate, dispatched_at, last_scores, in_transit, advisory } => {
                let in_transit = *in_transit || self.transit_elapsed(*dispatched_at, now);
                let heading_elsewhere = latest.predicted_gate != *gate && self.is_confident(latest);

                if heading_elsewhere && !in_transit {
                    return Decision {
                        record: DispatchRecord::new(
                            DispatchState::Redirected {
                                from_gate: gate.clone(),
                                to_gate: latest.predicted_gate.clone(),
                                redirected_at: now,
                                last_scores: latest.scores.clone(),
                                in_transit: false,
                            },
                            now,
                        ),
                        outcome: Outcome::Redirected,
                    };
                }

                let (advisory, outcome) = if heading_elsewhere {
                    (Some(in_transit_advisory(gate)), Outcome::Advisory)
                } else {
                    (advisory.clone(), Outcome::Unchanged)
                };

                Decision {
                    record: DispatchRecord::new(
                        DispatchState::Dispatched {
                            gate: gate.clone(),
                            dispatched_at: *dispatched_at,
                            last_scores: last_scores.clone(),
                            in_transit,
                            advisory,
                        },
                        now,
                    ),
                    outcome,
                }
            }
            state => match self.confirmed_gate(history) {
                Some(gate) => Decision {
                    record: DispatchRecord::new(
                        DispatchState::Dispatched {
                            gate: gate.clone(),
                            dispatched_at: now,
                            last_scores: latest.scores.clone(),
                            in_transit: false,
                            advisory: None,
                        },
                        now,
                    ),
                    outcome: Outcome::Committed,
                },
                None => Decision {
                    record: DispatchRecord::new(state.clone(), now),
                    outcome: Outcome::Unchanged,
                },
            },
        }
    }

    /// Flag an active dispatch as in transit
    ///
    /// Returns None unless the record is `Dispatched`. `last_update` is kept:
    /// no new sample produced this record.
    pub fn mark_in_transit(&self, prior: &DispatchRecord) -> Option<DispatchRecord> {
        match &prior.state {
            DispatchState::Dispatched { gate, dispatched_at, last_scores, advisory, .. } => {
                Some(DispatchRecord {
                    state: DispatchState::Dispatched {
                        gate: gate.clone(),
                        dispatched_at: *dispatched_at,
                        last_scores: last_scores.clone(),
                        in_transit: true,
                        advisory: advisory.clone(),
                    },
                    last_update: prior.last_update,
                })
            }
            _ => None,
        }
    }

    /// Gate confirmed by the two newest samples, if the commit rule holds
    fn confirmed_gate<'a>(&self, history: &'a HistoryTracker) -> Option<&'a Gate> {
        let latest = history.latest()?;
        let previous = history.previous()?;

        let spacing = latest.timestamp.saturating_sub(previous.timestamp);
        let spaced = (self.config.min_spacing_ms..=self.config.max_spacing_ms).contains(&spacing);

        if self.is_confident(latest)
            && self.is_confident(previous)
            && latest.predicted_gate == previous.predicted_gate
            && spaced
        {
            Some(&latest.predicted_gate)
        } else {
            None
        }
    }

    #[inline]
    fn is_confident(&self, sample: &HistorySample) -> bool {
        sample.confidence > self.config.confidence_threshold
    }

    fn transit_elapsed(&self, dispatched_at: u64, now: u64) -> bool {
        self.config
            .in_transit_after_ms
            .is_some_and(|after| now.saturating_sub(dispatched_at) >= after)
    }
}
