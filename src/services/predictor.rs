//! Gate predictor - the submission pipeline
//!
//! Wires fusion, scoring, history and the decision engine together:
//!
//! 1. Fuse the submission into a per-gate signal snapshot (validates gates)
//! 2. Score every gate and pick the leader
//! 3. Under the user's session lock: append the sample, evaluate, commit
//! 4. After the lock is released: log, count, publish
//!
//! Nothing is written for a rejected submission. Fusion and scoring run
//! before the session is touched, and the history append is the first
//! mutation, so a clock regression is caught before anything changes.

use crate::domain::dispatch::{DispatchRecord, DispatchState};
use crate::domain::error::PredictError;
use crate::domain::types::{Gate, GateSet, HistorySample, ScoreVector, SignalSnapshot, UserId};
use crate::infra::clock::Clock;
use crate::infra::config::{Config, FusionMode};
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::{DispatchEventPayload, EgressSender};
use crate::services::engine::{Decision, DispatchDecisionEngine, Outcome};
use crate::services::fusion::{DirectFusion, SensorInputs, SignalFusionSource, SimulatedFusion};
use crate::services::scorer::GateScorer;
use crate::services::session::{SessionSnapshot, SessionStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Caller-supplied context echoed back with a prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Received {
    pub user_id: UserId,
    pub gps: Option<serde_json::Value>,
    pub imu: Option<serde_json::Value>,
}

/// Result of one accepted submission
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub predicted_gate: Gate,
    pub confidence: u8,
    pub scores: ScoreVector,
    /// Per-gate signals that produced `scores`
    pub breakdown: SignalSnapshot,
    pub dispatch: DispatchRecord,
    pub received: Received,
}

pub struct GatePredictor {
    gates: GateSet,
    scorer: GateScorer,
    engine: DispatchDecisionEngine,
    fusion: Arc<dyn SignalFusionSource>,
    sessions: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    egress: Option<EgressSender>,
}

impl GatePredictor {
    pub fn new(
        gates: GateSet,
        scorer: GateScorer,
        engine: DispatchDecisionEngine,
        fusion: Arc<dyn SignalFusionSource>,
        sessions: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { gates, scorer, engine, fusion, sessions, clock, metrics, egress: None }
    }

    /// Build a predictor from configuration with a fresh session store
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>, metrics: Arc<Metrics>) -> Self {
        let fusion: Arc<dyn SignalFusionSource> = match config.fusion_mode() {
            FusionMode::Simulated => Arc::new(SimulatedFusion::new()),
            FusionMode::Direct => Arc::new(DirectFusion::new(config.fusion_fallback())),
        };

        Self::new(
            config.gates().clone(),
            GateScorer::new(config.weights()),
            DispatchDecisionEngine::new(config.engine()),
            fusion,
            Arc::new(SessionStore::new(config.history_capacity())),
            clock,
            metrics,
        )
    }

    /// Publish dispatch transitions through the egress channel
    pub fn with_egress(mut self, egress: EgressSender) -> Self {
        self.egress = Some(egress);
        self
    }

    pub fn gates(&self) -> &GateSet {
        &self.gates
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn fusion_name(&self) -> &'static str {
        self.fusion.name()
    }

    /// Score one submission and advance the user's dispatch state
    pub fn submit_sensor_data(&self, inputs: SensorInputs) -> Result<Prediction, PredictError> {
        let started = Instant::now();
        match self.process(inputs) {
            Ok((prediction, decision)) => {
                self.metrics.record_submission(started.elapsed().as_micros() as u64);
                self.metrics.record_outcome(decision.outcome);
                self.metrics.set_active_users(self.sessions.user_count());
                self.announce(&prediction, &decision);
                Ok(prediction)
            }
            Err(e) => {
                self.metrics.record_rejection(&e);
                warn!(kind = e.kind(), error = %e, "sensor_data_rejected");
                Err(e)
            }
        }
    }

    fn process(&self, inputs: SensorInputs) -> Result<(Prediction, Decision), PredictError> {
        let breakdown = self.fusion.fuse(&self.gates, &inputs)?;
        let scores = self.scorer.score_all(&self.gates, &breakdown);
        let timestamp = inputs.timestamp.unwrap_or_else(|| self.clock.now_ms());
        let sample = HistorySample::from_scores(timestamp, scores).ok_or_else(|| {
            PredictError::MalformedSnapshot { gate: String::new(), field: "scores" }
        })?;

        let predicted_gate = sample.predicted_gate.clone();
        let confidence = sample.confidence;
        let scores = sample.scores.clone();

        let handle = self.sessions.get_or_create(&inputs.user_id);
        let decision = {
            let mut session = handle.lock();
            session
                .commit(sample, |history, prior| {
                    let decision = self.engine.decide(history, prior);
                    (decision.record.clone(), decision)
                })
                .map_err(|e| PredictError::ClockRegression {
                    user: inputs.user_id.clone(),
                    previous: e.previous,
                    attempted: e.attempted,
                })?
        };

        debug!(
            user_id = %inputs.user_id,
            ts = timestamp,
            gate = %predicted_gate,
            confidence = confidence,
            status = decision.record.status(),
            "sensor_data_scored"
        );

        let prediction = Prediction {
            predicted_gate,
            confidence,
            scores,
            breakdown,
            dispatch: decision.record.clone(),
            received: Received { user_id: inputs.user_id, gps: inputs.gps, imu: inputs.imu },
        };
        Ok((prediction, decision))
    }

    /// Log and publish a transition; runs outside the session lock
    fn announce(&self, prediction: &Prediction, decision: &Decision) {
        let user_id = &prediction.received.user_id;
        match (&decision.outcome, &decision.record.state) {
            (Outcome::Committed, DispatchState::Dispatched { gate, .. }) => {
                info!(user_id = %user_id, gate = %gate, confidence = prediction.confidence, "dispatch_committed");
            }
            (Outcome::Redirected, DispatchState::Redirected { from_gate, to_gate, .. }) => {
                info!(
                    user_id = %user_id,
                    from_gate = %from_gate,
                    to_gate = %to_gate,
                    confidence = prediction.confidence,
                    "dispatch_redirected"
                );
            }
            (Outcome::Advisory, DispatchState::Dispatched { gate, .. }) => {
                info!(
                    user_id = %user_id,
                    gate = %gate,
                    heading_to = %prediction.predicted_gate,
                    "dispatch_in_transit_advisory"
                );
            }
            (Outcome::SignalLost, _) => {
                info!(user_id = %user_id, ts = ?decision.record.last_update, "dispatch_signal_lost");
            }
            _ => {}
        }

        if let Some(egress) = &self.egress {
            if let Some(payload) = DispatchEventPayload::from_outcome(
                user_id,
                &decision.record,
                decision.outcome,
                prediction.confidence,
            ) {
                egress.send_dispatch_event(payload);
            }
        }
    }

    /// History and dispatch record for a user, None if never seen
    pub fn dump_state(&self, user_id: &UserId) -> Option<SessionSnapshot> {
        self.sessions.snapshot(user_id)
    }

    /// Flag a user's active dispatch as in transit
    pub fn mark_in_transit(&self, user_id: &UserId) -> Result<DispatchRecord, PredictError> {
        let not_dispatched = || PredictError::NotDispatched { user: user_id.clone() };

        let result = self.sessions.get(user_id).ok_or_else(not_dispatched).and_then(|handle| {
            let mut session = handle.lock();
            let record = self.engine.mark_in_transit(session.record()).ok_or_else(not_dispatched)?;
            session.replace_record(record.clone());
            Ok(record)
        });

        match &result {
            Ok(record) => {
                self.metrics.record_in_transit();
                if let Some(gate) = record.state.target_gate() {
                    info!(user_id = %user_id, gate = %gate, "dispatch_marked_in_transit");
                }
            }
            Err(e) => {
                self.metrics.record_rejection(e);
                warn!(user_id = %user_id, error = %e, "in_transit_rejected");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::clock::ManualClock;
    use crate::services::engine::EngineConfig;
    use crate::services::scorer::ScoreWeights;

    fn predictor() -> GatePredictor {
        GatePredictor::new(
            GateSet::default(),
            GateScorer::new(ScoreWeights::default()),
            DispatchDecisionEngine::new(EngineConfig::default()),
            Arc::new(DirectFusion::new(Some(0.0))),
            Arc::new(SessionStore::default()),
            Arc::new(ManualClock::new(1_000)),
            Arc::new(Metrics::new()),
        )
    }

    fn toward(user: &str, gate: &str, value: f64, ts: u64) -> SensorInputs {
        SensorInputs::new(user).with_uniform(gate, value).with_timestamp(ts)
    }

    #[test]
    fn test_prediction_shape() {
        let p = predictor();
        let prediction = p.submit_sensor_data(toward("u1", "B", 95.0, 0)).unwrap();

        assert_eq!(prediction.predicted_gate, Gate::new("B"));
        assert_eq!(prediction.confidence, 95);
        assert_eq!(prediction.scores.get("A"), Some(0));
        assert_eq!(prediction.breakdown.len(), 4);
        assert_eq!(prediction.dispatch.status(), "pending");
        assert_eq!(prediction.received.user_id, UserId::new("u1"));
    }

    #[test]
    fn test_two_confident_samples_dispatch() {
        let p = predictor();
        p.submit_sensor_data(toward("u1", "B", 95.0, 0)).unwrap();
        let prediction = p.submit_sensor_data(toward("u1", "B", 96.0, 7_000)).unwrap();

        match prediction.dispatch.state {
            DispatchState::Dispatched { gate, dispatched_at, .. } => {
                assert_eq!(gate, Gate::new("B"));
                assert_eq!(dispatched_at, 7_000);
            }
            other => panic!("expected dispatched, got {other:?}"),
        }
        assert_eq!(p.metrics.dispatches_total(), 1);
    }

    #[test]
    fn test_clock_used_when_timestamp_missing() {
        let p = predictor();
        p.submit_sensor_data(SensorInputs::new("u1").with_uniform("A", 50.0)).unwrap();

        let state = p.dump_state(&UserId::new("u1")).unwrap();
        assert_eq!(state.history.latest().unwrap().timestamp, 1_000);
    }

    #[test]
    fn test_clock_regression_rejected() {
        let p = predictor();
        p.submit_sensor_data(toward("u1", "A", 50.0, 10_000)).unwrap();
        let before = p.dump_state(&UserId::new("u1")).unwrap();

        let err = p.submit_sensor_data(toward("u1", "A", 99.0, 5_000)).unwrap_err();
        assert_eq!(
            err,
            PredictError::ClockRegression {
                user: UserId::new("u1"),
                previous: 10_000,
                attempted: 5_000
            }
        );
        assert_eq!(p.dump_state(&UserId::new("u1")).unwrap(), before);
        assert_eq!(p.metrics.rejections("clock_regression"), 1);
    }

    #[test]
    fn test_unknown_gate_creates_no_session() {
        let p = predictor();
        let err = p.submit_sensor_data(toward("u1", "Z", 99.0, 0)).unwrap_err();
        assert!(matches!(err, PredictError::UnknownGate { .. }));
        assert!(p.dump_state(&UserId::new("u1")).is_none());
        assert_eq!(p.sessions().user_count(), 0);
    }

    #[test]
    fn test_mark_in_transit_requires_dispatch() {
        let p = predictor();
        let user = UserId::new("u1");
        assert!(matches!(p.mark_in_transit(&user), Err(PredictError::NotDispatched { .. })));

        p.submit_sensor_data(toward("u1", "A", 95.0, 0)).unwrap();
        assert!(matches!(p.mark_in_transit(&user), Err(PredictError::NotDispatched { .. })));

        p.submit_sensor_data(toward("u1", "A", 95.0, 6_000)).unwrap();
        let record = p.mark_in_transit(&user).unwrap();
        assert!(matches!(record.state, DispatchState::Dispatched { in_transit: true, .. }));
        assert_eq!(record.last_update, Some(6_000));
    }
}
