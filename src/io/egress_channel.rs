//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to send events to the MQTT publisher.
//! Uses bounded mpsc channels to prevent unbounded memory growth.

use crate::domain::dispatch::{DispatchRecord, DispatchState};
use crate::domain::types::UserId;
use crate::infra::clock::epoch_ms;
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_NUM_BUCKETS};
use crate::services::engine::Outcome;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Dispatch transition or advisory
    Dispatch(DispatchEventPayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

/// Payload for dispatch transitions
#[derive(Debug, Clone, Serialize)]
pub struct DispatchEventPayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Publish timestamp (epoch ms)
    pub ts: u64,
    /// Unique event id (UUIDv7, time-ordered)
    pub event_id: String,
    pub user_id: String,
    /// Event type (dispatched, redirected, advisory, signal_lost)
    pub t: String,
    /// Sample timestamp that produced the transition
    pub sample_ts: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_gate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_gate: Option<String>,
    /// Confidence of the sample that produced the transition
    pub confidence: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DispatchEventPayload {
    /// Build the event for an evaluation outcome, None when nothing changed
    pub fn from_outcome(
        user_id: &UserId,
        record: &DispatchRecord,
        outcome: Outcome,
        confidence: u8,
    ) -> Option<Self> {
        if outcome == Outcome::Unchanged {
            return None;
        }

        let mut payload = Self {
            site: None,
            ts: epoch_ms(),
            event_id: Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            t: outcome.as_str().to_string(),
            sample_ts: record.last_update.unwrap_or_default(),
            gate: None,
            from_gate: None,
            to_gate: None,
            confidence,
            message: None,
        };

        match &record.state {
            DispatchState::Dispatched { gate, advisory, .. } => {
                payload.gate = Some(gate.to_string());
                payload.message = advisory.clone();
            }
            DispatchState::Redirected { from_gate, to_gate, .. } => {
                payload.from_gate = Some(from_gate.to_string());
                payload.to_gate = Some(to_gate.to_string());
            }
            DispatchState::SignalLost { message } => {
                payload.message = Some(message.clone());
            }
            DispatchState::Pending => return None,
        }

        Some(payload)
    }
}

/// Payload for metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    /// Site identifier
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    pub submissions_total: u64,
    pub submissions_per_sec: f64,
    pub rejections_total: u64,
    pub dispatches_total: u64,
    pub redirects_total: u64,
    pub signal_losses_total: u64,
    pub advisories_total: u64,
    /// Average evaluation latency (microseconds)
    pub avg_latency_us: u64,
    /// Max evaluation latency (microseconds)
    pub max_latency_us: u64,
    /// Evaluation latency histogram buckets
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    pub active_users: u64,
}

impl MetricsPayload {
    /// Create a metrics payload from a summary with site info
    pub fn from_summary(summary: MetricsSummary, site: String) -> Self {
        Self {
            site,
            ts: epoch_ms(),
            submissions_total: summary.submissions_total,
            submissions_per_sec: summary.submissions_per_sec,
            rejections_total: summary.rejections_total,
            dispatches_total: summary.dispatches_total,
            redirects_total: summary.redirects_total,
            signal_losses_total: summary.signal_losses_total,
            advisories_total: summary.advisories_total,
            avg_latency_us: summary.avg_eval_latency_us,
            max_latency_us: summary.max_eval_latency_us,
            lat_buckets: summary.lat_buckets,
            lat_p50_us: summary.lat_p50_us,
            lat_p99_us: summary.lat_p99_us,
            active_users: summary.active_users,
        }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped and counted.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
    metrics: Arc<Metrics>,
}

impl EgressSender {
    /// Create a new sender from an mpsc sender
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String, metrics: Arc<Metrics>) -> Self {
        Self { tx, site_id, metrics }
    }

    /// Send a dispatch transition
    /// Injects site_id into the payload
    pub fn send_dispatch_event(&self, mut payload: DispatchEventPayload) {
        payload.site = Some(self.site_id.clone());
        self.try_send(EgressMessage::Dispatch(payload));
    }

    /// Send a metrics snapshot
    pub fn send_metrics(&self, summary: MetricsSummary) {
        let payload = MetricsPayload::from_summary(summary, self.site_id.clone());
        self.try_send(EgressMessage::Metrics(payload));
    }

    fn try_send(&self, msg: EgressMessage) {
        // Use try_send to avoid blocking - drop if channel full
        if self.tx.try_send(msg).is_err() {
            self.metrics.record_egress_dropped();
        }
    }
}

/// Close the current metrics window, log it and publish it if egress is on
///
/// `Metrics::report` resets the window, so this is the only caller; the log
/// line and the MQTT payload always describe the same window.
pub fn report_metrics(metrics: &Metrics, egress: Option<&EgressSender>) -> MetricsSummary {
    let summary = metrics.report();
    summary.log();
    if let Some(egress) = egress {
        egress.send_metrics(summary.clone());
    }
    summary
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// Buffer size determines how many messages can be queued.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
    metrics: Arc<Metrics>,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id, metrics), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Gate, ScoreVector};

    fn dispatched(gate: &str, advisory: Option<String>) -> DispatchRecord {
        DispatchRecord::new(
            DispatchState::Dispatched {
                gate: Gate::new(gate),
                dispatched_at: 7_000,
                last_scores: ScoreVector::default(),
                in_transit: advisory.is_some(),
                advisory,
            },
            7_000,
        )
    }

    #[test]
    fn test_unchanged_emits_nothing() {
        let user = UserId::new("u1");
        assert!(DispatchEventPayload::from_outcome(
            &user,
            &dispatched("B", None),
            Outcome::Unchanged,
            96
        )
        .is_none());
    }

    #[test]
    fn test_committed_payload() {
        let user = UserId::new("u1");
        let payload =
            DispatchEventPayload::from_outcome(&user, &dispatched("B", None), Outcome::Committed, 96)
                .unwrap();

        assert_eq!(payload.t, "dispatched");
        assert_eq!(payload.gate.as_deref(), Some("B"));
        assert_eq!(payload.sample_ts, 7_000);
        assert_eq!(payload.confidence, 96);

        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("from_gate").is_none());
        assert!(json.get("message").is_none());
        assert_eq!(json["user_id"], "u1");
    }

    #[test]
    fn test_redirect_payload() {
        let user = UserId::new("u1");
        let record = DispatchRecord::new(
            DispatchState::Redirected {
                from_gate: Gate::new("A"),
                to_gate: Gate::new("C"),
                redirected_at: 12_000,
                last_scores: ScoreVector::default(),
                in_transit: false,
            },
            12_000,
        );
        let payload =
            DispatchEventPayload::from_outcome(&user, &record, Outcome::Redirected, 93).unwrap();
        assert_eq!(payload.from_gate.as_deref(), Some("A"));
        assert_eq!(payload.to_gate.as_deref(), Some("C"));
        assert!(payload.gate.is_none());
    }

    #[test]
    fn test_advisory_payload_carries_message() {
        let user = UserId::new("u1");
        let record = dispatched("A", Some("proceed to A".to_string()));
        let payload =
            DispatchEventPayload::from_outcome(&user, &record, Outcome::Advisory, 95).unwrap();
        assert_eq!(payload.t, "advisory");
        assert_eq!(payload.message.as_deref(), Some("proceed to A"));
    }

    #[tokio::test]
    async fn test_full_channel_counts_drops() {
        let metrics = Arc::new(Metrics::new());
        let (sender, mut rx) = create_egress_channel(1, "site-1".to_string(), metrics.clone());

        let user = UserId::new("u1");
        let payload =
            DispatchEventPayload::from_outcome(&user, &dispatched("B", None), Outcome::Committed, 96)
                .unwrap();
        sender.send_dispatch_event(payload.clone());
        sender.send_dispatch_event(payload);

        assert_eq!(metrics.egress_dropped(), 1);
        match rx.recv().await {
            Some(EgressMessage::Dispatch(p)) => assert_eq!(p.site.as_deref(), Some("site-1")),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_logged_and_published_windows_match() {
        let metrics = Arc::new(Metrics::new());
        let (sender, mut rx) = create_egress_channel(4, "site-1".to_string(), metrics.clone());
        for _ in 0..10 {
            metrics.record_submission(30);
        }

        let logged = report_metrics(&metrics, Some(&sender));
        assert_eq!(logged.submissions_total, 10);
        assert_eq!(logged.avg_eval_latency_us, 30);

        match rx.recv().await {
            Some(EgressMessage::Metrics(p)) => {
                assert_eq!(p.submissions_total, 10);
                assert_eq!(p.avg_latency_us, logged.avg_eval_latency_us);
                assert_eq!(p.max_latency_us, logged.max_eval_latency_us);
                assert_eq!(p.lat_p50_us, logged.lat_p50_us);
                assert_eq!(p.lat_buckets, logged.lat_buckets);
            }
            other => panic!("unexpected message: {other:?}"),
        }

        // Next window starts empty; totals stay cumulative
        let next = report_metrics(&metrics, None);
        assert_eq!(next.submissions_total, 10);
        assert_eq!(next.max_eval_latency_us, 0);
        assert_eq!(next.lat_buckets.iter().sum::<u64>(), 0);
    }
}
