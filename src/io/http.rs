//! HTTP API and Prometheus endpoint
//!
//! Routes:
//! - POST /api/sensordata - submit one sensor reading, returns the prediction
//! - GET /api/state/{userId} - history and dispatch record for diagnostics
//! - POST /api/dispatch/{userId}/in-transit - flag the vehicle as departed
//! - GET /metrics - Prometheus text format
//!
//! Uses hyper for the HTTP server. Handlers are thin: they decode, call the
//! predictor and encode; all state lives in the predictor.

use crate::domain::error::PredictError;
use crate::domain::types::UserId;
use crate::infra::metrics::{
    Metrics, MetricsSnapshot, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS, REJECTION_KINDS,
};
use crate::services::fusion::SensorInputs;
use crate::services::predictor::GatePredictor;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared state for request handlers
pub struct HttpState {
    pub predictor: Arc<GatePredictor>,
    pub metrics: Arc<Metrics>,
    pub site_id: String,
    pub prometheus_enabled: bool,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(
    snapshot: &MetricsSnapshot,
    status_counts: &[(&'static str, usize)],
    site: &str,
) -> String {
    let mut output = String::with_capacity(4096);

    write_metric(
        &mut output,
        "valet_submissions_total",
        "Accepted sensor submissions",
        MetricType::Counter,
        site,
        snapshot.submissions_total,
    );

    let _ = writeln!(output, "# HELP valet_rejections_total Rejected requests by kind");
    let _ = writeln!(output, "# TYPE valet_rejections_total counter");
    for (kind, count) in REJECTION_KINDS.iter().zip(snapshot.rejections.iter()) {
        let _ = writeln!(output, "valet_rejections_total{{site=\"{site}\",kind=\"{kind}\"}} {count}");
    }

    write_metric(
        &mut output,
        "valet_dispatches_total",
        "Dispatches committed",
        MetricType::Counter,
        site,
        snapshot.dispatches_total,
    );
    write_metric(
        &mut output,
        "valet_redirects_total",
        "Dispatches redirected before departure",
        MetricType::Counter,
        site,
        snapshot.redirects_total,
    );
    write_metric(
        &mut output,
        "valet_signal_losses_total",
        "Sessions declared signal lost",
        MetricType::Counter,
        site,
        snapshot.signal_losses_total,
    );
    write_metric(
        &mut output,
        "valet_advisories_total",
        "In-transit advisories issued",
        MetricType::Counter,
        site,
        snapshot.advisories_total,
    );
    write_metric(
        &mut output,
        "valet_in_transit_total",
        "Dispatches marked in transit",
        MetricType::Counter,
        site,
        snapshot.in_transit_total,
    );

    write_histogram(
        &mut output,
        "valet_eval_latency_us",
        "Submission evaluation latency in microseconds",
        site,
        &snapshot.eval_latency_buckets,
        snapshot.eval_latency_sum_us,
    );

    write_metric(
        &mut output,
        "valet_active_users",
        "Users with a session",
        MetricType::Gauge,
        site,
        snapshot.active_users,
    );

    let _ = writeln!(output, "# HELP valet_dispatch_status Users per dispatch status");
    let _ = writeln!(output, "# TYPE valet_dispatch_status gauge");
    for (status, count) in status_counts {
        let _ =
            writeln!(output, "valet_dispatch_status{{site=\"{site}\",status=\"{status}\"}} {count}");
    }

    write_metric(
        &mut output,
        "valet_egress_dropped_total",
        "Egress events dropped due to channel full",
        MetricType::Counter,
        site,
        snapshot.egress_dropped,
    );

    output
}

fn response(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp.headers_mut().insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    resp
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => response(status, "application/json", Bytes::from(body)),
        Err(e) => {
            error!(error = %e, "http_encode_failed");
            response(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", Bytes::from("encode failed"))
        }
    }
}

fn error_response(status: StatusCode, kind: &str, message: String) -> Response<Full<Bytes>> {
    json_response(status, &ErrorBody { error: kind, message })
}

fn predict_error_response(e: &PredictError) -> Response<Full<Bytes>> {
    let status = match e {
        PredictError::NotDispatched { .. } => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    };
    error_response(status, e.kind(), e.to_string())
}

/// Percent-decode a user id path segment
fn path_user_id(segment: &str) -> Result<UserId, Response<Full<Bytes>>> {
    urlencoding::decode(segment).map(|id| UserId::new(id.into_owned())).map_err(|e| {
        error_response(StatusCode::BAD_REQUEST, "invalid_user_id", e.to_string())
    })
}

fn not_found() -> Response<Full<Bytes>> {
    response(StatusCode::NOT_FOUND, "text/plain", Bytes::from("Not Found"))
}

/// Route a fully read request
fn route(method: &Method, path: &str, body: &[u8], state: &HttpState) -> Response<Full<Bytes>> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (method, segments.as_slice()) {
        (&Method::POST, ["api", "sensordata"]) => {
            let inputs: SensorInputs = match serde_json::from_slice(body) {
                Ok(inputs) => inputs,
                Err(e) => {
                    debug!(error = %e, "sensor_data_decode_failed");
                    return error_response(StatusCode::BAD_REQUEST, "invalid_json", e.to_string());
                }
            };
            match state.predictor.submit_sensor_data(inputs) {
                Ok(prediction) => json_response(StatusCode::OK, &prediction),
                Err(e) => predict_error_response(&e),
            }
        }
        (&Method::GET, ["api", "state", segment]) => {
            let user_id = match path_user_id(segment) {
                Ok(user_id) => user_id,
                Err(resp) => return resp,
            };
            match state.predictor.dump_state(&user_id) {
                Some(snapshot) => json_response(StatusCode::OK, &snapshot),
                None => error_response(
                    StatusCode::NOT_FOUND,
                    "unknown_user",
                    format!("no session for user {user_id}"),
                ),
            }
        }
        (&Method::POST, ["api", "dispatch", segment, "in-transit"]) => {
            let user_id = match path_user_id(segment) {
                Ok(user_id) => user_id,
                Err(resp) => return resp,
            };
            match state.predictor.mark_in_transit(&user_id) {
                Ok(record) => json_response(StatusCode::OK, &record),
                Err(e) => predict_error_response(&e),
            }
        }
        (&Method::GET, ["metrics"]) if state.prometheus_enabled => {
            let body = format_prometheus_metrics(
                &state.metrics.snapshot(),
                &state.predictor.sessions().status_counts(),
                &state.site_id,
            );
            response(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", Bytes::from(body))
        }
        _ => not_found(),
    }
}

/// Read a request body up to `MAX_BODY_BYTES`
async fn read_body<B>(body: B) -> Result<Bytes, Response<Full<Bytes>>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => {
            Err(error_response(StatusCode::PAYLOAD_TOO_LARGE, "body_too_large", e.to_string()))
        }
        Err(e) => {
            debug!(error = %e, "http_body_read_failed");
            Err(error_response(StatusCode::BAD_REQUEST, "invalid_body", e.to_string()))
        }
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<HttpState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let body = match read_body(req.into_body()).await {
        Ok(body) => body,
        Err(resp) => return Ok(resp),
    };

    Ok(route(&method, &path, &body, &state))
}

/// Start the HTTP server
pub async fn start_http_server(
    port: u16,
    state: HttpState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let state = Arc::new(state);

    info!(port = %port, site = %state.site_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
