//! HTTP query interface over the shared results buffer.

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_icmp_latency::{ProbeResult, ResultsBuffer};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

/// Round-trip value dashboards read as "no reply in time".
pub const LOST_RTT_MS: i64 = -1;
/// Bytes per result in the binary encoding.
pub const ENCODED_RESULT_SIZE: usize = 18;

#[derive(Clone)]
pub struct AppState {
    pub results: Arc<ResultsBuffer>,
    pub destinations: usize,
}

/// JSON shape of one result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultView {
    pub destination: String,
    /// Milliseconds, or [`LOST_RTT_MS`].
    pub rtt: i64,
    pub seq: u16,
    /// Send time, milliseconds since the UNIX epoch.
    pub at: u64,
}

impl From<&ProbeResult> for ResultView {
    fn from(result: &ProbeResult) -> Self {
        Self {
            destination: result.destination.to_string(),
            rtt: result
                .outcome
                .rtt()
                .map_or(LOST_RTT_MS, |rtt| rtt.as_millis() as i64),
            seq: result.sequence,
            at: result.sent_at_ms,
        }
    }
}

/// Fixed 18-byte little-endian record: address octets, sequence, rtt in ms
/// (-1 when lost), send time in ms.
pub fn encode_result(result: &ProbeResult) -> Box<[u8]> {
    let rtt = result.outcome.rtt().map_or(LOST_RTT_MS as i32, |rtt| {
        rtt.as_millis().min(i32::MAX as u128) as i32
    });
    [
        &result.destination.octets()[..],
        &result.sequence.to_le_bytes()[..],
        &rtt.to_le_bytes()[..],
        &result.sent_at_ms.to_le_bytes()[..],
    ]
    .concat()
    .into()
}

pub fn encode_results(results: &[ProbeResult]) -> Vec<u8> {
    let mut out = Vec::with_capacity(results.len() * ENCODED_RESULT_SIZE);
    for result in results {
        out.extend_from_slice(&encode_result(result));
    }
    out
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    destinations: usize,
    results: usize,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(results_handler))
        .route("/api/results", get(results_handler))
        .route("/api/results.bin", get(results_binary_handler))
        .route("/healthz", get(healthz_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

async fn results_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ResultView>> {
    Json(state.results.snapshot().iter().map(ResultView::from).collect())
}

async fn results_binary_handler(State(state): State<Arc<AppState>>) -> Response {
    let body = encode_results(&state.results.snapshot());
    ([(header::CONTENT_TYPE, "application/octet-stream")], body).into_response()
}

async fn healthz_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        destinations: state.destinations,
        results: state.results.len(),
    })
}
