//! HTTP proxy logic
//!
//! Each inbound request gets its own client proxy from the factory. The
//! client borrows the pooled upstream handler for exactly one send, so
//! rotation of the handler is invisible to request handling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use handler_pool::{ApiRequest, ApiResponse, ClientProxyFactory, Error};
use tracing::{error, info, instrument, warn};

use crate::metrics;

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Shared state passed to the proxy handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    pub factory: Arc<ClientProxyFactory<reqwest::Client>>,
    pub upstream_url: String,
    pub timeout: Duration,
}

/// JSON error body: {"error":{"type":"proxy_error","message":"...","request_id":"req_..."}}
fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "proxy_error",
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Forward an inbound request upstream through a fresh client proxy.
///
/// Upstream timeouts are retried twice with a fixed 100ms backoff; every
/// attempt borrows whichever handler generation is current at that moment.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let response = forward(state, request, &request_id).await;
    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn forward(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: &str,
) -> Response {
    let upstream_url = match request.uri().path_and_query() {
        Some(pq) => format!("{}{}", state.upstream_url.trim_end_matches('/'), pq),
        None => state.upstream_url.clone(),
    };

    let mut outbound = ApiRequest::new(request.method().clone(), upstream_url);
    for (name, value) in request.headers() {
        if !is_hop_by_hop(name.as_str()) && name != axum::http::header::HOST {
            outbound.headers.append(name.clone(), value.clone());
        }
    }

    match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) if !body.is_empty() => outbound = outbound.body(body),
        Ok(_) => {}
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {e}"),
                request_id,
            );
        }
    }

    let client = state.factory.create_client();

    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            warn!(attempt, "retrying after upstream timeout");
            tokio::time::sleep(RETRY_DELAY).await;
        }

        match client.send(outbound.clone()).await {
            Ok(upstream) => {
                info!(
                    status = upstream.status.as_u16(),
                    generation = upstream.generation,
                    "upstream responded"
                );
                return into_response(upstream, request_id);
            }
            Err(Error::Transport(e)) if e.is_timeout() && attempt < MAX_ATTEMPTS - 1 => continue,
            Err(Error::Transport(e)) if e.is_timeout() => {
                metrics::record_upstream_error("timeout");
                error!(error = %e, attempts = MAX_ATTEMPTS, "upstream timeout after all retries");
                return error_response(
                    StatusCode::GATEWAY_TIMEOUT,
                    &format!(
                        "upstream timeout after {}s ({MAX_ATTEMPTS} attempts)",
                        state.timeout.as_secs()
                    ),
                    request_id,
                );
            }
            Err(Error::ShutDown) => {
                return error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "gateway is shutting down",
                    request_id,
                );
            }
            Err(e) => {
                let error_type = match &e {
                    Error::Transport(t) if t.is_connect() => "connect",
                    Error::HandlerCreation(_) => "handler",
                    Error::InvalidUrl(_) => "invalid_url",
                    _ => "other",
                };
                metrics::record_upstream_error(error_type);
                error!(error = %e, error_type, "upstream request failed");
                return error_response(
                    StatusCode::BAD_GATEWAY,
                    &format!("upstream error: {e}"),
                    request_id,
                );
            }
        }
    }

    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "unexpected retry exhaustion",
        request_id,
    )
}

/// Upstream status, headers and body are returned verbatim, minus hop-by-hop headers.
fn into_response(upstream: ApiResponse, request_id: &str) -> Response {
    let mut response = Response::builder().status(upstream.status);
    for (name, value) in &upstream.headers {
        if !is_hop_by_hop(name.as_str()) {
            response = response.header(name, value);
        }
    }
    response
        .body(axum::body::Body::from(upstream.body))
        .unwrap_or_else(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("response build error: {e}"),
                request_id,
            )
        })
}

/// Check if a header is hop-by-hop (stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
