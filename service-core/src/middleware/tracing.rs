use axum::http::{HeaderMap, HeaderValue, Request};
use axum::response::Response;
use tracing::Span;
use uuid::Uuid;

/// Correlation header read from inbound requests and echoed on every response.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Returns the caller-supplied trace id, or a fresh UUID v4 when the header is
/// absent, empty, or not valid header text.
pub fn resolve_trace_id(headers: &HeaderMap) -> String {
    headers
        .get(TRACE_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn echo_trace_id(response: &mut Response, trace_id: &str) {
    if let Ok(header_value) = HeaderValue::from_str(trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, header_value);
    }
}

/// Span factory for `TraceLayer::make_span_with`.
pub fn http_span<B>(request: &Request<B>) -> Span {
    let trace_id = request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");

    tracing::info_span!(
        "http_request",
        request_id = %trace_id,
        method = %request.method(),
        uri = %request.uri(),
        version = ?request.version(),
    )
}
