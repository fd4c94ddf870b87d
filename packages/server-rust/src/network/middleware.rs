//! Transport middleware wrapped around the served endpoint.
//!
//! The endpoint numbers requests on its own; this stack adds the transport
//! id (`x-request-id`), which callers may supply and always get back, and a
//! per-request span tagged with it. It also enforces the request timeout.
//!
//! Layers are listed outermost first.

use axum::body::Body;
use axum::http::header::HeaderName;
use axum::http::{Request, StatusCode};
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

use super::config::NetworkConfig;

/// Header carrying the transport-level request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

type MakeRequestSpan = fn(&Request<Body>) -> Span;

type EndpointTrace = TraceLayer<SharedClassifier<ServerErrorsAsFailures>, MakeRequestSpan>;

/// Layers produced by [`endpoint_layers`].
pub type EndpointLayers = Stack<
    PropagateRequestIdLayer,
    Stack<TimeoutLayer, Stack<EndpointTrace, Stack<SetRequestIdLayer<MakeRequestUuid>, Identity>>>,
>;

/// Opens the span a request is served in.
///
/// Runs after the id has been assigned, so `request_id` is always the value
/// echoed on the response.
#[must_use]
pub fn request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "endpoint",
        method = %request.method(),
        uri = %request.uri(),
        request_id,
    )
}

/// Builds the middleware wrapped around the endpoint.
///
/// 1. assign a UUID v4 `x-request-id` unless the caller sent one
/// 2. open [`request_span`]
/// 3. answer 408 once `request_timeout` elapses
/// 4. copy `x-request-id` onto every response, error statuses included
#[must_use]
pub fn endpoint_layers(config: &NetworkConfig) -> EndpointLayers {
    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http().make_span_with(request_span as MakeRequestSpan))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}
