//! Transport-level middleware stack.
//!
//! Layers are applied outer-to-inner: request-id assignment first, then
//! tracing, the body size limit, the request timeout, and request-id
//! propagation back onto the response. Response compression wraps the whole
//! stack when the configuration enables it.

use axum::http::header::HeaderName;
use axum::http::StatusCode;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServiceConfig;

/// Wraps the router in the transport middleware derived from the service
/// configuration.
pub(crate) fn apply_http_layers(router: Router, config: &ServiceConfig) -> Router {
    let x_request_id = HeaderName::from_static("x-request-id");

    let router = router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(
                x_request_id.clone(),
                MakeRequestUuid,
            ))
            .layer(TraceLayer::new_for_http())
            .layer(RequestBodyLimitLayer::new(config.max_request_size))
            // Innermost of the stack: the timeout wraps the plain body so a
            // 408 can be synthesized.
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                config.request_timeout,
            ))
            .layer(PropagateRequestIdLayer::new(x_request_id)),
    );

    if config.http_compression {
        router.layer(CompressionLayer::new())
    } else {
        router
    }
}
