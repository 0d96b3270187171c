//! Request dispatch boundary.
//!
//! The supervision core's only obligation towards request handling: every
//! accepted request invokes the bound [`RequestDispatcher`] exactly once, on
//! its own task, so one slow request stalls neither other requests nor the
//! tickers. What the dispatcher does with the request is out of scope here.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use tracing::debug;

/// Context handed to the dispatcher for a single inbound request.
#[derive(Debug)]
pub struct RequestContext {
    /// Transport-assigned request id, when present.
    pub request_id: Option<String>,
    pub method: Method,
    pub path: String,
    pub body: Bytes,
}

/// Response produced by a dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl DispatchResponse {
    /// Plain-text response.
    #[must_use]
    pub fn text(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }

    /// JSON response from an already-serialized value.
    #[must_use]
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: Bytes::from(value.to_string()),
        }
    }
}

/// A failure local to one request. Never propagated to the supervisor and
/// never allowed to affect other in-flight requests or tickers; the network
/// boundary converts it into a protocol-level error response.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    /// Protocol status this failure maps to.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Entry point invoked once per accepted inbound request.
#[async_trait]
pub trait RequestDispatcher: Send + Sync + 'static {
    async fn handle(&self, ctx: RequestContext) -> Result<DispatchResponse, HandlerError>;
}

/// Built-in dispatcher acknowledging every request.
///
/// The real query-processing dispatcher lives outside the supervision core;
/// this one keeps the service answerable when none is plugged in.
#[derive(Debug, Default)]
pub struct AckDispatcher;

#[async_trait]
impl RequestDispatcher for AckDispatcher {
    async fn handle(&self, ctx: RequestContext) -> Result<DispatchResponse, HandlerError> {
        debug!(
            request_id = ctx.request_id.as_deref().unwrap_or("-"),
            method = %ctx.method,
            path = %ctx.path,
            body_bytes = ctx.body.len(),
            "request dispatched",
        );
        Ok(DispatchResponse::json(
            StatusCode::OK,
            &serde_json::json!({"service": "sidekick", "status": "ok"}),
        ))
    }
}
