//! Network service: accepts connections and feeds the bound dispatcher.
//!
//! The listener is bound by the supervisor before the hook chain runs, but
//! no connection is accepted until `serve()` — hooks therefore always finish
//! before the first request is dispatched. Every request runs on its own
//! task, so one slow request never stalls another or the tickers.

use std::future::{Future, IntoFuture};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::middleware::apply_http_layers;
use super::shutdown::{ServicePhase, ShutdownController};
use crate::config::ServiceConfig;
use crate::dispatch::{RequestContext, RequestDispatcher};

/// Shared state for the dispatch route.
#[derive(Clone)]
pub(crate) struct AppState {
    dispatcher: Option<Arc<dyn RequestDispatcher>>,
    shutdown: Arc<ShutdownController>,
    config: Arc<ServiceConfig>,
}

/// The serving half of the supervisor: owns the router and the accept loop.
pub(crate) struct NetworkService {
    config: Arc<ServiceConfig>,
    dispatcher: Option<Arc<dyn RequestDispatcher>>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkService {
    pub(crate) fn new(
        config: Arc<ServiceConfig>,
        dispatcher: Option<Arc<dyn RequestDispatcher>>,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            shutdown,
        }
    }

    /// Assembles the router: every route falls through to the dispatcher.
    pub(crate) fn router(&self) -> Router {
        let state = AppState {
            dispatcher: self.dispatcher.clone(),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::clone(&self.config),
        };
        let router = Router::new().fallback(dispatch_request).with_state(state);
        apply_http_layers(router, &self.config)
    }

    /// Serves connections on the pre-bound listener until the shutdown
    /// future resolves. The drain starts the moment the trigger fires: new
    /// requests are rejected, in-flight ones get at most the configured max
    /// wait, then the serve loop is abandoned.
    ///
    /// # Errors
    ///
    /// Returns an error only for a fatal accept-loop I/O failure.
    pub(crate) async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let router = self.router();

        self.shutdown.set_accepting();
        info!("accepting connections");

        let controller = Arc::clone(&self.shutdown);
        let mut draining = self.shutdown.subscribe();
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            shutdown.await;
            controller.begin_drain();
        })
        .into_future();

        let max_wait = self.config.shutdown_max_wait;
        tokio::pin!(serve);
        tokio::select! {
            result = &mut serve => {
                result?;
                if self.shutdown.wait_for_drain(max_wait).await {
                    info!("all in-flight requests drained");
                }
            }
            // Bound the drain: once the stop signal flips, the serve loop
            // gets max_wait to finish its in-flight requests.
            () = async {
                let _ = draining.wait_for(|stop| *stop).await;
                tokio::time::sleep(max_wait).await;
            } => {
                warn!(
                    in_flight = self.shutdown.in_flight(),
                    "drain bound expired with requests still in flight"
                );
            }
        }
        Ok(())
    }
}

/// Fallback handler: one invocation of the bound dispatcher per request.
async fn dispatch_request(State(state): State<AppState>, request: Request) -> Response {
    if state.shutdown.phase() != ServicePhase::Accepting {
        return (StatusCode::SERVICE_UNAVAILABLE, "service is shutting down").into_response();
    }
    let _in_flight = state.shutdown.track_request();

    let Some(dispatcher) = state.dispatcher.as_ref() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no request handler bound").into_response();
    };

    let (parts, body) = request.into_parts();
    let request_id = parts
        .headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let body = match axum::body::to_bytes(body, state.config.max_request_size).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "request body exceeded the configured limit");
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    let ctx = RequestContext {
        request_id,
        method: parts.method,
        path: parts.uri.path().to_owned(),
        body,
    };

    match dispatcher.handle(ctx).await {
        Ok(response) => Response::builder()
            .status(response.status)
            .header(http::header::CONTENT_TYPE, response.content_type)
            .body(Body::from(response.body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        // The failure stays local to this request: answered at the protocol
        // level, never propagated to the supervisor.
        Err(err) => {
            warn!(error = %err, "request handler failed");
            (err.status(), err.to_string()).into_response()
        }
    }
}
