//! Network layer: accept loop, transport middleware, shutdown coordination.

mod middleware;
mod module;
mod shutdown;

pub(crate) use module::NetworkService;
pub use shutdown::{InFlightRequest, ServicePhase, ShutdownController};
