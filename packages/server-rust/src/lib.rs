//! Sidekick Server — supervision layer for the sidecar daemon: boot
//! sequencing, pre-start hooks, tickers, attached plugin/metric workers, and
//! the request dispatch boundary.

pub mod config;
pub mod crash_guard;
pub mod dispatch;
pub mod limits;
pub mod network;
pub mod plugins;
pub mod supervisor;
pub mod telemetry;

pub use config::{ConfigError, ServiceConfig};
pub use crash_guard::{CrashGuard, StartKind};
pub use dispatch::{DispatchResponse, HandlerError, RequestContext, RequestDispatcher};
pub use network::{ServicePhase, ShutdownController};
pub use plugins::{DirectoryPluginRuntime, PluginError, PluginRuntime};
pub use supervisor::{HookEffects, ProcessHandle, ServiceSupervisor, SupervisorError, TickerEntry};
pub use telemetry::{LogSink, MetricAggregator, MetricHandle, TelemetrySink};
