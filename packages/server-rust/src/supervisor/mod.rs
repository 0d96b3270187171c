//! Service supervision: ordered pre-start hooks, tickers, attached
//! processes, and the single request entry point.
//!
//! The supervisor owns the whole startup sequence. Hooks run strictly in
//! registration order, synchronously, after the listener is bound but before
//! any connection is accepted; a failing hook aborts startup with no partial
//! service. `start()` consumes the supervisor, so registering anything after
//! start is rejected at compile time rather than at runtime.

mod process;
mod ticker;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub use process::ProcessHandle;
pub use ticker::{TickerEntry, TickerFn, TickerFuture};

use crate::config::{ConfigError, ServiceConfig};
use crate::dispatch::RequestDispatcher;
use crate::network::{NetworkService, ShutdownController};

/// Errors from supervising the service lifecycle. Everything here is
/// pre-accept and therefore fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("pre-start hook '{name}' failed: {source}")]
    Hook {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to bind {addr}: {source}")]
    Startup {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("fatal server error: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
}

/// Side effects a pre-start hook hands back to the supervisor: processes to
/// supervise and tickers to schedule once the service is running.
#[derive(Debug, Default)]
pub struct HookEffects {
    pub processes: Vec<ProcessHandle>,
    pub tickers: Vec<TickerEntry>,
}

type HookFn = Box<dyn FnOnce() -> anyhow::Result<HookEffects> + Send>;

struct Hook {
    name: &'static str,
    run: HookFn,
}

/// Owns the network service and sequences its startup.
pub struct ServiceSupervisor {
    config: Arc<ServiceConfig>,
    shutdown: Arc<ShutdownController>,
    hooks: Vec<Hook>,
    tickers: Vec<TickerEntry>,
    processes: Vec<ProcessHandle>,
    dispatcher: Option<Arc<dyn RequestDispatcher>>,
    local_addr_tx: watch::Sender<Option<SocketAddr>>,
}

impl ServiceSupervisor {
    /// Validates the configuration and constructs the supervisor. Pure
    /// construction, no side effects.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when limits are internally inconsistent.
    pub fn new(config: ServiceConfig) -> Result<Self, SupervisorError> {
        config.validate()?;
        let (local_addr_tx, _) = watch::channel(None);
        Ok(Self {
            config: Arc::new(config),
            shutdown: Arc::new(ShutdownController::new()),
            hooks: Vec::new(),
            tickers: Vec::new(),
            processes: Vec::new(),
            dispatcher: None,
            local_addr_tx,
        })
    }

    /// The validated configuration the service will run with.
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Shared shutdown controller, for health inspection and for wiring
    /// external stop triggers.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Watch channel resolving to the actual bound address once `start()`
    /// has bound the listener (relevant with an OS-assigned port).
    #[must_use]
    pub fn local_addr_watch(&self) -> watch::Receiver<Option<SocketAddr>> {
        self.local_addr_tx.subscribe()
    }

    /// Appends a one-shot initialization hook. Hooks execute strictly in
    /// registration order, before the service accepts any connection; a hook
    /// must not depend on state only established by a later hook.
    pub fn register_hook(
        &mut self,
        name: &'static str,
        hook: impl FnOnce() -> anyhow::Result<HookEffects> + Send + 'static,
    ) {
        self.hooks.push(Hook {
            name,
            run: Box::new(hook),
        });
    }

    /// Registers a periodic ticker, effective once the service has started.
    pub fn register_ticker(&mut self, entry: TickerEntry) {
        debug!(ticker = entry.name(), period = ?entry.period(), "ticker registered");
        self.tickers.push(entry);
    }

    /// Hands a subprocess or background worker to the runtime for lifecycle
    /// supervision. Only possible before `start()` consumes the supervisor.
    pub fn attach_process(&mut self, handle: ProcessHandle) {
        debug!(process = handle.name(), "process attached");
        self.processes.push(handle);
    }

    /// Binds the request entry point. Exactly one dispatcher serves
    /// requests; a rebind replaces the previous one (last write wins) and is
    /// surfaced as a warning because it is almost always a logic error
    /// upstream.
    pub fn bind_request_handler(&mut self, dispatcher: Arc<dyn RequestDispatcher>) {
        if self.dispatcher.replace(dispatcher).is_some() {
            warn!("request handler rebound, previous binding replaced");
        }
    }

    #[cfg(test)]
    fn bound_dispatcher(&self) -> Option<Arc<dyn RequestDispatcher>> {
        self.dispatcher.clone()
    }

    /// Runs the service for its whole lifetime.
    ///
    /// Sequence: bind the listener, announce the address, run the hook chain
    /// in order, schedule tickers and process monitors, then accept
    /// connections until the shutdown future resolves. Blocks the caller
    /// until the service has stopped.
    ///
    /// # Errors
    ///
    /// [`SupervisorError::Startup`] when the endpoint cannot be bound (no
    /// retry — the caller reports and exits non-zero);
    /// [`SupervisorError::Hook`] when a pre-start hook fails (remaining
    /// hooks are skipped, the service never accepts);
    /// [`SupervisorError::Serve`] for a fatal accept-loop failure.
    pub async fn start(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), SupervisorError> {
        let listener = bind_listener(&self.config).map_err(|source| SupervisorError::Startup {
            addr: self.config.listen,
            source,
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| SupervisorError::Startup {
                addr: self.config.listen,
                source,
            })?;
        let _ = self.local_addr_tx.send(Some(local_addr));
        // The supervising daemon reads the resolved listen address from
        // stdout before anything else is printed.
        println!("sidekick listening on {local_addr}");
        info!(
            %local_addr,
            reactors = self.config.reactor_threads,
            workers = self.config.worker_processes,
            input_buffer = self.config.input_buffer_size,
            output_buffer = self.config.output_buffer_size,
            "listener bound"
        );

        for hook in std::mem::take(&mut self.hooks) {
            debug!(hook = hook.name, "running pre-start hook");
            let effects = (hook.run)().map_err(|source| SupervisorError::Hook {
                name: hook.name,
                source,
            })?;
            self.processes.extend(effects.processes);
            self.tickers.extend(effects.tickers);
        }

        if self.dispatcher.is_none() {
            warn!("no request handler bound, requests will be rejected");
        }

        for entry in std::mem::take(&mut self.tickers) {
            ticker::spawn_ticker(entry, self.shutdown.subscribe());
        }
        for process in std::mem::take(&mut self.processes) {
            debug!(process = process.name(), "supervising attached process");
            process::spawn_monitor(process, self.shutdown.subscribe());
        }

        let service = NetworkService::new(
            Arc::clone(&self.config),
            self.dispatcher.take(),
            Arc::clone(&self.shutdown),
        );
        service
            .serve(listener, shutdown)
            .await
            .map_err(|source| SupervisorError::Serve { source })
    }
}

/// Binds the listen socket with the configured backlog and port-sharing
/// options. Synchronous: binding happens before anything concurrent exists.
fn bind_listener(config: &ServiceConfig) -> std::io::Result<TcpListener> {
    let socket = match config.listen {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    if config.reuse_port {
        socket.set_reuseport(true)?;
    }
    socket.bind(config.listen)?;
    socket.listen(config.backlog)
}
