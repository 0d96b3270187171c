//! Plugin runtime boundary.
//!
//! The supervision core only defines how plugin workers are attached: the
//! plugin hook calls [`PluginRuntime::discover_and_start`], hands every
//! discovered worker process to the supervisor, and registers whatever
//! periodic tasks the runtime asks for. What the plugins do is theirs.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{info, warn};

use crate::supervisor::{ProcessHandle, TickerEntry};

/// Errors from plugin discovery and startup. Raised inside a pre-start hook,
/// so they abort startup entirely.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("failed to scan plugin directory {dir}: {source}")]
    Scan {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start plugin worker {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Supplier of plugin worker processes and their periodic tasks.
pub trait PluginRuntime: Send + Sync {
    /// Discovers plugins, hands each worker process to `attach`, and returns
    /// the periodic tasks to register as tickers.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when discovery or worker startup fails.
    fn discover_and_start(
        &self,
        attach: &mut dyn FnMut(ProcessHandle),
    ) -> Result<Vec<TickerEntry>, PluginError>;
}

/// Production runtime: every executable in the plugin directory becomes one
/// worker process inheriting `PLUGIN_DIR`.
#[derive(Debug)]
pub struct DirectoryPluginRuntime {
    dir: PathBuf,
}

impl DirectoryPluginRuntime {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl PluginRuntime for DirectoryPluginRuntime {
    fn discover_and_start(
        &self,
        attach: &mut dyn FnMut(ProcessHandle),
    ) -> Result<Vec<TickerEntry>, PluginError> {
        if !self.dir.is_dir() {
            warn!(dir = %self.dir.display(), "plugin directory absent, skipping discovery");
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.dir).map_err(|source| PluginError::Scan {
            dir: self.dir.clone(),
            source,
        })?;

        let mut started = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| PluginError::Scan {
                dir: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !is_executable(&path) {
                continue;
            }

            let name = path
                .file_name()
                .map_or_else(|| "plugin".to_owned(), |n| n.to_string_lossy().into_owned());
            let child = Command::new(&path)
                .env("PLUGIN_DIR", &self.dir)
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| PluginError::Spawn {
                    path: path.clone(),
                    source,
                })?;

            attach(ProcessHandle::Child {
                name: name.clone(),
                child,
            });
            started.push(name);
        }

        info!(count = started.len(), plugins = ?started, "plugin workers started");
        Ok(Vec::new())
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
