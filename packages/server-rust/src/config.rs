//! Immutable service configuration.
//!
//! Built once at boot from resolved settings plus the computed topology,
//! validated before the supervisor is constructed, and never mutated after
//! the service starts.

use std::net::SocketAddr;
use std::time::Duration;

use sidekick_core::{Settings, Topology};

/// Sizing and tuning parameters the service runs with.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Listen address; port 0 requests an OS-assigned port.
    pub listen: SocketAddr,
    /// Reactor threads sizing the async runtime.
    pub reactor_threads: usize,
    /// Worker slots for blocking work, throttled relative to reactors.
    pub worker_processes: usize,
    /// Per-connection input buffer size in bytes.
    pub input_buffer_size: usize,
    /// Maximum accepted request body size in bytes.
    pub max_request_size: usize,
    /// Per-connection output buffer size in bytes.
    pub output_buffer_size: usize,
    /// Listen backlog handed to the kernel.
    pub backlog: u32,
    /// Whether additional instances may share the listen port.
    pub reuse_port: bool,
    /// Whether response compression is applied.
    pub http_compression: bool,
    /// Maximum time a single request may take end to end.
    pub request_timeout: Duration,
    /// Upper bound on waiting for in-flight requests during shutdown.
    pub shutdown_max_wait: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            reactor_threads: 1,
            worker_processes: 1,
            input_buffer_size: 4 * 1024 * 1024,
            max_request_size: 16 * 1024 * 1024,
            output_buffer_size: 64 * 1024 * 1024,
            backlog: 8192,
            reuse_port: true,
            http_compression: true,
            request_timeout: Duration::from_secs(30),
            shutdown_max_wait: Duration::from_secs(5),
        }
    }
}

impl ServiceConfig {
    /// Builds the configuration from resolved settings and the sized topology.
    ///
    /// Pure construction, no side effects; callers validate via
    /// [`ServiceConfig::validate`] (the supervisor does this on construction).
    #[must_use]
    pub fn from_settings(settings: &Settings, topology: Topology) -> Self {
        Self {
            listen: settings.listen,
            reactor_threads: topology.reactor_threads,
            worker_processes: topology.worker_processes,
            max_request_size: settings.max_request_body_size,
            ..Self::default()
        }
    }

    /// Rejects internally inconsistent limits.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a zero limit or a request-size limit that
    /// cannot fit the output buffer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("reactor_threads", self.reactor_threads),
            ("worker_processes", self.worker_processes),
            ("input_buffer_size", self.input_buffer_size),
            ("max_request_size", self.max_request_size),
            ("output_buffer_size", self.output_buffer_size),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroLimit { field });
            }
        }
        if self.shutdown_max_wait.is_zero() {
            return Err(ConfigError::ZeroLimit {
                field: "shutdown_max_wait",
            });
        }
        if self.max_request_size > self.output_buffer_size {
            return Err(ConfigError::RequestLimitExceedsOutputBuffer {
                max_request_size: self.max_request_size,
                output_buffer_size: self.output_buffer_size,
            });
        }
        Ok(())
    }
}

/// Errors from validating the service configuration. Fatal, pre-start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroLimit { field: &'static str },
    #[error("max request size {max_request_size} exceeds output buffer {output_buffer_size}")]
    RequestLimitExceedsOutputBuffer {
        max_request_size: usize,
        output_buffer_size: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ServiceConfig::default().validate().unwrap();
    }

    #[test]
    fn from_settings_carries_topology_and_limits() {
        let settings = Settings {
            max_request_body_size: 1024,
            ..Settings::default()
        };
        let config = ServiceConfig::from_settings(&settings, Topology::size(Some(8), 1));
        assert_eq!(config.reactor_threads, 8);
        assert_eq!(config.worker_processes, 2);
        assert_eq!(config.max_request_size, 1024);
    }

    #[test]
    fn zero_limits_rejected() {
        let config = ServiceConfig {
            input_buffer_size: 0,
            ..ServiceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroLimit { field: "input_buffer_size" })
        ));

        let config = ServiceConfig {
            shutdown_max_wait: Duration::ZERO,
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_request_limit_rejected() {
        let config = ServiceConfig {
            max_request_size: 128 * 1024 * 1024,
            ..ServiceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RequestLimitExceedsOutputBuffer { .. })
        ));
    }
}
