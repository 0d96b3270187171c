//! Sidekick Core — settings model, topology sizing, metric counters, and the
//! crash marker shared between server and workers.

pub mod crash;
pub mod metrics;
pub mod settings;
pub mod topology;

pub use crash::CrashMarker;
pub use metrics::MetricRegistry;
pub use settings::{EnvSettingsProvider, Settings, SettingsError, SettingsProvider};
pub use topology::Topology;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
