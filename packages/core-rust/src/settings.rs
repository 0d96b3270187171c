//! Process-wide settings, resolved exactly once per start.
//!
//! Resolution order: built-in defaults, then the optional JSON settings file,
//! then environment variables. Environment wins so a supervising daemon can
//! steer a deployed instance without editing files. After boot the resolved
//! [`Settings`] value is immutable for the process lifetime.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

const ENV_LISTEN: &str = "SIDEKICK_LISTEN";
const ENV_DATA_DIR: &str = "SIDEKICK_DATA_DIR";
const ENV_PLUGIN_DIR: &str = "SIDEKICK_PLUGIN_DIR";
const ENV_THREADS: &str = "SIDEKICK_THREADS";
const ENV_MAX_BODY: &str = "SIDEKICK_MAX_BODY";
const ENV_TELEMETRY: &str = "SIDEKICK_TELEMETRY";
const ENV_TELEMETRY_PERIOD: &str = "SIDEKICK_TELEMETRY_PERIOD";
const ENV_MEMORY_CEILING: &str = "SIDEKICK_MEMORY_CEILING";

/// Resolved process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Listen address; port 0 requests an OS-assigned port which is then
    /// announced on stdout for the supervising daemon.
    pub listen: SocketAddr,
    /// Directory holding the crash marker and other persistent state.
    pub data_dir: PathBuf,
    /// Directory scanned for plugin worker executables, if any.
    pub plugin_dir: Option<PathBuf>,
    /// Maximum accepted request body size in bytes.
    pub max_request_body_size: usize,
    /// Explicit reactor-thread override; `None` follows hardware parallelism.
    pub thread_count_override: Option<usize>,
    /// Whether periodic telemetry snapshots are exported at all.
    pub telemetry_enabled: bool,
    /// Snapshot period in seconds when telemetry is enabled.
    pub telemetry_period_secs: u64,
    /// Soft memory ceiling the memory-usage ticker warns against.
    pub memory_ceiling_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            data_dir: PathBuf::from(".sidekick"),
            plugin_dir: None,
            max_request_body_size: 16 * 1024 * 1024,
            thread_count_override: None,
            telemetry_enabled: true,
            telemetry_period_secs: 300,
            memory_ceiling_bytes: 384 * 1024 * 1024,
        }
    }
}

/// Errors from resolving settings. Structural invalidity is fatal to boot.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid setting {name}={value}: {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

/// Source of the resolved process configuration.
pub trait SettingsProvider {
    /// Resolves settings once at boot.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when the configuration is structurally
    /// invalid; callers treat this as fatal before any socket is bound.
    fn load(&self) -> Result<Settings, SettingsError>;
}

/// Partial settings document as it appears in the JSON file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsDoc {
    listen: Option<SocketAddr>,
    data_dir: Option<PathBuf>,
    plugin_dir: Option<PathBuf>,
    max_request_body_size: Option<usize>,
    thread_count_override: Option<usize>,
    telemetry_enabled: Option<bool>,
    telemetry_period_secs: Option<u64>,
    memory_ceiling_bytes: Option<u64>,
}

/// Production provider: defaults, then the optional JSON file, then the
/// process environment.
#[derive(Debug, Default)]
pub struct EnvSettingsProvider {
    /// Path to the JSON settings file, if one is configured.
    pub settings_file: Option<PathBuf>,
}

impl SettingsProvider for EnvSettingsProvider {
    fn load(&self) -> Result<Settings, SettingsError> {
        let mut settings = Settings::default();

        if let Some(path) = &self.settings_file {
            let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
                path: path.clone(),
                source,
            })?;
            let doc: SettingsDoc =
                serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
                    path: path.clone(),
                    source,
                })?;
            apply_doc(&mut settings, doc);
        }

        let env: HashMap<String, String> = std::env::vars().collect();
        apply_env(&mut settings, &env)?;
        validate(&settings)?;
        Ok(settings)
    }
}

fn apply_doc(settings: &mut Settings, doc: SettingsDoc) {
    if let Some(listen) = doc.listen {
        settings.listen = listen;
    }
    if let Some(data_dir) = doc.data_dir {
        settings.data_dir = data_dir;
    }
    if doc.plugin_dir.is_some() {
        settings.plugin_dir = doc.plugin_dir;
    }
    if let Some(size) = doc.max_request_body_size {
        settings.max_request_body_size = size;
    }
    if doc.thread_count_override.is_some() {
        settings.thread_count_override = doc.thread_count_override;
    }
    if let Some(enabled) = doc.telemetry_enabled {
        settings.telemetry_enabled = enabled;
    }
    if let Some(period) = doc.telemetry_period_secs {
        settings.telemetry_period_secs = period;
    }
    if let Some(ceiling) = doc.memory_ceiling_bytes {
        settings.memory_ceiling_bytes = ceiling;
    }
}

fn apply_env(settings: &mut Settings, env: &HashMap<String, String>) -> Result<(), SettingsError> {
    if let Some(value) = env.get(ENV_LISTEN) {
        settings.listen = parse_setting(ENV_LISTEN, value)?;
    }
    if let Some(value) = env.get(ENV_DATA_DIR) {
        settings.data_dir = PathBuf::from(value);
    }
    if let Some(value) = env.get(ENV_PLUGIN_DIR) {
        settings.plugin_dir = Some(PathBuf::from(value));
    }
    if let Some(value) = env.get(ENV_THREADS) {
        settings.thread_count_override = Some(parse_setting(ENV_THREADS, value)?);
    }
    if let Some(value) = env.get(ENV_MAX_BODY) {
        settings.max_request_body_size = parse_setting(ENV_MAX_BODY, value)?;
    }
    if let Some(value) = env.get(ENV_TELEMETRY) {
        settings.telemetry_enabled = parse_bool(ENV_TELEMETRY, value)?;
    }
    if let Some(value) = env.get(ENV_TELEMETRY_PERIOD) {
        settings.telemetry_period_secs = parse_setting(ENV_TELEMETRY_PERIOD, value)?;
    }
    if let Some(value) = env.get(ENV_MEMORY_CEILING) {
        settings.memory_ceiling_bytes = parse_setting(ENV_MEMORY_CEILING, value)?;
    }
    Ok(())
}

fn parse_setting<T>(name: &str, value: &str) -> Result<T, SettingsError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|err: T::Err| SettingsError::Invalid {
        name: name.to_owned(),
        value: value.to_owned(),
        reason: err.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, SettingsError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SettingsError::Invalid {
            name: name.to_owned(),
            value: value.to_owned(),
            reason: "expected a boolean".to_owned(),
        }),
    }
}

fn validate(settings: &Settings) -> Result<(), SettingsError> {
    if settings.telemetry_period_secs == 0 {
        return Err(SettingsError::Invalid {
            name: "telemetry_period_secs".to_owned(),
            value: "0".to_owned(),
            reason: "snapshot period must be at least one second".to_owned(),
        });
    }
    if settings.max_request_body_size == 0 {
        return Err(SettingsError::Invalid {
            name: "max_request_body_size".to_owned(),
            value: "0".to_owned(),
            reason: "request body limit must be positive".to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.max_request_body_size, 16 * 1024 * 1024);
        assert!(settings.telemetry_enabled);
        assert_eq!(settings.telemetry_period_secs, 300);
        assert!(settings.thread_count_override.is_none());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"listen": "127.0.0.1:9308", "telemetry_enabled": false, "thread_count_override": 8}}"#
        )
        .unwrap();

        let provider = EnvSettingsProvider {
            settings_file: Some(file.path().to_path_buf()),
        };
        let settings = provider.load().unwrap();
        assert_eq!(settings.listen, "127.0.0.1:9308".parse().unwrap());
        assert!(!settings.telemetry_enabled);
        assert_eq!(settings.thread_count_override, Some(8));
        // untouched fields keep their defaults
        assert_eq!(settings.telemetry_period_secs, 300);
    }

    #[test]
    fn unknown_file_field_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"telemetry": true}}"#).unwrap();

        let provider = EnvSettingsProvider {
            settings_file: Some(file.path().to_path_buf()),
        };
        assert!(matches!(provider.load(), Err(SettingsError::Parse { .. })));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let provider = EnvSettingsProvider {
            settings_file: Some(PathBuf::from("/nonexistent/sidekick.json")),
        };
        assert!(matches!(provider.load(), Err(SettingsError::Read { .. })));
    }

    #[test]
    fn env_wins_over_file_values() {
        let mut settings = Settings::default();
        apply_doc(
            &mut settings,
            SettingsDoc {
                telemetry_period_secs: Some(60),
                thread_count_override: Some(2),
                ..SettingsDoc::default()
            },
        );
        apply_env(
            &mut settings,
            &env(&[("SIDEKICK_TELEMETRY_PERIOD", "10"), ("SIDEKICK_THREADS", "8")]),
        )
        .unwrap();

        assert_eq!(settings.telemetry_period_secs, 10);
        assert_eq!(settings.thread_count_override, Some(8));
    }

    #[test]
    fn env_bool_accepts_common_spellings() {
        for (raw, expected) in [("1", true), ("off", false), ("TRUE", true), ("no", false)] {
            let mut settings = Settings::default();
            apply_env(&mut settings, &env(&[("SIDEKICK_TELEMETRY", raw)])).unwrap();
            assert_eq!(settings.telemetry_enabled, expected, "raw={raw}");
        }
    }

    #[test]
    fn malformed_env_value_is_invalid() {
        let mut settings = Settings::default();
        let err = apply_env(&mut settings, &env(&[("SIDEKICK_THREADS", "many")])).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { name, .. } if name == "SIDEKICK_THREADS"));
    }

    #[test]
    fn zero_telemetry_period_rejected() {
        let settings = Settings {
            telemetry_period_secs: 0,
            ..Settings::default()
        };
        assert!(matches!(
            validate(&settings),
            Err(SettingsError::Invalid { name, .. }) if name == "telemetry_period_secs"
        ));
    }

    #[test]
    fn zero_body_limit_rejected() {
        let settings = Settings {
            max_request_body_size: 0,
            ..Settings::default()
        };
        assert!(validate(&settings).is_err());
    }
}
