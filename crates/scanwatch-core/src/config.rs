//! Run options.
//!
//! [`RunOptions`] is the immutable configuration snapshot consumed by every
//! component. It is layered from:
//!
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. `SCANWATCH_*` environment variables
//! 4. explicit command-line overrides
//!
//! Unknown keys in any layer are rejected.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};

/// Prefix of environment variables read as configuration.
pub const ENV_PREFIX: &str = "SCANWATCH";

/// Smallest accepted summary interval.
pub const MIN_SUMMARY_INTERVAL_MS: u64 = 1000;

/// Immutable configuration for one monitoring run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunOptions {
    /// HCI device index (`hci<n>`); `None` selects the default adapter.
    pub device_id: Option<u32>,

    /// Request extended advertising scans.
    pub extended: bool,

    /// Report every advertisement instead of one per device.
    pub allow_duplicates: bool,

    /// Period of the summary report.
    pub summary_interval_ms: u64,

    /// Alternate scan-on and scan-off windows.
    pub simulate: bool,

    /// Length of a simulate scan-on window.
    pub simulate_on_ms: u64,

    /// Length of a simulate scan-off window; zero skips the wait.
    pub simulate_off_ms: u64,

    /// Print a line per discovery event.
    pub log_discoveries: bool,

    /// Raise the default log level to `debug`.
    pub verbose: bool,

    /// Explicit tracing filter, e.g. `scanwatch_core=trace`.
    pub log_level: Option<String>,

    /// Directory for rolling JSON log files.
    pub log_dir: Option<PathBuf>,

    /// Address for the HTTP status endpoint.
    pub status_addr: Option<SocketAddr>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            device_id: None,
            extended: false,
            allow_duplicates: false,
            summary_interval_ms: 30_000,
            simulate: false,
            simulate_on_ms: 15_000,
            simulate_off_ms: 500,
            log_discoveries: false,
            verbose: false,
            log_level: None,
            log_dir: None,
            status_addr: None,
        }
    }
}

/// Command-line values that take precedence over every other layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// See [`RunOptions::device_id`].
    pub device_id: Option<u32>,
    /// See [`RunOptions::extended`].
    pub extended: Option<bool>,
    /// See [`RunOptions::allow_duplicates`].
    pub allow_duplicates: Option<bool>,
    /// See [`RunOptions::summary_interval_ms`].
    pub summary_interval_ms: Option<u64>,
    /// See [`RunOptions::simulate`].
    pub simulate: Option<bool>,
    /// See [`RunOptions::simulate_on_ms`].
    pub simulate_on_ms: Option<u64>,
    /// See [`RunOptions::simulate_off_ms`].
    pub simulate_off_ms: Option<u64>,
    /// See [`RunOptions::log_discoveries`].
    pub log_discoveries: Option<bool>,
    /// See [`RunOptions::verbose`].
    pub verbose: Option<bool>,
    /// See [`RunOptions::log_level`].
    pub log_level: Option<String>,
    /// See [`RunOptions::log_dir`].
    pub log_dir: Option<PathBuf>,
    /// See [`RunOptions::status_addr`].
    pub status_addr: Option<SocketAddr>,
}

impl RunOptions {
    /// Load options from all layers and validate them.
    ///
    /// When `file` is `None`, the platform default path is used if it exists.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a source cannot be read, contains
    /// unknown keys, or yields invalid values.
    pub fn load(file: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        Self::load_with_env(file, overrides, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with_env(
        file: Option<&Path>,
        overrides: &ConfigOverrides,
        env: Environment,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();

        match file {
            Some(path) => {
                builder = builder.add_source(toml_file(path).required(true));
            }
            None => {
                if let Some(path) = default_config_path().filter(|p| p.exists()) {
                    builder = builder.add_source(toml_file(&path).required(false));
                }
            }
        }

        let options: Self = builder
            .add_source(env)
            .set_override_option("device_id", overrides.device_id.map(i64::from))?
            .set_override_option("extended", overrides.extended)?
            .set_override_option("allow_duplicates", overrides.allow_duplicates)?
            .set_override_option(
                "summary_interval_ms",
                overrides.summary_interval_ms.map(config_int),
            )?
            .set_override_option("simulate", overrides.simulate)?
            .set_override_option(
                "simulate_on_ms",
                overrides.simulate_on_ms.map(config_int),
            )?
            .set_override_option(
                "simulate_off_ms",
                overrides.simulate_off_ms.map(config_int),
            )?
            .set_override_option("log_discoveries", overrides.log_discoveries)?
            .set_override_option("verbose", overrides.verbose)?
            .set_override_option("log_level", overrides.log_level.clone())?
            .set_override_option(
                "log_dir",
                overrides
                    .log_dir
                    .as_ref()
                    .map(|dir| dir.to_string_lossy().into_owned()),
            )?
            .set_override_option(
                "status_addr",
                overrides.status_addr.map(|addr| addr.to_string()),
            )?
            .build()?
            .try_deserialize()?;

        options.validate()?;
        Ok(options)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidOption`] for the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.summary_interval_ms < MIN_SUMMARY_INTERVAL_MS {
            return Err(invalid(
                "summary_interval_ms",
                format!("must be at least {MIN_SUMMARY_INTERVAL_MS} ms"),
            ));
        }
        if self.simulate && self.simulate_on_ms == 0 {
            return Err(invalid(
                "simulate_on_ms",
                "must be positive when simulate mode is enabled",
            ));
        }
        if let Some(level) = &self.log_level {
            if level.trim().is_empty() {
                return Err(invalid("log_level", "must not be empty"));
            }
        }
        Ok(())
    }

    /// Summary period.
    #[must_use]
    pub const fn summary_interval(&self) -> Duration {
        Duration::from_millis(self.summary_interval_ms)
    }

    /// Simulate scan-on window.
    #[must_use]
    pub const fn simulate_on(&self) -> Duration {
        Duration::from_millis(self.simulate_on_ms)
    }

    /// Simulate scan-off window.
    #[must_use]
    pub const fn simulate_off(&self) -> Duration {
        Duration::from_millis(self.simulate_off_ms)
    }

    /// Device selector as printed in operator lines.
    #[must_use]
    pub fn device_label(&self) -> String {
        self.device_id
            .map_or_else(|| "default".to_owned(), |id| id.to_string())
    }

    /// BlueZ adapter name for the selected device.
    #[must_use]
    pub fn adapter_name(&self) -> Option<String> {
        self.device_id.map(|id| format!("hci{id}"))
    }
}

fn invalid(field: &str, message: impl Into<String>) -> MonitorError {
    MonitorError::InvalidOption {
        field: field.to_owned(),
        message: message.into(),
    }
}

// Millisecond values beyond i64 are clamped; they are far outside any
// meaningful window anyway.
fn config_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn toml_file(path: &Path) -> File<config::FileSourceFile, FileFormat> {
    File::from(path).format(FileFormat::Toml)
}

/// System-wide configuration file on Linux.
const SYSTEM_CONFIG_PATH: &str = "/etc/scanwatch/config.toml";

/// Platform default configuration file.
///
/// On Linux: `/etc/scanwatch/config.toml` when it exists, else the user
/// configuration directory. Elsewhere: the user configuration directory.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    let user = directories::ProjectDirs::from("", "", "scanwatch")
        .map(|dirs| dirs.config_dir().join("config.toml"));

    if cfg!(target_os = "linux") {
        prefer_system_config(Path::new(SYSTEM_CONFIG_PATH), user)
    } else {
        user
    }
}

fn prefer_system_config(system: &Path, user: Option<PathBuf>) -> Option<PathBuf> {
    if system.exists() {
        Some(system.to_path_buf())
    } else {
        user
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    // A prefix nothing in the test environment sets.
    fn quiet_env() -> Environment {
        Environment::with_prefix("SCANWATCH_TEST_UNSET")
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let options = RunOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.simulate_on(), Duration::from_millis(15_000));
        assert_eq!(options.simulate_off(), Duration::from_millis(500));
        assert_eq!(options.device_label(), "default");
        assert_eq!(options.adapter_name(), None);
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            "device_id = 1\nsimulate = true\nsimulate_on_ms = 2000\nsummary_interval_ms = 5000\n",
        );
        let options =
            RunOptions::load_with_env(Some(file.path()), &ConfigOverrides::default(), quiet_env())
                .unwrap();

        assert_eq!(options.device_id, Some(1));
        assert!(options.simulate);
        assert_eq!(options.simulate_on_ms, 2000);
        assert_eq!(options.simulate_off_ms, 500);
        assert_eq!(options.adapter_name().as_deref(), Some("hci1"));
    }

    #[test]
    fn test_overrides_beat_file() {
        let file = write_config("allow_duplicates = false\nsimulate_off_ms = 100\n");
        let overrides = ConfigOverrides {
            allow_duplicates: Some(true),
            simulate_off_ms: Some(0),
            status_addr: Some("127.0.0.1:9100".parse().unwrap()),
            ..ConfigOverrides::default()
        };
        let options =
            RunOptions::load_with_env(Some(file.path()), &overrides, quiet_env()).unwrap();

        assert!(options.allow_duplicates);
        assert_eq!(options.simulate_off_ms, 0);
        assert_eq!(options.status_addr, Some("127.0.0.1:9100".parse().unwrap()));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let file = write_config("simulate_on = 100\n");
        let err =
            RunOptions::load_with_env(Some(file.path()), &ConfigOverrides::default(), quiet_env())
                .unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_missing_explicit_file_is_rejected() {
        let err = RunOptions::load_with_env(
            Some(Path::new("/nonexistent/scanwatch.toml")),
            &ConfigOverrides::default(),
            quiet_env(),
        )
        .unwrap_err();
        assert!(matches!(err, MonitorError::ConfigLoad(_)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let options = RunOptions {
            summary_interval_ms: 10,
            ..RunOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(MonitorError::InvalidOption { ref field, .. }) if field == "summary_interval_ms"
        ));

        let options = RunOptions {
            simulate: true,
            simulate_on_ms: 0,
            ..RunOptions::default()
        };
        assert!(options.validate().is_err());

        let options = RunOptions {
            simulate: false,
            simulate_on_ms: 0,
            ..RunOptions::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_system_config_wins_when_present() {
        let system = write_config("");
        let user = PathBuf::from("/home/someone/.config/scanwatch/config.toml");

        assert_eq!(
            prefer_system_config(system.path(), Some(user.clone())),
            Some(system.path().to_path_buf())
        );

        let missing = system.path().with_extension("absent");
        assert_eq!(prefer_system_config(&missing, Some(user.clone())), Some(user));
        assert_eq!(prefer_system_config(&missing, None), None);
    }

    #[test]
    fn test_default_path_is_a_toml_file() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("config.toml"));
        }
    }
}
