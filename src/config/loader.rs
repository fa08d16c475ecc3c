//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "SERIAL_TRANSPORT";

/// Config file name
const CONFIG_FILE_NAME: &str = "serial-transport.toml";

/// Environment variable for explicit config path
pub const CONFIG_PATH_ENV: &str = "SERIAL_TRANSPORT_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SERIAL_TRANSPORT_CONFIG` environment variable (explicit path)
    /// 2. `./serial-transport.toml` (current directory)
    /// 3. The platform configuration directory
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables override file values; the result is validated.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };
        apply_env_overrides(&mut config)?;
        config.validate()?;

        debug!(path = ?config_path, "Configuration loaded");
        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    ///
    /// Malformed environment overrides are ignored here.
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        let _ = apply_env_overrides(&mut config);

        Self {
            config_path: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to the file it was loaded from.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired("No config file path set".to_string()))?;

        save_to_file(&self.config, path)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }

    /// Reload configuration from file (if path is set).
    pub fn reload(&mut self) -> ConfigResult<()> {
        if let Some(ref path) = self.config_path {
            let mut config = load_from_file(path)?;
            apply_env_overrides(&mut config)?;
            config.validate()?;
            self.config = config;
        }
        Ok(())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    get_default_config_path().filter(|p| p.exists())
}

/// Platform configuration directory for this application.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "serial-transport").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default path for creating a new config file.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Read `SERIAL_TRANSPORT_<name>` and parse it, if set.
fn env_value<T: FromStr>(name: &str, what: &str) -> ConfigResult<Option<T>> {
    let var = format!("{ENV_PREFIX}_{name}");
    match std::env::var(&var) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::env_parse(var, format!("Invalid {what}"))),
        Err(_) => Ok(None),
    }
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern `SERIAL_TRANSPORT_<SECTION>_<KEY>`,
/// for example `SERIAL_TRANSPORT_TRANSPORT_SETTLE_DELAY_MS=50` or
/// `SERIAL_TRANSPORT_TESTING_PORT=COM15`. The legacy `TEST_PORT`, `TEST_BAUD`,
/// `TEST_TIMEOUT` and `TEST_LOOPBACK` variables are honoured for the testing
/// section.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    if let Some(v) = env_value("TRANSPORT_SETTLE_DELAY_MS", "delay")? {
        config.transport.settle_delay_ms = v;
    }
    if let Some(v) = env_value("TRANSPORT_CANCEL_YIELD_MS", "delay")? {
        config.transport.cancel_yield_ms = v;
    }
    if let Some(v) = env_value("TRANSPORT_POLL_INTERVAL_MS", "interval")? {
        config.transport.poll_interval_ms = v;
    }
    if let Some(v) = env_value("THREADS_TERM_TIMEOUT_MS", "timeout")? {
        config.threads.term_timeout_ms = v;
    }
    if let Some(v) = env_value("SERIAL_DEFAULT_BAUD", "baud rate")? {
        config.serial.default_baud = v;
    }
    if let Some(v) = env_value("SERIAL_DEFAULT_TIMEOUT_MS", "timeout")? {
        config.serial.default_timeout_ms = v;
    }

    if let Some(v) = env_value::<String>("LOGGING_LEVEL", "log level")? {
        config.logging.level = v;
    }
    if let Some(v) = env_value::<String>("LOGGING_FORMAT", "log format")? {
        config.logging.format = match v.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => {
                return Err(ConfigError::env_parse(
                    format!("{ENV_PREFIX}_LOGGING_FORMAT"),
                    "Expected json, pretty or compact",
                ))
            }
        };
    }

    if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_TESTING_PORT"))
        .or_else(|_| std::env::var("TEST_PORT"))
    {
        config.testing.port = Some(val);
    }
    if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_TESTING_BAUD"))
        .or_else(|_| std::env::var("TEST_BAUD"))
    {
        config.testing.baud = val.parse().map_err(|_| {
            ConfigError::env_parse(
                format!("{ENV_PREFIX}_TESTING_BAUD or TEST_BAUD"),
                "Invalid baud rate",
            )
        })?;
    }
    if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_TESTING_TIMEOUT_MS"))
        .or_else(|_| std::env::var("TEST_TIMEOUT"))
    {
        config.testing.timeout_ms = val.parse().map_err(|_| {
            ConfigError::env_parse(
                format!("{ENV_PREFIX}_TESTING_TIMEOUT_MS or TEST_TIMEOUT"),
                "Invalid timeout",
            )
        })?;
    }
    if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_TESTING_LOOPBACK_ENABLED"))
        .or_else(|_| std::env::var("TEST_LOOPBACK"))
    {
        config.testing.loopback_enabled = val.eq_ignore_ascii_case("true") || val == "1";
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_default_loader() {
        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().transport.settle_delay_ms, 200);
        assert!(loader.config_path.is_none());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("SERIAL_TRANSPORT_TRANSPORT_SETTLE_DELAY_MS", "25");
        env::set_var("SERIAL_TRANSPORT_LOGGING_FORMAT", "JSON");

        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().transport.settle_delay_ms, 25);
        assert_eq!(loader.config().logging.format, LogFormat::Json);

        env::remove_var("SERIAL_TRANSPORT_TRANSPORT_SETTLE_DELAY_MS");
        env::remove_var("SERIAL_TRANSPORT_LOGGING_FORMAT");
    }

    #[test]
    #[serial]
    fn test_malformed_env_override() {
        env::set_var("SERIAL_TRANSPORT_THREADS_TERM_TIMEOUT_MS", "soon");

        let mut config = Config::default();
        let err = apply_env_overrides(&mut config).unwrap_err();
        assert!(matches!(err, ConfigError::EnvParseError { .. }));

        env::remove_var("SERIAL_TRANSPORT_THREADS_TERM_TIMEOUT_MS");
    }

    #[test]
    #[serial]
    fn test_legacy_test_port_env() {
        env::set_var("TEST_PORT", "COM99");
        env::set_var("TEST_BAUD", "57600");

        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().testing.port, Some("COM99".to_string()));
        assert_eq!(loader.config().testing.baud, 57600);

        env::remove_var("TEST_PORT");
        env::remove_var("TEST_BAUD");
    }
}
