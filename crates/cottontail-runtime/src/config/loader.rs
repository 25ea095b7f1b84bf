//! Settings loader built on figment.
//!
//! # Sources (lowest to highest priority)
//!
//! 1. Built-in defaults
//! 2. Programmatic merges ([`ConfigLoader::merge`])
//! 3. Profile-specific file (`cottontail.{profile}.toml`)
//! 4. Main file (`cottontail.toml` or `config.toml`)
//! 5. Environment variables (`COTTONTAIL_*`)
//!
//! YAML files (`cottontail.yaml`, `cottontail.yml`) are searched as well
//! when the `yaml-config` feature is enabled.
//!
//! # Environment Variable Mapping
//!
//! Variables use the `COTTONTAIL_` prefix with `__` as the nesting separator:
//!
//! - `COTTONTAIL_RAISE_ON_EXCEPTION=false` → `raise_on_exception = false`
//! - `COTTONTAIL_CONNECTION__URL=amqp://broker` → `connection.url = "amqp://broker"`
//! - `COTTONTAIL_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//!
//! ```rust,ignore
//! use cottontail_runtime::config::ConfigLoader;
//!
//! let settings = ConfigLoader::new()
//!     .profile("production")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::ConsumerSettings;

const ENV_PREFIX: &str = "COTTONTAIL_";

/// Settings profile, selecting an extra profile-specific file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    /// Returns the profile name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name, accepting `dev` and `prod` shorthands.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `COTTONTAIL_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var("COTTONTAIL_PROFILE")
            .map(|name| Self::parse(&name))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-source settings loader.
pub struct ConfigLoader {
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader using the profile from the environment.
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the profile.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a directory to search for settings files.
    ///
    /// When no search path is added, the current directory and the user
    /// config directory (`<config>/cottontail`) are searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables environment variables (the default).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges settings programmatically, above the built-in defaults.
    pub fn merge(mut self, settings: ConsumerSettings) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(settings));
        self
    }

    /// Loads the settings.
    pub fn load(self) -> ConfigResult<ConsumerSettings> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let settings: ConsumerSettings = figment
            .extract()
            .map_err(|e| ConfigError::Extract(e.to_string()))?;

        debug!(
            profile = %profile,
            raise_on_exception = settings.raise_on_exception,
            logging_level = %settings.logging.level,
            "Settings loaded"
        );

        Ok(settings)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(ConsumerSettings::default()));

        let user_figment = std::mem::take(&mut self.figment);
        figment = figment.merge(user_figment);

        if let Some(path) = self.config_file.take() {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path));
            }
            info!(path = %path.display(), "Loading settings file");
            figment = Self::merge_config_file(figment, &path)?;
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!("Loading environment variables with {ENV_PREFIX} prefix");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        Ok(figment)
    }

    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }

        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("cottontail"));
        }
        paths
    }

    /// Searches `search_paths × base_names`; a profile-specific file is
    /// merged before its base file, and the first base file found ends the
    /// search.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_format_files<F>(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        base_names: &[&str],
        merge_fn: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for search_path in search_paths {
            for base_name in base_names {
                let Some((stem, ext)) = base_name.rsplit_once('.') else {
                    continue;
                };

                let profile_path =
                    search_path.join(format!("{stem}.{}.{ext}", self.profile.as_str()));
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile-specific settings");
                    figment = merge_fn(figment, &profile_path);
                }

                let base_path = search_path.join(base_name);
                if base_path.exists() {
                    info!(path = %base_path.display(), "Loading settings file");
                    return (merge_fn(figment, &base_path), true);
                }
            }
        }
        (figment, false)
    }

    #[allow(unused_mut)]
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["cottontail.toml", "config.toml"],
                |fig, path| fig.merge(Toml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["cottontail.yaml", "cottontail.yml"],
                |fig, path| fig.merge(Yaml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        if !found {
            warn!("No settings file found, using defaults");
        }
        figment
    }
}

/// Loads settings from the default locations.
pub fn load_settings() -> ConfigResult<ConsumerSettings> {
    ConfigLoader::new().load()
}

/// Loads settings from one file, with environment overrides.
pub fn load_settings_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<ConsumerSettings> {
    ConfigLoader::new().file(path).load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use figment::Jail;

    #[test]
    fn test_defaults_without_sources() {
        Jail::expect_with(|jail| {
            let settings = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;

            assert!(settings.raise_on_exception);
            assert_eq!(settings.logging.level, LogLevel::Info);
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "cottontail.toml",
                r#"
                    raise_on_exception = false

                    [connection]
                    url = "amqp://from-file"
                    hosts = ["amqp://a", "amqp://b"]

                    [logging]
                    level = "warn"
                "#,
            )?;
            jail.set_env("COTTONTAIL_CONNECTION__URL", "amqp://from-env");

            let settings = ConfigLoader::new()
                .search_path(jail.directory())
                .load()
                .map_err(|e| e.to_string())?;

            assert!(!settings.raise_on_exception);
            assert_eq!(settings.connection.url, "amqp://from-env");
            assert_eq!(settings.connection.hosts, vec!["amqp://a", "amqp://b"]);
            assert_eq!(settings.logging.level, LogLevel::Warn);
            Ok(())
        });
    }

    #[test]
    fn test_profile_file_is_overridden_by_main_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "cottontail.production.toml",
                r#"
                    raise_on_exception = false
                    [logging]
                    level = "error"
                "#,
            )?;
            jail.create_file("cottontail.toml", "[logging]\nlevel = \"debug\"\n")?;

            let settings = ConfigLoader::new()
                .profile("prod")
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;

            assert!(!settings.raise_on_exception);
            assert_eq!(settings.logging.level, LogLevel::Debug);
            Ok(())
        });
    }

    #[test]
    fn test_missing_or_unsupported_file() {
        Jail::expect_with(|jail| {
            let missing = ConfigLoader::new().file("absent.toml").without_env().load();
            assert!(matches!(missing, Err(ConfigError::FileNotFound(_))));

            jail.create_file("settings.ini", "raise_on_exception = false")?;
            let unsupported = ConfigLoader::new().file("settings.ini").without_env().load();
            assert!(matches!(unsupported, Err(ConfigError::UnsupportedFormat(ext)) if ext == "ini"));
            Ok(())
        });
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!(Profile::parse("PROD"), Profile::Production);
        assert_eq!(Profile::parse("dev"), Profile::Development);
        assert_eq!(Profile::parse("staging"), Profile::Custom("staging".into()));
    }
}
