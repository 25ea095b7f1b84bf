//! Typed consumer settings.
//!
//! Settings are loaded from files and the environment with [`ConfigLoader`]
//! and then copied into a consumer's [`Configuration`](cottontail_core::Configuration)
//! store under the names in [`keys`].

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_settings, load_settings_from_file};
pub use schema::{
    ConsumerSettings, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    SpanEventConfig,
};

/// Well-known configuration store keys.
pub mod keys {
    /// `bool`: stop and propagate on a failed delivery (default `true`).
    pub const RAISE_ON_EXCEPTION: &str = "raise_on_exception";

    /// [`ConnectionOptions`](cottontail_core::ConnectionOptions) used by the session.
    pub const CONNECTION: &str = "connection";

    /// [`LoggingConfig`](super::LoggingConfig) applied when the consumer starts.
    pub const LOGGING: &str = "logging";
}
