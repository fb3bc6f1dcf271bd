//! Client configuration
//!
//! Loaded from TOML. Every field has a default so a missing or partial
//! file still yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_OUTPUT_BUFFER_FRAMES, DEFAULT_TICK_INTERVAL_MS};
use crate::error::ConfigError;

/// Top-level client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// UDP port to listen on (random when unset)
    pub listen_port: Option<u16>,

    /// DTLS port to listen on (unused when unset)
    pub dtls_listen_port: Option<u16>,

    /// Free-form platform description passed to the transport
    pub platform_info: Option<String>,

    /// User agent used when talking to directory services
    pub user_agent: Option<String>,

    /// Host application identity
    pub app: AppInfo,

    /// Audio settings
    pub audio: AudioConfig,

    /// Suggested interval between host ticks
    pub tick_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            listen_port: None,
            dtls_listen_port: None,
            platform_info: None,
            user_agent: None,
            app: AppInfo::default(),
            audio: AudioConfig::default(),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

/// Host application identity, used by the transport for settings and logs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppInfo {
    pub name: String,
    pub organization: String,
    pub domain: String,
    pub version: String,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            name: "SharedSpaceClient".to_string(),
            organization: "SharedSpace".to_string(),
            domain: "localhost".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output buffering depth configured by `AudioDuplexPipeline::enable`
    pub output_buffer_frames: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_buffer_frames: DEFAULT_OUTPUT_BUFFER_FRAMES,
        }
    }
}

impl ClientConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load configuration from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from the platform config directory, or defaults if no file exists
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let path = Self::default_path()?;
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Platform-specific config file location
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        directories::ProjectDirs::from("org", "SharedSpace", "shared-space-client")
            .map(|dirs| dirs.config_dir().join("client.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Session parameters handed to `Transport::create_session`
    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            listen_port: self.listen_port,
            dtls_listen_port: self.dtls_listen_port,
            platform_info: self.platform_info.clone(),
            user_agent: self.user_agent.clone(),
            app: self.app.clone(),
        }
    }
}

/// Parameters for creating a transport session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionParams {
    pub listen_port: Option<u16>,
    pub dtls_listen_port: Option<u16>,
    pub platform_info: Option<String>,
    pub user_agent: Option<String>,
    pub app: AppInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ClientConfig::from_toml(
            r#"
            listen_port = 40102

            [audio]
            output_buffer_frames = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_port, Some(40102));
        assert_eq!(config.audio.output_buffer_frames, 4);
        assert_eq!(config.tick_interval_ms, DEFAULT_TICK_INTERVAL_MS);
        assert_eq!(config.app, AppInfo::default());
    }

    #[test]
    fn test_invalid_toml() {
        let err = ClientConfig::from_toml("listen_port = \"nope\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_session_params() {
        let config = ClientConfig {
            user_agent: Some("demo/1.0".into()),
            ..Default::default()
        };
        let params = config.session_params();
        assert_eq!(params.user_agent.as_deref(), Some("demo/1.0"));
        assert_eq!(params.app.name, "SharedSpaceClient");
    }
}
