//! Configuration types for a room session

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for a call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshCallConfig {
    /// WebSocket signaling server URL (ws:// or wss://)
    pub signaling_url: String,

    /// STUN/TURN servers handed to every peer connection
    pub ice_servers: Vec<IceServerConfig>,

    /// Ideal capture constraints for video calls
    pub video: VideoConstraints,

    /// Seconds a call may stay without remote peers before it ends itself
    pub solo_timeout_secs: u64,

    /// Maximum simultaneous peer sessions in the mesh
    pub max_peers: usize,

    /// Session actor mailbox capacity
    pub event_buffer: usize,

    /// Remote presence store; in-memory when absent
    pub presence: Option<PresenceConfig>,
}

/// ICE server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs (stun:, turn: or turns:)
    pub urls: Vec<String>,

    /// Username for TURN authentication
    #[serde(default)]
    pub username: String,

    /// Credential for TURN authentication
    #[serde(default)]
    pub credential: String,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: String::new(),
            credential: String::new(),
        }
    }
}

/// Ideal local video capture constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
        }
    }
}

/// Document-store settings for presence records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// REST endpoint, e.g. `https://cloud.appwrite.io/v1`
    pub endpoint: String,

    pub project_id: String,

    pub database_id: String,

    pub collection_id: String,

    /// Server API key (optional for public collections)
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for MeshCallConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:3001".to_string(),
            ice_servers: vec![
                IceServerConfig::stun("stun:stun.l.google.com:19302"),
                IceServerConfig::stun("stun:stun1.l.google.com:19302"),
            ],
            video: VideoConstraints::default(),
            solo_timeout_secs: 30,
            max_peers: 16,
            event_buffer: 256,
            presence: None,
        }
    }
}

impl MeshCallConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn solo_timeout(&self) -> Duration {
        Duration::from_secs(self.solo_timeout_secs)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a WebSocket URL
    /// - `ice_servers` is empty or an entry has no URL
    /// - `solo_timeout_secs`, `event_buffer` or a video dimension is zero
    /// - `max_peers` is not in range 1-64
    pub fn validate(&self) -> Result<()> {
        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.ice_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one ICE server is required".to_string(),
            ));
        }

        for server in &self.ice_servers {
            if server.urls.is_empty() {
                return Err(Error::InvalidConfig(
                    "ICE server entry has no URLs".to_string(),
                ));
            }
            for url in &server.urls {
                if !(url.starts_with("stun:") || url.starts_with("turn:") || url.starts_with("turns:")) {
                    return Err(Error::InvalidConfig(format!(
                        "ICE server URL must use stun:, turn: or turns:, got {}",
                        url
                    )));
                }
            }
        }

        if self.solo_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "solo_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.max_peers == 0 || self.max_peers > 64 {
            return Err(Error::InvalidConfig(format!(
                "max_peers must be in range 1-64, got {}",
                self.max_peers
            )));
        }

        if self.event_buffer == 0 {
            return Err(Error::InvalidConfig(
                "event_buffer must be greater than zero".to_string(),
            ));
        }

        if self.video.width == 0 || self.video.height == 0 || self.video.frame_rate == 0 {
            return Err(Error::InvalidConfig(format!(
                "video constraints must be non-zero, got {}x{}@{}",
                self.video.width, self.video.height, self.video.frame_rate
            )));
        }

        if let Some(presence) = &self.presence {
            if !presence.endpoint.starts_with("http://") && !presence.endpoint.starts_with("https://") {
                return Err(Error::InvalidConfig(format!(
                    "presence.endpoint must be an http(s) URL, got {}",
                    presence.endpoint
                )));
            }
        }

        Ok(())
    }
}
