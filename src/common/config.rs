//! Configuration file handling

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{self, config_path};
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// IUT (BTP) transport settings
    #[serde(default)]
    pub iut: IutConfig,

    /// Oracle bridge settings
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Scenario timing budgets
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Session settings
    #[serde(default)]
    pub session: SessionConfig,

    /// User PIXIT overrides, keyed by profile then PIXIT name
    #[serde(default)]
    pub pixits: BTreeMap<String, BTreeMap<String, String>>,
}

/// IUT transport configuration
#[derive(Debug, Deserialize)]
pub struct IutConfig {
    /// BTP socket the IUT connects to
    #[serde(default = "paths::btp_socket_path")]
    pub socket: PathBuf,

    /// Bound on a single BTP command round trip
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Extra attempts for idempotent commands after a transport failure
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// How long to wait for the IUT to connect and answer the handshake
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

impl Default for IutConfig {
    fn default() -> Self {
        Self {
            socket: paths::btp_socket_path(),
            command_timeout_secs: default_command_timeout(),
            retries: default_retries(),
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

fn default_command_timeout() -> u64 {
    5
}
fn default_retries() -> u32 {
    2
}
fn default_handshake_timeout() -> u64 {
    30
}

/// Oracle bridge configuration
#[derive(Debug, Deserialize)]
pub struct OracleConfig {
    /// Bridge socket (Unix path or pipe name)
    #[serde(default = "paths::bridge_socket_path")]
    pub socket: PathBuf,

    /// Bound on a single bridge request
    #[serde(default = "default_oracle_request")]
    pub request_timeout_secs: u64,

    /// Capacity of the inbound WID channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            socket: paths::bridge_socket_path(),
            request_timeout_secs: default_oracle_request(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_oracle_request() -> u64 {
    60
}
fn default_event_capacity() -> usize {
    16
}

/// Timing budgets in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// How long a gated command waits for its WID
    #[serde(default = "default_wid_wait")]
    pub wid_wait_secs: u64,

    /// How long to keep answering WIDs after the last command, waiting for a verdict
    #[serde(default = "default_settle")]
    pub settle_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            wid_wait_secs: default_wid_wait(),
            settle_secs: default_settle(),
        }
    }
}

fn default_wid_wait() -> u64 {
    120
}
fn default_settle() -> u64 {
    300
}

/// Session configuration
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Prefix for the IUT device name advertised during tests
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
        }
    }
}

fn default_device_name() -> String {
    "Tester".to_string()
}

/// Timing knobs handed to the sequencer, derived from [`Config`]
#[derive(Debug, Clone, Copy)]
pub struct EngineTimeouts {
    pub command: Duration,
    pub wid_wait: Duration,
    pub settle: Duration,
    pub retries: u32,
}

impl Default for EngineTimeouts {
    fn default() -> Self {
        Config::default().engine_timeouts()
    }
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Sequencer timing derived from this configuration
    pub fn engine_timeouts(&self) -> EngineTimeouts {
        EngineTimeouts {
            command: Duration::from_secs(self.iut.command_timeout_secs),
            wid_wait: Duration::from_secs(self.timeouts.wid_wait_secs),
            settle: Duration::from_secs(self.timeouts.settle_secs),
            retries: self.iut.retries,
        }
    }

    /// User PIXIT overrides for a profile, in name order
    pub fn pixit_overrides(&self, profile: &str) -> Vec<(String, String)> {
        self.pixits
            .get(profile)
            .map(|table| {
                table
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}
