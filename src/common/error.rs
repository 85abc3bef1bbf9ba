//! Error types for the PTS automation engine
//!
//! Every failure a scenario can hit is classified into one of a small set of
//! kinds so the runner can report why a test case failed without parsing
//! messages.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the automation engine
#[derive(Error, Debug)]
pub enum Error {
    // === Scenario Configuration Errors ===
    #[error("Scenario '{scenario}' is malformed: {reason}")]
    Configuration { scenario: String, reason: String },

    #[error("Unknown profile '{0}'. Supported profiles: GAP, L2CAP")]
    UnknownProfile(String),

    #[error("Parameter '{param}' could not be bound: {reason}")]
    UnboundParameter { param: String, reason: String },

    // === IUT Transport Errors ===
    #[error("IUT command '{command}' failed: {reason}")]
    Transport { command: String, reason: String },

    #[error("IUT command '{command}' timed out after {secs} seconds")]
    TransportTimeout { command: String, secs: u64 },

    #[error("IUT did not connect to {path} within {secs} seconds")]
    IutNotConnected { path: String, secs: u64 },

    #[error("IUT closed the BTP connection")]
    IutDisconnected,

    #[error("BTP protocol error: {0}")]
    BtpProtocol(String),

    // === Oracle Errors ===
    #[error("Oracle did not raise WID {wid} within {secs} seconds")]
    OracleTimeout { wid: u32, secs: u64 },

    #[error("No answer for WID {wid}: {reason}")]
    UnresolvedWid { wid: u32, reason: String },

    #[error("Oracle bridge not running. Start the PTS bridge before running tests")]
    OracleNotRunning,

    #[error("Failed to connect to oracle bridge: {0}")]
    OracleConnectionFailed(#[source] io::Error),

    #[error("Oracle bridge communication error: {0}")]
    OracleCommunication(String),

    #[error("Oracle request '{command}' failed: {message}")]
    OracleRequestFailed { command: String, message: String },

    // === Run Control ===
    #[error("Scenario aborted by operator")]
    Aborted,

    #[error("{failed} test case run(s) did not pass")]
    TestsFailed { failed: usize },

    // === Configuration File Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used for scenario reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transport,
    OracleTimeout,
    UnresolvedWid,
    Aborted,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Transport => write!(f, "transport"),
            Self::OracleTimeout => write!(f, "oracle-timeout"),
            Self::UnresolvedWid => write!(f, "unresolved-wid"),
            Self::Aborted => write!(f, "aborted"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl Error {
    /// Create a scenario configuration error
    pub fn configuration(scenario: &str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            scenario: scenario.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an IUT transport error
    pub fn transport(command: &str, reason: impl Into<String>) -> Self {
        Self::Transport {
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an unresolved WID error
    pub fn unresolved_wid(wid: u32, reason: impl Into<String>) -> Self {
        Self::UnresolvedWid {
            wid,
            reason: reason.into(),
        }
    }

    /// Create an oracle request failed error
    pub fn oracle_request_failed(command: &str, message: &str) -> Self {
        Self::OracleRequestFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration { .. } | Error::UnknownProfile(_) => ErrorKind::Configuration,
            Error::Transport { .. }
            | Error::TransportTimeout { .. }
            | Error::IutNotConnected { .. }
            | Error::IutDisconnected
            | Error::BtpProtocol(_) => ErrorKind::Transport,
            Error::OracleTimeout { .. } => ErrorKind::OracleTimeout,
            Error::UnresolvedWid { .. } => ErrorKind::UnresolvedWid,
            Error::Aborted => ErrorKind::Aborted,
            _ => ErrorKind::Other,
        }
    }

    /// Whether retrying the same IUT command may succeed
    ///
    /// Only per-command transport failures qualify; a closed connection or a
    /// framing error will not heal on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::TransportTimeout { .. }
        )
    }
}

/// Bridge-serializable error for oracle responses
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BridgeError {
    pub code: String,
    pub message: String,
}

impl From<&Error> for BridgeError {
    fn from(e: &Error) -> Self {
        let code = match e {
            Error::UnresolvedWid { .. } => "UNRESOLVED_WID",
            Error::OracleTimeout { .. } => "TIMEOUT",
            Error::Aborted => "ABORTED",
            Error::UnknownProfile(_) => "UNKNOWN_PROFILE",
            Error::Configuration { .. } => "CONFIGURATION",
            _ => "INTERNAL_ERROR",
        }
        .to_string();

        Self {
            code,
            message: e.to_string(),
        }
    }
}

impl From<BridgeError> for Error {
    fn from(e: BridgeError) -> Self {
        match e.code.as_str() {
            "UNKNOWN_PROFILE" => Error::UnknownProfile(e.message),
            "ABORTED" => Error::Aborted,
            _ => Error::OracleCommunication(e.message),
        }
    }
}
