//! Test oracle interface
//!
//! The oracle runs the scripted conformance test case. We call into it to
//! configure and start test cases; it calls back with WIDs and finally a
//! verdict, both delivered through a bounded event channel.

pub mod client;
pub mod protocol;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::btp::types::BdAddr;
use crate::common::error::BridgeError;
use crate::common::Result;
use crate::engine::wid::{Answer, WidEvent};

pub use client::OracleClient;

/// Operations the engine consumes from the oracle
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Set a PIXIT for the given profile
    async fn set_pixit(&self, profile: &str, name: &str, value: &str) -> Result<()>;

    /// Official test case names for a profile, in the oracle's order
    async fn get_test_case_names(&self, profile: &str) -> Result<Vec<String>>;

    /// Start a test case; WIDs and the verdict follow on the event channel
    async fn start_test_case(&self, profile: &str, name: &str) -> Result<()>;

    /// Abort the running test case
    async fn stop_test_case(&self) -> Result<()>;

    /// The oracle's own Bluetooth address
    async fn bd_addr(&self) -> Result<BdAddr>;
}

/// Final verdict of a test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Inconclusive,
    Error(String),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Inconclusive => write!(f, "INCONC"),
            Self::Error(reason) => write!(f, "ERROR ({})", reason),
        }
    }
}

/// Reply sent back for one WID
pub type WidReply = std::result::Result<Answer, BridgeError>;

/// A WID waiting for its answer
#[derive(Debug)]
pub struct WidRequest {
    pub event: WidEvent,
    reply: oneshot::Sender<WidReply>,
}

impl WidRequest {
    pub fn new(event: WidEvent) -> (Self, oneshot::Receiver<WidReply>) {
        let (reply, rx) = oneshot::channel();
        (Self { event, reply }, rx)
    }

    /// Send the answer; a dropped receiver means the oracle gave up on it
    pub fn respond(self, reply: WidReply) {
        if self.reply.send(reply).is_err() {
            tracing::debug!(wid = self.event.wid, "WID answer dropped, oracle no longer waiting");
        }
    }
}

/// Inbound oracle traffic for the running scenario
#[derive(Debug)]
pub enum OracleEvent {
    Wid(WidRequest),
    Finished(Verdict),
}
