//! Oracle bridge protocol message types
//!
//! The bridge process fronts the oracle tool. Messages are length-prefixed
//! JSON on a local socket: we send requests and WID answers, the bridge sends
//! responses (matched by id), WIDs, and the final verdict.

use serde::{Deserialize, Serialize};

use crate::common::error::BridgeError;
use crate::engine::wid::WidEvent;

use super::Verdict;

/// Operations the bridge executes against the oracle
///
/// Tagged by `op`; several operations carry a `name` field of their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OracleCommand {
    SetPixit {
        profile: String,
        name: String,
        value: String,
    },
    GetTestCaseNames {
        profile: String,
    },
    StartTestCase {
        profile: String,
        name: String,
    },
    StopTestCase,
    BdAddr,
}

impl OracleCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetPixit { .. } => "set_pixit",
            Self::GetTestCaseNames { .. } => "get_test_case_names",
            Self::StartTestCase { .. } => "start_test_case",
            Self::StopTestCase => "stop_test_case",
            Self::BdAddr => "bd_addr",
        }
    }
}

/// Messages we send to the bridge
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Request {
        id: u64,
        command: OracleCommand,
    },
    WidAnswer {
        id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        answer: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<BridgeError>,
    },
}

/// Messages the bridge sends to us
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    Response {
        id: u64,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<BridgeError>,
    },
    Wid {
        id: u64,
        event: WidEvent,
    },
    Finished {
        verdict: Verdict,
    },
}
