//! Bluetooth PTS conformance automation
//!
//! This library drives an implementation under test (IUT) through the
//! Bluetooth Tester Protocol while a conformance oracle runs its scripted
//! test cases, answering the oracle's queries (WIDs) from per-test-case
//! scenarios.

pub mod btp;
pub mod cli;
pub mod commands;
pub mod common;
pub mod engine;
pub mod ipc;
pub mod oracle;
pub mod profiles;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use engine::{ScenarioCatalog, ScenarioDefinition, Sequencer};
