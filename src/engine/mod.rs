//! Scenario execution engine
//!
//! - [`stack`]: per-session record of IUT configuration
//! - [`binder`]: literal or stack-bound command arguments
//! - [`command`]: what a scenario step does and how it runs
//! - [`catalog`]: test case name to scenario mapping
//! - [`resolver`]: answers for oracle queries
//! - [`sequencer`]: runs one scenario to completion

pub mod binder;
pub mod catalog;
pub mod command;
pub mod pixit;
pub mod resolver;
pub mod sequencer;
pub mod stack;
pub mod wid;

pub use binder::{ArgValue, BoundText, Encoding, Param, StackRef};
pub use catalog::{CatalogEntry, Origin, ProfileDefaults, ScenarioCatalog, ScenarioDefinition};
pub use command::{Action, Command, WidTrigger};
pub use pixit::{PixitTable, PixitValue};
pub use resolver::WidResolver;
pub use sequencer::{Outcome, ScenarioReport, Sequencer, State};
pub use stack::{SharedStack, Stack};
pub use wid::{Answer, Verify, WidEvent, WidHandler};
