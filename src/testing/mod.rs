//! Test runs
//!
//! Run plans select test cases per profile; the runner executes them
//! against a connected IUT and oracle and reports colored results. The
//! in-memory IUT and oracle in [`mock`] stand in for both in tests.

mod config;
pub mod mock;
mod runner;

pub use config::*;
pub use runner::{print_summary, ProfileResult, Runner};
