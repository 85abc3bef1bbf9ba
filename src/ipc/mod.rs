//! Local socket plumbing shared by the BTP listener and the oracle bridge
//!
//! Uses Unix domain sockets on Unix/macOS and named pipes on Windows
//! via the interprocess crate.

pub mod transport;

pub use transport::Stream;
