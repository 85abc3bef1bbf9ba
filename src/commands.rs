//! CLI command definitions
//!
//! Defines the clap commands for the autopts CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run conformance test cases against a connected IUT
    Run {
        /// Profile to run (e.g. L2CAP, GAP); can be given multiple times
        #[arg(long = "profile", short = 'p')]
        profiles: Vec<String>,

        /// Test case name or name prefix to run; default is every test case
        /// Can be specified multiple times: --test TC_LE_CFC --test TC_COS_CED_BV_01_C
        #[arg(long = "test", short = 't')]
        tests: Vec<String>,

        /// YAML run plan to use instead of --profile/--test
        #[arg(long, conflicts_with_all = ["profiles", "tests"])]
        plan: Option<PathBuf>,

        /// Run the selection this many times
        #[arg(long, default_value = "1")]
        repeat: u32,

        #[command(flatten)]
        connection: ConnectionArgs,

        /// Seconds a gated command waits for its WID
        #[arg(long)]
        wid_timeout: Option<u64>,

        /// Seconds to wait for the verdict after the last command
        #[arg(long)]
        settle_timeout: Option<u64>,

        /// Also write a full-detail log file to the data directory
        #[arg(long)]
        log_file: bool,

        /// Verbose output
        #[arg(long, short)]
        verbose: bool,
    },

    /// List the oracle's test cases for a profile and where each scenario comes from
    List {
        /// Profile to list
        #[arg(long, short = 'p')]
        profile: String,

        #[command(flatten)]
        connection: ConnectionArgs,
    },

    /// Show the PIXITs pushed for a profile, including configured overrides
    Pixits {
        /// Profile to show
        #[arg(long, short = 'p')]
        profile: String,

        /// Configuration file (default: platform config directory)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List supported profiles
    Profiles,
}

/// Where to find the configuration and the two sockets
#[derive(Args, Debug, Default)]
pub struct ConnectionArgs {
    /// Configuration file (default: platform config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// BTP socket the IUT connects to
    #[arg(long)]
    pub btp_socket: Option<PathBuf>,

    /// Oracle bridge socket
    #[arg(long)]
    pub bridge_socket: Option<PathBuf>,
}
