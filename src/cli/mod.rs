//! CLI command handling
//!
//! Dispatches CLI commands and formats output.

mod run;

use std::path::Path;
use std::time::Duration;

use colored::Colorize;

use crate::commands::{Commands, ConnectionArgs};
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::engine::catalog::{Origin, ScenarioCatalog};
use crate::oracle::{Oracle, OracleClient};
use crate::profiles::{self, CatalogContext};
use crate::testing::RunPlan;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            profiles,
            tests,
            plan,
            repeat,
            connection,
            wid_timeout,
            settle_timeout,
            log_file: _,
            verbose,
        } => {
            let mut config = load_config(&connection)?;
            if let Some(secs) = wid_timeout {
                config.timeouts.wid_wait_secs = secs;
            }
            if let Some(secs) = settle_timeout {
                config.timeouts.settle_secs = secs;
            }

            let plan = match plan {
                Some(path) => RunPlan::load(&path)?,
                None if profiles.is_empty() => {
                    return Err(Error::Config(
                        "Specify at least one --profile, or a run plan with --plan".to_string(),
                    ))
                }
                None => {
                    let plan = RunPlan::from_args(&profiles, &tests, repeat);
                    plan.validate()?;
                    plan
                }
            };

            let failed = run::run(&config, &plan, verbose).await?;
            if failed > 0 {
                return Err(Error::TestsFailed { failed });
            }
            Ok(())
        }

        Commands::List {
            profile,
            connection,
        } => {
            let profile = profiles::require_profile(&profile)?;
            let config = load_config(&connection)?;
            let (oracle, _events) = connect_oracle(&config).await?;

            let pts_addr = oracle.bd_addr().await?;
            let ctx = CatalogContext::new(pts_addr, &config.session.device_name);
            let names = oracle.get_test_case_names(profile.name()).await?;
            let catalog = ScenarioCatalog::build(
                profile.name(),
                &names,
                profile.custom_scenarios(&ctx),
                &profile.defaults(&ctx),
            )?;

            println!("{} test cases for {}:", catalog.len(), catalog.profile());
            for entry in catalog.entries() {
                let origin = match entry.origin {
                    Origin::Custom => "custom".green(),
                    Origin::Default => "default".dimmed(),
                };
                println!(
                    "  {:<32} {:<8} {} commands",
                    entry.definition.name,
                    origin,
                    entry.definition.commands.len()
                );
            }
            Ok(())
        }

        Commands::Pixits { profile, config } => {
            let profile = profiles::require_profile(&profile)?;
            let config = match config {
                Some(path) => Config::load_from(&path)?,
                None => Config::load()?,
            };
            let overrides = config.pixit_overrides(profile.name());
            let table = profile.pixits().with_overrides(&overrides);

            println!("PIXITs for {}:", profile.name());
            for (name, value) in table.iter() {
                let overridden = overrides.iter().any(|(n, _)| n == name);
                if overridden {
                    println!("  {:<40} {} {}", name, value, "(override)".yellow());
                } else {
                    println!("  {:<40} {}", name, value);
                }
            }
            Ok(())
        }

        Commands::Profiles => {
            println!("Supported profiles:");
            for info in profiles::all_profiles() {
                println!("  {:<8} {}", info.name.bold(), info.description);
            }
            Ok(())
        }
    }
}

/// Load the configuration and apply socket overrides from the command line
fn load_config(args: &ConnectionArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(socket) = &args.btp_socket {
        config.iut.socket = socket.clone();
    }
    if let Some(socket) = &args.bridge_socket {
        config.oracle.socket = socket.clone();
    }
    Ok(config)
}

async fn connect_oracle(
    config: &Config,
) -> Result<(OracleClient, tokio::sync::mpsc::Receiver<crate::oracle::OracleEvent>)> {
    OracleClient::connect(
        Path::new(&config.oracle.socket),
        Duration::from_secs(config.oracle.request_timeout_secs),
        config.oracle.event_capacity,
    )
    .await
}
