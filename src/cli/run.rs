//! The `run` command: connect both sides, identify the IUT, run the plan

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tokio::sync::watch;

use crate::btp::{self, BtpClient};
use crate::common::config::Config;
use crate::common::Result;
use crate::engine::stack::{Identity, SharedStack, Stack};
use crate::profiles::{self, Profile};
use crate::testing::{print_summary, ProfilePlan, ProfileResult, RunPlan, Runner};

use super::connect_oracle;

/// Run every profile in `plan`; returns the number of runs that did not pass
pub async fn run(config: &Config, plan: &RunPlan, verbose: bool) -> Result<usize> {
    // Unknown profiles fail before anything connects
    let selected: Vec<(Arc<dyn Profile>, &ProfilePlan)> = plan
        .profiles
        .iter()
        .map(|p| profiles::require_profile(&p.name).map(|profile| (profile, p)))
        .collect::<Result<_>>()?;

    println!("\n{} {}", "Run:".blue().bold(), plan.name.white().bold());
    if let Some(desc) = &plan.description {
        println!("  {}", desc.dimmed());
    }

    let (oracle, mut events) = connect_oracle(config).await?;

    println!(
        "  Waiting for IUT on {}",
        config.iut.socket.display().to_string().dimmed()
    );
    let iut = BtpClient::accept(
        &config.iut.socket,
        Duration::from_secs(config.iut.handshake_timeout_secs),
    )
    .await?;
    let timeouts = config.engine_timeouts();
    let info = btp::handshake(&iut, timeouts.command).await?;
    println!("  {} IUT {} ({})", "✓".green(), info.address, info.name);

    let stack = SharedStack::new(Stack::new(Identity::from(&info)));

    let (abort_tx, abort_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, aborting the running scenario");
            let _ = abort_tx.send(true);
        }
    });

    let mut runner = Runner {
        iut: &iut,
        oracle: &oracle,
        stack: &stack,
        events: &mut events,
        timeouts,
        name_prefix: config.session.device_name.clone(),
        abort: Some(abort_rx),
        verbose,
    };

    let mut results: Vec<ProfileResult> = Vec::new();
    for (profile, profile_plan) in &selected {
        let overrides = config.pixit_overrides(profile.name());
        let result = runner
            .run_profile(profile.as_ref(), profile_plan, &overrides)
            .await?;
        results.push(result);
    }

    print_summary(&results);
    Ok(results.iter().map(|r| r.failed() + r.skipped).sum())
}
