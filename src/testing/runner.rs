//! Profile runner
//!
//! Runs the selected test cases of one profile against a connected IUT and
//! oracle: push PIXITs, enumerate the oracle's test cases, build the
//! catalog, then run every selected scenario on a freshly reset stack.

use std::time::Duration;

use colored::Colorize;
use tokio::sync::{mpsc, watch};

use crate::btp::{self, IutTransport};
use crate::common::config::EngineTimeouts;
use crate::common::Result;
use crate::engine::catalog::{Origin, ScenarioCatalog};
use crate::engine::sequencer::{Outcome, ScenarioReport, Sequencer};
use crate::engine::stack::SharedStack;
use crate::oracle::{Oracle, OracleEvent};
use crate::profiles::{CatalogContext, Profile};

use super::config::ProfilePlan;

/// Result of running one profile
#[derive(Debug)]
pub struct ProfileResult {
    pub profile: String,
    pub reports: Vec<ScenarioReport>,
    /// Selected runs skipped because the operator aborted
    pub skipped: usize,
}

impl ProfileResult {
    pub fn passed(&self) -> usize {
        self.reports.iter().filter(|r| r.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0 && self.skipped == 0
    }
}

/// Everything a profile run talks to
pub struct Runner<'a> {
    pub iut: &'a dyn IutTransport,
    pub oracle: &'a dyn Oracle,
    pub stack: &'a SharedStack,
    pub events: &'a mut mpsc::Receiver<OracleEvent>,
    pub timeouts: EngineTimeouts,
    /// Prefix of the IUT device name
    pub name_prefix: String,
    pub abort: Option<watch::Receiver<bool>>,
    pub verbose: bool,
}

impl Runner<'_> {
    fn aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Pick up a new IUT address before the next test case
    async fn refresh_iut_addr(&self) {
        match btp::read_controller_info(self.iut, self.timeouts.command).await {
            Ok(info) => {
                let mut stack = self.stack.write();
                let addr_type = stack.iut_addr_type();
                stack.set_iut_addr(info.address, addr_type);
            }
            Err(e) => tracing::warn!("Keeping previous IUT address: {}", e),
        }
    }

    /// Run the test cases of `profile` selected by `plan`
    pub async fn run_profile(
        &mut self,
        profile: &dyn Profile,
        plan: &ProfilePlan,
        pixit_overrides: &[(String, String)],
    ) -> Result<ProfileResult> {
        let name = profile.name();
        println!("\n{} {}", "Profile:".blue().bold(), name.white().bold());

        let pts_addr = self.oracle.bd_addr().await?;
        let ctx = CatalogContext::new(pts_addr, &self.name_prefix);
        tracing::info!(profile = name, %pts_addr, device = %ctx.device_name, "Preparing profile");

        // Bound PIXITs render from a snapshot taken before the push
        let snapshot = self.stack.read().clone();
        profile
            .pixits()
            .with_overrides(pixit_overrides)
            .push(self.oracle, name, &snapshot)
            .await?;

        let official = self.oracle.get_test_case_names(name).await?;
        let catalog = ScenarioCatalog::build(
            name,
            &official,
            profile.custom_scenarios(&ctx),
            &profile.defaults(&ctx),
        )?;

        let selected: Vec<_> = catalog
            .entries()
            .iter()
            .filter(|entry| plan.selects(&entry.definition.name))
            .collect();
        println!(
            "  {} of {} test cases selected{}",
            selected.len(),
            catalog.len(),
            if plan.repeat > 1 {
                format!(", {} rounds", plan.repeat)
            } else {
                String::new()
            }
        );

        let mut result = ProfileResult {
            profile: name.to_string(),
            reports: Vec::new(),
            skipped: 0,
        };

        for round in 1..=plan.repeat {
            if plan.repeat > 1 {
                println!("\n  {} {}/{}", "Round".cyan(), round, plan.repeat);
            }
            for entry in &selected {
                if self.aborted() {
                    result.skipped += 1;
                    continue;
                }

                self.refresh_iut_addr().await;
                {
                    let mut stack = self.stack.write();
                    stack.reset();
                    profile.init_stack(&mut stack, &ctx);
                }

                let mut sequencer = Sequencer::new(
                    name,
                    self.iut,
                    self.oracle,
                    self.stack,
                    &mut *self.events,
                    self.timeouts,
                );
                if let Some(abort) = &self.abort {
                    sequencer = sequencer.with_abort(abort.clone());
                }
                let report = sequencer.run(&entry.definition).await;
                print_report(&report, entry.origin, self.verbose);
                result.reports.push(report);
            }
        }

        Ok(result)
    }
}

fn print_report(report: &ScenarioReport, origin: Origin, verbose: bool) {
    let verdict = report
        .verdict
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "no verdict".to_string());
    let took = format_duration(report.duration);

    if report.passed() {
        println!(
            "  {} {} {} {}",
            "✓".green(),
            report.name,
            verdict.green(),
            took.dimmed()
        );
    } else {
        println!("  {} {} {} {}", "✗".red(), report.name, verdict.red(), took.dimmed());
        if let Outcome::Failed {
            kind,
            message,
            ordinal,
        } = &report.outcome
        {
            let at = ordinal.map(|o| format!(" at command {}", o)).unwrap_or_default();
            println!("      {} [{}]{}: {}", "failed".red(), kind, at, message);
        }
    }

    for error in &report.cleanup_errors {
        println!(
            "      {} command {}: {}",
            "cleanup".yellow(),
            error.ordinal,
            error.message
        );
    }

    if verbose {
        let source = match origin {
            Origin::Custom => "custom",
            Origin::Default => "default",
        };
        println!(
            "      {} {} scenario, executed {:?}",
            "·".dimmed(),
            source,
            report.executed
        );
    }
}

fn format_duration(d: Duration) -> String {
    format!("({:.1}s)", d.as_secs_f64())
}

/// Print the totals of a run
pub fn print_summary(results: &[ProfileResult]) {
    println!("\n{}", "Summary:".cyan().bold());
    for result in results {
        let line = format!(
            "{}: {} passed, {} failed",
            result.profile,
            result.passed(),
            result.failed()
        );
        let line = if result.skipped > 0 {
            format!("{}, {} skipped", line, result.skipped)
        } else {
            line
        };
        if result.all_passed() {
            println!("  {} {}", "✓".green(), line);
        } else {
            println!("  {} {}", "✗".red(), line);
        }
    }

    if results.iter().all(ProfileResult::all_passed) {
        println!("\n{} {}\n", "✓".green().bold(), "All Tests Passed".green().bold());
    } else {
        println!("\n{} {}\n", "✗".red().bold(), "Tests Failed".red().bold());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::Verdict;

    fn report(outcome: Outcome, verdict: Option<Verdict>) -> ScenarioReport {
        ScenarioReport {
            name: "TC_X".to_string(),
            outcome,
            verdict,
            executed: Vec::new(),
            cleanup_errors: Vec::new(),
            duration: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_pass_needs_completed_and_pass_verdict() {
        let result = ProfileResult {
            profile: "GAP".to_string(),
            reports: vec![
                report(Outcome::Completed, Some(Verdict::Pass)),
                report(Outcome::Completed, Some(Verdict::Fail)),
                report(Outcome::Completed, None),
            ],
            skipped: 0,
        };
        assert_eq!(result.passed(), 1);
        assert_eq!(result.failed(), 2);
        assert!(!result.all_passed());
    }

    #[test]
    fn test_skipped_runs_are_not_a_pass() {
        let result = ProfileResult {
            profile: "GAP".to_string(),
            reports: vec![report(Outcome::Completed, Some(Verdict::Pass))],
            skipped: 2,
        };
        assert!(!result.all_passed());
    }
}
