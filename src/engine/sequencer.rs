//! Scenario execution
//!
//! The sequencer walks a scenario's commands in ordinal order. Untagged
//! commands run immediately; a command gated on a WID waits until the oracle
//! raises that WID. A gating WID raised early, while the command before its
//! gate is still in flight, is held for that gate. Every other WID is
//! answered on the spot through the resolver.
//!
//! ```text
//! Idle -> Running -> {AwaitingWid <-> Running} -> {Completed | Failed}
//! ```
//!
//! Cleanup commands run exactly once after the terminal state, whichever it
//! is. Their failures are recorded but never change the outcome.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

use crate::btp::IutTransport;
use crate::common::config::EngineTimeouts;
use crate::common::error::BridgeError;
use crate::common::{Error, ErrorKind, Result};
use crate::oracle::{Oracle, OracleEvent, Verdict, WidRequest};

use super::catalog::ScenarioDefinition;
use super::command::{self, bind_args, Command, ExecContext, WidTrigger};
use super::resolver::WidResolver;
use super::stack::SharedStack;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Running,
    AwaitingWid(u32),
    Completed,
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::AwaitingWid(wid) => write!(f, "awaiting-wid({})", wid),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed {
        kind: ErrorKind,
        message: String,
        /// Command that was executing or waiting when the run failed
        ordinal: Option<usize>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupError {
    pub ordinal: usize,
    pub message: String,
}

/// Result of one scenario run
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: String,
    pub outcome: Outcome,
    pub verdict: Option<Verdict>,
    /// Ordinals of commands that executed successfully, in execution order
    pub executed: Vec<usize>,
    pub cleanup_errors: Vec<CleanupError>,
    pub duration: Duration,
}

impl ScenarioReport {
    pub fn state(&self) -> State {
        match self.outcome {
            Outcome::Completed => State::Completed,
            Outcome::Failed { .. } => State::Failed,
        }
    }

    /// Completed and the oracle agrees
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Completed && self.verdict.as_ref().is_some_and(Verdict::is_pass)
    }
}

/// Per-run bookkeeping
struct Run<'s> {
    scenario: &'s ScenarioDefinition,
    resolver: WidResolver<'s>,
    state: State,
    started: bool,
    stream_closed: bool,
    verdict: Option<Verdict>,
    executed: Vec<usize>,
    current: Option<usize>,
    /// Gate following the commands in flight
    next_gate: Option<WidTrigger>,
    /// Occurrence of `next_gate` that arrived before its gate was reached
    held: Option<WidRequest>,
}

impl<'s> Run<'s> {
    fn new(scenario: &'s ScenarioDefinition) -> Self {
        Self {
            scenario,
            resolver: WidResolver::new(scenario),
            state: State::Idle,
            started: false,
            stream_closed: false,
            verdict: None,
            executed: Vec::new(),
            current: None,
            next_gate: None,
            held: None,
        }
    }

    fn transition(&mut self, next: State) {
        tracing::debug!(
            scenario = %self.scenario.name,
            from = %self.state,
            to = %next,
            "State transition"
        );
        self.state = next;
    }

    /// Keep an early occurrence of the upcoming gate's WID
    ///
    /// Returns the request back when it is not for that gate.
    fn hold_for_gate(&mut self, request: WidRequest) -> Option<WidRequest> {
        let early = self.held.is_none()
            && self
                .next_gate
                .is_some_and(|gate| gate.matches(request.event.wid, request.event.style));
        if !early {
            return Some(request);
        }
        tracing::debug!(wid = request.event.wid, "Holding WID for upcoming gate");
        self.held = Some(request);
        None
    }

    fn record_verdict(&mut self, verdict: Verdict) {
        if self.verdict.is_none() {
            tracing::info!(scenario = %self.scenario.name, %verdict, "Oracle verdict");
            self.verdict = Some(verdict);
        }
    }
}

/// Drives scenarios against one IUT/oracle pair
pub struct Sequencer<'a> {
    profile: &'a str,
    iut: &'a dyn IutTransport,
    oracle: &'a dyn Oracle,
    stack: &'a SharedStack,
    events: &'a mut mpsc::Receiver<OracleEvent>,
    abort: Option<watch::Receiver<bool>>,
    timeouts: EngineTimeouts,
}

impl<'a> Sequencer<'a> {
    pub fn new(
        profile: &'a str,
        iut: &'a dyn IutTransport,
        oracle: &'a dyn Oracle,
        stack: &'a SharedStack,
        events: &'a mut mpsc::Receiver<OracleEvent>,
        timeouts: EngineTimeouts,
    ) -> Self {
        Self {
            profile,
            iut,
            oracle,
            stack,
            events,
            abort: None,
            timeouts,
        }
    }

    /// Fail the running scenario once `true` is published on this channel
    pub fn with_abort(mut self, abort: watch::Receiver<bool>) -> Self {
        self.abort = Some(abort);
        self
    }

    fn exec_context(&self) -> ExecContext<'a> {
        ExecContext {
            profile: self.profile,
            iut: self.iut,
            oracle: self.oracle,
            stack: self.stack,
            command_timeout: self.timeouts.command,
        }
    }

    /// Run one scenario to its terminal state, then its cleanup commands
    pub async fn run(&mut self, scenario: &ScenarioDefinition) -> ScenarioReport {
        let started_at = Instant::now();
        let mut run = Run::new(scenario);

        self.drain_stale();
        tracing::info!(
            scenario = %scenario.name,
            commands = scenario.commands.len(),
            "Running scenario"
        );
        run.transition(State::Running);

        let mut result = self.run_commands(&mut run).await;
        if result.is_ok() {
            run.transition(State::Completed);
            result = self.settle(&mut run).await;
        }

        let outcome = match result {
            Ok(()) => Outcome::Completed,
            Err(e) => {
                run.transition(State::Failed);
                if let Some(request) = run.held.take() {
                    request.respond(Err(BridgeError::from(&e)));
                }
                tracing::warn!(
                    scenario = %scenario.name,
                    ordinal = ?run.current,
                    kind = %e.kind(),
                    "Scenario failed: {}",
                    e
                );
                if run.started && run.verdict.is_none() {
                    if let Err(stop) = self.oracle.stop_test_case().await {
                        tracing::warn!("Failed to stop test case: {}", stop);
                    }
                }
                Outcome::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                    ordinal: run.current,
                }
            }
        };

        run.next_gate = None;
        let cleanup_errors = self.cleanup(&mut run).await;

        ScenarioReport {
            name: scenario.name.clone(),
            outcome,
            verdict: run.verdict,
            executed: run.executed,
            cleanup_errors,
            duration: started_at.elapsed(),
        }
    }

    async fn run_commands(&mut self, run: &mut Run<'_>) -> Result<()> {
        let scenario = run.scenario;
        let commands: Vec<&Command> = scenario.commands.iter().filter(|c| !c.cleanup).collect();

        let next_gate = |from: usize| commands[from..].iter().find_map(|c| c.start_wid);

        let mut i = 0;
        while i < commands.len() {
            let Some(trigger) = commands[i].start_wid else {
                run.next_gate = next_gate(i);
                self.execute(run, commands[i], true).await?;
                i += 1;
                continue;
            };

            self.ensure_started(run).await?;
            run.current = Some(commands[i].ordinal);
            run.transition(State::AwaitingWid(trigger.wid));
            let request = self.await_wid(run, trigger).await?;
            run.transition(State::Running);

            // One occurrence releases every consecutive command on the same gate
            let end = i + commands[i..]
                .iter()
                .take_while(|c| c.start_wid == Some(trigger))
                .count();
            run.next_gate = next_gate(end);
            let mut released = Ok(());
            while i < end {
                if let Err(e) = self.execute(run, commands[i], true).await {
                    released = Err(e);
                    break;
                }
                i += 1;
            }

            match released {
                Ok(()) => answer(self.stack, &run.resolver, request)?,
                Err(e) => {
                    request.respond(Err(BridgeError::from(&e)));
                    return Err(e);
                }
            }
        }

        run.next_gate = None;
        self.ensure_started(run).await
    }

    async fn ensure_started(&mut self, run: &mut Run<'_>) -> Result<()> {
        if run.started {
            return Ok(());
        }
        run.current = None;
        tracing::info!(scenario = %run.scenario.name, "Starting test case");
        self.oracle
            .start_test_case(self.profile, &run.scenario.name)
            .await?;
        run.started = true;
        Ok(())
    }

    /// Execute one command, serving WIDs while it is in flight
    ///
    /// Arguments are bound once. Retries reuse the same values.
    async fn execute(&mut self, run: &mut Run<'_>, command: &Command, abortable: bool) -> Result<()> {
        run.current = Some(command.ordinal);
        tracing::debug!(ordinal = command.ordinal, command = %command, "Executing");

        let values = bind_args(command, self.stack)?;
        let ctx = self.exec_context();
        let mut attempt = 0;
        loop {
            let work = command::execute(&ctx, command, values.clone());
            match self.serve_while(run, work, abortable).await {
                Ok(()) => {
                    run.executed.push(command.ordinal);
                    return Ok(());
                }
                Err(e)
                    if e.is_retryable()
                        && command.action.is_idempotent()
                        && attempt < self.timeouts.retries =>
                {
                    attempt += 1;
                    tracing::warn!(
                        ordinal = command.ordinal,
                        attempt,
                        "Retrying {}: {}",
                        command.action.name(),
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn serve_while<F>(&mut self, run: &mut Run<'_>, work: F, abortable: bool) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        tokio::pin!(work);
        loop {
            tokio::select! {
                biased;
                _ = abort_signal(&mut self.abort), if abortable => return Err(Error::Aborted),
                result = &mut work => return result,
                event = self.events.recv(), if !run.stream_closed => match event {
                    Some(OracleEvent::Wid(request)) => {
                        if let Some(request) = run.hold_for_gate(request) {
                            answer(self.stack, &run.resolver, request)?;
                        }
                    }
                    Some(OracleEvent::Finished(verdict)) => run.record_verdict(verdict),
                    None => run.stream_closed = true,
                },
            }
        }
    }

    async fn await_wid(&mut self, run: &mut Run<'_>, trigger: WidTrigger) -> Result<WidRequest> {
        let budget = self.timeouts.wid_wait;
        let deadline = tokio::time::sleep(budget);
        tokio::pin!(deadline);

        if let Some(request) = run.held.take() {
            if trigger.matches(request.event.wid, request.event.style) {
                tracing::debug!(wid = trigger.wid, "Gate released by held WID");
                return Ok(request);
            }
            answer(self.stack, &run.resolver, request)?;
        }

        loop {
            if let Some(verdict) = &run.verdict {
                return Err(Error::OracleCommunication(format!(
                    "test case finished ({}) before WID {}",
                    verdict, trigger.wid
                )));
            }
            if run.stream_closed {
                return Err(Error::OracleCommunication(format!(
                    "event stream closed while waiting for WID {}",
                    trigger.wid
                )));
            }

            tokio::select! {
                biased;
                _ = abort_signal(&mut self.abort) => return Err(Error::Aborted),
                _ = &mut deadline => {
                    return Err(Error::OracleTimeout {
                        wid: trigger.wid,
                        secs: budget.as_secs(),
                    })
                }
                event = self.events.recv() => match event {
                    Some(OracleEvent::Wid(request))
                        if trigger.matches(request.event.wid, request.event.style) =>
                    {
                        tracing::debug!(wid = trigger.wid, "Gate released");
                        return Ok(request);
                    }
                    Some(OracleEvent::Wid(request)) => answer(self.stack, &run.resolver, request)?,
                    Some(OracleEvent::Finished(verdict)) => run.record_verdict(verdict),
                    None => run.stream_closed = true,
                },
            }
        }
    }

    /// Keep answering WIDs until the oracle reports its verdict
    ///
    /// Only an abort fails the run from here.
    async fn settle(&mut self, run: &mut Run<'_>) -> Result<()> {
        if run.verdict.is_some() || !run.started {
            return Ok(());
        }
        run.current = None;

        let deadline = tokio::time::sleep(self.timeouts.settle);
        tokio::pin!(deadline);

        while run.verdict.is_none() && !run.stream_closed {
            tokio::select! {
                biased;
                _ = abort_signal(&mut self.abort) => return Err(Error::Aborted),
                _ = &mut deadline => {
                    tracing::warn!(scenario = %run.scenario.name, "No verdict within settle budget");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(OracleEvent::Wid(request)) => {
                        if let Err(e) = answer(self.stack, &run.resolver, request) {
                            tracing::warn!(scenario = %run.scenario.name, "{}", e);
                        }
                    }
                    Some(OracleEvent::Finished(verdict)) => run.record_verdict(verdict),
                    None => run.stream_closed = true,
                },
            }
        }

        if run.verdict.is_none() {
            if let Err(e) = self.oracle.stop_test_case().await {
                tracing::warn!("Failed to stop test case: {}", e);
            }
        }
        Ok(())
    }

    async fn cleanup(&mut self, run: &mut Run<'_>) -> Vec<CleanupError> {
        let scenario = run.scenario;
        let mut errors = Vec::new();
        for command in scenario.cleanup_commands() {
            if let Err(e) = self.execute(run, command, false).await {
                tracing::warn!(ordinal = command.ordinal, "Cleanup command failed: {}", e);
                errors.push(CleanupError {
                    ordinal: command.ordinal,
                    message: e.to_string(),
                });
            }
        }
        errors
    }

    /// Refuse events left over from a previous scenario
    fn drain_stale(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                OracleEvent::Wid(request) => {
                    tracing::debug!(wid = request.event.wid, "Refusing stale WID");
                    request.respond(Err(BridgeError {
                        code: "STALE".to_string(),
                        message: "WID raised outside a running scenario".to_string(),
                    }));
                }
                OracleEvent::Finished(verdict) => {
                    tracing::debug!(%verdict, "Dropping stale verdict");
                }
            }
        }
    }
}

/// Resolve and send the answer for one WID
fn answer(stack: &SharedStack, resolver: &WidResolver<'_>, request: WidRequest) -> Result<()> {
    let wid = request.event.wid;
    let style = request.event.style;
    let resolved = resolver.resolve(&request.event, &stack.read());

    match resolved {
        Ok(answer) => {
            tracing::info!(wid, answer = %answer.render(style), "Answered WID");
            request.respond(Ok(answer));
            Ok(())
        }
        Err(e) => {
            request.respond(Err(BridgeError::from(&e)));
            Err(e)
        }
    }
}

/// Resolves once abort is requested; never resolves without an abort channel
async fn abort_signal(abort: &mut Option<watch::Receiver<bool>>) {
    match abort {
        Some(rx) => loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        },
        None => std::future::pending().await,
    }
}
