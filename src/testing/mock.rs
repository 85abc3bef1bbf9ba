//! In-memory IUT and oracle for exercising scenarios without hardware
//!
//! [`MockIut`] answers BTP commands from a reply table and hands out events
//! pushed by the test. [`ScriptedOracle`] plays a per-test-case script of
//! WIDs and a verdict once the sequencer starts the test case, recording
//! every answer it receives.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::btp::types::{BdAddr, BtpCommand, BtpEvent, EventFilter};
use crate::btp::IutTransport;
use crate::common::{Error, Result};
use crate::engine::wid::WidEvent;
use crate::oracle::{Oracle, OracleEvent, Verdict, WidReply, WidRequest};

/// Address the mock IUT reports until told otherwise
pub const MOCK_IUT_ADDR: BdAddr = BdAddr([0xC0, 0xDE, 0xC0, 0xDE, 0xC0, 0xDE]);

#[derive(Default)]
struct IutState {
    log: Vec<BtpCommand>,
    replies: HashMap<&'static str, Vec<u8>>,
    failures: HashMap<&'static str, u32>,
    triggers: HashMap<&'static str, Vec<BtpEvent>>,
    events: VecDeque<BtpEvent>,
    delay: Option<Duration>,
}

/// Scripted stand-in for the IUT tester application
#[derive(Default)]
pub struct MockIut {
    state: Mutex<IutState>,
    event_pushed: Notify,
}

impl MockIut {
    pub fn new() -> Self {
        let iut = Self::default();
        iut.controller_info(MOCK_IUT_ADDR, "zephyr");
        iut
    }

    fn state(&self) -> std::sync::MutexGuard<'_, IutState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Response payload for every command with this name
    pub fn reply(&self, command: &'static str, data: Vec<u8>) {
        self.state().replies.insert(command, data);
    }

    /// Identity reported by `gap_read_ctrl_info`
    pub fn controller_info(&self, address: BdAddr, name: &str) {
        let mut data = address.to_wire().to_vec();
        data.extend_from_slice(&0xffu32.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&[0; 3]);
        let mut raw_name = name.as_bytes().to_vec();
        raw_name.resize(249, 0);
        data.extend_from_slice(&raw_name);
        data.extend_from_slice(&[0; 11]);
        self.reply("gap_read_ctrl_info", data);
    }

    /// Fail the next `times` commands with this name
    pub fn fail(&self, command: &'static str, times: u32) {
        self.state().failures.insert(command, times);
    }

    /// Emit `event` whenever a command with this name succeeds
    pub fn on_command(&self, command: &'static str, event: BtpEvent) {
        self.state().triggers.entry(command).or_default().push(event);
    }

    /// Make every command take this long
    pub fn delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    pub fn push_event(&self, event: BtpEvent) {
        self.state().events.push_back(event);
        self.event_pushed.notify_waiters();
    }

    /// Every command received, in order
    pub fn commands(&self) -> Vec<BtpCommand> {
        self.state().log.clone()
    }

    pub fn command_names(&self) -> Vec<&'static str> {
        self.state().log.iter().map(BtpCommand::name).collect()
    }

    fn respond(&self, command: &BtpCommand) -> Result<(Vec<u8>, Vec<BtpEvent>)> {
        let name = command.name();
        let mut state = self.state();
        state.log.push(command.clone());

        if let Some(left) = state.failures.get_mut(name).filter(|left| **left > 0) {
            *left -= 1;
            return Err(Error::transport(name, "IUT returned status 0x01"));
        }

        let triggered = state.triggers.get(name).cloned().unwrap_or_default();
        let data = state.replies.get(name).cloned().unwrap_or_default();
        Ok((data, triggered))
    }

    fn take_event(&self, filter: &EventFilter) -> Option<BtpEvent> {
        let mut state = self.state();
        let pos = state.events.iter().position(|e| filter.matches(e))?;
        state.events.remove(pos)
    }
}

#[async_trait]
impl IutTransport for MockIut {
    async fn command(&self, command: &BtpCommand, _timeout: Duration) -> Result<Vec<u8>> {
        let delay = self.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (data, triggered) = self.respond(command)?;
        for event in triggered {
            self.push_event(event);
        }
        Ok(data)
    }

    async fn wait_event(&self, filter: EventFilter, timeout: Duration) -> Result<BtpEvent> {
        let wait = async {
            loop {
                let pushed = self.event_pushed.notified();
                tokio::pin!(pushed);
                pushed.as_mut().enable();
                if let Some(event) = self.take_event(&filter) {
                    return event;
                }
                pushed.await;
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::TransportTimeout {
                command: filter.to_string(),
                secs: timeout.as_secs(),
            })
    }
}

/// One step of an oracle script
#[derive(Debug, Clone)]
pub enum Step {
    /// Raise a WID and wait for its answer
    Wid(WidEvent),
    /// Report the verdict and end the script
    Verdict(Verdict),
    Pause(Duration),
}

impl Step {
    pub fn wid(wid: u32, style: u32) -> Self {
        Self::Wid(WidEvent::new(wid, style, ""))
    }
}

/// An answer the oracle received
#[derive(Debug, Clone)]
pub struct Recorded {
    pub test_case: String,
    pub wid: u32,
    pub reply: WidReply,
}

#[derive(Default)]
struct OracleState {
    scripts: HashMap<String, Vec<Step>>,
    pixits: Vec<(String, String, String)>,
    started: Vec<String>,
    answers: Vec<Recorded>,
    /// Bumped on every start and stop; a script only plays while current
    generation: u64,
}

/// Oracle that plays a fixed script per test case
pub struct ScriptedOracle {
    names: Vec<String>,
    bd_addr: BdAddr,
    events: mpsc::Sender<OracleEvent>,
    state: Arc<Mutex<OracleState>>,
    stops: AtomicUsize,
}

impl ScriptedOracle {
    /// Oracle offering `names`; returns it with the inbound event stream
    pub fn new(names: &[&str], capacity: usize) -> (Self, mpsc::Receiver<OracleEvent>) {
        let (events, rx) = mpsc::channel(capacity.max(1));
        let oracle = Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            bd_addr: BdAddr([0x00, 0x1B, 0xDC, 0xF2, 0x1C, 0x48]),
            events,
            state: Arc::new(Mutex::new(OracleState::default())),
            stops: AtomicUsize::new(0),
        };
        (oracle, rx)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, OracleState> {
        lock(&self.state)
    }

    /// Steps played when `test_case` starts; unscripted cases just pass
    pub fn script(&self, test_case: &str, steps: Vec<Step>) {
        self.state().scripts.insert(test_case.to_string(), steps);
    }

    /// Sender for injecting events outside any script
    pub fn sender(&self) -> mpsc::Sender<OracleEvent> {
        self.events.clone()
    }

    pub fn pts_addr(&self) -> BdAddr {
        self.bd_addr
    }

    /// PIXITs set so far as (profile, name, value)
    pub fn pixits(&self) -> Vec<(String, String, String)> {
        self.state().pixits.clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.state().started.clone()
    }

    pub fn answers(&self) -> Vec<Recorded> {
        self.state().answers.clone()
    }

    /// Wait up to a second for at least `n` recorded answers
    ///
    /// Answers are recorded by the script task, which may not have run yet
    /// when a failed scenario returns.
    pub async fn wait_answers(&self, n: usize) -> Vec<Recorded> {
        for _ in 0..100 {
            let answers = self.answers();
            if answers.len() >= n {
                return answers;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.answers()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

fn lock(state: &Mutex<OracleState>) -> std::sync::MutexGuard<'_, OracleState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

async fn play(
    test_case: String,
    generation: u64,
    steps: Vec<Step>,
    events: mpsc::Sender<OracleEvent>,
    state: Arc<Mutex<OracleState>>,
) {
    let current = || lock(&state).generation == generation;

    for step in steps {
        if !current() {
            return;
        }
        match step {
            Step::Pause(d) => tokio::time::sleep(d).await,
            Step::Verdict(verdict) => {
                let _ = events.send(OracleEvent::Finished(verdict)).await;
                return;
            }
            Step::Wid(mut event) => {
                event.test_case = test_case.clone();
                let wid = event.wid;
                let (request, reply) = WidRequest::new(event);
                if events.send(OracleEvent::Wid(request)).await.is_err() {
                    return;
                }
                let Ok(reply) = reply.await else {
                    return;
                };
                let failed = reply.is_err();
                lock(&state).answers.push(Recorded {
                    test_case: test_case.clone(),
                    wid,
                    reply,
                });
                if failed && current() {
                    let verdict = Verdict::Error(format!("WID {} not answered", wid));
                    let _ = events.send(OracleEvent::Finished(verdict)).await;
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn set_pixit(&self, profile: &str, name: &str, value: &str) -> Result<()> {
        self.state()
            .pixits
            .push((profile.to_string(), name.to_string(), value.to_string()));
        Ok(())
    }

    async fn get_test_case_names(&self, _profile: &str) -> Result<Vec<String>> {
        Ok(self.names.clone())
    }

    async fn start_test_case(&self, _profile: &str, name: &str) -> Result<()> {
        let (generation, steps) = {
            let mut state = self.state();
            state.started.push(name.to_string());
            state.generation += 1;
            let steps = state
                .scripts
                .get(name)
                .cloned()
                .unwrap_or_else(|| vec![Step::Verdict(Verdict::Pass)]);
            (state.generation, steps)
        };
        tokio::spawn(play(
            name.to_string(),
            generation,
            steps,
            self.events.clone(),
            self.state.clone(),
        ));
        Ok(())
    }

    async fn stop_test_case(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.state().generation += 1;
        Ok(())
    }

    async fn bd_addr(&self) -> Result<BdAddr> {
        Ok(self.bd_addr)
    }
}
