//! Scenario execution against the in-memory IUT and oracle
//!
//! Each test builds a scenario (or a whole profile catalog), runs it through
//! the sequencer and checks what reached the IUT, what the oracle was told,
//! and the resulting report.

use std::sync::Arc;
use std::time::Duration;

use autopts::btp::types::{AddrType, BdAddr, BtpEvent, IoCap, Service};
use autopts::common::config::EngineTimeouts;
use autopts::common::ErrorKind;
use autopts::engine::sequencer::{Outcome, State};
use autopts::engine::stack::{Identity, ProfileInit};
use autopts::engine::wid::style;
use autopts::engine::{
    Action, Answer, BoundText, Command, Encoding, Origin, ScenarioCatalog, ScenarioDefinition,
    Sequencer, SharedStack, Stack, StackRef, Verify, WidEvent,
};
use autopts::oracle::{OracleEvent, Verdict, WidRequest};
use autopts::profiles::{gap::Gap, l2cap::L2cap, CatalogContext, Profile};
use autopts::testing::mock::{MockIut, ScriptedOracle, Step};
use tokio::sync::{mpsc, watch};

fn timeouts() -> EngineTimeouts {
    EngineTimeouts {
        command: Duration::from_millis(500),
        wid_wait: Duration::from_millis(300),
        settle: Duration::from_millis(500),
        retries: 2,
    }
}

fn stack() -> SharedStack {
    SharedStack::new(Stack::new(Identity {
        address: "C0:DE:C0:DE:C0:DE".parse().unwrap(),
        addr_type: AddrType::LePublic,
        name: "zephyr".to_string(),
        settings: 0,
    }))
}

fn confirm_all(_event: &WidEvent, _stack: &Stack) -> autopts::Result<Answer> {
    Ok(Answer::Confirm(true))
}

fn answer_from_handler(_event: &WidEvent, _stack: &Stack) -> autopts::Result<Answer> {
    Ok(Answer::Text("handler".to_string()))
}

fn refuse_all(event: &WidEvent, _stack: &Stack) -> autopts::Result<Answer> {
    Err(autopts::Error::unresolved_wid(event.wid, "no rule"))
}

/// Register GAP, advertise on WID 47, unregister GAP during cleanup
fn gated_scenario(name: &str) -> ScenarioDefinition {
    ScenarioDefinition::new(name)
        .command(Command::new(Action::RegisterService(Service::Gap)))
        .command(Command::new(Action::GapAdvertise).start_wid(47))
        .command(Command::new(Action::UnregisterService(Service::Gap)).cleanup())
        .handler(Arc::new(confirm_all))
}

fn count(names: &[&str], name: &str) -> usize {
    names.iter().filter(|n| **n == name).count()
}

async fn catalog_for(
    profile: &dyn Profile,
    oracle: &ScriptedOracle,
    names: &[&str],
) -> ScenarioCatalog {
    let ctx = CatalogContext::new(oracle.pts_addr(), "Tester");
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    ScenarioCatalog::build(
        profile.name(),
        &names,
        profile.custom_scenarios(&ctx),
        &profile.defaults(&ctx),
    )
    .unwrap()
}

#[tokio::test]
async fn test_unsupported_psm_case_runs_eighteen_commands_in_order() {
    let iut = MockIut::new();
    let (oracle, mut events) = ScriptedOracle::new(&["L2CAP/LE/CFC/BV-04-C"], 8);
    let stack = stack();
    let catalog = catalog_for(&L2cap, &oracle, &["L2CAP/LE/CFC/BV-04-C"]).await;

    let entry = catalog.get("L2CAP/LE/CFC/BV-04-C").unwrap();
    assert_eq!(entry.origin, Origin::Custom);
    assert_eq!(entry.definition.commands.len(), 18);

    let report = Sequencer::new("L2CAP", &iut, &oracle, &stack, &mut events, timeouts())
        .run(&entry.definition)
        .await;

    assert_eq!(report.outcome, Outcome::Completed);
    assert_eq!(report.state(), State::Completed);
    assert_eq!(report.executed, (1..=18).collect::<Vec<_>>());
    assert_eq!(report.verdict, Some(Verdict::Pass));
    assert!(report.passed());

    assert_eq!(iut.command_names(), vec!["core_reg_svc", "core_reg_svc"]);
    assert_eq!(stack.read().psm(), 241);
    assert_eq!(stack.read().initial_mtu(), 120);
    assert_eq!(
        stack.read().pts_addr(),
        Some((oracle.pts_addr(), AddrType::LePublic))
    );

    let pixits = oracle.pixits();
    assert!(pixits.contains(&(
        "L2CAP".to_string(),
        "TSPX_bd_addr_iut".to_string(),
        "C0DEC0DEC0DE".to_string()
    )));
    assert!(pixits.contains(&(
        "L2CAP".to_string(),
        "TSPX_psm_unsupported".to_string(),
        "00f1".to_string()
    )));
    assert_eq!(oracle.started(), vec!["L2CAP/LE/CFC/BV-04-C"]);
}

#[tokio::test]
async fn test_catalog_falls_back_to_default_and_matches_case_sensitively() {
    let (oracle, _events) = ScriptedOracle::new(&[], 1);
    let names = [
        "L2CAP/LE/CFC/BV-04-C",
        "l2cap/le/cfc/bv-04-c",
        "L2CAP/LE/CPU/BV-01-C",
    ];
    let catalog = catalog_for(&L2cap, &oracle, &names).await;

    assert_eq!(catalog.len(), names.len());
    assert_eq!(catalog.get(names[0]).unwrap().origin, Origin::Custom);

    for name in &names[1..] {
        let entry = catalog.get(name).unwrap();
        assert_eq!(entry.origin, Origin::Default, "{}", name);
        assert_eq!(entry.definition.name, *name);
        // Default L2CAP scenario: preconditions plus a listener
        assert_eq!(entry.definition.commands.len(), 18);
        assert!(entry.definition.handler.is_some());
    }
}

#[tokio::test]
async fn test_gated_command_runs_only_after_its_wid() {
    let iut = MockIut::new();
    let (oracle, mut events) = ScriptedOracle::new(&["TC_GATE"], 8);
    oracle.script(
        "TC_GATE",
        vec![
            Step::wid(20001, style::OK_CANCEL1),
            Step::Pause(Duration::from_millis(20)),
            Step::wid(47, style::OK_CANCEL1),
            Step::Verdict(Verdict::Pass),
        ],
    );
    let stack = stack();
    let scenario = gated_scenario("TC_GATE");

    let report = Sequencer::new("GAP", &iut, &oracle, &stack, &mut events, timeouts())
        .run(&scenario)
        .await;

    assert!(report.passed(), "{:?}", report);
    assert_eq!(report.executed, vec![1, 2, 3]);
    assert_eq!(
        iut.command_names(),
        vec!["core_reg_svc", "gap_adv_ind_on", "core_unreg_svc"]
    );

    let answers = oracle.answers();
    let wids: Vec<u32> = answers.iter().map(|a| a.wid).collect();
    assert_eq!(wids, vec![20001, 47]);
    assert!(answers.iter().all(|a| a.reply == Ok(Answer::Confirm(true))));
}

#[tokio::test]
async fn test_missing_wid_times_out_and_still_cleans_up() {
    let iut = MockIut::new();
    let (oracle, mut events) = ScriptedOracle::new(&["TC_SILENT"], 8);
    oracle.script("TC_SILENT", vec![Step::Pause(Duration::from_secs(5))]);
    let stack = stack();
    let scenario = gated_scenario("TC_SILENT");

    let report = Sequencer::new("GAP", &iut, &oracle, &stack, &mut events, timeouts())
        .run(&scenario)
        .await;

    match &report.outcome {
        Outcome::Failed { kind, ordinal, .. } => {
            assert_eq!(*kind, ErrorKind::OracleTimeout);
            assert_eq!(*ordinal, Some(2));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(report.state(), State::Failed);

    let names = iut.command_names();
    assert_eq!(count(&names, "gap_adv_ind_on"), 0);
    assert_eq!(count(&names, "core_unreg_svc"), 1);
    assert_eq!(oracle.stops(), 1);
}

#[tokio::test]
async fn test_cleanup_failure_is_recorded_without_changing_outcome() {
    let iut = MockIut::new();
    iut.fail("core_unreg_svc", 10);
    let (oracle, mut events) = ScriptedOracle::new(&["TC_GATE"], 8);
    oracle.script(
        "TC_GATE",
        vec![Step::wid(47, style::OK_CANCEL1), Step::Verdict(Verdict::Pass)],
    );
    let stack = stack();
    let scenario = gated_scenario("TC_GATE");

    let report = Sequencer::new("GAP", &iut, &oracle, &stack, &mut events, timeouts())
        .run(&scenario)
        .await;

    assert_eq!(report.outcome, Outcome::Completed);
    assert_eq!(report.cleanup_errors.len(), 1);
    assert_eq!(report.cleanup_errors[0].ordinal, 3);
    // One attempt plus two retries, in a single cleanup pass
    assert_eq!(count(&iut.command_names(), "core_unreg_svc"), 3);
}

#[tokio::test]
async fn test_idempotent_commands_are_retried_once_more() {
    let iut = MockIut::new();
    iut.fail("core_reg_svc", 1);
    let (oracle, mut events) = ScriptedOracle::new(&["TC_GATE"], 8);
    oracle.script(
        "TC_GATE",
        vec![Step::wid(47, style::OK_CANCEL1), Step::Verdict(Verdict::Pass)],
    );
    let stack = stack();

    let report = Sequencer::new("GAP", &iut, &oracle, &stack, &mut events, timeouts())
        .run(&gated_scenario("TC_GATE"))
        .await;

    assert!(report.passed(), "{:?}", report);
    assert_eq!(count(&iut.command_names(), "core_reg_svc"), 2);
}

#[tokio::test]
async fn test_connect_is_not_retried() {
    let iut = MockIut::new();
    iut.fail("gap_conn", 1);
    let (oracle, mut events) = ScriptedOracle::new(&["TC_CONN"], 8);
    let stack = stack();
    let peer: BdAddr = "00:1B:DC:F2:1C:48".parse().unwrap();
    let scenario = ScenarioDefinition::new("TC_CONN")
        .command(
            Command::new(Action::GapConnect)
                .arg(peer)
                .arg(AddrType::LePublic as i64),
        )
        .handler(Arc::new(confirm_all));

    let report = Sequencer::new("GAP", &iut, &oracle, &stack, &mut events, timeouts())
        .run(&scenario)
        .await;

    assert!(matches!(
        report.outcome,
        Outcome::Failed {
            kind: ErrorKind::Transport,
            ordinal: Some(1),
            ..
        }
    ));
    assert_eq!(iut.command_names(), vec!["gap_conn"]);
    // Failed before the test case was started
    assert!(oracle.started().is_empty());
    assert_eq!(oracle.stops(), 0);
}

#[tokio::test]
async fn test_arguments_bind_when_the_command_runs() {
    let iut = MockIut::new();
    let (oracle, mut events) = ScriptedOracle::new(&["TC_BIND"], 8);
    let stack = stack();
    stack.write().init(ProfileInit::L2cap {
        psm: 0x80,
        initial_mtu: 120,
    });

    let scenario = ScenarioDefinition::new("TC_BIND")
        .command(
            Command::new(Action::UpdatePixit {
                name: "TSPX_psm".to_string(),
                encoding: Encoding::Hex16,
            })
            .arg(StackRef::L2capPsm),
        )
        .command(Command::new(Action::L2capSetPsm).arg(0x1001i64))
        .command(
            Command::new(Action::UpdatePixit {
                name: "TSPX_spsm".to_string(),
                encoding: Encoding::Hex16,
            })
            .arg(StackRef::L2capPsm),
        )
        .handler(Arc::new(confirm_all));

    // Changed after the scenario was defined, before it runs
    stack.write().set_psm(0x33);

    let report = Sequencer::new("L2CAP", &iut, &oracle, &stack, &mut events, timeouts())
        .run(&scenario)
        .await;

    assert!(report.passed(), "{:?}", report);
    let pixits: Vec<(String, String)> = oracle
        .pixits()
        .into_iter()
        .map(|(_, name, value)| (name, value))
        .collect();
    assert_eq!(
        pixits,
        vec![
            ("TSPX_psm".to_string(), "0033".to_string()),
            ("TSPX_spsm".to_string(), "1001".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_resolver_prefers_edit_then_verify_then_handler() {
    let iut = MockIut::new();
    let (oracle, mut events) = ScriptedOracle::new(&["TC_RESOLVE"], 8);
    oracle.script(
        "TC_RESOLVE",
        vec![
            Step::wid(30, style::EDIT1),
            Step::wid(31, style::YES_NO1),
            Step::wid(32, style::OK1),
            Step::Verdict(Verdict::Pass),
        ],
    );
    let stack = stack();
    stack.write().init(ProfileInit::L2cap {
        psm: 0x80,
        initial_mtu: 120,
    });

    let scenario = ScenarioDefinition::new("TC_RESOLVE")
        .command(Command::new(Action::RegisterService(Service::Gap)))
        .edit1_wid(30, BoundText::new(StackRef::L2capPsm, Encoding::Hex16))
        .verify_wid(30, Verify::Fixed(false))
        .verify_wid(31, Verify::Fixed(false))
        .handler(Arc::new(answer_from_handler));

    let report = Sequencer::new("L2CAP", &iut, &oracle, &stack, &mut events, timeouts())
        .run(&scenario)
        .await;

    assert!(report.passed(), "{:?}", report);
    let replies: Vec<_> = oracle.answers().into_iter().map(|a| (a.wid, a.reply)).collect();
    assert_eq!(
        replies,
        vec![
            (30, Ok(Answer::Text("0080".to_string()))),
            (31, Ok(Answer::Confirm(false))),
            (32, Ok(Answer::Text("handler".to_string()))),
        ]
    );
}

#[tokio::test]
async fn test_unresolved_wid_fails_the_scenario() {
    let iut = MockIut::new();
    let (oracle, mut events) = ScriptedOracle::new(&["TC_UNKNOWN"], 8);
    oracle.script(
        "TC_UNKNOWN",
        vec![Step::wid(999, style::OK_CANCEL1), Step::wid(47, style::OK_CANCEL1)],
    );
    let stack = stack();
    let scenario = gated_scenario("TC_UNKNOWN").handler(Arc::new(refuse_all));

    let report = Sequencer::new("GAP", &iut, &oracle, &stack, &mut events, timeouts())
        .run(&scenario)
        .await;

    assert!(matches!(
        report.outcome,
        Outcome::Failed {
            kind: ErrorKind::UnresolvedWid,
            ordinal: Some(2),
            ..
        }
    ));
    let answers = oracle.wait_answers(1).await;
    assert_eq!(answers.len(), 1);
    let refusal = answers[0].reply.as_ref().unwrap_err();
    assert_eq!(refusal.code, "UNRESOLVED_WID");
    assert_eq!(count(&iut.command_names(), "gap_adv_ind_on"), 0);
    assert_eq!(count(&iut.command_names(), "core_unreg_svc"), 1);
}

#[tokio::test]
async fn test_abort_fails_the_run_and_still_cleans_up() {
    let iut = MockIut::new();
    let (oracle, mut events) = ScriptedOracle::new(&["TC_ABORT"], 8);
    oracle.script("TC_ABORT", vec![Step::Pause(Duration::from_secs(5))]);
    let stack = stack();
    let scenario = gated_scenario("TC_ABORT");

    let (abort_tx, abort_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = abort_tx.send(true);
    });

    let mut long_wait = timeouts();
    long_wait.wid_wait = Duration::from_secs(10);
    let report = Sequencer::new("GAP", &iut, &oracle, &stack, &mut events, long_wait)
        .with_abort(abort_rx)
        .run(&scenario)
        .await;

    assert!(matches!(
        report.outcome,
        Outcome::Failed {
            kind: ErrorKind::Aborted,
            ..
        }
    ));
    assert!(report.duration < Duration::from_secs(5));
    assert_eq!(count(&iut.command_names(), "core_unreg_svc"), 1);
    assert_eq!(oracle.stops(), 1);
}

#[tokio::test]
async fn test_stale_wid_is_refused_at_scenario_start() {
    let iut = MockIut::new();
    let (oracle, mut events) = ScriptedOracle::new(&["TC_GATE"], 8);
    oracle.script(
        "TC_GATE",
        vec![Step::wid(47, style::OK_CANCEL1), Step::Verdict(Verdict::Pass)],
    );
    let (stale, reply) = WidRequest::new(WidEvent::new(47, style::OK_CANCEL1, "left over"));
    oracle.sender().send(OracleEvent::Wid(stale)).await.unwrap();
    let stack = stack();

    let report = Sequencer::new("GAP", &iut, &oracle, &stack, &mut events, timeouts())
        .run(&gated_scenario("TC_GATE"))
        .await;

    assert!(report.passed(), "{:?}", report);
    let refused = reply.await.unwrap().unwrap_err();
    assert_eq!(refused.code, "STALE");
}

#[tokio::test]
async fn test_bonding_answers_passkey_displayed_by_iut() {
    let iut = MockIut::new();
    let (oracle, mut events) = ScriptedOracle::new(&["TC_BOND_BON_BV_01_C"], 8);
    let pts = oracle.pts_addr();
    iut.on_command(
        "gap_adv_ind_on",
        BtpEvent::GapDeviceConnected {
            addr: pts,
            addr_type: AddrType::LePublic,
        },
    );
    iut.on_command(
        "gap_pair",
        BtpEvent::GapPasskeyDisplay {
            addr: pts,
            addr_type: AddrType::LePublic,
            passkey: 4242,
        },
    );
    oracle.script(
        "TC_BOND_BON_BV_01_C",
        vec![
            Step::wid(108, style::OK_CANCEL1),
            Step::wid(1002, style::EDIT1),
            Step::Verdict(Verdict::Pass),
        ],
    );

    let catalog = catalog_for(&Gap, &oracle, &["TC_BOND_BON_BV_01_C"]).await;
    let entry = catalog.get("TC_BOND_BON_BV_01_C").unwrap();
    let stack = stack();
    {
        let ctx = CatalogContext::new(pts, "Tester");
        let mut stack = stack.write();
        Gap.init_stack(&mut stack, &ctx);
    }

    let report = Sequencer::new("GAP", &iut, &oracle, &stack, &mut events, timeouts())
        .run(&entry.definition)
        .await;

    assert!(report.passed(), "{:?}", report);
    assert!(stack.read().is_connected(&pts));
    assert_eq!(stack.read().passkey(), Some(4242));
    assert!(iut
        .commands()
        .contains(&autopts::btp::BtpCommand::GapSetIoCap(IoCap::DisplayOnly)));

    let replies: Vec<_> = oracle.answers().into_iter().map(|a| (a.wid, a.reply)).collect();
    assert_eq!(
        replies,
        vec![
            (108, Ok(Answer::Confirm(true))),
            (1002, Ok(Answer::Text("004242".to_string()))),
        ]
    );
}

#[tokio::test]
async fn test_verdict_before_gate_is_a_failure() {
    let iut = MockIut::new();
    let (oracle, mut events): (ScriptedOracle, mpsc::Receiver<OracleEvent>) =
        ScriptedOracle::new(&["TC_EARLY"], 8);
    oracle.script("TC_EARLY", vec![Step::Verdict(Verdict::Fail)]);
    let stack = stack();

    let report = Sequencer::new("GAP", &iut, &oracle, &stack, &mut events, timeouts())
        .run(&gated_scenario("TC_EARLY"))
        .await;

    assert!(matches!(report.outcome, Outcome::Failed { .. }));
    assert_eq!(report.verdict, Some(Verdict::Fail));
    assert!(!report.passed());
    // Verdict already in; nothing to stop
    assert_eq!(oracle.stops(), 0);
}

#[tokio::test]
async fn test_peer_address_is_read_when_connect_runs() {
    let iut = MockIut::new();
    let (oracle, mut events) = ScriptedOracle::new(&["TC_PEER"], 8);
    let stack = stack();
    let scenario = ScenarioDefinition::new("TC_PEER")
        .command(
            Command::new(Action::GapConnect)
                .arg(StackRef::PtsAddr)
                .arg(StackRef::PtsAddrType),
        )
        .handler(Arc::new(confirm_all));

    let peer: BdAddr = "11:22:33:44:55:66".parse().unwrap();
    stack.write().set_pts_addr(peer, AddrType::LeRandom);

    let report = Sequencer::new("GAP", &iut, &oracle, &stack, &mut events, timeouts())
        .run(&scenario)
        .await;

    assert!(report.passed(), "{:?}", report);
    assert_eq!(
        iut.commands(),
        vec![autopts::btp::BtpCommand::GapConnect {
            addr: peer,
            addr_type: AddrType::LeRandom,
        }]
    );
}

#[tokio::test]
async fn test_unbound_argument_fails_before_dispatch() {
    let iut = MockIut::new();
    let (oracle, mut events) = ScriptedOracle::new(&["TC_UNBOUND"], 8);
    let stack = stack();
    let scenario = ScenarioDefinition::new("TC_UNBOUND")
        .command(Command::new(Action::RegisterService(Service::Gap)))
        .command(
            Command::new(Action::GapConnect)
                .arg(StackRef::PtsAddr)
                .arg(StackRef::PtsAddrType),
        )
        .command(Command::new(Action::UnregisterService(Service::Gap)).cleanup())
        .handler(Arc::new(confirm_all));

    let report = Sequencer::new("GAP", &iut, &oracle, &stack, &mut events, timeouts())
        .run(&scenario)
        .await;

    match &report.outcome {
        Outcome::Failed { message, ordinal, .. } => {
            assert_eq!(*ordinal, Some(2));
            assert!(message.contains("PTS address not set"), "{}", message);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(iut.command_names(), vec!["core_reg_svc", "core_unreg_svc"]);
    // Never started, so there is nothing to stop
    assert!(oracle.started().is_empty());
    assert_eq!(oracle.stops(), 0);
}

#[tokio::test]
async fn test_gate_wid_raised_during_untagged_command_releases_its_gate() {
    let iut = MockIut::new();
    iut.delay(Duration::from_millis(50));
    let (oracle, mut events) = ScriptedOracle::new(&["TC_TWO_GATES"], 8);
    oracle.script(
        "TC_TWO_GATES",
        vec![
            Step::wid(10, style::OK_CANCEL1),
            Step::wid(11, style::OK_CANCEL1),
            Step::Verdict(Verdict::Pass),
        ],
    );
    let stack = stack();
    let scenario = ScenarioDefinition::new("TC_TWO_GATES")
        .command(Command::new(Action::RegisterService(Service::Gap)).start_wid(10))
        .command(Command::new(Action::GapSetConnectable(true)))
        .command(Command::new(Action::GapAdvertise).start_wid(11))
        .handler(Arc::new(confirm_all));

    let report = Sequencer::new("GAP", &iut, &oracle, &stack, &mut events, timeouts())
        .run(&scenario)
        .await;

    assert!(report.passed(), "{:?}", report);
    assert_eq!(report.executed, vec![1, 2, 3]);
    assert_eq!(
        iut.command_names(),
        vec!["core_reg_svc", "gap_set_conn", "gap_adv_ind_on"]
    );
    let answered: Vec<u32> = oracle.answers().iter().map(|a| a.wid).collect();
    assert_eq!(answered, vec![10, 11]);
}

#[tokio::test]
async fn test_abort_while_waiting_for_verdict_fails_the_run() {
    let iut = MockIut::new();
    let (oracle, mut events) = ScriptedOracle::new(&["TC_NO_VERDICT"], 8);
    oracle.script("TC_NO_VERDICT", vec![Step::Pause(Duration::from_secs(5))]);
    let stack = stack();
    let scenario = ScenarioDefinition::new("TC_NO_VERDICT")
        .command(Command::new(Action::RegisterService(Service::Gap)))
        .command(Command::new(Action::UnregisterService(Service::Gap)).cleanup())
        .handler(Arc::new(confirm_all));

    let (abort_tx, abort_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = abort_tx.send(true);
    });

    let mut long_settle = timeouts();
    long_settle.settle = Duration::from_secs(10);
    let report = Sequencer::new("GAP", &iut, &oracle, &stack, &mut events, long_settle)
        .with_abort(abort_rx)
        .run(&scenario)
        .await;

    assert_eq!(
        report.outcome,
        Outcome::Failed {
            kind: ErrorKind::Aborted,
            message: "Scenario aborted by operator".to_string(),
            ordinal: None,
        }
    );
    assert_eq!(report.state(), State::Failed);
    assert!(report.duration < Duration::from_secs(5));
    assert_eq!(report.executed, vec![1, 2]);
    assert_eq!(oracle.stops(), 1);
}

#[tokio::test]
async fn test_iut_address_changed_after_build_reaches_pixit() {
    let iut = MockIut::new();
    let (oracle, mut events) = ScriptedOracle::new(&["L2CAP/LE/CFC/BV-04-C"], 8);
    let stack = stack();
    let catalog = catalog_for(&L2cap, &oracle, &["L2CAP/LE/CFC/BV-04-C"]).await;

    let moved: BdAddr = "11:22:33:44:55:66".parse().unwrap();
    stack.write().set_iut_addr(moved, AddrType::LePublic);

    let entry = catalog.get("L2CAP/LE/CFC/BV-04-C").unwrap();
    let report = Sequencer::new("L2CAP", &iut, &oracle, &stack, &mut events, timeouts())
        .run(&entry.definition)
        .await;

    assert!(report.passed(), "{:?}", report);
    let iut_addr: Vec<String> = oracle
        .pixits()
        .into_iter()
        .filter(|(_, name, _)| name == "TSPX_bd_addr_iut")
        .map(|(_, _, value)| value)
        .collect();
    assert_eq!(iut_addr, vec!["112233445566"]);
}

#[tokio::test]
async fn test_controller_info_command_refreshes_iut_address() {
    let iut = MockIut::new();
    let moved: BdAddr = "11:22:33:44:55:66".parse().unwrap();
    iut.controller_info(moved, "zephyr");
    let (oracle, mut events) = ScriptedOracle::new(&["TC_REFRESH"], 8);
    let stack = stack();
    let scenario = ScenarioDefinition::new("TC_REFRESH")
        .command(Command::new(Action::GapReadControllerInfo))
        .command(
            Command::new(Action::UpdatePixit {
                name: "TSPX_bd_addr_iut".to_string(),
                encoding: Encoding::Address,
            })
            .arg(StackRef::IutAddr),
        )
        .handler(Arc::new(confirm_all));
    scenario.validate().unwrap();

    let report = Sequencer::new("L2CAP", &iut, &oracle, &stack, &mut events, timeouts())
        .run(&scenario)
        .await;

    assert!(report.passed(), "{:?}", report);
    assert_eq!(iut.command_names(), vec!["gap_read_ctrl_info"]);
    assert_eq!(stack.read().iut_addr(), moved);
    assert_eq!(stack.read().iut_addr_type(), AddrType::LePublic);
    assert!(oracle.pixits().contains(&(
        "L2CAP".to_string(),
        "TSPX_bd_addr_iut".to_string(),
        "112233445566".to_string()
    )));
}
