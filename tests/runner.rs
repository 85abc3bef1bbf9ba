//! Profile runs through the runner with the in-memory IUT and oracle

use std::time::Duration;

use autopts::btp::types::AddrType;
use autopts::common::config::EngineTimeouts;
use autopts::engine::stack::Identity;
use autopts::engine::{SharedStack, Stack};
use autopts::oracle::Verdict;
use autopts::profiles::l2cap::L2cap;
use autopts::profiles::gap::Gap;
use autopts::testing::mock::{MockIut, ScriptedOracle, Step};
use autopts::testing::{ProfilePlan, Runner};
use tokio::sync::watch;

fn timeouts() -> EngineTimeouts {
    EngineTimeouts {
        command: Duration::from_millis(500),
        wid_wait: Duration::from_millis(300),
        settle: Duration::from_millis(500),
        retries: 1,
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

#[tokio::test]
async fn test_selected_cases_run_for_every_round() {
    let iut = MockIut::new();
    let (oracle, mut events) = ScriptedOracle::new(
        &[
            "L2CAP/LE/CFC/BV-04-C",
            "L2CAP/LE/CFC/BV-05-C",
            "L2CAP/COS/CED/BV-01-C",
        ],
        8,
    );
    let stack = stack();
    let mut runner = Runner {
        iut: &iut,
        oracle: &oracle,
        stack: &stack,
        events: &mut events,
        timeouts: timeouts(),
        name_prefix: "Tester".to_string(),
        abort: None,
        verbose: false,
    };

    let plan = ProfilePlan {
        tests: vec!["L2CAP/LE/CFC/".to_string()],
        exclude: vec!["L2CAP/LE/CFC/BV-05-C".to_string()],
        repeat: 2,
        ..ProfilePlan::new("L2CAP")
    };
    let overrides = vec![("TSPX_tester_mtu".to_string(), "0040".to_string())];
    let result = runner.run_profile(&L2cap, &plan, &overrides).await.unwrap();

    assert_eq!(result.profile, "L2CAP");
    assert_eq!(result.reports.len(), 2);
    assert!(result.all_passed());
    assert_eq!(
        oracle.started(),
        vec!["L2CAP/LE/CFC/BV-04-C", "L2CAP/LE/CFC/BV-04-C"]
    );

    let pixits = oracle.pixits();
    let tester_mtu: Vec<&str> = pixits
        .iter()
        .filter(|(_, name, _)| name == "TSPX_tester_mtu")
        .map(|(_, _, value)| value.as_str())
        .collect();
    assert_eq!(tester_mtu, vec!["0040"]);
}

#[tokio::test]
async fn test_stack_is_reset_between_scenarios() {
    let iut = MockIut::new();
    let (oracle, mut events) =
        ScriptedOracle::new(&["L2CAP/LE/CFC/BV-04-C", "L2CAP/LE/CPU/BV-01-C"], 8);
    let stack = stack();
    let mut runner = Runner {
        iut: &iut,
        oracle: &oracle,
        stack: &stack,
        events: &mut events,
        timeouts: timeouts(),
        name_prefix: "Tester".to_string(),
        abort: None,
        verbose: true,
    };

    let result = runner
        .run_profile(&L2cap, &ProfilePlan::new("L2CAP"), &[])
        .await
        .unwrap();

    assert!(result.all_passed());
    // The unsupported PSM from the first case does not leak into the second
    assert_eq!(stack.read().psm(), 128);
    assert_eq!(stack.read().device_name(), "Tester_1C48");
}

#[tokio::test]
async fn test_failing_verdict_is_counted() {
    let iut = MockIut::new();
    let (oracle, mut events) =
        ScriptedOracle::new(&["TC_ADV_BV_03_C", "TC_CONN_CPUP_BV_02_C"], 8);
    oracle.script("TC_ADV_BV_03_C", vec![Step::Verdict(Verdict::Fail)]);
    let stack = stack();
    let mut runner = Runner {
        iut: &iut,
        oracle: &oracle,
        stack: &stack,
        events: &mut events,
        timeouts: timeouts(),
        name_prefix: "Tester".to_string(),
        abort: None,
        verbose: false,
    };

    let result = runner
        .run_profile(&Gap, &ProfilePlan::new("GAP"), &[])
        .await
        .unwrap();

    assert_eq!(result.passed(), 1);
    assert_eq!(result.failed(), 1);
    assert!(!result.all_passed());
}

#[tokio::test]
async fn test_abort_skips_remaining_cases() {
    let iut = MockIut::new();
    let (oracle, mut events) =
        ScriptedOracle::new(&["TC_ADV_BV_03_C", "TC_CONN_CPUP_BV_02_C"], 8);
    let stack = stack();
    let (abort_tx, abort_rx) = watch::channel(false);
    abort_tx.send(true).unwrap();

    let mut runner = Runner {
        iut: &iut,
        oracle: &oracle,
        stack: &stack,
        events: &mut events,
        timeouts: timeouts(),
        name_prefix: "Tester".to_string(),
        abort: Some(abort_rx),
        verbose: false,
    };

    let result = runner
        .run_profile(&Gap, &ProfilePlan::new("GAP"), &[])
        .await
        .unwrap();

    assert!(result.reports.is_empty());
    assert_eq!(result.skipped, 2);
    assert!(!result.all_passed());
    assert!(oracle.started().is_empty());
}

#[tokio::test]
async fn test_iut_address_is_refreshed_before_each_case() {
    let iut = MockIut::new();
    let moved: autopts::btp::types::BdAddr = "11:22:33:44:55:66".parse().unwrap();
    iut.controller_info(moved, "zephyr");
    let (oracle, mut events) = ScriptedOracle::new(&["L2CAP/LE/CFC/BV-04-C"], 8);
    let stack = stack();
    let mut runner = Runner {
        iut: &iut,
        oracle: &oracle,
        stack: &stack,
        events: &mut events,
        timeouts: timeouts(),
        name_prefix: "Tester".to_string(),
        abort: None,
        verbose: false,
    };

    let result = runner
        .run_profile(&L2cap, &ProfilePlan::new("L2CAP"), &[])
        .await
        .unwrap();

    assert!(result.all_passed());
    assert_eq!(stack.read().iut_addr(), moved);
    assert!(iut.command_names().contains(&"gap_read_ctrl_info"));
    assert!(oracle.pixits().contains(&(
        "L2CAP".to_string(),
        "TSPX_bd_addr_iut".to_string(),
        "112233445566".to_string()
    )));
}
