//! GAP test cases

use std::sync::Arc;

use crate::btp::types::{AddrType, Discoverable, IoCap, Service};
use crate::common::{Error, Result};
use crate::engine::binder::{BoundText, Encoding, StackRef};
use crate::engine::catalog::{ProfileDefaults, ScenarioDefinition};
use crate::engine::command::{Action, Command};
use crate::engine::pixit::{PixitTable, PixitValue};
use crate::engine::stack::Stack;
use crate::engine::wid::{style, Answer, WidEvent};

use super::{CatalogContext, Profile};

const PROFILE: &str = "GAP";

/// Passkey entry query
const WID_ENTER_PASSKEY: u32 = 1002;

/// Queries that ask for an IUT action the scenario performs as gated commands
const ACTION_WIDS: &[u32] = &[
    9, 21, 40, 47, 50, 51, 52, 54, 55, 59, 72, 74, 75, 76, 77, 78, 91, 108, 121, 122,
];

pub struct Gap;

impl Profile for Gap {
    fn name(&self) -> &'static str {
        PROFILE
    }

    fn pixits(&self) -> PixitTable {
        PixitTable::new()
            .set(
                "TSPX_bd_addr_iut",
                PixitValue::bound(StackRef::IutAddr, Encoding::Address),
            )
            .set("TSPX_security_enabled", "FALSE")
            .set("TSPX_delete_link_key", "FALSE")
    }

    fn defaults(&self, _ctx: &CatalogContext) -> ProfileDefaults {
        ProfileDefaults {
            preconditions: vec![register(), unregister()],
            handler: Arc::new(wid_handler),
        }
    }

    fn custom_scenarios(&self, ctx: &CatalogContext) -> Vec<ScenarioDefinition> {
        let mut scenarios = vec![
            scenario(
                "TC_BROB_BCST_BV_01_C",
                vec![
                    Command::new(Action::GapSetConnectable(false)).start_wid(47),
                    Command::new(Action::GapAdvertise).start_wid(47),
                ],
            ),
            scenario(
                "TC_DISC_NONM_BV_02_C",
                vec![Command::new(Action::GapAdvertise).start_wid(72)],
            ),
            scenario("TC_DISC_LIMM_BV_03_C", discoverable(false, Discoverable::Limited, 59)),
            scenario("TC_DISC_LIMM_BV_04_C", discoverable(true, Discoverable::Limited, 50)),
            scenario("TC_DISC_GENM_BV_03_C", discoverable(false, Discoverable::General, 51)),
            scenario("TC_DISC_GENM_BV_04_C", discoverable(true, Discoverable::General, 52)),
            scenario(
                "TC_CONN_NCON_BV_01_C",
                vec![
                    Command::new(Action::GapSetConnectable(false)).start_wid(122),
                    Command::new(Action::GapAdvertise).start_wid(54),
                ],
            ),
            scenario(
                "TC_CONN_NCON_BV_02_C",
                vec![
                    Command::new(Action::GapSetConnectable(false)).start_wid(122),
                    Command::new(Action::GapSetDiscoverable(Discoverable::General)).start_wid(122),
                    Command::new(Action::GapAdvertise).start_wid(54),
                ],
            ),
            scenario(
                "TC_CONN_NCON_BV_03_C",
                vec![
                    Command::new(Action::GapSetConnectable(false)).start_wid(121),
                    Command::new(Action::GapSetDiscoverable(Discoverable::Limited)).start_wid(121),
                    Command::new(Action::GapAdvertise).start_wid(55),
                ],
            ),
            scenario(
                "TC_CONN_UCON_BV_01_C",
                vec![Command::new(Action::GapAdvertise).start_wid(74)],
            ),
            scenario(
                "TC_CONN_UCON_BV_02_C",
                vec![Command::new(Action::GapAdvertise).start_wid(75)],
            ),
            scenario(
                "TC_CONN_UCON_BV_03_C",
                vec![
                    Command::new(Action::GapSetDiscoverable(Discoverable::Limited)).start_wid(76),
                    Command::new(Action::GapAdvertise).start_wid(76),
                ],
            ),
            scenario(
                "TC_CONN_CPUP_BV_01_C",
                vec![Command::new(Action::GapAdvertise).start_wid(21)],
            ),
            scenario("TC_CONN_CPUP_BV_02_C", vec![Command::new(Action::GapAdvertise)]),
            scenario("TC_CONN_CPUP_BV_03_C", vec![Command::new(Action::GapAdvertise)]),
            scenario(
                "TC_ADV_BV_03_C",
                vec![
                    Command::new(Action::GapSetConnectable(true)),
                    Command::new(Action::GapSetDiscoverable(Discoverable::General)),
                    Command::new(Action::GapAdvertise),
                ],
            ),
            scenario(
                "TC_BOND_BON_BV_01_C",
                vec![
                    Command::new(Action::GapSetIoCap(IoCap::DisplayOnly)),
                    Command::new(Action::GapSetConnectable(true)),
                    Command::new(Action::GapAdvertise),
                    peer(Action::GapWaitConnected, ctx).start_wid(108),
                    peer(Action::GapPair, ctx).start_wid(108),
                    peer(Action::GapWaitPasskey, ctx).start_wid(108),
                ],
            )
            .edit1_wid(
                WID_ENTER_PASSKEY,
                BoundText::new(StackRef::Passkey, Encoding::Passkey),
            ),
            scenario(
                "TC_BOND_BON_BV_03_C",
                vec![
                    Command::new(Action::GapSetIoCap(IoCap::NoInputOutput)),
                    Command::new(Action::GapSetConnectable(true)),
                    Command::new(Action::GapAdvertise),
                ],
            ),
            scenario(
                "TC_BOND_BON_BV_04_C",
                vec![
                    Command::new(Action::GapSetIoCap(IoCap::NoInputOutput)),
                    peer(Action::GapConnect, ctx).start_wid(78),
                    peer(Action::GapWaitConnected, ctx).start_wid(78),
                    peer(Action::GapPair, ctx).start_wid(108),
                    peer(Action::GapDisconnect, ctx).start_wid(77),
                    peer(Action::GapWaitDisconnected, ctx).start_wid(77),
                ],
            ),
        ];

        // Connect on one WID, then tear down on 77
        let connection_cases: [(&str, u32, u32); 6] = [
            ("TC_CONN_ACEP_BV_01_C", 78, 77),
            ("TC_CONN_GCEP_BV_01_C", 78, 77),
            ("TC_CONN_GCEP_BV_02_C", 78, 78),
            ("TC_CONN_DCEP_BV_01_C", 78, 77),
            ("TC_CONN_CPUP_BV_04_C", 40, 40),
            ("TC_CONN_CPUP_BV_05_C", 40, 40),
        ];
        for (name, connect_wid, connected_wid) in connection_cases {
            scenarios.push(scenario(name, connect_disconnect(ctx, connect_wid, connected_wid)));
        }
        scenarios.push(scenario("TC_CONN_TERM_BV_01_C", connect_disconnect(ctx, 78, 78)));

        scenarios
    }
}

/// Register GAP first and unregister it when the scenario ends
fn scenario(name: &str, body: Vec<Command>) -> ScenarioDefinition {
    ScenarioDefinition::new(name)
        .command(register())
        .commands(body)
        .command(unregister())
}

fn register() -> Command {
    Command::new(Action::RegisterService(Service::Gap))
}

fn unregister() -> Command {
    Command::new(Action::UnregisterService(Service::Gap)).cleanup()
}

/// A command addressed at the oracle's device
fn peer(action: Action, ctx: &CatalogContext) -> Command {
    Command::new(action)
        .arg(ctx.pts_addr)
        .arg(AddrType::LePublic as i64)
}

fn discoverable(connectable: bool, mode: Discoverable, wid: u32) -> Vec<Command> {
    vec![
        Command::new(Action::GapSetConnectable(connectable)),
        Command::new(Action::GapSetDiscoverable(mode)),
        Command::new(Action::GapAdvertise).start_wid(wid),
    ]
}

fn connect_disconnect(ctx: &CatalogContext, connect_wid: u32, connected_wid: u32) -> Vec<Command> {
    vec![
        peer(Action::GapConnect, ctx).start_wid(connect_wid),
        peer(Action::GapWaitConnected, ctx).start_wid(connected_wid),
        peer(Action::GapDisconnect, ctx).start_wid(77),
        peer(Action::GapWaitDisconnected, ctx).start_wid(77),
    ]
}

/// Last-resort answers for GAP queries
pub fn wid_handler(event: &WidEvent, stack: &Stack) -> Result<Answer> {
    match event.wid {
        wid if ACTION_WIDS.contains(&wid) => Ok(Answer::Confirm(true)),
        WID_ENTER_PASSKEY => stack
            .passkey()
            .map(|p| Answer::Text(format!("{:06}", p)))
            .ok_or_else(|| Error::unresolved_wid(WID_ENTER_PASSKEY, "IUT has not displayed a passkey")),
        _ if event.style == style::OK1 => Ok(Answer::Confirm(true)),
        wid => Err(Error::unresolved_wid(wid, "no GAP rule for this query")),
    }
}
