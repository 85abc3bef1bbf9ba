//! L2CAP test cases

use std::sync::Arc;

use crate::btp::types::{l2cap, AddrType, ConnectionResponse, IoCap, Service};
use crate::common::{Error, Result};
use crate::engine::binder::{hex16, Encoding, StackRef};
use crate::engine::catalog::{ProfileDefaults, ScenarioDefinition};
use crate::engine::command::{Action, Command};
use crate::engine::pixit::PixitTable;
use crate::engine::stack::Stack;
use crate::engine::wid::{style, Answer, WidEvent};

use super::{CatalogContext, Profile};

pub const LE_PSM: u16 = 128;
pub const PSM_UNSUPPORTED: u16 = 241;
pub const LE_INITIAL_MTU: u16 = 120;
pub const LE_INITIAL_MTU_EQUAL_MPS: u16 = 96;

pub const BR_PSM: u16 = 0x1001;
pub const BR_INITIAL_MTU: u16 = 120;

const PROFILE: &str = "L2CAP";

pub struct L2cap;

impl Profile for L2cap {
    fn name(&self) -> &'static str {
        PROFILE
    }

    fn pixits(&self) -> PixitTable {
        PixitTable::new()
            .set("TSPX_bd_addr_iut", "DEADBEEFDEAD")
            .set("TSPX_security_enabled", "FALSE")
            .set("TSPX_delete_link_key", "FALSE")
            .set("TSPX_pin_code", "0000")
            .set("TSPX_delete_ltk", "FALSE")
            .set("TSPX_l2ca_inmtu", "02A0")
            .set("TSPX_iut_supported_max_channels", "5")
            .set("TSPX_tester_mps", "0017")
            .set("TSPX_tester_mtu", "02A0")
            .set("TSPX_iut_role_initiator", "True")
            .set("TSPX_spsm", "0000")
            .set("TSPX_psm", "0001")
            .set("TSPX_psm_unsupported", "0000")
            .set("TSPX_psm_authentication_required", "00F2")
            .set("TSPX_psm_authorization_required", "00F3")
            .set("TSPX_psm_encryption_key_size_required", "00F4")
            .set("TSPX_time_guard", "180000")
            .set("TSPX_timer_rtx", "10000")
            .set("TSPX_timer_rtx_max", "1000")
            .set("TSPX_timer_rtx_min", "60000")
            .set("TSPX_use_implicit_send", "TRUE")
            .set("TSPX_use_dynamic_pin", "FALSE")
            .set("TSPX_iut_SDU_size_in_bytes", "144")
            .set("TSPX_secure_simple_pairing_pass_key_confirmation", "FALSE")
            .set("TSPX_generate_local_busy", "TRUE")
            .set("TSPX_l2ca_cbmps_min", "0040")
            .set("TSPX_l2ca_cbmps_max", "0100")
    }

    fn defaults(&self, ctx: &CatalogContext) -> ProfileDefaults {
        ProfileDefaults {
            preconditions: le_listen(ctx, ConnectionResponse::Success),
            handler: Arc::new(wid_handler),
        }
    }

    fn custom_scenarios(&self, ctx: &CatalogContext) -> Vec<ScenarioDefinition> {
        let mut scenarios = vec![
            scenario(
                "L2CAP/LE/CFC/BV-04-C",
                extend(pre_conditions(ctx), [set_psm(PSM_UNSUPPORTED)]),
            ),
            scenario(
                "L2CAP/COS/ECFC/BV-04-C",
                extend(
                    pre_conditions(ctx),
                    [Command::new(Action::L2capSetInitialMtu).arg(i64::from(LE_INITIAL_MTU_EQUAL_MPS))],
                ),
            ),
            scenario(
                "L2CAP/ECFC/BV-24-C",
                extend(
                    le_listen(ctx, ConnectionResponse::Success),
                    [update_pixit_hex("TSPX_l2ca_cbmps_max", 64)],
                ),
            ),
            scenario(
                "L2CAP/ECFC/BI-02-C",
                extend(
                    le_listen(ctx, ConnectionResponse::Success),
                    [set_num_channels(1), set_hold_credits(true)],
                ),
            ),
            scenario(
                "L2CAP/ECFC/BI-07-C",
                extend(le_listen(ctx, ConnectionResponse::Success), [set_hold_credits(true)]),
            ),
            scenario(
                "L2CAP/TIM/BV-03-C",
                extend(
                    le_listen(ctx, ConnectionResponse::Success),
                    [
                        update_pixit("TSPX_iut_role_initiator", "False"),
                        Command::new(Action::RegisterService(Service::Gatt)),
                    ],
                ),
            ),
            scenario("L2CAP/LE/CID/BV-01-C", extend(br_pre_conditions(ctx), [init(LE_PSM, LE_INITIAL_MTU)])),
            scenario(
                "L2CAP/LE/CID/BV-02-C",
                extend(
                    br_listen(ctx),
                    [
                        init(LE_PSM, LE_INITIAL_MTU),
                        listen(Action::L2capLeListen(ConnectionResponse::Success), LE_PSM, LE_INITIAL_MTU),
                    ],
                ),
            ),
        ];

        for name in ["L2CAP/ECFC/BV-25-C", "L2CAP/ECFC/BV-29-C", "L2CAP/ECFC/BI-01-C"] {
            scenarios.push(scenario(
                name,
                extend(le_listen(ctx, ConnectionResponse::Success), [set_num_channels(1)]),
            ));
        }

        let le_groups: [(&[&str], ConnectionResponse); 3] = [
            (
                &[
                    "L2CAP/LE/CFC/BV-11-C",
                    "L2CAP/LE/CFC/BV-25-C",
                    "L2CAP/ECFC/BV-11-C",
                    "L2CAP/ECFC/BV-32-C",
                ],
                ConnectionResponse::InsufficientAuthentication,
            ),
            (
                &["L2CAP/LE/CFC/BV-13-C", "L2CAP/ECFC/BV-13-C"],
                ConnectionResponse::InsufficientAuthorization,
            ),
            (
                &["L2CAP/LE/CFC/BV-15-C", "L2CAP/ECFC/BV-15-C"],
                ConnectionResponse::InsufficientEncryptionKeySize,
            ),
        ];
        for (names, response) in le_groups {
            for name in names {
                scenarios.push(scenario(name, le_listen(ctx, response)));
            }
        }

        for name in BR_BASIC {
            scenarios.push(scenario(name, br_listen(ctx)));
        }
        for name in ["L2CAP/COS/CFD/BV-09-C", "L2CAP/COS/CED/BV-01-C"] {
            scenarios.push(scenario(
                name,
                extend(br_listen(ctx), [update_pixit("TSPX_iut_role_initiator", "True")]),
            ));
        }

        use l2cap::*;
        let br_groups: [(&[&str], u8, u32); 9] = [
            (BR_RET, LISTEN_V2_MODE_RET, LISTEN_V2_OPT_NONE),
            (BR_FC, LISTEN_V2_MODE_FC, LISTEN_V2_OPT_NONE),
            (BR_ERET, LISTEN_V2_MODE_ERET, LISTEN_V2_OPT_NONE),
            (BR_STREAM, LISTEN_V2_MODE_STREAM, LISTEN_V2_OPT_NONE),
            (BR_ERET_NO_FCS, LISTEN_V2_MODE_ERET, LISTEN_V2_OPT_NO_FCS),
            (BR_STREAM_NO_FCS, LISTEN_V2_MODE_STREAM, LISTEN_V2_OPT_NO_FCS),
            (BR_ERET_OPTIONAL, LISTEN_V2_MODE_ERET, LISTEN_V2_OPT_MODE_OPTIONAL),
            (BR_STREAM_OPTIONAL, LISTEN_V2_MODE_STREAM, LISTEN_V2_OPT_MODE_OPTIONAL),
            (BR_ERET_EXT_WIN, LISTEN_V2_MODE_ERET, LISTEN_V2_OPT_EXT_WIN_SIZE),
        ];
        for (names, mode, options) in br_groups {
            for name in names {
                scenarios.push(scenario(name, br_listen_v2(ctx, mode, options)));
            }
        }

        for name in ["L2CAP/ERM/BV-07-C", "L2CAP/ERM/BV-22-C"] {
            scenarios.push(scenario(
                name,
                extend(
                    br_listen_v2(ctx, LISTEN_V2_MODE_ERET, LISTEN_V2_OPT_HOLD_CREDIT),
                    [update_pixit("TSPX_generate_local_busy", "False")],
                ),
            ));
        }

        scenarios
    }
}

// === BR/EDR test cases grouped by listener configuration ===

const BR_BASIC: &[&str] = &[
    "L2CAP/COS/CED/BV-07-C",
    "L2CAP/COS/CED/BV-08-C",
    "L2CAP/COS/CED/BV-09-C",
    "L2CAP/COS/CED/BI-01-C",
    "L2CAP/COS/CFD/BV-01-C",
    "L2CAP/COS/CFD/BV-02-C",
    "L2CAP/COS/CFD/BV-03-C",
    "L2CAP/COS/CFD/BV-11-C",
    "L2CAP/COS/CFD/BV-12-C",
    "L2CAP/COS/CFD/BV-14-C",
    "L2CAP/COS/CFD/BV-08-C",
    "L2CAP/COS/CED/BV-03-C",
    "L2CAP/COS/CED/BI-06-C",
    "L2CAP/COS/CED/BI-07-C",
    "L2CAP/COS/CED/BI-04-C",
    "L2CAP/COS/CED/BI-08-C",
    "L2CAP/COS/CED/BI-10-C",
    "L2CAP/COS/CED/BI-12-C",
    "L2CAP/COS/CED/BI-14-C",
    "L2CAP/COS/CED/BI-15-C",
    "L2CAP/COS/CED/BI-03-C",
    "L2CAP/COS/CED/BV-04-C",
    "L2CAP/COS/ECH/BV-02-C",
    "L2CAP/COS/ECH/BV-01-C",
    "L2CAP/COS/IEX/BV-01-C",
    "L2CAP/COS/IEX/BV-02-C",
    "L2CAP/EXF/BV-07-C",
    "L2CAP/COS/CFD/BV-10-C",
    "L2CAP/CMC/BV-09-C",
    "L2CAP/CMC/BI-05-C",
    "L2CAP/CMC/BI-06-C",
    "L2CAP/COS/CED/BV-12-C",
    "L2CAP/COS/CED/BV-11-C",
];

const BR_RET: &[&str] = &[
    "L2CAP/COS/RTX/BV-01-C",
    "L2CAP/COS/RTX/BV-02-C",
    "L2CAP/COS/RTX/BV-03-C",
];

const BR_FC: &[&str] = &[
    "L2CAP/COS/CED/BV-10-C",
    "L2CAP/COS/FLC/BV-01-C",
    "L2CAP/COS/FLC/BV-02-C",
    "L2CAP/COS/FLC/BV-03-C",
    "L2CAP/COS/FLC/BV-04-C",
    "L2CAP/COS/CFD/BV-13-C",
];

const BR_ERET: &[&str] = &[
    "L2CAP/CMC/BV-01-C",
    "L2CAP/CMC/BV-02-C",
    "L2CAP/ERM/BV-01-C",
    "L2CAP/ERM/BV-02-C",
    "L2CAP/ERM/BV-03-C",
    "L2CAP/ERM/BV-08-C",
    "L2CAP/ERM/BV-09-C",
    "L2CAP/ERM/BV-10-C",
    "L2CAP/ERM/BV-11-C",
    "L2CAP/ERM/BV-12-C",
    "L2CAP/ERM/BV-18-C",
    "L2CAP/ERM/BV-19-C",
    "L2CAP/ERM/BV-20-C",
    "L2CAP/FOC/BV-06-C",
    "L2CAP/FOC/BV-08-C",
    "L2CAP/OFS/BV-05-C",
    "L2CAP/OFS/BV-06-C",
    "L2CAP/ERM/BV-16-C",
    "L2CAP/ERM/BI-01-C",
    "L2CAP/CMC/BI-01-C",
    "L2CAP/CMC/BI-02-C",
    "L2CAP/CMC/BV-12-C",
    "L2CAP/ERM/BV-23-C",
    "L2CAP/ERM/BV-05-C",
    "L2CAP/ERM/BV-06-C",
    "L2CAP/ERM/BV-13-C",
    "L2CAP/ERM/BI-03-C",
    "L2CAP/ERM/BI-04-C",
    "L2CAP/ERM/BI-05-C",
    "L2CAP/ERM/BV-14-C",
    "L2CAP/ERM/BV-15-C",
    "L2CAP/EWC/BV-02-C",
];

const BR_STREAM: &[&str] = &[
    "L2CAP/CMC/BV-04-C",
    "L2CAP/CMC/BV-05-C",
    "L2CAP/STM/BV-01-C",
    "L2CAP/STM/BV-02-C",
    "L2CAP/OFS/BV-07-C",
    "L2CAP/OFS/BV-08-C",
    "L2CAP/CMC/BI-03-C",
    "L2CAP/CMC/BI-04-C",
    "L2CAP/CMC/BV-13-C",
    "L2CAP/STM/BV-03-C",
];

const BR_ERET_NO_FCS: &[&str] = &[
    "L2CAP/FOC/BV-01-C",
    "L2CAP/FOC/BV-02-C",
    "L2CAP/FOC/BV-03-C",
    "L2CAP/FOC/BV-05-C",
    "L2CAP/OFS/BV-01-C",
    "L2CAP/OFS/BV-02-C",
];

const BR_STREAM_NO_FCS: &[&str] = &["L2CAP/OFS/BV-03-C", "L2CAP/OFS/BV-04-C"];

const BR_ERET_OPTIONAL: &[&str] = &[
    "L2CAP/CMC/BV-03-C",
    "L2CAP/CMC/BV-07-C",
    "L2CAP/CMC/BV-10-C",
];

const BR_STREAM_OPTIONAL: &[&str] = &[
    "L2CAP/CMC/BV-06-C",
    "L2CAP/CMC/BV-08-C",
    "L2CAP/CMC/BV-11-C",
    "L2CAP/CMC/BV-14-C",
    "L2CAP/CMC/BV-15-C",
];

const BR_ERET_EXT_WIN: &[&str] = &[
    "L2CAP/EWC/BV-01-C",
    "L2CAP/EWC/BV-03-C",
    "L2CAP/ECF/BV-01-C",
    "L2CAP/ECF/BV-02-C",
    "L2CAP/ECF/BV-03-C",
    "L2CAP/ECF/BV-04-C",
    "L2CAP/ECF/BV-05-C",
    "L2CAP/ECF/BV-06-C",
    "L2CAP/ECF/BV-07-C",
    "L2CAP/ECF/BV-08-C",
];

// === Command builders ===

fn scenario(name: &str, commands: Vec<Command>) -> ScenarioDefinition {
    ScenarioDefinition::new(name).commands(commands)
}

fn extend<const N: usize>(mut base: Vec<Command>, more: [Command; N]) -> Vec<Command> {
    base.extend(more);
    base
}

fn update_pixit(name: &str, value: &str) -> Command {
    Command::new(Action::UpdatePixit {
        name: name.to_string(),
        encoding: Encoding::Plain,
    })
    .arg(value)
}

fn update_pixit_hex(name: &str, value: u16) -> Command {
    Command::new(Action::UpdatePixit {
        name: name.to_string(),
        encoding: Encoding::Hex16,
    })
    .arg(i64::from(value))
}

fn init(psm: u16, mtu: u16) -> Command {
    Command::new(Action::L2capInit)
        .arg(i64::from(psm))
        .arg(i64::from(mtu))
}

fn listen(action: Action, psm: u16, mtu: u16) -> Command {
    Command::new(action).arg(i64::from(psm)).arg(i64::from(mtu))
}

fn set_psm(psm: u16) -> Command {
    Command::new(Action::L2capSetPsm).arg(i64::from(psm))
}

fn set_num_channels(num: u8) -> Command {
    Command::new(Action::L2capSetNumChannels).arg(i64::from(num))
}

fn set_hold_credits(hold: bool) -> Command {
    Command::new(Action::L2capSetHoldCredits).arg(hold)
}

// === Shared preconditions ===

/// Service registration and PIXIT updates every test case starts with
pub fn common(ctx: &CatalogContext) -> Vec<Command> {
    vec![
        Command::new(Action::RegisterService(Service::Gap)),
        Command::new(Action::RegisterService(Service::L2cap)),
        Command::new(Action::UpdatePixit {
            name: "TSPX_bd_addr_iut".to_string(),
            encoding: Encoding::Address,
        })
        .arg(StackRef::IutAddr),
        update_pixit_hex("TSPX_spsm", LE_PSM),
        update_pixit_hex("TSPX_psm_authentication_required", LE_PSM),
        update_pixit_hex("TSPX_psm_authorization_required", LE_PSM),
        update_pixit_hex("TSPX_psm_encryption_key_size_required", LE_PSM),
        update_pixit_hex("TSPX_psm_encryption_required", LE_PSM),
        update_pixit_hex("TSPX_psm_unsupported", PSM_UNSUPPORTED),
        update_pixit("TSPX_iut_supported_max_channels", "2"),
        update_pixit("TSPX_l2ca_num_concurrent_credit_based_connections", "2"),
        update_pixit_hex("TSPX_l2ca_cbmps_min", 64),
        update_pixit_hex("TSPX_l2ca_cbmps_max", 256),
        update_pixit_hex("TSPX_l2ca_cbmtu_min", 64),
        update_pixit_hex("TSPX_l2ca_cbmtu_max", 256),
        Command::new(Action::SetPtsAddress)
            .arg(ctx.pts_addr)
            .arg(AddrType::LePublic as i64),
    ]
}

/// LE preconditions without a listener
pub fn pre_conditions(ctx: &CatalogContext) -> Vec<Command> {
    extend(common(ctx), [init(LE_PSM, LE_INITIAL_MTU)])
}

/// LE preconditions plus a listener answering with `response`
pub fn le_listen(ctx: &CatalogContext, response: ConnectionResponse) -> Vec<Command> {
    extend(
        pre_conditions(ctx),
        [listen(Action::L2capLeListen(response), LE_PSM, LE_INITIAL_MTU)],
    )
}

fn br_pre_conditions(ctx: &CatalogContext) -> Vec<Command> {
    extend(
        common(ctx),
        [
            update_pixit_hex("TSPX_psm", BR_PSM),
            update_pixit("TSPX_delete_link_key", "FALSE"),
            update_pixit("TSPX_delete_ltk", "FALSE"),
            update_pixit("TSPX_iut_role_initiator", "False"),
            Command::new(Action::GapSetIoCap(IoCap::NoInputOutput)),
        ],
    )
}

fn br_l2cap(ctx: &CatalogContext) -> Vec<Command> {
    extend(br_pre_conditions(ctx), [init(BR_PSM, BR_INITIAL_MTU)])
}

fn br_listen(ctx: &CatalogContext) -> Vec<Command> {
    extend(
        br_l2cap(ctx),
        [listen(
            Action::L2capBrListen(ConnectionResponse::InsufficientEncryption),
            BR_PSM,
            BR_INITIAL_MTU,
        )],
    )
}

fn br_listen_v2(ctx: &CatalogContext, mode: u8, options: u32) -> Vec<Command> {
    let action = Action::L2capBrListenV2 {
        response: ConnectionResponse::InsufficientEncryption,
        mode,
        options,
    };
    extend(br_l2cap(ctx), [listen(action, BR_PSM, BR_INITIAL_MTU)])
}

// === WID handling ===

/// Prepare the IUT to be connectable
const WID_CONNECTABLE: u32 = 20001;

/// Queries asking to confirm a channel is open
const CHANNEL_CHECKS: &[u32] = &[41, 48, 55];

/// Queries confirming data or procedures the oracle observed itself
const ACKNOWLEDGE: &[u32] = &[22, 37, 39, 42, 43, 44, 46, 47, 51, 52, 56, 57, 58];

/// Last-resort answers for L2CAP queries
///
/// IUT actions a query asks for belong in gated commands; this only
/// confirms, checks the channel state, or fills in configured values.
pub fn wid_handler(event: &WidEvent, stack: &Stack) -> Result<Answer> {
    if style::is_edit(event.style) {
        return edit_answer(event, stack);
    }

    match event.wid {
        WID_CONNECTABLE => Ok(Answer::Confirm(true)),
        wid if CHANNEL_CHECKS.contains(&wid) => Ok(Answer::Confirm(!stack.channels().is_empty())),
        wid if ACKNOWLEDGE.contains(&wid) => Ok(Answer::Confirm(true)),
        _ if event.style == style::OK1 => Ok(Answer::Confirm(true)),
        wid => Err(Error::unresolved_wid(wid, "no L2CAP rule for this query")),
    }
}

fn edit_answer(event: &WidEvent, stack: &Stack) -> Result<Answer> {
    let text = event.description.to_uppercase();
    let value = if text.contains("PSM") {
        hex16(stack.psm())
    } else if text.contains("MTU") {
        stack.initial_mtu().to_string()
    } else if text.contains("CHANNELS") {
        stack.num_channels().to_string()
    } else if text.contains("ADDRESS") {
        stack.iut_addr().to_pixit()
    } else {
        return Err(Error::unresolved_wid(event.wid, "edit query asks for an unknown value"));
    };
    Ok(Answer::Text(value))
}
