//! Scenario commands and their execution
//!
//! A command is one action against the IUT, the oracle or the local stack.
//! Arguments are `Param`s resolved right before dispatch.

use std::fmt;
use std::time::Duration;

use crate::btp::types::{
    l2cap, AddrType, BdAddr, BtpCommand, BtpEvent, ConnectionResponse, Discoverable, EventFilter,
    IoCap, Service,
};
use crate::btp::{self, IutTransport};
use crate::common::{Error, Result};
use crate::oracle::Oracle;

use super::binder::{ArgKind, ArgValue, BoundText, Encoding, Param};
use super::stack::{Channel, ProfileInit, SharedStack};

/// What a command does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    // === IUT ===
    RegisterService(Service),
    UnregisterService(Service),
    /// Refresh the IUT address and settings in the stack
    GapReadControllerInfo,
    GapSetIoCap(IoCap),
    GapSetConnectable(bool),
    GapSetDiscoverable(Discoverable),
    GapAdvertise,
    /// args: peer address, address type
    GapConnect,
    /// args: peer address, address type
    GapDisconnect,
    /// args: peer address, address type
    GapPair,
    /// args: psm, mtu
    L2capLeListen(ConnectionResponse),
    /// args: psm, mtu
    L2capBrListen(ConnectionResponse),
    /// args: psm, mtu
    L2capBrListenV2 {
        response: ConnectionResponse,
        mode: u8,
        options: u32,
    },

    // === IUT events ===
    /// args: peer address, address type
    GapWaitConnected,
    /// args: peer address, address type
    GapWaitDisconnected,
    /// args: peer address, address type
    GapWaitPasskey,
    L2capWaitConnected,
    L2capWaitDisconnected,

    // === Oracle ===
    /// args: value
    UpdatePixit { name: String, encoding: Encoding },

    // === Stack ===
    /// args: device name
    GapInit,
    /// args: peer address, address type
    SetPtsAddress,
    /// args: psm, initial mtu
    L2capInit,
    /// args: psm
    L2capSetPsm,
    /// args: mtu
    L2capSetInitialMtu,
    /// args: channel count
    L2capSetNumChannels,
    /// args: flag
    L2capSetHoldCredits,
}

impl Action {
    /// Expected argument shapes, validated when the catalog is built
    pub fn arg_kinds(&self) -> &'static [ArgKind] {
        const ADDR: &[ArgKind] = &[ArgKind::Addr, ArgKind::Int];
        const PSM_MTU: &[ArgKind] = &[ArgKind::Int, ArgKind::Int];

        match self {
            Self::GapConnect
            | Self::GapDisconnect
            | Self::GapPair
            | Self::GapWaitConnected
            | Self::GapWaitDisconnected
            | Self::GapWaitPasskey
            | Self::SetPtsAddress => ADDR,
            Self::L2capLeListen(_)
            | Self::L2capBrListen(_)
            | Self::L2capBrListenV2 { .. }
            | Self::L2capInit => PSM_MTU,
            Self::UpdatePixit { .. } => &[ArgKind::Any],
            Self::GapInit => &[ArgKind::Text],
            Self::L2capSetPsm | Self::L2capSetInitialMtu | Self::L2capSetNumChannels => {
                &[ArgKind::Int]
            }
            Self::L2capSetHoldCredits => &[ArgKind::Bool],
            _ => &[],
        }
    }

    /// Whether running the action twice has the same effect as once
    ///
    /// Only idempotent actions are retried after a transport failure.
    pub fn is_idempotent(&self) -> bool {
        !matches!(
            self,
            Self::GapConnect
                | Self::GapDisconnect
                | Self::GapPair
                | Self::GapWaitConnected
                | Self::GapWaitDisconnected
                | Self::GapWaitPasskey
                | Self::L2capWaitConnected
                | Self::L2capWaitDisconnected
        )
    }

    pub fn name(&self) -> String {
        match self {
            Self::RegisterService(svc) => format!("core_reg_svc_{}", svc),
            Self::UnregisterService(svc) => format!("core_unreg_svc_{}", svc),
            Self::GapReadControllerInfo => "gap_read_ctrl_info".into(),
            Self::GapSetIoCap(_) => "gap_set_io_cap".into(),
            Self::GapSetConnectable(true) => "gap_set_conn".into(),
            Self::GapSetConnectable(false) => "gap_set_nonconn".into(),
            Self::GapSetDiscoverable(Discoverable::Off) => "gap_set_nondiscov".into(),
            Self::GapSetDiscoverable(Discoverable::General) => "gap_set_gendiscov".into(),
            Self::GapSetDiscoverable(Discoverable::Limited) => "gap_set_limdiscov".into(),
            Self::GapAdvertise => "gap_adv_ind_on".into(),
            Self::GapConnect => "gap_conn".into(),
            Self::GapDisconnect => "gap_disconn".into(),
            Self::GapPair => "gap_pair".into(),
            Self::L2capLeListen(_) => "l2cap_le_listen".into(),
            Self::L2capBrListen(_) => "l2cap_br_listen".into(),
            Self::L2capBrListenV2 { .. } => "l2cap_br_listen_v2".into(),
            Self::GapWaitConnected => "gap_connected_ev".into(),
            Self::GapWaitDisconnected => "gap_disconnected_ev".into(),
            Self::GapWaitPasskey => "gap_passkey_disp_ev".into(),
            Self::L2capWaitConnected => "l2cap_connected_ev".into(),
            Self::L2capWaitDisconnected => "l2cap_disconnected_ev".into(),
            Self::UpdatePixit { name, .. } => format!("update_pixit({})", name),
            Self::GapInit => "gap_init".into(),
            Self::SetPtsAddress => "set_pts_addr".into(),
            Self::L2capInit => "l2cap_init".into(),
            Self::L2capSetPsm => "l2cap_psm_set".into(),
            Self::L2capSetInitialMtu => "l2cap_initial_mtu_set".into(),
            Self::L2capSetNumChannels => "l2cap_num_channels_set".into(),
            Self::L2capSetHoldCredits => "l2cap_hold_credits_set".into(),
        }
    }
}

/// Gate that holds a command back until the oracle raises a WID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidTrigger {
    pub wid: u32,
    /// When set, only a WID raised with this MMI style opens the gate
    pub style: Option<u32>,
}

impl WidTrigger {
    pub fn matches(&self, wid: u32, style: u32) -> bool {
        self.wid == wid && self.style.map_or(true, |s| s == style)
    }
}

/// One step of a scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// 1-based position in the scenario, assigned when the scenario is built
    pub ordinal: usize,
    pub action: Action,
    pub args: Vec<Param>,
    pub start_wid: Option<WidTrigger>,
    pub cleanup: bool,
}

impl Command {
    pub fn new(action: Action) -> Self {
        Self {
            ordinal: 0,
            action,
            args: Vec::new(),
            start_wid: None,
            cleanup: false,
        }
    }

    pub fn arg(mut self, param: impl Into<Param>) -> Self {
        self.args.push(param.into());
        self
    }

    pub fn start_wid(mut self, wid: u32) -> Self {
        self.start_wid = Some(WidTrigger { wid, style: None });
        self
    }

    pub fn start_wid_styled(mut self, wid: u32, style: u32) -> Self {
        self.start_wid = Some(WidTrigger {
            wid,
            style: Some(style),
        });
        self
    }

    pub fn cleanup(mut self) -> Self {
        self.cleanup = true;
        self
    }

    /// Check arity and argument shapes
    pub fn validate(&self) -> std::result::Result<(), String> {
        let kinds = self.action.arg_kinds();
        if kinds.len() != self.args.len() {
            return Err(format!(
                "command {} ({}) takes {} argument(s), got {}",
                self.ordinal,
                self.action.name(),
                kinds.len(),
                self.args.len()
            ));
        }

        for (i, (kind, param)) in kinds.iter().zip(&self.args).enumerate() {
            let got = param.kind();
            let ok = match kind {
                ArgKind::Any => true,
                ArgKind::Int => matches!(got, ArgKind::Int | ArgKind::Bool),
                ArgKind::Bool => matches!(got, ArgKind::Bool | ArgKind::Int),
                other => *other == got,
            };
            if !ok {
                return Err(format!(
                    "command {} ({}) argument {} is {:?}, expected {:?}",
                    self.ordinal,
                    self.action.name(),
                    i + 1,
                    got,
                    kind
                ));
            }
        }

        if let Action::UpdatePixit { name, encoding } = &self.action {
            if let Some(param) = self.args.first() {
                BoundText::new(param.clone(), *encoding)
                    .check()
                    .map_err(|reason| {
                        format!("command {} updates {}: {}", self.ordinal, name, reason)
                    })?;
            }
        }

        if self.cleanup && self.start_wid.is_some() {
            return Err(format!(
                "cleanup command {} ({}) cannot wait for a WID",
                self.ordinal,
                self.action.name()
            ));
        }

        if self.start_wid.is_some_and(|t| t.wid == 0) {
            return Err(format!(
                "command {} ({}) is gated on WID 0",
                self.ordinal,
                self.action.name()
            ));
        }

        Ok(())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}) {}", self.ordinal, self.action.name())?;
        if !self.args.is_empty() {
            let args: Vec<String> = self.args.iter().map(ToString::to_string).collect();
            write!(f, "({})", args.join(", "))?;
        }
        if let Some(trigger) = &self.start_wid {
            write!(f, " [start_wid={}]", trigger.wid)?;
        }
        if self.cleanup {
            write!(f, " [cleanup]")?;
        }
        Ok(())
    }
}

/// Collaborators a command executes against
pub struct ExecContext<'a> {
    pub profile: &'a str,
    pub iut: &'a dyn IutTransport,
    pub oracle: &'a dyn Oracle,
    pub stack: &'a SharedStack,
    /// Bound on one IUT command or one awaited IUT event
    pub command_timeout: Duration,
}

/// Resolved arguments of one command
struct Args<'c> {
    command: &'c Command,
    values: Vec<ArgValue>,
}

impl Args<'_> {
    fn bad(&self, i: usize, what: &str) -> Error {
        Error::UnboundParameter {
            param: format!("{} argument {}", self.command.action.name(), i + 1),
            reason: format!("expected {}", what),
        }
    }

    fn value(&self, i: usize) -> Result<&ArgValue> {
        self.values.get(i).ok_or_else(|| self.bad(i, "a value"))
    }

    fn int<T: TryFrom<i64>>(&self, i: usize) -> Result<T> {
        self.value(i)?
            .as_int()
            .and_then(|v| T::try_from(v).ok())
            .ok_or_else(|| self.bad(i, "an integer in range"))
    }

    fn bool(&self, i: usize) -> Result<bool> {
        self.value(i)?
            .as_bool()
            .ok_or_else(|| self.bad(i, "a boolean"))
    }

    fn text(&self, i: usize) -> Result<String> {
        match self.value(i)? {
            ArgValue::Text(s) => Ok(s.clone()),
            _ => Err(self.bad(i, "text")),
        }
    }

    fn addr(&self, i: usize) -> Result<(BdAddr, AddrType)> {
        let addr = self.value(i)?.as_addr().ok_or_else(|| self.bad(i, "an address"))?;
        let addr_type = AddrType::from_id(self.int::<u8>(i + 1)?);
        Ok((addr, addr_type))
    }
}

/// Resolve every argument against the current stack
pub fn bind_args(command: &Command, stack: &SharedStack) -> Result<Vec<ArgValue>> {
    let stack = stack.read();
    command.args.iter().map(|p| p.resolve(&stack)).collect()
}

/// Execute one command once with already bound arguments
pub async fn execute(ctx: &ExecContext<'_>, command: &Command, values: Vec<ArgValue>) -> Result<()> {
    let args = Args { command, values };
    let timeout = ctx.command_timeout;

    match &command.action {
        Action::RegisterService(svc) => {
            ctx.iut
                .command(&BtpCommand::RegisterService(*svc), timeout)
                .await?;
        }
        Action::UnregisterService(svc) => {
            ctx.iut
                .command(&BtpCommand::UnregisterService(*svc), timeout)
                .await?;
        }
        Action::GapReadControllerInfo => {
            let info = btp::read_controller_info(ctx.iut, timeout).await?;
            let mut stack = ctx.stack.write();
            let addr_type = stack.iut_addr_type();
            stack.set_iut_addr(info.address, addr_type);
            stack.set_settings(info.current_settings);
        }
        Action::GapSetIoCap(cap) => {
            ctx.iut.command(&BtpCommand::GapSetIoCap(*cap), timeout).await?;
        }
        Action::GapSetConnectable(on) => {
            let data = ctx
                .iut
                .command(&BtpCommand::GapSetConnectable(*on), timeout)
                .await?;
            record_settings(ctx, &data);
        }
        Action::GapSetDiscoverable(mode) => {
            let data = ctx
                .iut
                .command(&BtpCommand::GapSetDiscoverable(*mode), timeout)
                .await?;
            record_settings(ctx, &data);
        }
        Action::GapAdvertise => {
            let data = ctx
                .iut
                .command(&BtpCommand::GapStartAdvertising, timeout)
                .await?;
            record_settings(ctx, &data);
        }
        Action::GapConnect => {
            let (addr, addr_type) = args.addr(0)?;
            ctx.iut
                .command(&BtpCommand::GapConnect { addr, addr_type }, timeout)
                .await?;
        }
        Action::GapDisconnect => {
            let (addr, addr_type) = args.addr(0)?;
            ctx.iut
                .command(&BtpCommand::GapDisconnect { addr, addr_type }, timeout)
                .await?;
        }
        Action::GapPair => {
            let (addr, addr_type) = args.addr(0)?;
            ctx.iut
                .command(&BtpCommand::GapPair { addr, addr_type }, timeout)
                .await?;
        }
        Action::L2capLeListen(response) => {
            let command = BtpCommand::L2capListen {
                psm: args.int(0)?,
                transport: l2cap::TRANSPORT_LE,
                mtu: args.int(1)?,
                response: *response,
            };
            ctx.iut.command(&command, timeout).await?;
        }
        Action::L2capBrListen(response) => {
            let command = BtpCommand::L2capListen {
                psm: args.int(0)?,
                transport: l2cap::TRANSPORT_BREDR,
                mtu: args.int(1)?,
                response: *response,
            };
            ctx.iut.command(&command, timeout).await?;
        }
        Action::L2capBrListenV2 {
            response,
            mode,
            options,
        } => {
            let command = BtpCommand::L2capListenV2 {
                psm: args.int(0)?,
                transport: l2cap::TRANSPORT_BREDR,
                mtu: args.int(1)?,
                response: *response,
                mode: *mode,
                options: *options,
            };
            ctx.iut.command(&command, timeout).await?;
        }
        Action::GapWaitConnected => {
            let (addr, _) = args.addr(0)?;
            ctx.iut
                .wait_event(EventFilter::Connected(Some(addr)), timeout)
                .await?;
            ctx.stack.write().connected(addr);
        }
        Action::GapWaitDisconnected => {
            let (addr, _) = args.addr(0)?;
            ctx.iut
                .wait_event(EventFilter::Disconnected(Some(addr)), timeout)
                .await?;
            ctx.stack.write().disconnected(&addr);
        }
        Action::GapWaitPasskey => {
            let (addr, _) = args.addr(0)?;
            let event = ctx
                .iut
                .wait_event(EventFilter::PasskeyDisplay(Some(addr)), timeout)
                .await?;
            if let BtpEvent::GapPasskeyDisplay { passkey, .. } = event {
                tracing::info!(passkey, "IUT displayed passkey");
                ctx.stack.write().set_passkey(passkey);
            }
        }
        Action::L2capWaitConnected => {
            let event = ctx
                .iut
                .wait_event(EventFilter::L2capConnected, timeout)
                .await?;
            if let BtpEvent::L2capConnected { chan_id, psm } = event {
                ctx.stack
                    .write()
                    .channel_connected(Channel { id: chan_id, psm });
            }
        }
        Action::L2capWaitDisconnected => {
            let event = ctx
                .iut
                .wait_event(EventFilter::L2capDisconnected, timeout)
                .await?;
            if let BtpEvent::L2capDisconnected { chan_id, .. } = event {
                ctx.stack.write().channel_disconnected(chan_id);
            }
        }
        Action::UpdatePixit { name, encoding } => {
            let value = encoding.render(args.value(0)?)?;
            tracing::debug!(profile = ctx.profile, pixit = %name, value = %value, "Updating PIXIT");
            ctx.oracle.set_pixit(ctx.profile, name, &value).await?;
        }
        Action::GapInit => {
            let device_name = args.text(0)?;
            ctx.stack.write().init(ProfileInit::Gap { device_name });
        }
        Action::SetPtsAddress => {
            let (addr, addr_type) = args.addr(0)?;
            ctx.stack.write().set_pts_addr(addr, addr_type);
        }
        Action::L2capInit => {
            let init = ProfileInit::L2cap {
                psm: args.int(0)?,
                initial_mtu: args.int(1)?,
            };
            ctx.stack.write().init(init);
        }
        Action::L2capSetPsm => {
            let psm = args.int(0)?;
            ctx.stack.write().set_psm(psm);
        }
        Action::L2capSetInitialMtu => {
            let mtu = args.int(0)?;
            ctx.stack.write().set_initial_mtu(mtu);
        }
        Action::L2capSetNumChannels => {
            let num = args.int(0)?;
            ctx.stack.write().set_num_channels(num);
        }
        Action::L2capSetHoldCredits => {
            let hold = args.bool(0)?;
            ctx.stack.write().set_hold_credits(hold);
        }
    }

    Ok(())
}

/// GAP setting commands answer with the new current settings
fn record_settings(ctx: &ExecContext<'_>, data: &[u8]) {
    if let Some(bytes) = data.get(..4).and_then(|b| <[u8; 4]>::try_from(b).ok()) {
        ctx.stack.write().set_settings(u32::from_le_bytes(bytes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::binder::StackRef;

    #[test]
    fn test_validate_arity() {
        let mut cmd = Command::new(Action::L2capInit).arg(128i64);
        cmd.ordinal = 3;
        let err = cmd.validate().unwrap_err();
        assert!(err.contains("takes 2 argument(s), got 1"), "{}", err);

        assert!(Command::new(Action::L2capInit)
            .arg(128i64)
            .arg(120i64)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validate_kinds_accepts_matching_stack_refs() {
        let ok = Command::new(Action::GapConnect)
            .arg(StackRef::PtsAddr)
            .arg(StackRef::PtsAddrType);
        assert!(ok.validate().is_ok());

        let bad = Command::new(Action::GapConnect)
            .arg(StackRef::L2capPsm)
            .arg(0i64);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_cleanup_cannot_be_gated() {
        let cmd = Command::new(Action::GapAdvertise).start_wid(47).cleanup();
        assert!(cmd.validate().unwrap_err().contains("cannot wait"));
        assert!(Command::new(Action::GapAdvertise)
            .start_wid(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_event_waits_are_not_retried() {
        assert!(Action::RegisterService(Service::Gap).is_idempotent());
        assert!(Action::L2capLeListen(ConnectionResponse::Success).is_idempotent());
        assert!(!Action::GapConnect.is_idempotent());
        assert!(!Action::GapWaitConnected.is_idempotent());
    }

    #[test]
    fn test_trigger_style_matching() {
        let any = WidTrigger {
            wid: 78,
            style: None,
        };
        let styled = WidTrigger {
            wid: 78,
            style: Some(0x11141),
        };
        assert!(any.matches(78, 0x11041));
        assert!(!styled.matches(78, 0x11041));
        assert!(styled.matches(78, 0x11141));
        assert!(!any.matches(77, 0x11041));
    }
}
