//! Per-session record of IUT protocol configuration
//!
//! The stack is created once the IUT identified itself and is shared between
//! the sequencer (which mutates it while executing commands) and deferred
//! parameters and WID handlers (which only read it).

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::btp::types::{AddrType, BdAddr, ControllerInfo};

/// Default number of credit based channels opened per request
pub const DEFAULT_NUM_CHANNELS: u8 = 2;

/// IUT identity learned from the handshake, kept across resets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub address: BdAddr,
    pub addr_type: AddrType,
    pub name: String,
    pub settings: u32,
}

impl From<&ControllerInfo> for Identity {
    fn from(info: &ControllerInfo) -> Self {
        Self {
            address: info.address,
            addr_type: AddrType::LePublic,
            name: info.name.clone(),
            settings: info.current_settings,
        }
    }
}

/// GAP sub-state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GapState {
    pub device_name: String,
    pub settings: u32,
    pub pts_addr: Option<(BdAddr, AddrType)>,
    pub passkey: Option<u32>,
    pub connected: Vec<BdAddr>,
}

/// An open L2CAP channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub id: u8,
    pub psm: u16,
}

/// L2CAP sub-state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L2capState {
    pub psm: u16,
    pub initial_mtu: u16,
    pub num_channels: u8,
    pub hold_credits: bool,
    pub channels: Vec<Channel>,
}

impl L2capState {
    pub fn new(psm: u16, initial_mtu: u16) -> Self {
        Self {
            psm,
            initial_mtu,
            num_channels: DEFAULT_NUM_CHANNELS,
            hold_credits: false,
            channels: Vec::new(),
        }
    }
}

impl Default for L2capState {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// Arguments for (re)initializing one profile's sub-state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileInit {
    Gap { device_name: String },
    L2cap { psm: u16, initial_mtu: u16 },
}

/// Mutable registry of profile sub-states
///
/// `init` replaces a sub-state wholesale. Accessors never fail: an
/// uninitialized profile reads as its default.
#[derive(Debug, Clone)]
pub struct Stack {
    identity: Identity,
    gap: Option<GapState>,
    l2cap: Option<L2capState>,
}

impl Stack {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            gap: None,
            l2cap: None,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Replace the sub-state for one profile
    pub fn init(&mut self, init: ProfileInit) {
        match init {
            ProfileInit::Gap { device_name } => {
                self.gap = Some(GapState {
                    device_name,
                    settings: self.identity.settings,
                    ..GapState::default()
                });
            }
            ProfileInit::L2cap { psm, initial_mtu } => {
                self.l2cap = Some(L2capState::new(psm, initial_mtu));
            }
        }
    }

    /// Drop all profile sub-states, keeping the handshake identity
    pub fn reset(&mut self) {
        self.gap = None;
        self.l2cap = None;
    }

    pub fn is_initialized(&self, profile: &str) -> bool {
        match profile {
            "GAP" => self.gap.is_some(),
            "L2CAP" => self.l2cap.is_some(),
            _ => false,
        }
    }

    fn gap_mut(&mut self) -> &mut GapState {
        let settings = self.identity.settings;
        self.gap.get_or_insert_with(|| GapState {
            settings,
            ..GapState::default()
        })
    }

    fn l2cap_mut(&mut self) -> &mut L2capState {
        self.l2cap.get_or_insert_with(L2capState::default)
    }

    // === GAP ===

    pub fn iut_addr(&self) -> BdAddr {
        self.identity.address
    }

    pub fn iut_addr_type(&self) -> AddrType {
        self.identity.addr_type
    }

    pub fn device_name(&self) -> &str {
        self.gap
            .as_ref()
            .map(|g| g.device_name.as_str())
            .filter(|n| !n.is_empty())
            .unwrap_or(self.identity.name.as_str())
    }

    pub fn settings(&self) -> u32 {
        self.gap
            .as_ref()
            .map_or(self.identity.settings, |g| g.settings)
    }

    pub fn pts_addr(&self) -> Option<(BdAddr, AddrType)> {
        self.gap.as_ref().and_then(|g| g.pts_addr)
    }

    pub fn passkey(&self) -> Option<u32> {
        self.gap.as_ref().and_then(|g| g.passkey)
    }

    pub fn is_connected(&self, addr: &BdAddr) -> bool {
        self.gap
            .as_ref()
            .is_some_and(|g| g.connected.contains(addr))
    }

    /// Record the address the IUT reports now; survives `reset`
    pub fn set_iut_addr(&mut self, addr: BdAddr, addr_type: AddrType) {
        self.identity.address = addr;
        self.identity.addr_type = addr_type;
    }

    pub fn set_settings(&mut self, settings: u32) {
        self.gap_mut().settings = settings;
    }

    pub fn set_pts_addr(&mut self, addr: BdAddr, addr_type: AddrType) {
        self.gap_mut().pts_addr = Some((addr, addr_type));
    }

    pub fn set_passkey(&mut self, passkey: u32) {
        self.gap_mut().passkey = Some(passkey);
    }

    pub fn connected(&mut self, addr: BdAddr) {
        let gap = self.gap_mut();
        if !gap.connected.contains(&addr) {
            gap.connected.push(addr);
        }
    }

    pub fn disconnected(&mut self, addr: &BdAddr) {
        if let Some(gap) = self.gap.as_mut() {
            gap.connected.retain(|a| a != addr);
        }
    }

    // === L2CAP ===

    pub fn psm(&self) -> u16 {
        self.l2cap.as_ref().map_or(0, |l| l.psm)
    }

    pub fn initial_mtu(&self) -> u16 {
        self.l2cap.as_ref().map_or(0, |l| l.initial_mtu)
    }

    pub fn num_channels(&self) -> u8 {
        self.l2cap
            .as_ref()
            .map_or(DEFAULT_NUM_CHANNELS, |l| l.num_channels)
    }

    pub fn hold_credits(&self) -> bool {
        self.l2cap.as_ref().is_some_and(|l| l.hold_credits)
    }

    pub fn channels(&self) -> &[Channel] {
        match &self.l2cap {
            Some(l2cap) => &l2cap.channels,
            None => &[],
        }
    }

    pub fn set_psm(&mut self, psm: u16) {
        self.l2cap_mut().psm = psm;
    }

    pub fn set_initial_mtu(&mut self, mtu: u16) {
        self.l2cap_mut().initial_mtu = mtu;
    }

    pub fn set_num_channels(&mut self, num: u8) {
        self.l2cap_mut().num_channels = num;
    }

    pub fn set_hold_credits(&mut self, hold: bool) {
        self.l2cap_mut().hold_credits = hold;
    }

    pub fn channel_connected(&mut self, channel: Channel) {
        let l2cap = self.l2cap_mut();
        l2cap.channels.retain(|c| c.id != channel.id);
        l2cap.channels.push(channel);
    }

    pub fn channel_disconnected(&mut self, id: u8) {
        if let Some(l2cap) = self.l2cap.as_mut() {
            l2cap.channels.retain(|c| c.id != id);
        }
    }
}

/// Shared handle to the session stack
///
/// Lock poisoning is ignored: every mutation is a single field store, so a
/// panicking writer cannot leave the stack half-updated.
#[derive(Debug, Clone)]
pub struct SharedStack(Arc<RwLock<Stack>>);

impl SharedStack {
    pub fn new(stack: Stack) -> Self {
        Self(Arc::new(RwLock::new(stack)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Stack> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Stack> {
        self.0.write().unwrap_or_else(|e| e.into_inner())
    }
}
