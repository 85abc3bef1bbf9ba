//! BTP message types
//!
//! Service and opcode constants follow the Bluetooth Tester Protocol used by
//! the IUT tester applications. Commands are typed here and encoded to their
//! wire payload in one place so the engine never handles raw bytes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::Error;

/// Controller index used for all commands (single-controller IUTs)
pub const CONTROLLER_INDEX: u8 = 0x00;
/// Index used for service-level commands that do not target a controller
pub const INDEX_NONE: u8 = 0xff;

/// Error response opcode, payload is one status byte
pub const OP_ERROR: u8 = 0x00;
/// First opcode reserved for unsolicited events
pub const EVENT_OPCODE_BASE: u8 = 0x80;

pub mod core {
    pub const REGISTER_SERVICE: u8 = 0x03;
    pub const UNREGISTER_SERVICE: u8 = 0x04;
    pub const EV_IUT_READY: u8 = 0x80;
}

pub mod gap {
    pub const READ_CONTROLLER_INFO: u8 = 0x03;
    pub const SET_CONNECTABLE: u8 = 0x06;
    pub const SET_DISCOVERABLE: u8 = 0x08;
    pub const START_ADVERTISING: u8 = 0x0a;
    pub const CONNECT: u8 = 0x0e;
    pub const DISCONNECT: u8 = 0x0f;
    pub const SET_IO_CAP: u8 = 0x10;
    pub const PAIR: u8 = 0x11;

    pub const EV_NEW_SETTINGS: u8 = 0x80;
    pub const EV_DEVICE_CONNECTED: u8 = 0x82;
    pub const EV_DEVICE_DISCONNECTED: u8 = 0x83;
    pub const EV_PASSKEY_DISPLAY: u8 = 0x84;
}

pub mod l2cap {
    pub const LISTEN: u8 = 0x05;
    pub const LISTEN_V2: u8 = 0x0b;

    pub const EV_CONNECTED: u8 = 0x81;
    pub const EV_DISCONNECTED: u8 = 0x82;

    pub const TRANSPORT_BREDR: u8 = 0x00;
    pub const TRANSPORT_LE: u8 = 0x01;

    pub const LISTEN_V2_MODE_BASIC: u8 = 0x00;
    pub const LISTEN_V2_MODE_RET: u8 = 0x01;
    pub const LISTEN_V2_MODE_FC: u8 = 0x02;
    pub const LISTEN_V2_MODE_ERET: u8 = 0x03;
    pub const LISTEN_V2_MODE_STREAM: u8 = 0x04;

    pub const LISTEN_V2_OPT_NONE: u32 = 0;
    pub const LISTEN_V2_OPT_MODE_OPTIONAL: u32 = 1 << 0;
    pub const LISTEN_V2_OPT_NO_FCS: u32 = 1 << 1;
    pub const LISTEN_V2_OPT_EXT_WIN_SIZE: u32 = 1 << 2;
    pub const LISTEN_V2_OPT_HOLD_CREDIT: u32 = 1 << 3;
}

/// BTP services the engine registers on the IUT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Service {
    Core = 0,
    Gap = 1,
    Gatt = 2,
    L2cap = 3,
}

impl Service {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Core),
            1 => Some(Self::Gap),
            2 => Some(Self::Gatt),
            3 => Some(Self::L2cap),
            _ => None,
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core => write!(f, "core"),
            Self::Gap => write!(f, "gap"),
            Self::Gatt => write!(f, "gatt"),
            Self::L2cap => write!(f, "l2cap"),
        }
    }
}

/// Bluetooth device address, stored most significant byte first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BdAddr(pub [u8; 6]);

impl BdAddr {
    /// Decode from BTP wire order (little endian)
    pub fn from_wire(bytes: &[u8]) -> Option<Self> {
        let slice: [u8; 6] = bytes.get(..6)?.try_into().ok()?;
        let mut addr = slice;
        addr.reverse();
        Some(Self(addr))
    }

    /// Encode to BTP wire order (little endian)
    pub fn to_wire(self) -> [u8; 6] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }

    /// Twelve uppercase hex digits without separators, as PIXITs expect
    pub fn to_pixit(self) -> String {
        self.0.iter().map(|b| format!("{:02X}", b)).collect()
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", a, b, c, d, e, g)
    }
}

impl FromStr for BdAddr {
    type Err = Error;

    /// Accepts `AA:BB:CC:DD:EE:FF` or `AABBCCDDEEFF`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| *c != ':').collect();
        if hex.len() != 12 {
            return Err(Error::Config(format!("Invalid Bluetooth address '{}'", s)));
        }
        let mut addr = [0u8; 6];
        for (i, byte) in addr.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| Error::Config(format!("Invalid Bluetooth address '{}'", s)))?;
        }
        Ok(Self(addr))
    }
}

/// Address type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum AddrType {
    #[default]
    LePublic = 0,
    LeRandom = 1,
}

impl AddrType {
    pub fn from_id(id: u8) -> Self {
        if id == 1 {
            Self::LeRandom
        } else {
            Self::LePublic
        }
    }
}

/// IO capability advertised during pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum IoCap {
    DisplayOnly = 0,
    DisplayYesNo = 1,
    KeyboardOnly = 2,
    NoInputOutput = 3,
    KeyboardDisplay = 4,
}

/// Discoverable mode for GAP set discoverable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Discoverable {
    Off = 0,
    General = 1,
    Limited = 2,
}

/// Response an L2CAP listener gives to incoming connection requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ConnectionResponse {
    Success = 0x0000,
    InsufficientAuthentication = 0x0001,
    InsufficientAuthorization = 0x0002,
    InsufficientEncryptionKeySize = 0x0003,
    InsufficientEncryption = 0x0004,
}

/// A typed BTP command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BtpCommand {
    RegisterService(Service),
    UnregisterService(Service),
    GapReadControllerInfo,
    GapSetIoCap(IoCap),
    GapSetConnectable(bool),
    GapSetDiscoverable(Discoverable),
    GapStartAdvertising,
    GapConnect { addr: BdAddr, addr_type: AddrType },
    GapDisconnect { addr: BdAddr, addr_type: AddrType },
    GapPair { addr: BdAddr, addr_type: AddrType },
    L2capListen {
        psm: u16,
        transport: u8,
        mtu: u16,
        response: ConnectionResponse,
    },
    L2capListenV2 {
        psm: u16,
        transport: u8,
        mtu: u16,
        response: ConnectionResponse,
        mode: u8,
        options: u32,
    },
}

impl BtpCommand {
    /// Short name used in logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterService(_) => "core_reg_svc",
            Self::UnregisterService(_) => "core_unreg_svc",
            Self::GapReadControllerInfo => "gap_read_ctrl_info",
            Self::GapSetIoCap(_) => "gap_set_io_cap",
            Self::GapSetConnectable(true) => "gap_set_conn",
            Self::GapSetConnectable(false) => "gap_set_nonconn",
            Self::GapSetDiscoverable(_) => "gap_set_discov",
            Self::GapStartAdvertising => "gap_adv_ind_on",
            Self::GapConnect { .. } => "gap_conn",
            Self::GapDisconnect { .. } => "gap_disconn",
            Self::GapPair { .. } => "gap_pair",
            Self::L2capListen { .. } => "l2cap_listen",
            Self::L2capListenV2 { .. } => "l2cap_listen_v2",
        }
    }

    /// Encode to `(service, opcode, controller index, payload)`
    pub fn encode(&self) -> (u8, u8, u8, Vec<u8>) {
        match self {
            Self::RegisterService(svc) => (
                Service::Core as u8,
                core::REGISTER_SERVICE,
                INDEX_NONE,
                vec![*svc as u8],
            ),
            Self::UnregisterService(svc) => (
                Service::Core as u8,
                core::UNREGISTER_SERVICE,
                INDEX_NONE,
                vec![*svc as u8],
            ),
            Self::GapReadControllerInfo => (
                Service::Gap as u8,
                gap::READ_CONTROLLER_INFO,
                CONTROLLER_INDEX,
                Vec::new(),
            ),
            Self::GapSetIoCap(cap) => (
                Service::Gap as u8,
                gap::SET_IO_CAP,
                CONTROLLER_INDEX,
                vec![*cap as u8],
            ),
            Self::GapSetConnectable(on) => (
                Service::Gap as u8,
                gap::SET_CONNECTABLE,
                CONTROLLER_INDEX,
                vec![u8::from(*on)],
            ),
            Self::GapSetDiscoverable(mode) => (
                Service::Gap as u8,
                gap::SET_DISCOVERABLE,
                CONTROLLER_INDEX,
                vec![*mode as u8],
            ),
            // No advertising or scan response data
            Self::GapStartAdvertising => (
                Service::Gap as u8,
                gap::START_ADVERTISING,
                CONTROLLER_INDEX,
                vec![0, 0],
            ),
            Self::GapConnect { addr, addr_type } => (
                Service::Gap as u8,
                gap::CONNECT,
                CONTROLLER_INDEX,
                addr_payload(*addr, *addr_type),
            ),
            Self::GapDisconnect { addr, addr_type } => (
                Service::Gap as u8,
                gap::DISCONNECT,
                CONTROLLER_INDEX,
                addr_payload(*addr, *addr_type),
            ),
            Self::GapPair { addr, addr_type } => (
                Service::Gap as u8,
                gap::PAIR,
                CONTROLLER_INDEX,
                addr_payload(*addr, *addr_type),
            ),
            Self::L2capListen {
                psm,
                transport,
                mtu,
                response,
            } => {
                let mut data = Vec::with_capacity(7);
                data.extend_from_slice(&psm.to_le_bytes());
                data.push(*transport);
                data.extend_from_slice(&mtu.to_le_bytes());
                data.extend_from_slice(&(*response as u16).to_le_bytes());
                (Service::L2cap as u8, l2cap::LISTEN, CONTROLLER_INDEX, data)
            }
            Self::L2capListenV2 {
                psm,
                transport,
                mtu,
                response,
                mode,
                options,
            } => {
                let mut data = Vec::with_capacity(12);
                data.extend_from_slice(&psm.to_le_bytes());
                data.push(*transport);
                data.extend_from_slice(&mtu.to_le_bytes());
                data.extend_from_slice(&(*response as u16).to_le_bytes());
                data.push(*mode);
                data.extend_from_slice(&options.to_le_bytes());
                (Service::L2cap as u8, l2cap::LISTEN_V2, CONTROLLER_INDEX, data)
            }
        }
    }
}

fn addr_payload(addr: BdAddr, addr_type: AddrType) -> Vec<u8> {
    let mut data = Vec::with_capacity(7);
    data.push(addr_type as u8);
    data.extend_from_slice(&addr.to_wire());
    data
}

/// Decoded unsolicited BTP event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BtpEvent {
    IutReady,
    GapNewSettings(u32),
    GapDeviceConnected { addr: BdAddr, addr_type: AddrType },
    GapDeviceDisconnected { addr: BdAddr, addr_type: AddrType },
    GapPasskeyDisplay {
        addr: BdAddr,
        addr_type: AddrType,
        passkey: u32,
    },
    L2capConnected { chan_id: u8, psm: u16 },
    L2capDisconnected { chan_id: u8, result: u16 },
    Other { service: u8, opcode: u8, data: Vec<u8> },
}

impl BtpEvent {
    /// Decode an event frame, falling back to `Other` for anything unknown or short
    pub fn decode(service: u8, opcode: u8, data: &[u8]) -> Self {
        let other = || Self::Other {
            service,
            opcode,
            data: data.to_vec(),
        };

        match (Service::from_id(service), opcode) {
            (Some(Service::Core), core::EV_IUT_READY) => Self::IutReady,
            (Some(Service::Gap), gap::EV_NEW_SETTINGS) => data
                .get(..4)
                .and_then(|b| b.try_into().ok())
                .map(|b| Self::GapNewSettings(u32::from_le_bytes(b)))
                .unwrap_or_else(other),
            (Some(Service::Gap), gap::EV_DEVICE_CONNECTED) => decode_addr(data)
                .map(|(addr_type, addr)| Self::GapDeviceConnected { addr, addr_type })
                .unwrap_or_else(other),
            (Some(Service::Gap), gap::EV_DEVICE_DISCONNECTED) => decode_addr(data)
                .map(|(addr_type, addr)| Self::GapDeviceDisconnected { addr, addr_type })
                .unwrap_or_else(other),
            (Some(Service::Gap), gap::EV_PASSKEY_DISPLAY) => {
                let passkey = data
                    .get(7..11)
                    .and_then(|b| b.try_into().ok())
                    .map(u32::from_le_bytes);
                match (decode_addr(data), passkey) {
                    (Some((addr_type, addr)), Some(passkey)) => Self::GapPasskeyDisplay {
                        addr,
                        addr_type,
                        passkey,
                    },
                    _ => other(),
                }
            }
            (Some(Service::L2cap), l2cap::EV_CONNECTED) => match (data.first(), data.get(1..3)) {
                (Some(chan_id), Some(psm)) => Self::L2capConnected {
                    chan_id: *chan_id,
                    psm: u16::from_le_bytes([psm[0], psm[1]]),
                },
                _ => other(),
            },
            (Some(Service::L2cap), l2cap::EV_DISCONNECTED) => {
                match (data.get(..2), data.get(2)) {
                    (Some(result), Some(chan_id)) => Self::L2capDisconnected {
                        chan_id: *chan_id,
                        result: u16::from_le_bytes([result[0], result[1]]),
                    },
                    _ => other(),
                }
            }
            _ => other(),
        }
    }
}

fn decode_addr(data: &[u8]) -> Option<(AddrType, BdAddr)> {
    let addr_type = AddrType::from_id(*data.first()?);
    let addr = BdAddr::from_wire(data.get(1..7)?)?;
    Some((addr_type, addr))
}

/// Which IUT event a command is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    IutReady,
    Connected(Option<BdAddr>),
    Disconnected(Option<BdAddr>),
    PasskeyDisplay(Option<BdAddr>),
    L2capConnected,
    L2capDisconnected,
}

impl EventFilter {
    pub fn matches(&self, event: &BtpEvent) -> bool {
        let addr_ok = |want: &Option<BdAddr>, got: &BdAddr| want.map_or(true, |w| w == *got);
        match (self, event) {
            (Self::IutReady, BtpEvent::IutReady) => true,
            (Self::Connected(want), BtpEvent::GapDeviceConnected { addr, .. }) => {
                addr_ok(want, addr)
            }
            (Self::Disconnected(want), BtpEvent::GapDeviceDisconnected { addr, .. }) => {
                addr_ok(want, addr)
            }
            (Self::PasskeyDisplay(want), BtpEvent::GapPasskeyDisplay { addr, .. }) => {
                addr_ok(want, addr)
            }
            (Self::L2capConnected, BtpEvent::L2capConnected { .. }) => true,
            (Self::L2capDisconnected, BtpEvent::L2capDisconnected { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IutReady => write!(f, "core_iut_ready_ev"),
            Self::Connected(_) => write!(f, "gap_connected_ev"),
            Self::Disconnected(_) => write!(f, "gap_disconnected_ev"),
            Self::PasskeyDisplay(_) => write!(f, "gap_passkey_disp_ev"),
            Self::L2capConnected => write!(f, "l2cap_connected_ev"),
            Self::L2capDisconnected => write!(f, "l2cap_disconnected_ev"),
        }
    }
}

/// Controller identity returned by the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerInfo {
    pub address: BdAddr,
    pub supported_settings: u32,
    pub current_settings: u32,
    pub name: String,
}

impl ControllerInfo {
    /// Parse a GAP read controller info response payload
    ///
    /// Layout: address(6) supported(4) current(4) class_of_device(3) name(249) short_name(11)
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let short = || Error::BtpProtocol(format!("Controller info too short: {} bytes", data.len()));
        let address = BdAddr::from_wire(data).ok_or_else(short)?;
        let supported_settings = data
            .get(6..10)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
            .ok_or_else(short)?;
        let current_settings = data
            .get(10..14)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
            .ok_or_else(short)?;
        let name = data
            .get(17..)
            .map(|raw| {
                let raw = &raw[..raw.len().min(249)];
                let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
                String::from_utf8_lossy(&raw[..end]).into_owned()
            })
            .unwrap_or_default();

        Ok(Self {
            address,
            supported_settings,
            current_settings,
            name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_wire_order_is_reversed() {
        let addr: BdAddr = "00:1B:DC:F2:1C:48".parse().unwrap();
        assert_eq!(addr.to_wire(), [0x48, 0x1c, 0xf2, 0xdc, 0x1b, 0x00]);
        assert_eq!(BdAddr::from_wire(&addr.to_wire()), Some(addr));
        assert_eq!(addr.to_pixit(), "001BDCF21C48");
    }

    #[test]
    fn test_addr_parse_rejects_garbage() {
        assert!("00:1B:DC".parse::<BdAddr>().is_err());
        assert!("ZZ1BDCF21C48".parse::<BdAddr>().is_err());
    }

    #[test]
    fn test_encode_l2cap_listen() {
        let cmd = BtpCommand::L2capListen {
            psm: 0x0080,
            transport: l2cap::TRANSPORT_LE,
            mtu: 120,
            response: ConnectionResponse::InsufficientAuthentication,
        };
        let (svc, op, idx, data) = cmd.encode();
        assert_eq!((svc, op, idx), (3, l2cap::LISTEN, CONTROLLER_INDEX));
        assert_eq!(data, vec![0x80, 0x00, 0x01, 120, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_decode_passkey_display() {
        let addr: BdAddr = "00:1B:DC:F2:1C:48".parse().unwrap();
        let mut data = vec![0u8];
        data.extend_from_slice(&addr.to_wire());
        data.extend_from_slice(&123456u32.to_le_bytes());

        let event = BtpEvent::decode(1, gap::EV_PASSKEY_DISPLAY, &data);
        assert_eq!(
            event,
            BtpEvent::GapPasskeyDisplay {
                addr,
                addr_type: AddrType::LePublic,
                passkey: 123456
            }
        );
        assert!(EventFilter::PasskeyDisplay(Some(addr)).matches(&event));
        assert!(!EventFilter::Connected(None).matches(&event));
    }

    #[test]
    fn test_decode_truncated_event_is_other() {
        let event = BtpEvent::decode(1, gap::EV_DEVICE_CONNECTED, &[0, 1, 2]);
        assert!(matches!(event, BtpEvent::Other { .. }));
    }

    #[test]
    fn test_parse_controller_info() {
        let mut data = Vec::new();
        data.extend_from_slice(&[0x48, 0x1c, 0xf2, 0xdc, 0x1b, 0x00]);
        data.extend_from_slice(&0x0000_00ffu32.to_le_bytes());
        data.extend_from_slice(&0x0000_0001u32.to_le_bytes());
        data.extend_from_slice(&[0, 0, 0]);
        data.extend_from_slice(b"zephyr\0");

        let info = ControllerInfo::parse(&data).unwrap();
        assert_eq!(info.address.to_string(), "00:1B:DC:F2:1C:48");
        assert_eq!(info.supported_settings, 0xff);
        assert_eq!(info.current_settings, 1);
        assert_eq!(info.name, "zephyr");

        assert!(ControllerInfo::parse(&data[..8]).is_err());
    }
}
