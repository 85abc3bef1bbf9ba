//! Deferred command parameters
//!
//! A `Param` is either a literal or a named reference to a stack accessor.
//! References are resolved by the sequencer immediately before the owning
//! command dispatches, so a scenario defined before the IUT was even
//! connected still sees the values the session learned since.

use std::fmt;

use crate::btp::types::BdAddr;
use crate::common::{Error, Result};

use super::stack::Stack;

/// A concrete argument value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Int(i64),
    Bool(bool),
    Text(String),
    Addr(BdAddr),
}

/// Value shape an action expects for one argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Int,
    Bool,
    Text,
    Addr,
    /// Anything that can be rendered as text
    Any,
}

impl ArgValue {
    pub fn kind(&self) -> ArgKind {
        match self {
            Self::Int(_) => ArgKind::Int,
            Self::Bool(_) => ArgKind::Bool,
            Self::Text(_) => ArgKind::Text,
            Self::Addr(_) => ArgKind::Addr,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_addr(&self) -> Option<BdAddr> {
        match self {
            Self::Addr(a) => Some(*a),
            _ => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Text(s) => write!(f, "{}", s),
            Self::Addr(a) => write!(f, "{}", a),
        }
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<BdAddr> for ArgValue {
    fn from(v: BdAddr) -> Self {
        Self::Addr(v)
    }
}

/// Named stack accessor a parameter can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackRef {
    IutAddr,
    IutAddrType,
    DeviceName,
    PtsAddr,
    PtsAddrType,
    Passkey,
    L2capPsm,
    L2capInitialMtu,
    L2capNumChannels,
    L2capHoldCredits,
}

impl StackRef {
    pub fn name(&self) -> &'static str {
        match self {
            Self::IutAddr => "iut_addr",
            Self::IutAddrType => "iut_addr_type",
            Self::DeviceName => "device_name",
            Self::PtsAddr => "pts_addr",
            Self::PtsAddrType => "pts_addr_type",
            Self::Passkey => "passkey",
            Self::L2capPsm => "l2cap_psm",
            Self::L2capInitialMtu => "l2cap_initial_mtu",
            Self::L2capNumChannels => "l2cap_num_channels",
            Self::L2capHoldCredits => "l2cap_hold_credits",
        }
    }

    pub fn kind(&self) -> ArgKind {
        match self {
            Self::IutAddr | Self::PtsAddr => ArgKind::Addr,
            Self::DeviceName => ArgKind::Text,
            Self::L2capHoldCredits => ArgKind::Bool,
            _ => ArgKind::Int,
        }
    }

    /// Read the current value from the stack
    ///
    /// Fails only for values the session has not learned yet.
    pub fn read(&self, stack: &Stack) -> Result<ArgValue> {
        let unbound = |reason: &str| Error::UnboundParameter {
            param: self.name().to_string(),
            reason: reason.to_string(),
        };

        Ok(match self {
            Self::IutAddr => ArgValue::Addr(stack.iut_addr()),
            Self::IutAddrType => ArgValue::Int(stack.iut_addr_type() as i64),
            Self::DeviceName => ArgValue::Text(stack.device_name().to_string()),
            Self::PtsAddr => stack
                .pts_addr()
                .map(|(addr, _)| ArgValue::Addr(addr))
                .ok_or_else(|| unbound("PTS address not set"))?,
            Self::PtsAddrType => stack
                .pts_addr()
                .map(|(_, t)| ArgValue::Int(t as i64))
                .ok_or_else(|| unbound("PTS address not set"))?,
            Self::Passkey => stack
                .passkey()
                .map(|p| ArgValue::Int(i64::from(p)))
                .ok_or_else(|| unbound("IUT has not displayed a passkey"))?,
            Self::L2capPsm => ArgValue::Int(i64::from(stack.psm())),
            Self::L2capInitialMtu => ArgValue::Int(i64::from(stack.initial_mtu())),
            Self::L2capNumChannels => ArgValue::Int(i64::from(stack.num_channels())),
            Self::L2capHoldCredits => ArgValue::Bool(stack.hold_credits()),
        })
    }
}

/// A command argument: literal or late-bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Literal(ArgValue),
    Stack(StackRef),
}

impl Param {
    pub fn int(v: i64) -> Self {
        Self::Literal(ArgValue::Int(v))
    }

    pub fn bool(v: bool) -> Self {
        Self::Literal(ArgValue::Bool(v))
    }

    pub fn text(v: impl Into<String>) -> Self {
        Self::Literal(ArgValue::Text(v.into()))
    }

    pub fn addr(v: BdAddr) -> Self {
        Self::Literal(ArgValue::Addr(v))
    }

    pub fn kind(&self) -> ArgKind {
        match self {
            Self::Literal(v) => v.kind(),
            Self::Stack(r) => r.kind(),
        }
    }

    /// Produce the value this parameter stands for right now
    pub fn resolve(&self, stack: &Stack) -> Result<ArgValue> {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Stack(r) => r.read(stack),
        }
    }
}

impl From<StackRef> for Param {
    fn from(r: StackRef) -> Self {
        Self::Stack(r)
    }
}

impl From<ArgValue> for Param {
    fn from(v: ArgValue) -> Self {
        Self::Literal(v)
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Self::int(v)
    }
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Self::bool(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Self::text(v)
    }
}

impl From<BdAddr> for Param {
    fn from(v: BdAddr) -> Self {
        Self::addr(v)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => write!(f, "{}", v),
            Self::Stack(r) => write!(f, "<{}>", r.name()),
        }
    }
}

/// How a resolved value is rendered as text for the oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Display form of the value
    #[default]
    Plain,
    /// Four lowercase hex digits, e.g. 241 -> `00f1`
    Hex16,
    /// `TRUE` / `FALSE`
    BoolUpper,
    /// Twelve uppercase hex digits without separators
    Address,
    /// Six zero-padded decimal digits
    Passkey,
}

/// Four lowercase hex digits
pub fn hex16(v: u16) -> String {
    format!("{:04x}", v)
}

/// `TRUE` / `FALSE`
pub fn bool_upper(v: bool) -> String {
    String::from(if v { "TRUE" } else { "FALSE" })
}

impl Encoding {
    /// Whether values of this shape can be rendered at all
    pub fn accepts(&self, kind: ArgKind) -> bool {
        match self {
            Self::Plain => true,
            Self::Hex16 | Self::BoolUpper => matches!(kind, ArgKind::Int | ArgKind::Bool),
            Self::Address => kind == ArgKind::Addr,
            Self::Passkey => kind == ArgKind::Int,
        }
    }

    pub fn render(&self, value: &ArgValue) -> Result<String> {
        let mismatch = |want: &str| Error::UnboundParameter {
            param: value.to_string(),
            reason: format!("cannot be rendered as {}", want),
        };

        match self {
            Self::Plain => Ok(match value {
                ArgValue::Addr(a) => a.to_pixit(),
                other => other.to_string(),
            }),
            Self::Hex16 => value
                .as_int()
                .and_then(|v| u16::try_from(v).ok())
                .map(hex16)
                .ok_or_else(|| mismatch("a 16-bit value")),
            Self::BoolUpper => value
                .as_bool()
                .map(bool_upper)
                .ok_or_else(|| mismatch("a boolean")),
            Self::Address => value
                .as_addr()
                .map(BdAddr::to_pixit)
                .ok_or_else(|| mismatch("an address")),
            Self::Passkey => value
                .as_int()
                .filter(|v| (0..1_000_000).contains(v))
                .map(|v| format!("{:06}", v))
                .ok_or_else(|| mismatch("a passkey")),
        }
    }
}

/// A parameter plus the text encoding the oracle expects for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundText {
    pub param: Param,
    pub encoding: Encoding,
}

impl BoundText {
    pub fn new(param: impl Into<Param>, encoding: Encoding) -> Self {
        Self {
            param: param.into(),
            encoding,
        }
    }

    pub fn render(&self, stack: &Stack) -> Result<String> {
        let value = self.param.resolve(stack)?;
        self.encoding.render(&value)
    }

    /// Reject a parameter whose shape the encoding cannot render
    pub fn check(&self) -> std::result::Result<(), String> {
        let kind = self.param.kind();
        if self.encoding.accepts(kind) {
            Ok(())
        } else {
            Err(format!(
                "{} is {:?}, cannot be encoded as {:?}",
                self.param, kind, self.encoding
            ))
        }
    }
}
