//! PIXIT tables pushed to the oracle before a profile runs

use std::fmt;

use crate::common::Result;
use crate::oracle::Oracle;

use super::binder::{BoundText, Encoding, Param};
use super::stack::Stack;

/// A PIXIT value: fixed text, or computed from the stack when pushed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixitValue {
    Static(String),
    Bound(BoundText),
}

impl PixitValue {
    pub fn bound(param: impl Into<Param>, encoding: Encoding) -> Self {
        Self::Bound(BoundText::new(param, encoding))
    }

    pub fn render(&self, stack: &Stack) -> Result<String> {
        match self {
            Self::Static(value) => Ok(value.clone()),
            Self::Bound(bound) => bound.render(stack),
        }
    }
}

impl fmt::Display for PixitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(value) => write!(f, "{}", value),
            Self::Bound(bound) => write!(f, "{} as {:?}", bound.param, bound.encoding),
        }
    }
}

impl From<&str> for PixitValue {
    fn from(value: &str) -> Self {
        Self::Static(value.to_string())
    }
}

impl From<String> for PixitValue {
    fn from(value: String) -> Self {
        Self::Static(value)
    }
}

/// Ordered name/value pairs for one profile
#[derive(Debug, Clone, Default)]
pub struct PixitTable {
    entries: Vec<(String, PixitValue)>,
}

impl PixitTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &str, value: impl Into<PixitValue>) -> Self {
        self.insert(name, value.into());
        self
    }

    /// Insert or replace, keeping the original position on replace
    pub fn insert(&mut self, name: &str, value: PixitValue) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Apply user overrides on top of the defaults
    pub fn with_overrides(mut self, overrides: &[(String, String)]) -> Self {
        for (name, value) in overrides {
            self.insert(name, PixitValue::Static(value.clone()));
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&PixitValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PixitValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render every entry against the stack
    pub fn render(&self, stack: &Stack) -> Result<Vec<(String, String)>> {
        self.entries
            .iter()
            .map(|(name, value)| Ok((name.clone(), value.render(stack)?)))
            .collect()
    }

    /// Push every entry to the oracle in table order
    pub async fn push(&self, oracle: &dyn Oracle, profile: &str, stack: &Stack) -> Result<()> {
        let rendered = self.render(stack)?;
        for (name, value) in &rendered {
            oracle.set_pixit(profile, name, value).await?;
        }
        tracing::debug!(profile, count = rendered.len(), "Pushed PIXITs");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btp::types::AddrType;
    use crate::engine::binder::StackRef;
    use crate::engine::stack::Identity;

    fn stack() -> Stack {
        Stack::new(Identity {
            address: "DE:AD:BE:EF:00:01".parse().unwrap(),
            addr_type: AddrType::LePublic,
            name: "iut".to_string(),
            settings: 0,
        })
    }

    #[test]
    fn test_bound_value_renders_from_stack() {
        let table = PixitTable::new()
            .set("TSPX_bd_addr_iut", "DEADBEEFDEAD")
            .set("TSPX_security_enabled", "FALSE")
            .set(
                "TSPX_bd_addr_iut",
                PixitValue::bound(StackRef::IutAddr, Encoding::Address),
            );

        let rendered = table.render(&stack()).unwrap();
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0], ("TSPX_bd_addr_iut".into(), "DEADBEEF0001".into()));
    }

    #[test]
    fn test_overrides_replace_in_place_and_append() {
        let table = PixitTable::new()
            .set("TSPX_spsm", "0000")
            .set("TSPX_psm", "0001")
            .with_overrides(&[
                ("TSPX_psm".into(), "1001".into()),
                ("TSPX_extra".into(), "x".into()),
            ]);

        let rendered = table.render(&stack()).unwrap();
        assert_eq!(rendered[1], ("TSPX_psm".into(), "1001".into()));
        assert_eq!(rendered[2].0, "TSPX_extra");
        assert_eq!(table.len(), 3);
    }
}
