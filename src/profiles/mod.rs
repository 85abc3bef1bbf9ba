//! Profile registry
//!
//! A profile bundles the catalog data for one oracle project: its default
//! PIXITs, shared preconditions, customized test cases and WID handler.

pub mod gap;
pub mod l2cap;

use std::sync::Arc;

use crate::btp::types::BdAddr;
use crate::common::{Error, Result};
use crate::engine::catalog::{ProfileDefaults, ScenarioDefinition};
use crate::engine::pixit::PixitTable;
use crate::engine::stack::{ProfileInit, Stack};

/// Values known when a profile's catalog is built
#[derive(Debug, Clone)]
pub struct CatalogContext {
    /// The oracle's own Bluetooth address
    pub pts_addr: BdAddr,
    /// Device name the IUT is configured with
    pub device_name: String,
}

impl CatalogContext {
    /// Device name made unique per oracle, e.g. `Tester_1C48`
    pub fn new(pts_addr: BdAddr, name_prefix: &str) -> Self {
        let bytes = pts_addr.0;
        Self {
            pts_addr,
            device_name: format!("{}_{:02X}{:02X}", name_prefix, bytes[4], bytes[5]),
        }
    }
}

/// Catalog data for one profile
pub trait Profile: Send + Sync {
    /// Name the oracle knows the profile by
    fn name(&self) -> &'static str;

    /// PIXITs pushed before any test case of the profile runs
    fn pixits(&self) -> PixitTable;

    /// Preconditions and handler for test cases nobody customized
    fn defaults(&self, ctx: &CatalogContext) -> ProfileDefaults;

    /// Customized test cases, in declaration order
    fn custom_scenarios(&self, ctx: &CatalogContext) -> Vec<ScenarioDefinition>;

    /// Prepare a freshly reset stack for one scenario
    fn init_stack(&self, stack: &mut Stack, ctx: &CatalogContext) {
        stack.init(ProfileInit::Gap {
            device_name: ctx.device_name.clone(),
        });
    }
}

/// Information about a supported profile
#[derive(Debug, Clone, Copy)]
pub struct ProfileInfo {
    pub name: &'static str,
    pub description: &'static str,
}

static PROFILES: &[ProfileInfo] = &[
    ProfileInfo {
        name: "GAP",
        description: "Generic Access Profile: advertising, connection and bonding",
    },
    ProfileInfo {
        name: "L2CAP",
        description: "Logical link control: LE credit based and BR/EDR channels",
    },
];

pub fn all_profiles() -> &'static [ProfileInfo] {
    PROFILES
}

/// Look up a profile by its exact name
pub fn get_profile(name: &str) -> Option<Arc<dyn Profile>> {
    match name {
        "GAP" => Some(Arc::new(gap::Gap)),
        "L2CAP" => Some(Arc::new(l2cap::L2cap)),
        _ => None,
    }
}

pub fn require_profile(name: &str) -> Result<Arc<dyn Profile>> {
    get_profile(name).ok_or_else(|| Error::UnknownProfile(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_listed_profile_resolves() {
        for info in all_profiles() {
            let profile = get_profile(info.name).unwrap();
            assert_eq!(profile.name(), info.name);
        }
        assert!(get_profile("l2cap").is_none());
        assert!(matches!(require_profile("HFP"), Err(Error::UnknownProfile(_))));
    }

    #[test]
    fn test_device_name_uses_pts_address_suffix() {
        let ctx = CatalogContext::new("00:1B:DC:F2:1C:48".parse().unwrap(), "Tester");
        assert_eq!(ctx.device_name, "Tester_1C48");
    }
}
