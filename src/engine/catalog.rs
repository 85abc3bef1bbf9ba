//! Scenario definitions and the per-profile catalog

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::common::{Error, Result};

use super::binder::BoundText;
use super::command::Command;
use super::wid::{Verify, WidHandler};

/// Commands and WID overrides for one test case
#[derive(Clone)]
pub struct ScenarioDefinition {
    pub name: String,
    pub commands: Vec<Command>,
    pub edit1_wids: HashMap<u32, BoundText>,
    pub verify_wids: HashMap<u32, Verify>,
    /// Profile handler used when neither override map knows a WID
    pub handler: Option<Arc<dyn WidHandler>>,
}

impl ScenarioDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: Vec::new(),
            edit1_wids: HashMap::new(),
            verify_wids: HashMap::new(),
            handler: None,
        }
    }

    /// Append one command, numbering it
    pub fn command(mut self, mut command: Command) -> Self {
        command.ordinal = self.commands.len() + 1;
        self.commands.push(command);
        self
    }

    pub fn commands(self, commands: impl IntoIterator<Item = Command>) -> Self {
        commands.into_iter().fold(self, Self::command)
    }

    pub fn edit1_wid(mut self, wid: u32, producer: BoundText) -> Self {
        self.edit1_wids.insert(wid, producer);
        self
    }

    pub fn verify_wid(mut self, wid: u32, verify: Verify) -> Self {
        self.verify_wids.insert(wid, verify);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn WidHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Commands that run after the terminal state is reached
    pub fn cleanup_commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter().filter(|c| c.cleanup)
    }

    /// Reject malformed definitions before anything runs
    pub fn validate(&self) -> Result<()> {
        for (i, command) in self.commands.iter().enumerate() {
            if command.ordinal != i + 1 {
                return Err(Error::configuration(
                    &self.name,
                    format!("command at position {} has ordinal {}", i + 1, command.ordinal),
                ));
            }
            command
                .validate()
                .map_err(|reason| Error::configuration(&self.name, reason))?;
        }

        if self.edit1_wids.contains_key(&0) || self.verify_wids.contains_key(&0) {
            return Err(Error::configuration(&self.name, "override for WID 0"));
        }

        let texts = self.edit1_wids.iter().chain(
            self.verify_wids
                .iter()
                .filter_map(|(wid, verify)| match verify {
                    Verify::DescriptionContains(values) => Some((wid, values)),
                    _ => None,
                })
                .flat_map(|(wid, values)| values.iter().map(move |text| (wid, text))),
        );
        for (wid, text) in texts {
            text.check().map_err(|reason| {
                Error::configuration(&self.name, format!("WID {} override: {}", wid, reason))
            })?;
        }

        Ok(())
    }
}

impl fmt::Debug for ScenarioDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut edit: Vec<_> = self.edit1_wids.keys().collect();
        edit.sort();
        let mut verify: Vec<_> = self.verify_wids.keys().collect();
        verify.sort();

        f.debug_struct("ScenarioDefinition")
            .field("name", &self.name)
            .field("commands", &self.commands.len())
            .field("edit1_wids", &edit)
            .field("verify_wids", &verify)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// How a profile builds scenarios nobody customized
#[derive(Clone)]
pub struct ProfileDefaults {
    pub preconditions: Vec<Command>,
    pub handler: Arc<dyn WidHandler>,
}

impl ProfileDefaults {
    /// The shared-preconditions-only scenario for `name`
    pub fn default_scenario(&self, name: &str) -> ScenarioDefinition {
        ScenarioDefinition::new(name)
            .commands(self.preconditions.iter().cloned())
            .handler(self.handler.clone())
    }
}

/// Where a catalog entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Custom,
    Default,
}

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub definition: Arc<ScenarioDefinition>,
    pub origin: Origin,
}

/// One definition per official test case name, read-only once built
#[derive(Debug, Clone)]
pub struct ScenarioCatalog {
    profile: String,
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
}

impl ScenarioCatalog {
    /// Map every official name to a definition
    ///
    /// Matching is exact and case-sensitive. Among duplicate custom names the
    /// first declared is used. Names without a custom definition get the
    /// profile's default scenario.
    pub fn build(
        profile: &str,
        official_names: &[String],
        custom: Vec<ScenarioDefinition>,
        defaults: &ProfileDefaults,
    ) -> Result<Self> {
        let mut overrides: HashMap<String, Arc<ScenarioDefinition>> = HashMap::new();
        for mut definition in custom {
            if overrides.contains_key(&definition.name) {
                continue;
            }
            if definition.handler.is_none() {
                definition.handler = Some(defaults.handler.clone());
            }
            definition.validate()?;
            overrides.insert(definition.name.clone(), Arc::new(definition));
        }

        let mut entries = Vec::with_capacity(official_names.len());
        let mut index = HashMap::new();
        for name in official_names {
            let entry = match overrides.get(name) {
                Some(definition) => CatalogEntry {
                    definition: definition.clone(),
                    origin: Origin::Custom,
                },
                None => {
                    let definition = defaults.default_scenario(name);
                    definition.validate()?;
                    CatalogEntry {
                        definition: Arc::new(definition),
                        origin: Origin::Default,
                    }
                }
            };
            index.entry(name.clone()).or_insert(entries.len());
            entries.push(entry);
        }

        let custom_count = entries.iter().filter(|e| e.origin == Origin::Custom).count();
        tracing::info!(
            profile,
            scenarios = entries.len(),
            custom = custom_count,
            "Built scenario catalog"
        );

        Ok(Self {
            profile: profile.to_string(),
            entries,
            index,
        })
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
