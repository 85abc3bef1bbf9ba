//! Run plan configuration types
//!
//! A run plan is a YAML file naming the profiles to run, which of their
//! test cases to include, and how many times to repeat them.

use std::path::Path;

use serde::Deserialize;

use crate::common::{Error, Result};

/// A complete run plan loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct RunPlan {
    /// Name of the run
    pub name: String,
    /// Optional description shown before the run starts
    pub description: Option<String>,
    /// Profiles to run, in order
    pub profiles: Vec<ProfilePlan>,
}

/// Which test cases of one profile to run
#[derive(Deserialize, Debug, Clone)]
pub struct ProfilePlan {
    /// Profile name as the oracle knows it, e.g. "L2CAP"
    pub name: String,
    /// Test case names or name prefixes; empty runs every test case
    #[serde(default)]
    pub tests: Vec<String>,
    /// Test case names or prefixes to skip
    #[serde(default)]
    pub exclude: Vec<String>,
    /// How many times to run the selection
    #[serde(default = "default_repeat")]
    pub repeat: u32,
}

fn default_repeat() -> u32 {
    1
}

impl ProfilePlan {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tests: Vec::new(),
            exclude: Vec::new(),
            repeat: default_repeat(),
        }
    }

    /// Whether `test_case` is selected; matching is case sensitive
    pub fn selects(&self, test_case: &str) -> bool {
        let hit = |pattern: &String| test_case == pattern || test_case.starts_with(pattern.as_str());
        (self.tests.is_empty() || self.tests.iter().any(hit)) && !self.exclude.iter().any(hit)
    }
}

impl RunPlan {
    /// Load and check a run plan
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let plan: RunPlan = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse run plan: {}", e)))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Plan built from command line arguments
    pub fn from_args(profiles: &[String], tests: &[String], repeat: u32) -> Self {
        Self {
            name: "command line".to_string(),
            description: None,
            profiles: profiles
                .iter()
                .map(|name| ProfilePlan {
                    tests: tests.to_vec(),
                    repeat,
                    ..ProfilePlan::new(name)
                })
                .collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.profiles.is_empty() {
            return Err(Error::Config(format!("Run plan '{}' names no profiles", self.name)));
        }
        if let Some(plan) = self.profiles.iter().find(|p| p.repeat == 0) {
            return Err(Error::Config(format!(
                "Profile '{}' has repeat 0; use at least 1",
                plan.name
            )));
        }
        Ok(())
    }
}
