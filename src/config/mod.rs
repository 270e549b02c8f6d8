//! Deployment configuration (`.cdf.yml`) loading and validation
//!
//! The config is deserialized with strict typing (unknown keys and unknown
//! enum values are parse errors) and then shape-validated before anything
//! mutates state: reserved `_` prefixes, duplicate op names, the reserved
//! `fresh` upgrade name and `from_expect` uniqueness.

pub mod hook;
pub mod test;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::common::fs;
use crate::error::{CdfError, Result};

pub use hook::{HookDef, Lifecycle, Op, OpKind, OpMode, PlatformFilter, Trigger};
pub use test::{
    DownStrategy, ExpectSpec, FRESH_UPGRADE, GitLocator, HookExpectations, PlanExpect, RunnerSpec,
    TestExpectations, TestSpec, UpgradeKind, UpgradeSpec, UpgradeStrategy,
};

/// Default config file name
pub const CONFIG_DEFAULT: &str = ".cdf.yml";

/// Reserved prefix for internal bookkeeping entries (e.g. `_condition`)
pub const RESERVED_PREFIX: char = '_';

/// Order-preserving name → value map
///
/// YAML mapping order is meaningful for hooks (lifecycle execution order)
/// and tests (matrix order), so these are kept as insertion-ordered pairs.
#[derive(Debug, Clone)]
pub struct NamedSeq<T>(pub Vec<(String, T)>);

impl<T> Default for NamedSeq<T> {
    fn default() -> Self {
        NamedSeq(Vec::new())
    }
}

impl<T> NamedSeq<T> {
    pub fn get(&self, name: &str) -> Option<&T> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, T)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for NamedSeq<T> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor<T>(std::marker::PhantomData<T>);

        impl<'de, T: Deserialize<'de>> serde::de::Visitor<'de> for Visitor<T> {
            type Value = NamedSeq<T>;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a mapping of names to values")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some((name, value)) = map.next_entry::<String, T>()? {
                    if entries.iter().any(|(n, _)| *n == name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate name '{name}'"
                        )));
                    }
                    entries.push((name, value));
                }
                Ok(NamedSeq(entries))
            }
        }

        deserializer.deserialize_map(Visitor(std::marker::PhantomData))
    }
}

fn default_provisioner() -> String {
    "terraform".to_string()
}

fn default_tmp_dir() -> String {
    "{{cdf.config_dir}}/.cdf_tmp".to_string()
}

fn default_state_path() -> String {
    "file://{{cdf.tmp_dir}}".to_string()
}

fn default_state_filename() -> String {
    "state.json".to_string()
}

/// Raw deployment configuration as written in `.cdf.yml`
///
/// String fields marked "templated" resolve in resolution phase 1 during
/// engine bootstrap; `params` and hook args resolve in phase 2.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CdfConfig {
    /// Deployment name (templated)
    pub name: String,
    /// Resource scope the deployment provisions into (templated)
    pub scope: String,
    /// Provisioning location (templated)
    pub location: String,
    #[serde(default = "default_provisioner")]
    pub provisioner: String,
    /// Complete (replace-all) deployment mode
    #[serde(default)]
    pub complete_deployment: bool,
    /// Artifact location handed to the provisioner (templated)
    #[serde(default)]
    pub up: Option<String>,
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: String,
    /// State document location; `file://` or `http(s)://` (templated)
    #[serde(default = "default_state_path")]
    pub state_path: String,
    #[serde(default = "default_state_filename")]
    pub state_filename: String,
    /// Binary run by `tool`-type ops
    #[serde(default)]
    pub tool: Option<String>,
    /// User variables (templated; may reference `result.*` → delayed)
    #[serde(default)]
    pub vars: serde_yaml::Mapping,
    /// Deployment parameters passed to the provisioner (templated, late)
    #[serde(default)]
    pub params: serde_yaml::Mapping,
    #[serde(default)]
    pub hooks: NamedSeq<HookDef>,
    #[serde(default)]
    pub upgrades: Vec<UpgradeSpec>,
    #[serde(default)]
    pub tests: NamedSeq<TestSpec>,
}

impl CdfConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(CdfError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }
        let content = fs::read_content(path)?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parse and validate config content
    pub fn parse(content: &str, origin: &str) -> Result<Self> {
        let config: CdfConfig =
            serde_yaml::from_str(content).map_err(|e| CdfError::ConfigParseFailed {
                path: origin.to_string(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.validate_hooks()?;
        self.validate_upgrades()?;
        if self.provisioner != "terraform" {
            return Err(CdfError::ConfigInvalid {
                message: format!(
                    "unsupported provisioner '{}', supported: terraform",
                    self.provisioner
                ),
            });
        }
        Ok(())
    }

    fn validate_hooks(&self) -> Result<()> {
        for (hook_name, hook) in self.hooks.iter() {
            if hook_name.starts_with(RESERVED_PREFIX) {
                return Err(CdfError::ReservedHookName {
                    name: hook_name.clone(),
                });
            }
            let mut seen = Vec::new();
            for op in &hook.ops {
                if op.kind == OpKind::Tool && self.tool.is_none() {
                    return Err(CdfError::ConfigInvalid {
                        message: format!(
                            "hook '{hook_name}' has a tool op but no top-level 'tool' binary is configured"
                        ),
                    });
                }
                let Some(op_name) = &op.name else { continue };
                if op_name.starts_with(RESERVED_PREFIX) {
                    return Err(CdfError::ReservedOpName {
                        hook: hook_name.clone(),
                        name: op_name.clone(),
                    });
                }
                if seen.contains(op_name) {
                    return Err(CdfError::DuplicateOpName {
                        hook: hook_name.clone(),
                        name: op_name.clone(),
                    });
                }
                seen.push(op_name.clone());
            }
        }
        Ok(())
    }

    fn validate_upgrades(&self) -> Result<()> {
        let mut from_expects = Vec::new();
        for upgrade in &self.upgrades {
            if upgrade.name.eq_ignore_ascii_case(FRESH_UPGRADE) {
                return Err(CdfError::ConfigInvalid {
                    message: "upgrade name 'fresh' is reserved".to_string(),
                });
            }
            if upgrade.kind == UpgradeKind::Git && upgrade.git.is_none() {
                return Err(CdfError::ConfigInvalid {
                    message: format!(
                        "upgrade '{}' has type git but no git locator",
                        upgrade.name
                    ),
                });
            }
            if from_expects.contains(&upgrade.from_expect) {
                return Err(CdfError::ConfigInvalid {
                    message: format!(
                        "duplicate from_expect '{}' in upgrade list",
                        upgrade.from_expect
                    ),
                });
            }
            from_expects.push(upgrade.from_expect.clone());
        }
        Ok(())
    }

    /// Named-op signature per hook, used for state reconciliation and for
    /// seeding the phase-2 `hooks` scope
    pub fn hook_signature(&self) -> std::collections::BTreeMap<String, Vec<String>> {
        let mut signature = std::collections::BTreeMap::new();
        for (hook_name, hook) in self.hooks.iter() {
            let ops: Vec<String> = hook.ops.iter().filter_map(|op| op.name.clone()).collect();
            signature.insert(hook_name.clone(), ops);
        }
        signature
    }

    /// Fold a test case's overrides into this config
    ///
    /// Test vars/params shadow base entries of the same name; identity
    /// fields replace wholesale when the test declares them.
    pub fn apply_test_overrides(&mut self, spec: &TestSpec) {
        if let Some(name) = &spec.name {
            self.name = name.clone();
        }
        if let Some(scope) = &spec.scope {
            self.scope = scope.clone();
        }
        if let Some(location) = &spec.location {
            self.location = location.clone();
        }
        if let Some(up) = &spec.up {
            self.up = Some(up.clone());
        }
        for (key, value) in &spec.vars {
            self.vars.insert(key.clone(), value.clone());
        }
        for (key, value) in &spec.params {
            self.params.insert(key.clone(), value.clone());
        }
    }
}

/// Resolve the config file path from an optional working dir and name
pub fn config_path(working_dir: Option<&Path>, config: &str) -> PathBuf {
    match working_dir {
        Some(dir) => dir.join(config),
        None => PathBuf::from(config),
    }
}
