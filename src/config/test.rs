//! Test case, expectation and upgrade-path configuration types

use serde::{Deserialize, Deserializer};

/// Reserved matrix column for "provision the current revision from scratch"
pub const FRESH_UPGRADE: &str = "fresh";

/// Which upgrade-path columns of the matrix apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UpgradeStrategy {
    /// Fresh plus every declared upgrade path
    #[default]
    All,
    /// Fresh only
    Fresh,
    /// Declared upgrade paths only
    Upgrade,
}

/// When the matrix runner de-provisions a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DownStrategy {
    /// De-provision even when a phase failed
    #[default]
    Always,
    /// De-provision only fully successful scenarios
    Success,
    /// Never de-provision (also skips the down phase itself)
    Never,
}

/// String-or-list of strings, flattened to a list
fn string_or_seq<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::One(s) => vec![s],
        Raw::Many(list) => list,
    })
}

fn default_glob() -> String {
    "*".to_string()
}

/// External expectation runner: a command template applied once, or once per
/// file matching `filter` under `files`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerSpec {
    /// Templated command line
    pub cmd: String,
    /// Directory whose direct children are enumerated
    #[serde(default)]
    pub files: Option<String>,
    /// Glob applied to file names under `files`
    #[serde(default = "default_glob")]
    pub filter: String,
}

/// Declared assertions for one test phase
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectSpec {
    /// Invert the outcome: the phase must fail to match
    #[serde(default)]
    pub expect_fail: bool,
    /// Templated boolean expressions
    #[serde(default, rename = "assert", deserialize_with = "string_or_seq")]
    pub asserts: Vec<String>,
    /// Literal commands; nonzero exit is a failure
    #[serde(default, rename = "cmd", deserialize_with = "string_or_seq")]
    pub cmds: Vec<String>,
    #[serde(default)]
    pub runner: Option<RunnerSpec>,
}

/// Declared plan/diff counts checked before provisioning
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanExpect {
    #[serde(default)]
    pub add: Option<u64>,
    #[serde(default)]
    pub change: Option<u64>,
    #[serde(default)]
    pub destroy: Option<u64>,
    #[serde(default)]
    pub expect_fail: bool,
}

/// Per-hook expectation entry, declared as `- <hookname>: {...}` to keep
/// execution order explicit
#[derive(Debug, Clone, Default)]
pub struct HookExpectations(pub Vec<(String, ExpectSpec)>);

impl<'de> Deserialize<'de> for HookExpectations {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries: Vec<std::collections::BTreeMap<String, ExpectSpec>> =
            Vec::deserialize(deserializer)?;
        let mut flat = Vec::new();
        for entry in entries {
            for (name, spec) in entry {
                flat.push((name, spec));
            }
        }
        Ok(HookExpectations(flat))
    }
}

/// All declared expectations of one test
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestExpectations {
    #[serde(default)]
    pub up: Option<ExpectSpec>,
    #[serde(default)]
    pub down: Option<ExpectSpec>,
    #[serde(default)]
    pub plan: Option<PlanExpect>,
    #[serde(default)]
    pub hooks: HookExpectations,
}

/// One test case: config overrides plus expectations
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestSpec {
    #[serde(default)]
    pub description: String,
    /// Override the deployment name (templated)
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub up: Option<String>,
    #[serde(default)]
    pub vars: serde_yaml::Mapping,
    #[serde(default)]
    pub params: serde_yaml::Mapping,
    #[serde(default)]
    pub expect: TestExpectations,
    /// Per-test override of the global upgrade strategy
    #[serde(default)]
    pub upgrade_strategy: Option<UpgradeStrategy>,
}

/// How an upgrade path's prior revision is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpgradeKind {
    #[default]
    Local,
    Git,
}

/// Pinned git locator for a prior config revision
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitLocator {
    pub repo: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
}

impl GitLocator {
    /// The single requested ref, defaulting to HEAD of the default branch
    pub fn requested_ref(&self) -> Option<&str> {
        self.commit
            .as_deref()
            .or(self.tag.as_deref())
            .or(self.branch.as_deref())
    }
}

fn default_upgrade_path() -> String {
    "/".to_string()
}

fn default_from_expect() -> String {
    "default".to_string()
}

/// A test variant provisioning a prior revision before the current one
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpgradeSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: UpgradeKind,
    /// Sub-path inside the revision holding the config
    #[serde(default = "default_upgrade_path")]
    pub path: String,
    /// Test whose overrides seed the prior-revision provision
    #[serde(default = "default_from_expect")]
    pub from_expect: String,
    #[serde(default)]
    pub git: Option<GitLocator>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expect_spec_string_or_list() {
        let spec: ExpectSpec =
            serde_yaml::from_str("assert: \"{{ result.outputs.ok }}\"\ncmd: [ls, pwd]\n").unwrap();
        assert_eq!(spec.asserts.len(), 1);
        assert_eq!(spec.cmds, vec!["ls", "pwd"]);
        assert!(!spec.expect_fail);
    }

    #[test]
    fn test_hook_expectations_preserve_order() {
        let expect: TestExpectations = serde_yaml::from_str(
            "hooks:\n  - lint: {}\n  - smoke:\n      expect_fail: true\n",
        )
        .unwrap();
        let names: Vec<_> = expect.hooks.0.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["lint", "smoke"]);
        assert!(expect.hooks.0[1].1.expect_fail);
    }

    #[test]
    fn test_upgrade_defaults() {
        let upgrade: UpgradeSpec = serde_yaml::from_str("name: v1\n").unwrap();
        assert_eq!(upgrade.kind, UpgradeKind::Local);
        assert_eq!(upgrade.path, "/");
        assert_eq!(upgrade.from_expect, "default");
    }

    #[test]
    fn test_git_locator_ref_precedence() {
        let locator: GitLocator =
            serde_yaml::from_str("repo: https://example.org/r.git\nbranch: main\ntag: v2\n")
                .unwrap();
        assert_eq!(locator.requested_ref(), Some("v2"));
    }

    #[test]
    fn test_unknown_expect_key_rejected() {
        let res: Result<ExpectSpec, _> = serde_yaml::from_str("asserts: nope\n");
        assert!(res.is_err());
    }
}
