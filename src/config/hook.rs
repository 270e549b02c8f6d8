//! Hook and operation configuration types
//!
//! Hooks are named pipelines of operations bound to lifecycle triggers.
//! All enums here are closed: an unknown type/mode/trigger/platform value is
//! a parse error, never a silent fallthrough.

use serde::{Deserialize, Deserializer};

/// Lifecycle events hooks can attach to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Trigger {
    #[serde(rename = "pre-up")]
    PreUp,
    #[serde(rename = "post-up")]
    PostUp,
    #[serde(rename = "pre-down")]
    PreDown,
    #[serde(rename = "post-down")]
    PostDown,
    #[serde(rename = "pre-test")]
    PreTest,
    #[serde(rename = "post-test")]
    PostTest,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::PreUp => "pre-up",
            Trigger::PostUp => "post-up",
            Trigger::PreDown => "pre-down",
            Trigger::PostDown => "post-down",
            Trigger::PreTest => "pre-test",
            Trigger::PostTest => "post-test",
        }
    }
}

/// A hook's trigger set: a single trigger, a list, or the universal empty
/// sentinel `""` which matches every trigger
#[derive(Debug, Clone, Default)]
pub struct Lifecycle(Vec<Trigger>);

impl Lifecycle {
    pub fn matches(&self, trigger: Trigger) -> bool {
        self.0.is_empty() || self.0.contains(&trigger)
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Lifecycle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        let items = match Raw::deserialize(deserializer)? {
            Raw::One(s) if s.is_empty() => Vec::new(),
            Raw::One(s) => vec![s],
            Raw::Many(list) => list,
        };
        let mut triggers = Vec::with_capacity(items.len());
        for item in items {
            let trigger = Trigger::deserialize(serde::de::value::StrDeserializer::<
                serde::de::value::Error,
            >::new(&item))
            .map_err(|_| {
                serde::de::Error::custom(format!("unsupported lifecycle trigger '{item}'"))
            })?;
            triggers.push(trigger);
        }
        Ok(Lifecycle(triggers))
    }
}

/// Operation kind, dispatched exhaustively by the hook engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// Run the configured CLI tool (top-level `tool` key) with the args
    #[default]
    Tool,
    /// Run an arbitrary command
    Cmd,
    /// Interpolate a script file, stage it into the tmp dir, execute it
    Script,
    /// Print the resolved args
    Print,
    /// Recursively invoke another hook
    Call,
}

impl OpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Tool => "tool",
            OpKind::Cmd => "cmd",
            OpKind::Script => "script",
            OpKind::Print => "print",
            OpKind::Call => "call",
        }
    }
}

/// Wait for the child and capture output, or hand it the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpMode {
    #[default]
    Wait,
    Interactive,
}

const KNOWN_PLATFORMS: [&str; 3] = ["linux", "darwin", "windows"];

/// Platform filter: empty means every platform
#[derive(Debug, Clone, Default)]
pub struct PlatformFilter(Vec<String>);

impl PlatformFilter {
    /// Whether the op should run on `platform`
    pub fn allows(&self, platform: &str) -> bool {
        self.0.is_empty() || self.0.iter().any(|p| p == platform)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for PlatformFilter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        let items = match Raw::deserialize(deserializer)? {
            Raw::One(s) if s.is_empty() => Vec::new(),
            Raw::One(s) => vec![s.to_lowercase()],
            Raw::Many(list) => list.into_iter().map(|s| s.to_lowercase()).collect(),
        };
        for item in &items {
            if !KNOWN_PLATFORMS.contains(&item.as_str()) {
                return Err(serde::de::Error::custom(format!(
                    "unsupported platform '{item}'"
                )));
            }
        }
        Ok(PlatformFilter(items))
    }
}

/// One step of a hook pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Op {
    /// Named ops persist their `{stdout, stderr}` into the state store
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: OpKind,
    #[serde(default)]
    pub platform: PlatformFilter,
    #[serde(default)]
    pub mode: OpMode,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Templated command string or argv list
    pub args: serde_yaml::Value,
}

impl Op {
    /// Diagnostic label: name, else description, else `#<position>`
    pub fn label(&self, position: usize) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if !self.description.is_empty() {
            return self.description.clone();
        }
        format!("#{position}")
    }
}

fn default_run_if() -> String {
    "true".to_string()
}

/// A named, conditionally-triggered pipeline of operations
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookDef {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    /// Templated condition: truthy/falsy literal, or the run-once sentinel
    #[serde(default = "default_run_if")]
    pub run_if: String,
    pub ops: Vec<Op>,
}
