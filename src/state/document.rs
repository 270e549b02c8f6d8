//! The persisted state document
//!
//! Wire shape is part of the contract: the same JSON object round-trips
//! losslessly through `file://` and `http(s)://` transports, including the
//! nested hook results.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Persisted lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeployPhase {
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "goingUp")]
    GoingUp,
    #[serde(rename = "up")]
    Up,
    #[serde(rename = "testing")]
    Testing,
    #[serde(rename = "tested")]
    Tested,
    #[serde(rename = "goingDown")]
    GoingDown,
    #[serde(rename = "down")]
    Down,
}

impl DeployPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            DeployPhase::Unknown => "unknown",
            DeployPhase::GoingUp => "goingUp",
            DeployPhase::Up => "up",
            DeployPhase::Testing => "testing",
            DeployPhase::Tested => "tested",
            DeployPhase::GoingDown => "goingDown",
            DeployPhase::Down => "down",
        }
    }

    /// Identity fields (name/scope) may only change in these phases
    pub fn allows_identity_change(self) -> bool {
        matches!(self, DeployPhase::Unknown | DeployPhase::Down)
    }
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome marker attached to status-bearing events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Unknown,
    Pending,
    Success,
    Error,
    Failed,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            EventStatus::Unknown => "unknown",
            EventStatus::Pending => "pending",
            EventStatus::Success => "success",
            EventStatus::Error => "error",
            EventStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One entry of the append-only event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: String,
    pub phase: DeployPhase,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EventStatus>,
    #[serde(
        rename = "hookName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub hook: Option<String>,
}

/// Last provisioning result: provisioner outputs and created resources
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisioningResult {
    #[serde(default)]
    pub outputs: Value,
    #[serde(default)]
    pub resources: Value,
}

impl ProvisioningResult {
    pub fn empty() -> Self {
        ProvisioningResult {
            outputs: Value::Object(serde_json::Map::new()),
            resources: Value::Object(serde_json::Map::new()),
        }
    }
}

/// Per-op persisted data, merged over successive runs
pub type OpState = serde_json::Map<String, Value>;

/// hook → op → persisted data
pub type HookResults = BTreeMap<String, BTreeMap<String, OpState>>;

/// The full durable record of one deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(rename = "deploymentName")]
    pub deployment_name: Option<String>,
    #[serde(rename = "resourceScope")]
    pub resource_scope: Option<String>,
    pub phase: DeployPhase,
    #[serde(rename = "lastUpdate")]
    pub last_update: String,
    /// Index of the event carrying the current status; -1 until the first
    /// status-bearing event lands
    #[serde(rename = "statusPointer")]
    pub status_pointer: i64,
    pub events: Vec<Event>,
    pub version: String,
    #[serde(rename = "scratchStore")]
    pub scratch_store: BTreeMap<String, Value>,
    #[serde(rename = "hookResults")]
    pub hook_results: HookResults,
    #[serde(rename = "provisioningResult")]
    pub provisioning_result: ProvisioningResult,
}

impl StateDocument {
    /// Fresh document for a newly created state location
    pub fn new(timestamp: String, version: String) -> Self {
        StateDocument {
            deployment_name: None,
            resource_scope: None,
            phase: DeployPhase::Unknown,
            last_update: timestamp,
            status_pointer: -1,
            events: Vec::new(),
            version,
            scratch_store: BTreeMap::new(),
            hook_results: HookResults::new(),
            provisioning_result: ProvisioningResult::empty(),
        }
    }

    /// The event the status pointer designates, if any
    pub fn status_event(&self) -> Option<&Event> {
        usize::try_from(self.status_pointer)
            .ok()
            .and_then(|idx| self.events.get(idx))
    }
}
