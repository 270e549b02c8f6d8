//! Durable deployment state
//!
//! The state document is the single source of truth for a deployment's
//! phase, event history, scratch store, hook results and last provisioning
//! result. Every mutating call flushes synchronously before returning, so a
//! crash immediately after a mutation never loses it.
//!
//! [`State`] is a cheap-to-clone handle over shared inner data; the
//! resolver's `store` template global and the hook engine both hold one.

pub mod document;
pub mod transport;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::error::{CdfError, Result};

pub use document::{
    DeployPhase, Event, EventStatus, HookResults, OpState, ProvisioningResult, StateDocument,
};
pub use transport::Transport;

/// Engine version recorded in new state documents
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Named-op signature per hook, as produced by the config
pub type HookSignature = BTreeMap<String, Vec<String>>;

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S %d/%m/%Y").to_string()
}

struct StateInner {
    doc: StateDocument,
    transport: Transport,
}

/// Handle to one deployment's durable state
#[derive(Clone)]
pub struct State {
    inner: Arc<Mutex<StateInner>>,
}

impl State {
    /// Load the document at `uri`, creating a fresh one when absent.
    ///
    /// A document that exists but does not parse is always fatal - silently
    /// resetting would mask manual tampering and destroy the audit trail.
    pub fn load(uri: &str) -> Result<Self> {
        let transport = Transport::parse(uri)?;
        let (doc, created) = match transport.read()? {
            Some(content) => {
                let doc = serde_json::from_str(&content).map_err(|e| CdfError::StateCorrupt {
                    uri: transport.uri(),
                    reason: e.to_string(),
                })?;
                (doc, false)
            }
            None => (StateDocument::new(timestamp(), VERSION.to_string()), true),
        };
        let state = State {
            inner: Arc::new(Mutex::new(StateInner { doc, transport })),
        };
        if created {
            state.add_event("Created a state file", Some(EventStatus::Unknown), None, None)?;
        }
        Ok(state)
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn flush(inner: &StateInner) -> Result<()> {
        let json = serde_json::to_string(&inner.doc).map_err(|e| CdfError::StateCorrupt {
            uri: inner.transport.uri(),
            reason: e.to_string(),
        })?;
        inner.transport.write(&json)
    }

    /// Bind this state to a deployment identity and reconcile hook results
    /// against the live hook signature.
    ///
    /// Name and resource scope are immutable once set, unless the phase is
    /// `unknown` or `down`.
    pub fn setup(&self, name: &str, scope: &str, signature: &HookSignature) -> Result<()> {
        let mut inner = self.lock();
        let phase = inner.doc.phase;

        match &inner.doc.resource_scope {
            None => inner.doc.resource_scope = Some(scope.to_string()),
            Some(current) if current == scope || phase.allows_identity_change() => {
                inner.doc.resource_scope = Some(scope.to_string());
            }
            Some(current) => {
                return Err(CdfError::StateScopeChanged {
                    current: current.clone(),
                    requested: scope.to_string(),
                });
            }
        }

        match &inner.doc.deployment_name {
            None => inner.doc.deployment_name = Some(name.to_string()),
            Some(current) if current == name || phase.allows_identity_change() => {
                inner.doc.deployment_name = Some(name.to_string());
            }
            Some(current) => {
                return Err(CdfError::StateNameChanged {
                    current: current.clone(),
                    requested: name.to_string(),
                });
            }
        }

        warn_on_version_skew(&inner.doc.version);
        reconcile_hook_results(&mut inner.doc.hook_results, signature);
        Self::flush(&inner)
    }

    /// Append an event; a status-bearing event moves the status pointer, a
    /// phase-bearing one transitions the persisted phase first.
    pub fn add_event(
        &self,
        message: &str,
        status: Option<EventStatus>,
        phase: Option<DeployPhase>,
        hook: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.lock();
        if let Some(phase) = phase {
            inner.doc.phase = phase;
        }
        let event = Event {
            timestamp: timestamp(),
            phase: inner.doc.phase,
            message: message.to_string(),
            status,
            hook: hook.map(str::to_string),
        };
        inner.doc.events.push(event);
        if status.is_some() {
            inner.doc.status_pointer = inner.doc.events.len() as i64 - 1;
        }
        inner.doc.last_update = timestamp();
        Self::flush(&inner)
    }

    /// Record the start of a phase transition (a transient "going" marker)
    pub fn transition_to_phase(&self, phase: DeployPhase) -> Result<()> {
        self.add_event(
            &format!("Transitioning to {phase}"),
            Some(EventStatus::Pending),
            Some(phase),
            None,
        )
    }

    /// Record the outcome of a phase
    pub fn completed_phase(
        &self,
        phase: DeployPhase,
        status: EventStatus,
        msg: &str,
    ) -> Result<()> {
        match status {
            EventStatus::Success => self.add_event(
                &format!("Successfully reached {phase}. {msg}"),
                Some(EventStatus::Success),
                Some(phase),
                None,
            ),
            EventStatus::Error => self.add_event(
                &format!("Errored during {phase}. {msg}"),
                Some(EventStatus::Error),
                None,
                None,
            ),
            EventStatus::Failed => self.add_event(
                &format!("Failed during {phase}. {msg}"),
                Some(EventStatus::Failed),
                None,
                None,
            ),
            _ => Ok(()),
        }
    }

    /// Store the provisioning result; `None` leaves the side untouched
    pub fn set_result(&self, outputs: Option<Value>, resources: Option<Value>) -> Result<()> {
        let mut inner = self.lock();
        if let Some(outputs) = outputs {
            inner.doc.provisioning_result.outputs = outputs;
        }
        if let Some(resources) = resources {
            inner.doc.provisioning_result.resources = resources;
        }
        Self::flush(&inner)
    }

    /// Drop the stored provisioning result (after de-provisioning)
    pub fn clear_result(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.doc.provisioning_result = ProvisioningResult::empty();
        Self::flush(&inner)
    }

    /// Merge op data into `hookResults[hook][op]`, keeping existing keys the
    /// new data does not name
    pub fn set_hook_op_state(&self, hook: &str, op: &str, data: OpState) -> Result<()> {
        let mut inner = self.lock();
        let op_state = inner
            .doc
            .hook_results
            .entry(hook.to_string())
            .or_default()
            .entry(op.to_string())
            .or_default();
        for (key, value) in data {
            op_state.insert(key, value);
        }
        Self::flush(&inner)
    }

    /// Get-or-create scratch value: the first call persists `default`; every
    /// later call returns the persisted value regardless of its argument.
    pub fn store_get(&self, key: &str, default: Value) -> Result<Value> {
        let mut inner = self.lock();
        if let Some(existing) = inner.doc.scratch_store.get(key) {
            return Ok(existing.clone());
        }
        inner.doc.scratch_store.insert(key.to_string(), default.clone());
        Self::flush(&inner)?;
        Ok(default)
    }

    /// All hook results as a JSON value for the phase-2 scope
    pub fn hook_results(&self) -> Value {
        serde_json::to_value(&self.lock().doc.hook_results).unwrap_or_default()
    }

    /// The stored provisioning result as a JSON value for the phase-2 scope
    pub fn result(&self) -> Value {
        serde_json::to_value(&self.lock().doc.provisioning_result).unwrap_or_default()
    }

    pub fn phase(&self) -> DeployPhase {
        self.lock().doc.phase
    }

    pub fn uri(&self) -> String {
        self.lock().transport.uri()
    }

    /// Snapshot of the whole document (debug surface)
    pub fn document(&self) -> StateDocument {
        self.lock().doc.clone()
    }

    /// Event log, most recent first
    pub fn events(&self) -> Vec<Event> {
        let inner = self.lock();
        inner.doc.events.iter().rev().cloned().collect()
    }
}

/// Prune state entries for hooks/ops no longer configured (internal `_`
/// entries survive) and initialize missing ones empty.
fn reconcile_hook_results(results: &mut HookResults, signature: &HookSignature) {
    results.retain(|hook, _| signature.contains_key(hook));
    for (hook, ops) in results.iter_mut() {
        let declared = &signature[hook];
        ops.retain(|op, _| op.starts_with('_') || declared.contains(op));
    }
    for (hook, ops) in signature {
        let entry = results.entry(hook.clone()).or_default();
        for op in ops {
            entry.entry(op.clone()).or_default();
        }
    }
}

/// `major.minor.patch` parsed as a u64 triple; unparsable versions compare
/// as zero
fn version_triple(version: &str) -> (u64, u64, u64) {
    let mut parts = version.split('.').map(|p| p.parse::<u64>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

fn warn_on_version_skew(state_version: &str) {
    let state = version_triple(state_version);
    let current = version_triple(VERSION);
    if state < current {
        eprintln!(
            "Warning: state file version {state_version} is older than cdf {VERSION}; run 'up' to rewrite it"
        );
    } else if state > current {
        eprintln!(
            "Warning: state file version {state_version} is newer than cdf {VERSION}; upgrade cdf"
        );
    }
}
