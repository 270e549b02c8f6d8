//! Infrastructure provisioner drivers
//!
//! A provisioner takes the resolved artifact directory plus deployment
//! parameters and converges real infrastructure, reporting outputs and
//! resources back for the state document and the late-phase scope.

mod terraform;

use std::path::Path;

use serde_json::Value as Json;

use crate::error::{CdfError, Result};

pub use terraform::TerraformProvisioner;

/// Everything a driver needs for one operation
pub struct ProvisionRequest<'a> {
    pub deployment_name: &'a str,
    /// Directory holding the IaC artifact (resolved `up`, or the config dir)
    pub artifact_dir: &'a Path,
    pub tmp_dir: &'a Path,
    pub params: serde_json::Map<String, Json>,
    /// Replace-all deployment mode
    pub complete: bool,
}

pub struct ProvisionOutcome {
    pub outputs: Json,
    pub resources: Json,
}

/// Pending-change counts from a dry-run diff
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiffCounts {
    pub add: u64,
    pub change: u64,
    pub destroy: u64,
}

pub trait Provisioner {
    fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionOutcome>;
    fn deprovision(&self, request: &ProvisionRequest) -> Result<()>;
    fn diff(&self, request: &ProvisionRequest) -> Result<DiffCounts>;
}

/// Driver lookup by config `provisioner` value
pub fn for_name(name: &str) -> Result<Box<dyn Provisioner>> {
    match name {
        "terraform" => Ok(Box::new(TerraformProvisioner)),
        other => Err(CdfError::ProvisionerFailed {
            message: format!("unsupported provisioner '{other}', supported: terraform"),
        }),
    }
}

/// The artifact dir is the resolved `up` value when present (relative paths
/// are anchored at the config dir), otherwise the config dir itself.
pub fn artifact_dir(up: Option<&str>, config_dir: &Path) -> std::path::PathBuf {
    match up {
        Some(up) => {
            let path = Path::new(up);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                config_dir.join(path)
            }
        }
        None => config_dir.to_path_buf(),
    }
}
