//! Terraform driver
//!
//! State lives under the engine tmp dir as `<deployment>.tfstate`, params
//! are passed through a generated var file, and every invocation is
//! non-interactive (`-input=false -auto-approve -no-color`).

use std::path::{Path, PathBuf};

use serde_json::Value as Json;

use crate::common::process::run_command;
use crate::error::{CdfError, Result};

use super::{DiffCounts, ProvisionOutcome, ProvisionRequest, Provisioner};

pub struct TerraformProvisioner;

impl TerraformProvisioner {
    fn state_arg(request: &ProvisionRequest) -> String {
        format!(
            "-state={}/{}.tfstate",
            request.tmp_dir.display(),
            request.deployment_name
        )
    }

    /// Write the var file when params exist; returns its path
    fn write_vars_file(request: &ProvisionRequest) -> Result<Option<PathBuf>> {
        if request.params.is_empty() {
            return Ok(None);
        }
        let path = request.tmp_dir.join("terraformvars.json");
        let content = serde_json::to_string(&request.params).map_err(|e| {
            CdfError::ProvisionerFailed {
                message: format!("failed to serialize deployment params: {e}"),
            }
        })?;
        crate::common::fs::write_content(&path, &content)?;
        Ok(Some(path))
    }

    fn run(args: &[String], cwd: &Path) -> Result<(String, String)> {
        run_command("terraform", args, false, Some(cwd)).map_err(|e| {
            CdfError::ProvisionerFailed {
                message: e.to_string(),
            }
        })
    }

    fn converge(verb: &str, request: &ProvisionRequest) -> Result<()> {
        Self::run(&["init".into(), "-no-color".into()], request.artifact_dir)?;
        let mut args = vec![
            verb.to_string(),
            "-input=false".to_string(),
            Self::state_arg(request),
            "-auto-approve".to_string(),
            "-no-color".to_string(),
        ];
        if let Some(vars_file) = Self::write_vars_file(request)? {
            args.push("-var-file".to_string());
            args.push(vars_file.display().to_string());
        }
        Self::run(&args, request.artifact_dir)?;
        Ok(())
    }
}

impl Provisioner for TerraformProvisioner {
    fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionOutcome> {
        Self::converge("apply", request)?;
        let (stdout, _) = Self::run(
            &[
                "output".to_string(),
                Self::state_arg(request),
                "-json".to_string(),
            ],
            request.artifact_dir,
        )?;
        let outputs: Json =
            serde_json::from_str(&stdout).map_err(|e| CdfError::ProvisionerFailed {
                message: format!("error while decoding terraform output json: {e}"),
            })?;
        Ok(ProvisionOutcome {
            outputs,
            resources: Json::Object(serde_json::Map::new()),
        })
    }

    fn deprovision(&self, request: &ProvisionRequest) -> Result<()> {
        Self::converge("destroy", request)
    }

    fn diff(&self, request: &ProvisionRequest) -> Result<DiffCounts> {
        Self::run(&["init".into(), "-no-color".into()], request.artifact_dir)?;
        let mut args = vec![
            "plan".to_string(),
            "-input=false".to_string(),
            Self::state_arg(request),
            "-no-color".to_string(),
        ];
        if let Some(vars_file) = Self::write_vars_file(request)? {
            args.push("-var-file".to_string());
            args.push(vars_file.display().to_string());
        }
        let (stdout, _) = Self::run(&args, request.artifact_dir)?;
        Ok(parse_plan_summary(&stdout))
    }
}

/// Extract counts from the `Plan: X to add, Y to change, Z to destroy.`
/// summary line; "No changes" plans have no such line and count as all-zero.
fn parse_plan_summary(stdout: &str) -> DiffCounts {
    for line in stdout.lines() {
        let Some(rest) = line.trim().strip_prefix("Plan:") else {
            continue;
        };
        let mut counts = DiffCounts::default();
        for chunk in rest.split(',') {
            let mut words = chunk.split_whitespace();
            let Some(count) = words.next().and_then(|w| w.parse::<u64>().ok()) else {
                continue;
            };
            match words.last() {
                Some(verb) if verb.starts_with("add") => counts.add = count,
                Some(verb) if verb.starts_with("change") => counts.change = count,
                Some(verb) if verb.starts_with("destroy") => counts.destroy = count,
                _ => {}
            }
        }
        return counts;
    }
    DiffCounts::default()
}
