//! Deployment lifecycle coordination
//!
//! `up` and `down` sequence the same skeleton: record the transient phase,
//! run the late template pass, fire the pre hooks, converge infrastructure,
//! persist the outcome, then fire the post hooks. Provisioner failures are
//! recorded as error events and re-raised unchanged.

use crate::config::Trigger;
use crate::engine::Engine;
use crate::error::Result;
use crate::hooks;
use crate::provision::{self, DiffCounts, ProvisionRequest, Provisioner};
use crate::state::{DeployPhase, EventStatus};

pub fn up(engine: &mut Engine) -> Result<()> {
    let driver = provision::for_name(&engine.config().provisioner)?;
    up_with(engine, driver.as_ref())
}

pub fn up_with(engine: &mut Engine, driver: &dyn Provisioner) -> Result<()> {
    engine.state().transition_to_phase(DeployPhase::GoingUp)?;
    hooks::run_lifecycle(engine, Trigger::PreUp)?;
    engine.delayed_up_interpolate()?;

    if let Err(e) = converge(engine, driver) {
        engine.state().add_event(
            &format!("Errored during up phase: {e}"),
            Some(EventStatus::Error),
            None,
            None,
        )?;
        return Err(e);
    }

    engine
        .state()
        .completed_phase(DeployPhase::Up, EventStatus::Success, "")?;
    hooks::run_lifecycle(engine, Trigger::PostUp)
}

pub fn down(engine: &mut Engine) -> Result<()> {
    let driver = provision::for_name(&engine.config().provisioner)?;
    down_with(engine, driver.as_ref())
}

pub fn down_with(engine: &mut Engine, driver: &dyn Provisioner) -> Result<()> {
    engine.state().transition_to_phase(DeployPhase::GoingDown)?;
    hooks::run_lifecycle(engine, Trigger::PreDown)?;
    engine.delayed_up_interpolate()?;

    if let Err(e) = diverge(engine, driver) {
        engine.state().add_event(
            &format!("Errored during down phase: {e}"),
            Some(EventStatus::Error),
            None,
            None,
        )?;
        return Err(e);
    }

    engine
        .state()
        .completed_phase(DeployPhase::Down, EventStatus::Success, "")?;
    hooks::run_lifecycle(engine, Trigger::PostDown)
}

/// Dry-run diff against the configured artifact
pub fn plan(engine: &mut Engine) -> Result<DiffCounts> {
    let driver = provision::for_name(&engine.config().provisioner)?;
    plan_with(engine, driver.as_ref())
}

pub fn plan_with(engine: &mut Engine, driver: &dyn Provisioner) -> Result<DiffCounts> {
    engine.delayed_up_interpolate()?;
    let params = engine.resolved_params()?;
    let artifact = provision::artifact_dir(engine.up_artifact(), engine.config_dir());
    let request = ProvisionRequest {
        deployment_name: engine.name(),
        artifact_dir: &artifact,
        tmp_dir: engine.tmp_dir(),
        params,
        complete: engine.config().complete_deployment,
    };
    driver.diff(&request)
}

fn converge(engine: &mut Engine, driver: &dyn Provisioner) -> Result<()> {
    let params = engine.resolved_params()?;
    let artifact = provision::artifact_dir(engine.up_artifact(), engine.config_dir());
    let request = ProvisionRequest {
        deployment_name: engine.name(),
        artifact_dir: &artifact,
        tmp_dir: engine.tmp_dir(),
        params,
        complete: engine.config().complete_deployment,
    };
    let outcome = driver.provision(&request)?;
    engine
        .state()
        .set_result(Some(outcome.outputs), Some(outcome.resources))?;
    engine.refresh_result_scope();
    Ok(())
}

fn diverge(engine: &mut Engine, driver: &dyn Provisioner) -> Result<()> {
    let params = engine.resolved_params()?;
    let artifact = provision::artifact_dir(engine.up_artifact(), engine.config_dir());
    let request = ProvisionRequest {
        deployment_name: engine.name(),
        artifact_dir: &artifact,
        tmp_dir: engine.tmp_dir(),
        params,
        complete: engine.config().complete_deployment,
    };
    driver.deprovision(&request)?;
    // The result is stale the moment resources are gone
    engine.state().clear_result()?;
    engine.refresh_result_scope();
    Ok(())
}
