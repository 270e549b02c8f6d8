//! Test/upgrade matrix runner
//!
//! Runs each requested test against every applicable upgrade column:
//! `fresh` (provision the current revision from scratch) plus each declared
//! upgrade path (provision a prior revision first, then converge the current
//! one in place). Scenarios are fully isolated from the real deployment and
//! from each other through per-scenario state files under the tmp dir.

pub mod expect;
pub mod upgrade;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::common::fs;
use crate::config::{
    CdfConfig, DownStrategy, ExpectSpec, PlanExpect, TestSpec, Trigger, UpgradeSpec,
    UpgradeStrategy, FRESH_UPGRADE,
};
use crate::engine::{Engine, EngineOptions};
use crate::error::{CdfError, Result};
use crate::hooks;
use crate::interpolate::{Phase, Resolver};
use crate::lifecycle;
use crate::provision::{self, Provisioner};
use crate::state;

use upgrade::UpgradeCache;

#[derive(Debug, Clone, Default)]
pub struct TestRunOptions {
    /// Requested test names; empty means every declared test
    pub tests: Vec<String>,
    pub exit_on_first_error: bool,
    pub down_strategy: DownStrategy,
    pub upgrade_strategy: UpgradeStrategy,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseOutcome {
    pub phase: String,
    pub failed: bool,
    pub msg: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub upgrade: String,
    pub test: String,
    pub failed: bool,
    pub phases: Vec<PhaseOutcome>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MatrixResult {
    pub scenarios: Vec<ScenarioResult>,
}

impl MatrixResult {
    pub fn failed(&self) -> bool {
        self.scenarios.iter().any(|s| s.failed)
    }
}

/// Provisioner lookup seam so the matrix can run against a stub
pub type DriverFactory<'a> = &'a dyn Fn(&str) -> Result<Box<dyn Provisioner>>;

pub fn run_tests(config_path: &Path, options: &TestRunOptions) -> Result<MatrixResult> {
    run_tests_with(config_path, options, &provision::for_name)
}

pub fn run_tests_with(
    config_path: &Path,
    options: &TestRunOptions,
    factory: DriverFactory,
) -> Result<MatrixResult> {
    let base = CdfConfig::load(config_path)?;
    let config_dir = fs::real_dirname(config_path);

    // Scenario state files live under the resolved tmp dir; the real
    // deployment's state is never touched by a test run
    let resolver = Resolver::new(state::VERSION, &config_dir);
    let tmp_dir = PathBuf::from(resolver.resolve_str(Phase::Early, &base.tmp_dir, "key tmp_dir")?);
    fs::create_dir(&tmp_dir)?;

    let selected = selected_tests(&base, &options.tests)?;
    let mut cache = UpgradeCache::new(tmp_dir.join("upgrades"));
    let mut matrix = MatrixResult::default();

    for upgrade_name in upgrade_columns(&base, options.upgrade_strategy) {
        let upgrade_spec = base
            .upgrades
            .iter()
            .find(|u| u.name == upgrade_name)
            .cloned();
        for test_name in &selected {
            let spec = base
                .tests
                .get(test_name)
                .cloned()
                .unwrap_or_default();
            if !column_applies(&spec, options.upgrade_strategy, &upgrade_name) {
                continue;
            }
            let scenario = run_scenario(
                config_path,
                &base,
                test_name,
                &spec,
                &upgrade_name,
                upgrade_spec.as_ref(),
                &tmp_dir,
                &config_dir,
                &mut cache,
                options,
                factory,
            )?;
            matrix.scenarios.push(scenario);
        }
    }
    Ok(matrix)
}

fn selected_tests(base: &CdfConfig, requested: &[String]) -> Result<Vec<String>> {
    if requested.is_empty() {
        return Ok(base.tests.names());
    }
    for name in requested {
        if !base.tests.contains(name) {
            return Err(CdfError::ConfigInvalid {
                message: format!(
                    "unknown test '{}', declared tests: {:?}",
                    name,
                    base.tests.names()
                ),
            });
        }
    }
    Ok(requested.to_vec())
}

/// Matrix columns under the global strategy; per-test strategy filters later
fn upgrade_columns(base: &CdfConfig, strategy: UpgradeStrategy) -> Vec<String> {
    let declared: Vec<String> = base.upgrades.iter().map(|u| u.name.clone()).collect();
    match strategy {
        UpgradeStrategy::Fresh => vec![FRESH_UPGRADE.to_string()],
        UpgradeStrategy::Upgrade => declared,
        UpgradeStrategy::All => {
            let mut columns = vec![FRESH_UPGRADE.to_string()];
            columns.extend(declared);
            columns
        }
    }
}

fn column_applies(spec: &TestSpec, global: UpgradeStrategy, upgrade_name: &str) -> bool {
    let effective = spec.upgrade_strategy.unwrap_or(global);
    match effective {
        UpgradeStrategy::All => true,
        UpgradeStrategy::Fresh => upgrade_name == FRESH_UPGRADE,
        UpgradeStrategy::Upgrade => upgrade_name != FRESH_UPGRADE,
    }
}

struct ScenarioRecorder {
    test: String,
    phases: Vec<PhaseOutcome>,
    failed: bool,
    exit_on_first_error: bool,
    // Held back so cleanup still runs for the aborting scenario
    abort: Option<CdfError>,
}

impl ScenarioRecorder {
    /// Record one phase; returns false when the scenario must stop
    fn record(
        &mut self,
        phase: &str,
        outcome: std::result::Result<(), CdfError>,
        expect_fail: bool,
    ) -> bool {
        let (actual_failed, detail) = match &outcome {
            Ok(()) => (false, String::new()),
            Err(e) => (true, e.to_string()),
        };
        let matched = actual_failed == expect_fail;
        let msg = if matched {
            String::new()
        } else if actual_failed {
            format!("Failed during testing {phase}. {detail}")
        } else {
            format!("Expected {phase} to fail but it succeeded")
        };
        self.phases.push(PhaseOutcome {
            phase: phase.to_string(),
            failed: !matched,
            msg: msg.clone(),
        });
        if !matched {
            self.failed = true;
            if self.exit_on_first_error && self.abort.is_none() {
                self.abort = Some(CdfError::TestFailed {
                    test: self.test.clone(),
                    msg,
                });
            }
        }
        matched
    }
}

#[allow(clippy::too_many_arguments)]
fn run_scenario(
    config_path: &Path,
    base: &CdfConfig,
    test_name: &str,
    spec: &TestSpec,
    upgrade_name: &str,
    upgrade_spec: Option<&UpgradeSpec>,
    tmp_dir: &Path,
    config_dir: &Path,
    cache: &mut UpgradeCache,
    options: &TestRunOptions,
    factory: DriverFactory,
) -> Result<ScenarioResult> {
    let mut rec = ScenarioRecorder {
        test: test_name.to_string(),
        phases: Vec::new(),
        failed: false,
        exit_on_first_error: options.exit_on_first_error,
        abort: None,
    };

    let state_file = tmp_dir.join(format!("test_{upgrade_name}_{test_name}_state.json"));
    // Every run starts from a clean slate
    let _ = std::fs::remove_file(&state_file);
    let engine_options = EngineOptions {
        state_uri: Some(format!("file://{}", state_file.display())),
        remove_tmp: false,
    };

    // Upgrade columns first provision the prior revision in place
    if let Some(upgrade) = upgrade_spec {
        let seeded = seed_prior_revision(
            config_path,
            upgrade,
            test_name,
            config_dir,
            cache,
            &engine_options,
            factory,
        );
        if !rec.record("provisioning", seeded, false) {
            cleanup(None, options, &mut rec);
            return finish(rec, upgrade_name, test_name);
        }
    }

    let mut config = base.clone();
    config.apply_test_overrides(spec);
    config.name = format!("{}_{}_test", config.name, test_name);

    let mut engine = match Engine::from_config(config_path, config, &engine_options) {
        Ok(engine) => engine,
        Err(e) => {
            rec.record("provisioning", Err(e), false);
            return finish(rec, upgrade_name, test_name);
        }
    };
    let driver = factory(&engine.config().provisioner)?;

    if !rec.record(
        "pre-test hooks",
        hooks::run_lifecycle(&mut engine, Trigger::PreTest),
        false,
    ) {
        cleanup(Some((&mut engine, driver.as_ref())), options, &mut rec);
        return finish(rec, upgrade_name, test_name);
    }

    if let Some(plan) = &spec.expect.plan {
        let outcome = check_plan(&mut engine, driver.as_ref(), test_name, plan);
        if !rec.record("plan expect", outcome, plan.expect_fail) {
            cleanup(Some((&mut engine, driver.as_ref())), options, &mut rec);
            return finish(rec, upgrade_name, test_name);
        }
    }

    let up_expect = spec.expect.up.clone().unwrap_or_default();
    let up_outcome = lifecycle::up_with(&mut engine, driver.as_ref());
    let up_failed = up_outcome.is_err();
    if !rec.record("provisioning", up_outcome, up_expect.expect_fail) {
        cleanup(Some((&mut engine, driver.as_ref())), options, &mut rec);
        return finish(rec, upgrade_name, test_name);
    }
    if !up_failed && has_checks(&up_expect) {
        let outcome = expect::check(&mut engine, test_name, &up_expect);
        if !rec.record("provision expect", outcome, false) {
            cleanup(Some((&mut engine, driver.as_ref())), options, &mut rec);
            return finish(rec, upgrade_name, test_name);
        }
    }

    for (hook_name, hook_expect) in spec.expect.hooks.0.clone() {
        let phase = format!("hook {hook_name}");
        let outcome = hooks::run_hook(&mut engine, &[hook_name.clone()]);
        let hook_failed = outcome.is_err();
        if !rec.record(&phase, outcome, hook_expect.expect_fail) {
            cleanup(Some((&mut engine, driver.as_ref())), options, &mut rec);
            return finish(rec, upgrade_name, test_name);
        }
        if !hook_failed && has_checks(&hook_expect) {
            let outcome = expect::check(&mut engine, test_name, &hook_expect);
            if !rec.record(&format!("{phase} expect"), outcome, false) {
                cleanup(Some((&mut engine, driver.as_ref())), options, &mut rec);
                return finish(rec, upgrade_name, test_name);
            }
        }
    }

    if options.down_strategy != DownStrategy::Never {
        let down_expect = spec.expect.down.clone().unwrap_or_default();
        let down_outcome = lifecycle::down_with(&mut engine, driver.as_ref());
        let down_failed = down_outcome.is_err();
        if !rec.record("de-provisioning", down_outcome, down_expect.expect_fail) {
            return finish(rec, upgrade_name, test_name);
        }
        if !down_failed && has_checks(&down_expect) {
            rec.record(
                "de-provision expect",
                expect::check(&mut engine, test_name, &down_expect),
                false,
            );
        }
    }

    rec.record(
        "post-test hooks",
        hooks::run_lifecycle(&mut engine, Trigger::PostTest),
        false,
    );

    finish(rec, upgrade_name, test_name)
}

fn finish(
    mut rec: ScenarioRecorder,
    upgrade_name: &str,
    test_name: &str,
) -> Result<ScenarioResult> {
    if let Some(abort) = rec.abort.take() {
        return Err(abort);
    }
    Ok(ScenarioResult {
        upgrade: upgrade_name.to_string(),
        test: test_name.to_string(),
        failed: rec.failed,
        phases: rec.phases,
    })
}

/// Out-of-band de-provision after a mismatch, per cleanup policy. Failures
/// here are warnings, never verdict changes.
fn cleanup(
    engine: Option<(&mut Engine, &dyn Provisioner)>,
    options: &TestRunOptions,
    rec: &mut ScenarioRecorder,
) {
    if options.down_strategy != DownStrategy::Always || !rec.failed {
        return;
    }
    let Some((engine, driver)) = engine else {
        return;
    };
    if let Err(e) = lifecycle::down_with(engine, driver) {
        eprintln!(
            "Warning: failed to clean up test '{}' after error: {e}",
            rec.test
        );
    }
}

fn has_checks(spec: &ExpectSpec) -> bool {
    !spec.asserts.is_empty() || !spec.cmds.is_empty() || spec.runner.is_some()
}

fn check_plan(
    engine: &mut Engine,
    driver: &dyn Provisioner,
    test_name: &str,
    plan: &PlanExpect,
) -> std::result::Result<(), CdfError> {
    let counts = lifecycle::plan_with(engine, driver)?;
    let checks = [
        ("add", plan.add, counts.add),
        ("change", plan.change, counts.change),
        ("destroy", plan.destroy, counts.destroy),
    ];
    for (label, declared, actual) in checks {
        if let Some(declared) = declared {
            if declared != actual {
                return Err(CdfError::TestFailed {
                    test: test_name.to_string(),
                    msg: format!("plan expected {declared} to {label}, got {actual}"),
                });
            }
        }
    }
    Ok(())
}

/// Provision the prior revision against the scenario's state file so the
/// real run upgrades the same deployment in place
fn seed_prior_revision(
    config_path: &Path,
    upgrade: &UpgradeSpec,
    test_name: &str,
    config_dir: &Path,
    cache: &mut UpgradeCache,
    engine_options: &EngineOptions,
    factory: DriverFactory,
) -> std::result::Result<(), CdfError> {
    let revision_dir = cache.revision_dir(upgrade, config_dir)?;
    let config_name = config_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| crate::config::CONFIG_DEFAULT.to_string());
    let seed_path = revision_dir.join(config_name);

    let mut seed_config = CdfConfig::load(&seed_path)?;
    if let Some(seed_spec) = seed_config.tests.get(&upgrade.from_expect).cloned() {
        seed_config.apply_test_overrides(&seed_spec);
    }
    seed_config.name = format!("{}_{}_test", seed_config.name, test_name);

    let mut engine = Engine::from_config(&seed_path, seed_config, engine_options)?;
    let driver = factory(&engine.config().provisioner)?;
    lifecycle::up_with(&mut engine, driver.as_ref())
}
