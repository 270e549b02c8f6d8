//! Expectation checks for test phases
//!
//! Three check styles, all optional per phase: interpolated boolean
//! assertions, literal commands (nonzero exit is a failure), and an external
//! runner command applied once or once per file matching a glob. The runner
//! child sees the deployment identity as `CDF_NAME`/`CDF_SCOPE`/
//! `CDF_LOCATION`.

use std::path::{Path, PathBuf};

use wax::Pattern;

use crate::common::process;
use crate::config::{ExpectSpec, RunnerSpec};
use crate::engine::Engine;
use crate::error::{CdfError, Result};
use crate::interpolate::Phase;

const TRUTHY: [&str; 5] = ["true", "1", "t", "y", "yes"];
const FALSY: [&str; 5] = ["false", "0", "f", "n", "no"];

/// Run every declared check; the first mismatch fails the phase
pub fn check(engine: &mut Engine, test: &str, spec: &ExpectSpec) -> Result<()> {
    engine.delayed_variable_interpolate()?;

    for assertion in &spec.asserts {
        check_assert(engine, test, assertion)?;
    }
    for cmd in &spec.cmds {
        check_cmd(test, cmd)?;
    }
    if let Some(runner) = &spec.runner {
        check_runner(engine, test, runner)?;
    }
    Ok(())
}

fn check_assert(engine: &Engine, test: &str, assertion: &str) -> Result<()> {
    let rendered = engine.resolver().resolve_str(
        Phase::Late,
        assertion,
        &format!("assert expectation in test '{test}'"),
    )?;
    let lowered = rendered.trim().to_lowercase();
    if TRUTHY.contains(&lowered.as_str()) {
        return Ok(());
    }
    if FALSY.contains(&lowered.as_str()) {
        return Err(CdfError::TestFailed {
            test: test.to_string(),
            msg: format!("assert '{assertion}' evaluated to '{rendered}'"),
        });
    }
    Err(CdfError::TestFailed {
        test: test.to_string(),
        msg: format!("assert '{assertion}' is not a boolean, evaluated to '{rendered}'"),
    })
}

fn check_cmd(test: &str, cmd: &str) -> Result<()> {
    let argv = process::split_args(cmd)?;
    let Some((bin, rest)) = argv.split_first() else {
        return Err(CdfError::TestFailed {
            test: test.to_string(),
            msg: "empty expectation command".to_string(),
        });
    };
    process::run_command(bin, rest, false, None).map_err(|e| CdfError::TestFailed {
        test: test.to_string(),
        msg: format!("cmd '{cmd}' failed: {e}"),
    })?;
    Ok(())
}

fn check_runner(engine: &mut Engine, test: &str, runner: &RunnerSpec) -> Result<()> {
    let cmd = engine.resolver().resolve_str(
        Phase::Late,
        &runner.cmd,
        &format!("runner expectation in test '{test}'"),
    )?;
    let argv = process::split_args(&cmd)?;
    let Some((bin, rest)) = argv.split_first() else {
        return Err(CdfError::TestFailed {
            test: test.to_string(),
            msg: "empty runner command".to_string(),
        });
    };
    let identity = identity_env(engine);

    match &runner.files {
        None => run_runner(test, bin, rest, None, &identity),
        Some(dir) => {
            for file in matching_files(Path::new(dir), &runner.filter)? {
                run_runner(test, bin, rest, Some(&file), &identity)?;
            }
            Ok(())
        }
    }
}

fn run_runner(
    test: &str,
    bin: &str,
    args: &[String],
    file: Option<&Path>,
    envs: &[(String, String)],
) -> Result<()> {
    let mut argv = args.to_vec();
    if let Some(file) = file {
        argv.push(file.display().to_string());
    }
    process::run_command_env(bin, &argv, false, None, envs).map_err(|e| CdfError::TestFailed {
        test: test.to_string(),
        msg: format!("runner '{bin}' failed: {e}"),
    })?;
    Ok(())
}

fn identity_env(engine: &Engine) -> Vec<(String, String)> {
    vec![
        ("CDF_NAME".to_string(), engine.name().to_string()),
        ("CDF_SCOPE".to_string(), engine.scope().to_string()),
        ("CDF_LOCATION".to_string(), engine.location().to_string()),
    ]
}

/// Direct children of `dir` (files only, not recursive) whose name matches
/// the glob, as absolute paths in stable order
fn matching_files(dir: &Path, filter: &str) -> Result<Vec<PathBuf>> {
    let glob = wax::Glob::new(filter).map_err(|e| CdfError::ConfigInvalid {
        message: format!("invalid runner filter '{filter}': {e}"),
    })?;
    let mut matches = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| CdfError::FileReadFailed {
        path: dir.display().to_string(),
        reason: e.to_string(),
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| CdfError::FileReadFailed {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if glob.is_match(name.as_str()) {
            matches.push(path.canonicalize().unwrap_or(path));
        }
    }
    matches.sort();
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineOptions;
    use tempfile::TempDir;

    fn engine_with(temp: &TempDir, extra_yaml: &str) -> Engine {
        let path = temp.path().join(".cdf.yml");
        std::fs::write(
            &path,
            format!("name: demo\nscope: rg\nlocation: eastus2\n{extra_yaml}"),
        )
        .unwrap();
        Engine::bootstrap(&path, &EngineOptions::default()).unwrap()
    }

    fn spec(yaml: &str) -> ExpectSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_assert_against_result_scope() {
        let temp = TempDir::new().unwrap();
        let mut engine = engine_with(&temp, "");
        engine
            .state()
            .set_result(Some(serde_json::json!({"ok": {"value": true}})), None)
            .unwrap();
        engine.refresh_result_scope();
        check(
            &mut engine,
            "t1",
            &spec("assert: \"{{ result.outputs.ok.value }}\"\n"),
        )
        .unwrap();
    }

    #[test]
    fn test_false_assert_fails_with_detail() {
        let temp = TempDir::new().unwrap();
        let mut engine = engine_with(&temp, "");
        let err = check(&mut engine, "t1", &spec("assert: \"{{ 1 == 2 }}\"\n")).unwrap_err();
        assert!(matches!(err, CdfError::TestFailed { .. }));
        assert!(err.to_string().contains("t1"));
    }

    #[test]
    fn test_non_boolean_assert_fails() {
        let temp = TempDir::new().unwrap();
        let mut engine = engine_with(&temp, "");
        let err = check(&mut engine, "t1", &spec("assert: \"banana\"\n")).unwrap_err();
        assert!(err.to_string().contains("not a boolean"));
    }

    #[cfg(unix)]
    #[test]
    fn test_cmd_exit_codes() {
        let temp = TempDir::new().unwrap();
        let mut engine = engine_with(&temp, "");
        check(&mut engine, "t1", &spec("cmd: \"true\"\n")).unwrap();
        assert!(check(&mut engine, "t1", &spec("cmd: \"false\"\n")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_runner_per_file_with_identity_env() {
        let temp = TempDir::new().unwrap();
        let cases = temp.path().join("cases");
        std::fs::create_dir(&cases).unwrap();
        std::fs::write(cases.join("a_test.txt"), "").unwrap();
        std::fs::write(cases.join("b_test.txt"), "").unwrap();
        std::fs::write(cases.join("skip.log"), "").unwrap();
        let log = temp.path().join("ran.log");

        let script = temp.path().join("runner.sh");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho \"$CDF_NAME $1\" >> {}\n", log.display()),
        )
        .unwrap();
        crate::common::fs::make_executable(&script).unwrap();

        let mut engine = engine_with(&temp, "");
        let runner_yaml = format!(
            "runner:\n  cmd: \"{}\"\n  files: \"{}\"\n  filter: \"*_test.txt\"\n",
            script.display(),
            cases.display()
        );
        check(&mut engine, "t1", &spec(&runner_yaml)).unwrap();

        let logged = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = logged.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("demo "));
        assert!(lines[0].ends_with("a_test.txt"));
        assert!(lines[1].ends_with("b_test.txt"));
        assert!(!logged.contains("skip.log"));
    }

    #[test]
    fn test_matching_files_direct_children_only() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("one_test.txt"), "").unwrap();
        std::fs::create_dir(temp.path().join("nested")).unwrap();
        std::fs::write(temp.path().join("nested/two_test.txt"), "").unwrap();
        let files = matching_files(temp.path(), "*_test.txt").unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].is_absolute());
    }
}
