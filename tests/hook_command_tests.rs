//! Integration tests for the hook command

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

use common::TestDeployment;

fn cdf_cmd() -> Command {
    Command::cargo_bin("cdf").unwrap()
}

const MINIMAL: &str = "name: demo\nscope: rg-demo\nlocation: eastus2\n";

#[test]
fn test_hook_without_name_lists_hooks() {
    let deployment = TestDeployment::new();
    deployment.write_config(&format!(
        "{MINIMAL}hooks:\n  smoke:\n    description: probe the deployment\n    ops:\n      - args: ok\n        type: print\n"
    ));
    cdf_cmd()
        .current_dir(&deployment.path)
        .arg("hook")
        .assert()
        .success()
        .stdout(predicate::str::contains("smoke"))
        .stdout(predicate::str::contains("probe the deployment"));
}

#[test]
fn test_hook_without_name_no_hooks() {
    let deployment = TestDeployment::new();
    deployment.write_config(MINIMAL);
    cdf_cmd()
        .current_dir(&deployment.path)
        .arg("hook")
        .assert()
        .success()
        .stdout(predicate::str::contains("No hooks configured"));
}

#[test]
fn test_unknown_hook_fails() {
    let deployment = TestDeployment::new();
    deployment.write_config(MINIMAL);
    cdf_cmd()
        .current_dir(&deployment.path)
        .args(["hook", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown hook name 'ghost'"));
}

#[test]
fn test_print_op_emits_resolved_text() {
    let deployment = TestDeployment::new();
    deployment.write_config(&format!(
        "{MINIMAL}hooks:\n  greet:\n    ops:\n      - args: \"deployment {{{{ cdf.name }}}} in {{{{ cdf.location }}}}\"\n        type: print\n"
    ));
    cdf_cmd()
        .current_dir(&deployment.path)
        .args(["hook", "greet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deployment demo in eastus2"));
}

#[test]
fn test_call_time_args_reach_templates() {
    let deployment = TestDeployment::new();
    deployment.write_config(&format!(
        "{MINIMAL}hooks:\n  greet:\n    ops:\n      - args: \"hi {{{{ args[1] }}}}\"\n        type: print\n"
    ));
    cdf_cmd()
        .current_dir(&deployment.path)
        .args(["hook", "greet", "bob"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hi bob"));
}

#[test]
fn test_named_op_output_persisted_in_state() {
    let deployment = TestDeployment::new();
    deployment.write_config(&format!(
        "{MINIMAL}hooks:\n  build:\n    ops:\n      - name: version\n        type: cmd\n        args: echo v1\n"
    ));
    cdf_cmd()
        .current_dir(&deployment.path)
        .args(["hook", "build"])
        .assert()
        .success();

    let state = deployment.state_json();
    assert_eq!(state["hookResults"]["build"]["version"]["stdout"], "v1\n");
    assert_eq!(state["hookResults"]["build"]["_condition"]["ran"], true);
}

#[test]
fn test_later_op_sees_earlier_output() {
    let deployment = TestDeployment::new();
    deployment.write_config(&format!(
        "{MINIMAL}hooks:\n  chain:\n    ops:\n      - name: first\n        type: cmd\n        args: echo alpha\n      - args: \"saw {{{{ hooks.chain.first.stdout | trim }}}}\"\n        type: print\n"
    ));
    cdf_cmd()
        .current_dir(&deployment.path)
        .args(["hook", "chain"])
        .assert()
        .success()
        .stdout(predicate::str::contains("saw alpha"));
}

#[test]
fn test_false_condition_skips_without_error() {
    let deployment = TestDeployment::new();
    deployment.write_config(&format!(
        "{MINIMAL}hooks:\n  gated:\n    run_if: \"false\"\n    ops:\n      - args: never\n        type: print\n"
    ));
    cdf_cmd()
        .current_dir(&deployment.path)
        .args(["hook", "gated"])
        .assert()
        .success()
        .stdout(predicate::str::contains("never").not());

    let state = deployment.state_json();
    let skipped = state["events"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["message"].as_str().unwrap().contains("Skipping"));
    assert!(skipped);
}

#[test]
fn test_once_condition_runs_single_time() {
    let deployment = TestDeployment::new();
    deployment.write_config(&format!(
        "{MINIMAL}hooks:\n  init:\n    run_if: \"once\"\n    ops:\n      - name: seed\n        type: cmd\n        args: echo seeded\n"
    ));
    cdf_cmd()
        .current_dir(&deployment.path)
        .args(["hook", "init"])
        .assert()
        .success();
    // Second invocation evaluates the persisted ran flag and skips
    cdf_cmd()
        .current_dir(&deployment.path)
        .args(["hook", "init"])
        .assert()
        .success();

    let state = deployment.state_json();
    let finished = state["events"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["message"].as_str().unwrap().contains("Finished running hook"))
        .count();
    assert_eq!(finished, 1);
}

#[test]
fn test_unrecognized_condition_is_fatal() {
    let deployment = TestDeployment::new();
    deployment.write_config(&format!(
        "{MINIMAL}hooks:\n  odd:\n    run_if: \"maybe\"\n    ops:\n      - args: x\n        type: print\n"
    ));
    cdf_cmd()
        .current_dir(&deployment.path)
        .args(["hook", "odd"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not a known boolean evaluation"));
}

#[test]
fn test_failing_op_exits_nonzero_and_logs() {
    let deployment = TestDeployment::new();
    deployment.write_config(&format!(
        "{MINIMAL}hooks:\n  broken:\n    ops:\n      - args: \"false\"\n        type: cmd\n"
    ));
    cdf_cmd()
        .current_dir(&deployment.path)
        .args(["hook", "broken"])
        .assert()
        .failure();

    let state = deployment.state_json();
    let errored = state["events"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["message"].as_str().unwrap().contains("Error during hook execution"));
    assert!(errored);
}

#[test]
fn test_script_op_interpolates_and_runs() {
    let deployment = TestDeployment::new();
    deployment.write_file("scripts/report.sh", "#!/bin/sh\necho \"from {{ cdf.name }}\"\n");
    deployment.write_config(&format!(
        "{MINIMAL}hooks:\n  report:\n    ops:\n      - name: say\n        type: script\n        args: scripts/report.sh\n"
    ));
    cdf_cmd()
        .current_dir(&deployment.path)
        .args(["hook", "report"])
        .assert()
        .success();

    let state = deployment.state_json();
    assert_eq!(state["hookResults"]["report"]["say"]["stdout"], "from demo\n");
    // The interpolated copy is staged into the tmp dir
    assert!(deployment.file_exists(".cdf_tmp/report.sh"));
    assert!(deployment.read_file(".cdf_tmp/report.sh").contains("from demo"));
}

#[test]
fn test_hook_recursion_limit() {
    let deployment = TestDeployment::new();
    deployment.write_config(&format!(
        "{MINIMAL}hooks:\n  ping:\n    ops:\n      - args: pong\n        type: call\n  pong:\n    ops:\n      - args: ping\n        type: call\n"
    ));
    cdf_cmd()
        .current_dir(&deployment.path)
        .args(["hook", "ping"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("recursion limit"));
}

#[test]
fn test_store_function_is_sticky() {
    let deployment = TestDeployment::new();
    deployment.write_config(&format!(
        "{MINIMAL}hooks:\n  token:\n    ops:\n      - args: \"token {{{{ store('k', 'first') }}}}\"\n        type: print\n"
    ));
    cdf_cmd()
        .current_dir(&deployment.path)
        .args(["hook", "token"])
        .assert()
        .success()
        .stdout(predicate::str::contains("token first"));

    // A different default later still returns the persisted value
    deployment.write_config(&format!(
        "{MINIMAL}hooks:\n  token:\n    ops:\n      - args: \"token {{{{ store('k', 'second') }}}}\"\n        type: print\n"
    ));
    cdf_cmd()
        .current_dir(&deployment.path)
        .args(["hook", "token"])
        .assert()
        .success()
        .stdout(predicate::str::contains("token first"));
}
