//! Hook execution
//!
//! A hook is a conditional pipeline of ops. Execution order is declaration
//! order, every op runs (a failure aborts the rest), and `call` ops may
//! invoke other hooks up to a fixed recursion depth. Op args and cwd resolve
//! in the late phase so they can see `result`, `hooks` and the invocation
//! `args`.

use std::path::{Path, PathBuf};

use serde_json::Value as Json;
use serde_yaml::Value as Yaml;

use crate::common::{fs, process};
use crate::config::{HookDef, OpKind, OpMode, Trigger};
use crate::engine::Engine;
use crate::error::{CdfError, Result};
use crate::interpolate::{extra_scope, Phase, RUN_ONCE};

/// Maximum depth of `call`-type op chains
pub const RECURSION_LIMIT: usize = 5;

const TRUTHY: [&str; 5] = ["true", "1", "t", "y", "yes"];
const FALSY: [&str; 5] = ["false", "0", "f", "n", "no"];

/// Run every hook attached to `trigger`, in declaration order
pub fn run_lifecycle(engine: &mut Engine, trigger: Trigger) -> Result<()> {
    let attached: Vec<String> = engine
        .config()
        .hooks
        .iter()
        .filter(|(_, hook)| hook.lifecycle.matches(trigger))
        .map(|(name, _)| name.clone())
        .collect();
    for name in attached {
        run_hook(engine, &[name])?;
    }
    Ok(())
}

/// Run one hook by name; `hook_args[1..]` become the template `args`
pub fn run_hook(engine: &mut Engine, hook_args: &[String]) -> Result<()> {
    let hook_name = hook_args[0].clone();
    if !engine.config().hooks.contains(&hook_name) {
        return Err(CdfError::UnknownHook {
            name: hook_name,
            supported: format!("{:?}", engine.config().hooks.names()),
        });
    }

    engine.delayed_variable_interpolate()?;
    let extra = extra_scope(vec![("args", serde_json::json!(hook_args))]);

    engine.state().add_event(
        &format!("Running hook. hook args '{:?}'", &hook_args[1..]),
        None,
        None,
        Some(&hook_name),
    )?;
    match run_hook_inner(engine, &hook_name, 1, &extra) {
        Ok(true) => {
            engine
                .state()
                .add_event("Finished running hook", None, None, Some(&hook_name))?;
            let mut condition = crate::state::OpState::new();
            condition.insert("ran".to_string(), Json::Bool(true));
            engine
                .state()
                .set_hook_op_state(&hook_name, "_condition", condition)?;
            engine.refresh_hooks_scope();
            Ok(())
        }
        Ok(false) => engine.state().add_event(
            "Skipping running hook, condition evaluated to false",
            None,
            None,
            Some(&hook_name),
        ),
        Err(e) => {
            engine.state().add_event(
                &format!("Error during hook execution {e}"),
                None,
                None,
                Some(&hook_name),
            )?;
            Err(e)
        }
    }
}

type Extra = serde_json::Map<String, Json>;

/// Returns false when the run_if condition vetoed the hook
fn run_hook_inner(
    engine: &mut Engine,
    hook_name: &str,
    depth: usize,
    extra: &Extra,
) -> Result<bool> {
    if depth > RECURSION_LIMIT {
        return Err(CdfError::HookRecursionLimit {
            hook: hook_name.to_string(),
            depth: depth - 1,
        });
    }
    let Some(hook) = engine.config().hooks.get(hook_name).cloned() else {
        return Err(CdfError::UnknownHook {
            name: hook_name.to_string(),
            supported: format!("{:?}", engine.config().hooks.names()),
        });
    };

    if !evaluate_condition(engine, hook_name, &hook, extra)? {
        return Ok(false);
    }

    let platform = crate::platform::current();
    for (position, op) in hook.ops.iter().enumerate() {
        let label = op.label(position + 1);
        if !op.platform.allows(platform) {
            continue;
        }

        let context = format!("op interpolation '{label}' in hook '{hook_name}'");
        let args = engine
            .resolver()
            .resolve_with(Phase::Late, &op.args, &context, extra)?;
        let cwd = match &op.cwd {
            Some(cwd) => Some(engine.resolver().resolve_str_with(
                Phase::Late,
                cwd,
                &format!("cwd interpolation '{label}' in hook '{hook_name}'"),
                extra,
            )?),
            None => None,
        };
        let cwd = cwd.map(PathBuf::from);
        let interactive = op.mode == OpMode::Interactive;

        let (stdout, stderr) = match op.kind {
            OpKind::Tool => run_tool(engine, hook_name, &label, &args, cwd.as_deref())?,
            OpKind::Cmd => {
                run_cmd(hook_name, &label, &args, interactive, cwd.as_deref())?
            }
            OpKind::Script => {
                run_script(engine, hook_name, &label, &args, interactive, cwd.as_deref(), extra)?
            }
            OpKind::Print => {
                let text = args_display(&args);
                println!("{text}");
                (text, String::new())
            }
            OpKind::Call => {
                let target = args_display(&args).trim().to_string();
                run_hook_inner(engine, &target, depth + 1, extra)?;
                (String::new(), String::new())
            }
        };

        if let Some(op_name) = &op.name {
            let mut data = crate::state::OpState::new();
            data.insert("stdout".to_string(), Json::String(stdout));
            data.insert("stderr".to_string(), Json::String(stderr));
            engine.state().set_hook_op_state(hook_name, op_name, data)?;
            // Later ops in this very hook can read the fresh output
            engine.refresh_hooks_scope();
        }
    }
    Ok(true)
}

fn evaluate_condition(
    engine: &Engine,
    hook_name: &str,
    hook: &HookDef,
    extra: &Extra,
) -> Result<bool> {
    let rendered = engine.resolver().resolve_str_with(
        Phase::Late,
        &hook.run_if,
        &format!("condition evaluation for hook '{hook_name}'"),
        extra,
    )?;
    let rendered = rendered.trim();
    let lowered = rendered.to_lowercase();
    if TRUTHY.contains(&lowered.as_str()) {
        return Ok(true);
    }
    if FALSY.contains(&lowered.as_str()) {
        return Ok(false);
    }
    if lowered == "once" || rendered.contains(RUN_ONCE) {
        let results = engine.state().hook_results();
        let ran = results
            .get(hook_name)
            .and_then(|h| h.get("_condition"))
            .and_then(|c| c.get("ran"))
            .and_then(Json::as_bool)
            .unwrap_or(false);
        return Ok(!ran);
    }
    Err(CdfError::UnrecognizedCondition {
        hook: hook_name.to_string(),
        expression: rendered.to_string(),
    })
}

fn run_tool(
    engine: &Engine,
    hook_name: &str,
    label: &str,
    args: &Yaml,
    cwd: Option<&Path>,
) -> Result<(String, String)> {
    let Some(tool) = engine.config().tool.clone() else {
        return Err(CdfError::ConfigInvalid {
            message: format!(
                "op '{label}' in hook '{hook_name}' has type tool but no 'tool' binary is configured"
            ),
        });
    };
    let argv = arg_vec(args)?;
    process::run_command(&tool, &argv, false, cwd).map_err(|e| CdfError::HookOpFailed {
        hook: hook_name.to_string(),
        op: label.to_string(),
        kind: OpKind::Tool.as_str().to_string(),
        reason: e.to_string(),
    })
}

fn run_cmd(
    hook_name: &str,
    label: &str,
    args: &Yaml,
    interactive: bool,
    cwd: Option<&Path>,
) -> Result<(String, String)> {
    let argv = arg_vec(args)?;
    let Some((bin, rest)) = argv.split_first() else {
        return Err(CdfError::HookOpFailed {
            hook: hook_name.to_string(),
            op: label.to_string(),
            kind: OpKind::Cmd.as_str().to_string(),
            reason: "empty command".to_string(),
        });
    };
    process::run_command(bin, rest, interactive, cwd).map_err(|e| CdfError::HookOpFailed {
        hook: hook_name.to_string(),
        op: label.to_string(),
        kind: OpKind::Cmd.as_str().to_string(),
        reason: e.to_string(),
    })
}

/// Interpolate the script into the tmp dir, mark it executable, run it
fn run_script(
    engine: &Engine,
    hook_name: &str,
    label: &str,
    args: &Yaml,
    interactive: bool,
    cwd: Option<&Path>,
    extra: &Extra,
) -> Result<(String, String)> {
    let argv = arg_vec(args)?;
    let Some((script, rest)) = argv.split_first() else {
        return Err(CdfError::HookOpFailed {
            hook: hook_name.to_string(),
            op: label.to_string(),
            kind: OpKind::Script.as_str().to_string(),
            reason: "empty script args".to_string(),
        });
    };
    let source = Path::new(script);
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| script.clone());
    let target = engine.tmp_dir().join(file_name);
    let content = fs::read_content(source)?;
    let content = engine.resolver().resolve_str_with(
        Phase::Late,
        &content,
        &format!("interpolating script op '{script}'"),
        extra,
    )?;
    fs::write_content(&target, &content)?;
    fs::make_executable(&target)?;

    // Invocation args after the hook name travel on to the script
    let mut argv: Vec<String> = rest.to_vec();
    if let Some(call_args) = extra.get("args").and_then(Json::as_array) {
        argv.extend(
            call_args
                .iter()
                .skip(1)
                .filter_map(Json::as_str)
                .map(str::to_string),
        );
    }

    process::run_command(&target.display().to_string(), &argv, interactive, cwd).map_err(|e| {
        CdfError::HookOpFailed {
            hook: hook_name.to_string(),
            op: label.to_string(),
            kind: OpKind::Script.as_str().to_string(),
            reason: e.to_string(),
        }
    })
}

/// Resolved args as an argv: a string is shell-split, a list is literal
fn arg_vec(args: &Yaml) -> Result<Vec<String>> {
    match args {
        Yaml::String(s) => process::split_args(s),
        Yaml::Sequence(seq) => seq.iter().map(scalar_string).collect(),
        other => Err(CdfError::ConfigInvalid {
            message: format!("op args must be a string or a list, got '{other:?}'"),
        }),
    }
}

fn scalar_string(value: &Yaml) -> Result<String> {
    match value {
        Yaml::String(s) => Ok(s.clone()),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Bool(b) => Ok(b.to_string()),
        other => Err(CdfError::ConfigInvalid {
            message: format!("op arg items must be scalars, got '{other:?}'"),
        }),
    }
}

fn args_display(args: &Yaml) -> String {
    match args {
        Yaml::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
