//! Two-phase template resolution
//!
//! Configuration values are Jinja-style templates rendered against a layered
//! scope. The early phase knows only deploy-time facts (`cdf.*`, `env`,
//! `vars`, `params`); the late phase adds `result` (provisioning outputs and
//! resources) and `hooks` (persisted op results). Variables that reference
//! `result` before provisioning has run are deferred, not failed, and picked
//! up again once a result exists.
//!
//! Rendering is strict: any other undefined name is an error.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use minijinja::value::Value as TemplateValue;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use rand::Rng;
use serde_json::Value as Json;
use serde_yaml::Value as Yaml;

use crate::error::{CdfError, Result};
use crate::state::State;

/// Sentinel stored in `hooks.<name>._condition.ran`; exposed to templates as
/// `once` so `run_if: "{{ once }}"` means "run this hook at most one time"
pub const RUN_ONCE: &str = "_ONCE_ONCE_";

/// Resolution phase. Late-phase scope is a superset of the early one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Early,
    Late,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Early => write!(f, "early"),
            Phase::Late => write!(f, "late"),
        }
    }
}

type Scope = serde_json::Map<String, Json>;

pub struct Resolver {
    env: Environment<'static>,
    first_phase: Scope,
    second_phase: Scope,
    delayed_vars: Vec<String>,
    // Snapshot of the scope of the render in flight, for template_file
    shared_scope: Arc<Mutex<Json>>,
}

impl Resolver {
    pub fn new(version: &str, config_dir: &Path) -> Resolver {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        let shared_scope = Arc::new(Mutex::new(Json::Null));

        env.add_function("include_file", include_file);
        env.add_function("random_string", random_string);
        let scope_handle = Arc::clone(&shared_scope);
        env.add_function(
            "template_file",
            move |name: String| -> std::result::Result<String, minijinja::Error> {
                let content = include_file(name.clone())?;
                let snapshot = scope_handle
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .clone();
                let mut inner = Environment::new();
                inner.set_undefined_behavior(UndefinedBehavior::Strict);
                inner.render_str(&content, TemplateValue::from_serialize(&snapshot)).map_err(
                    |e| {
                        minijinja::Error::new(
                            ErrorKind::InvalidOperation,
                            format!("template_file argument '{name}' error. {e}"),
                        )
                    },
                )
            },
        );

        let mut cdf = Scope::new();
        cdf.insert("version".into(), Json::String(version.to_string()));
        cdf.insert(
            "config_dir".into(),
            Json::String(config_dir.display().to_string()),
        );
        cdf.insert(
            "platform".into(),
            Json::String(crate::platform::current().to_string()),
        );

        let environ: Scope = std::env::vars()
            .map(|(k, v)| (k, Json::String(v)))
            .collect();

        let mut first_phase = Scope::new();
        first_phase.insert("cdf".into(), Json::Object(cdf));
        first_phase.insert("env".into(), Json::Object(environ));
        first_phase.insert("vars".into(), Json::Object(Scope::new()));
        first_phase.insert("params".into(), Json::Object(Scope::new()));
        first_phase.insert("once".into(), Json::String(RUN_ONCE.to_string()));

        let mut second_phase = Scope::new();
        second_phase.insert(
            "result".into(),
            serde_json::json!({"outputs": {}, "resources": {}}),
        );
        second_phase.insert("hooks".into(), Json::Object(Scope::new()));

        Resolver {
            env,
            first_phase,
            second_phase,
            delayed_vars: Vec::new(),
            shared_scope,
        }
    }

    /// Make the durable scratch store reachable as `store(key, default)`
    pub fn bind_store(&mut self, state: &State) {
        let state = state.clone();
        self.env.add_function(
            "store",
            move |key: String,
                  default: Option<TemplateValue>|
                  -> std::result::Result<TemplateValue, minijinja::Error> {
                let default = match default {
                    Some(v) => serde_json::to_value(&v).map_err(|e| {
                        minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string())
                    })?,
                    None => Json::Null,
                };
                let value = state.store_get(&key, default).map_err(|e| {
                    minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string())
                })?;
                Ok(TemplateValue::from_serialize(&value))
            },
        );
    }

    /// Set one `cdf.*` fact (name, scope, location, tmp_dir)
    pub fn set_cdf(&mut self, key: &str, value: Json) {
        if let Some(Json::Object(cdf)) = self.first_phase.get_mut("cdf") {
            cdf.insert(key.to_string(), value);
        }
    }

    /// Replace the late-phase `result` scope
    pub fn update_result(&mut self, result: Json) {
        self.second_phase.insert("result".into(), result);
    }

    /// Replace the late-phase `hooks` scope
    pub fn update_hooks_result(&mut self, hooks: Json) {
        self.second_phase.insert("hooks".into(), hooks);
    }

    /// Keys whose resolution was deferred to the late phase
    pub fn delayed_vars(&self) -> &[String] {
        &self.delayed_vars
    }

    /// Resolve user variables in declaration order. A variable whose template
    /// references `result` and fails as undefined is recorded as delayed
    /// instead; every other undefined name is fatal.
    pub fn resolve_vars(&mut self, vars: &serde_yaml::Mapping) -> Result<()> {
        for (key, value) in vars {
            let key = mapping_key(key)?;
            let context = format!("variables in config '{key}'");
            match self.try_resolve(Phase::Early, value, &context)? {
                Some(resolved) => {
                    self.insert_var(&key, yaml_to_json(&resolved, &context)?);
                }
                None => self.delayed_vars.push(key),
            }
        }
        Ok(())
    }

    /// Late-phase pass over the variables deferred by [`resolve_vars`].
    ///
    /// Runs before every hook and provisioning attempt, so a variable whose
    /// `result` path still does not exist simply stays deferred; it only
    /// becomes an error when something consumes it.
    pub fn delayed_variable_interpolate(&mut self, vars: &serde_yaml::Mapping) -> Result<()> {
        let mut still_deferred = Vec::new();
        for key in self.delayed_vars.clone() {
            let Some(raw) = vars.get(key.as_str()) else {
                continue;
            };
            let context = format!("variables in config in delayed interpolate '{key}'");
            match self.try_resolve(Phase::Late, raw, &context)? {
                Some(resolved) => {
                    let json = yaml_to_json(&resolved, &context)?;
                    self.insert_var(&key, json);
                }
                None => still_deferred.push(key),
            }
        }
        self.delayed_vars = still_deferred;
        Ok(())
    }

    fn insert_var(&mut self, key: &str, value: Json) {
        if let Some(Json::Object(vars)) = self.first_phase.get_mut("vars") {
            vars.insert(key.to_string(), value);
        }
    }

    /// Resolve deploy parameters into the early scope; templates in params
    /// may themselves use `vars`, so this runs after variable resolution.
    pub fn resolve_params(&mut self, params: &serde_yaml::Mapping, phase: Phase) -> Result<()> {
        let mut resolved = Scope::new();
        for (key, value) in params {
            let key = mapping_key(key)?;
            let context = format!("params in config '{key}'");
            let rendered = self.resolve(phase, value, &context)?;
            resolved.insert(key, yaml_to_json(&rendered, &context)?);
        }
        self.first_phase
            .insert("params".into(), Json::Object(resolved));
        Ok(())
    }

    pub fn resolve(&self, phase: Phase, template: &Yaml, context: &str) -> Result<Yaml> {
        self.resolve_with(phase, template, context, &Scope::new())
    }

    /// Resolve with caller-supplied names layered on top of the phase scope
    /// (hook invocations put their argument list under `args`)
    pub fn resolve_with(
        &self,
        phase: Phase,
        template: &Yaml,
        context: &str,
        extra: &Scope,
    ) -> Result<Yaml> {
        let scope = self.build_scope(phase, extra);
        self.resolve_value(template, &scope, phase, context)
    }

    pub fn resolve_str(&self, phase: Phase, template: &str, context: &str) -> Result<String> {
        let scope = self.build_scope(phase, &Scope::new());
        self.render(template, &scope, phase, context)
    }

    pub fn resolve_str_with(
        &self,
        phase: Phase,
        template: &str,
        context: &str,
        extra: &Scope,
    ) -> Result<String> {
        let scope = self.build_scope(phase, extra);
        self.render(template, &scope, phase, context)
    }

    fn build_scope(&self, phase: Phase, extra: &Scope) -> Scope {
        let mut scope = Scope::new();
        if phase == Phase::Late {
            for (k, v) in &self.second_phase {
                scope.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in &self.first_phase {
            scope.insert(k.clone(), v.clone());
        }
        for (k, v) in extra {
            scope.insert(k.clone(), v.clone());
        }
        scope
    }

    fn resolve_value(
        &self,
        template: &Yaml,
        scope: &Scope,
        phase: Phase,
        context: &str,
    ) -> Result<Yaml> {
        match template {
            Yaml::String(s) => Ok(Yaml::String(self.render(s, scope, phase, context)?)),
            Yaml::Sequence(seq) => {
                let mut out = Vec::with_capacity(seq.len());
                for item in seq {
                    out.push(self.resolve_value(item, scope, phase, context)?);
                }
                Ok(Yaml::Sequence(out))
            }
            Yaml::Mapping(map) => {
                let mut out = serde_yaml::Mapping::new();
                for (key, value) in map {
                    out.insert(key.clone(), self.resolve_value(value, scope, phase, context)?);
                }
                Ok(Yaml::Mapping(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn render(&self, source: &str, scope: &Scope, phase: Phase, context: &str) -> Result<String> {
        self.render_raw(source, scope)
            .map_err(|e| map_template_error(&e, phase, context))
    }

    fn render_raw(
        &self,
        source: &str,
        scope: &Scope,
    ) -> std::result::Result<String, minijinja::Error> {
        *self
            .shared_scope
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) =
            Json::Object(scope.clone());
        let template = self.env.template_from_str(source)?;
        template.render(TemplateValue::from_serialize(&Json::Object(scope.clone())))
    }

    /// `Ok(None)` means the value is late-bound: rendering hit an undefined
    /// name and the template references `result`.
    fn try_resolve(&self, phase: Phase, template: &Yaml, context: &str) -> Result<Option<Yaml>> {
        let scope = self.build_scope(phase, &Scope::new());
        self.try_resolve_value(template, &scope, phase, context)
    }

    fn try_resolve_value(
        &self,
        template: &Yaml,
        scope: &Scope,
        phase: Phase,
        context: &str,
    ) -> Result<Option<Yaml>> {
        match template {
            Yaml::String(s) => match self.render_raw(s, scope) {
                Ok(rendered) => Ok(Some(Yaml::String(rendered))),
                Err(e) if e.kind() == ErrorKind::UndefinedError && self.mentions_result(s) => {
                    Ok(None)
                }
                Err(e) => Err(map_template_error(&e, phase, context)),
            },
            Yaml::Sequence(seq) => {
                let mut out = Vec::with_capacity(seq.len());
                for item in seq {
                    match self.try_resolve_value(item, scope, phase, context)? {
                        Some(v) => out.push(v),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Yaml::Sequence(out)))
            }
            Yaml::Mapping(map) => {
                let mut out = serde_yaml::Mapping::new();
                for (key, value) in map {
                    match self.try_resolve_value(value, scope, phase, context)? {
                        Some(v) => {
                            out.insert(key.clone(), v);
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some(Yaml::Mapping(out)))
            }
            other => Ok(Some(other.clone())),
        }
    }

    fn mentions_result(&self, source: &str) -> bool {
        self.env
            .template_from_str(source)
            .map(|t| t.undeclared_variables(false).contains("result"))
            .unwrap_or(false)
    }
}

fn map_template_error(err: &minijinja::Error, phase: Phase, context: &str) -> CdfError {
    match err.kind() {
        ErrorKind::SyntaxError => CdfError::InterpolationSyntax {
            phase,
            context: context.to_string(),
            reason: err.to_string(),
        },
        ErrorKind::UndefinedError => CdfError::InterpolationUndefined {
            phase,
            context: context.to_string(),
            reason: err.to_string(),
        },
        _ => CdfError::InterpolationRuntime {
            phase,
            context: context.to_string(),
            reason: err.to_string(),
        },
    }
}

fn mapping_key(key: &Yaml) -> Result<String> {
    match key {
        Yaml::String(s) => Ok(s.clone()),
        other => Err(CdfError::ConfigInvalid {
            message: format!("expected string key, got '{other:?}'"),
        }),
    }
}

fn yaml_to_json(value: &Yaml, context: &str) -> Result<Json> {
    serde_json::to_value(value).map_err(|e| CdfError::InterpolationRuntime {
        phase: Phase::Early,
        context: context.to_string(),
        reason: e.to_string(),
    })
}

fn include_file(name: String) -> std::result::Result<String, minijinja::Error> {
    std::fs::read_to_string(&name).map_err(|e| {
        minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("include_file argument '{name}' error. {e}"),
        )
    })
}

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn random_string(length: u32) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect()
}

/// Convenience for building extra-scope maps at hook call sites
pub fn extra_scope(pairs: Vec<(&str, Json)>) -> serde_json::Map<String, Json> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::State;
    use tempfile::TempDir;

    fn resolver() -> Resolver {
        Resolver::new("0.3.0", Path::new("/work/demo"))
    }

    fn vars(yaml: &str) -> serde_yaml::Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_cdf_facts_resolve_early() {
        let mut r = resolver();
        r.set_cdf("name", Json::String("demo".into()));
        let out = r
            .resolve_str(Phase::Early, "{{ cdf.name }}-{{ cdf.version }}", "key name")
            .unwrap();
        assert_eq!(out, "demo-0.3.0");
        assert_eq!(
            r.resolve_str(Phase::Early, "{{ cdf.config_dir }}", "t").unwrap(),
            "/work/demo"
        );
    }

    #[test]
    fn test_once_sentinel_in_scope() {
        let r = resolver();
        assert_eq!(
            r.resolve_str(Phase::Early, "{{ once }}", "run_if").unwrap(),
            RUN_ONCE
        );
    }

    #[test]
    fn test_undefined_variable_is_fatal() {
        let r = resolver();
        let err = r
            .resolve_str(Phase::Early, "{{ vars.missing }}", "key up")
            .unwrap_err();
        assert!(matches!(err, CdfError::InterpolationUndefined { .. }));
        assert!(err.to_string().contains("undefined variable"));
    }

    #[test]
    fn test_syntax_error_is_tagged() {
        let r = resolver();
        let err = r.resolve_str(Phase::Early, "{{ broken", "key up").unwrap_err();
        assert!(matches!(err, CdfError::InterpolationSyntax { .. }));
    }

    #[test]
    fn test_vars_resolve_in_order_and_chain() {
        let mut r = resolver();
        r.resolve_vars(&vars("a: hello\nb: \"{{ vars.a }} world\""))
            .unwrap();
        assert_eq!(
            r.resolve_str(Phase::Early, "{{ vars.b }}", "t").unwrap(),
            "hello world"
        );
        assert!(r.delayed_vars().is_empty());
    }

    #[test]
    fn test_result_reference_defers() {
        let mut r = resolver();
        r.resolve_vars(&vars("ip: \"{{ result.outputs.ip.value }}\""))
            .unwrap();
        assert_eq!(r.delayed_vars(), ["ip"]);

        r.update_result(serde_json::json!({
            "outputs": {"ip": {"value": "10.0.0.9"}},
            "resources": {},
        }));
        r.delayed_variable_interpolate(&vars("ip: \"{{ result.outputs.ip.value }}\""))
            .unwrap();
        assert_eq!(
            r.resolve_str(Phase::Late, "{{ vars.ip }}", "t").unwrap(),
            "10.0.0.9"
        );
    }

    #[test]
    fn test_chained_reference_to_delayed_var_is_fatal() {
        let mut r = resolver();
        let err = r
            .resolve_vars(&vars(
                "a: \"{{ result.outputs.x }}\"\nb: \"{{ vars.a }}\"",
            ))
            .unwrap_err();
        assert!(matches!(err, CdfError::InterpolationUndefined { .. }));
    }

    #[test]
    fn test_pure_cycle_fails_as_undefined() {
        let mut r = resolver();
        let err = r
            .resolve_vars(&vars("h: \"{{ vars.i }}\"\ni: \"{{ vars.h }}\""))
            .unwrap_err();
        assert!(err.to_string().contains("undefined variable"));
    }

    #[test]
    fn test_vars_can_reference_facts() {
        let mut r = resolver();
        r.set_cdf("name", Json::String("demo".into()));
        r.resolve_vars(&vars("a: 1\nf: \"{{ cdf.name }}\"")).unwrap();
        assert_eq!(
            r.resolve_str(Phase::Early, "{{ vars.a }}-{{ vars.f }}", "t")
                .unwrap(),
            "1-demo"
        );
    }

    #[test]
    fn test_resolution_is_repeatable() {
        let mut r = resolver();
        r.resolve_vars(&vars("a: stable")).unwrap();
        let first = r
            .resolve_str(Phase::Early, "{{ vars.a }}/{{ cdf.version }}", "t")
            .unwrap();
        let second = r
            .resolve_str(Phase::Early, "{{ vars.a }}/{{ cdf.version }}", "t")
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_late_scope_exposes_hooks() {
        let mut r = resolver();
        r.update_hooks_result(serde_json::json!({
            "build": {"compile": {"stdout": "ok"}}
        }));
        assert_eq!(
            r.resolve_str(Phase::Late, "{{ hooks.build.compile.stdout }}", "t")
                .unwrap(),
            "ok"
        );
        // Hooks are out of scope in the early phase
        assert!(r
            .resolve_str(Phase::Early, "{{ hooks.build.compile.stdout }}", "t")
            .is_err());
    }

    #[test]
    fn test_extra_scope_wins() {
        let r = resolver();
        let extra = extra_scope(vec![("args", serde_json::json!(["one", "two"]))]);
        assert_eq!(
            r.resolve_str_with(Phase::Late, "{{ args[1] }}", "hook args", &extra)
                .unwrap(),
            "two"
        );
    }

    #[test]
    fn test_nested_structures_resolve() {
        let mut r = resolver();
        r.resolve_vars(&vars("region: westeu")).unwrap();
        let template: Yaml =
            serde_yaml::from_str("[\"{{ vars.region }}\", {count: 3, loc: \"{{ vars.region }}\"}]")
                .unwrap();
        let out = r.resolve(Phase::Early, &template, "key params").unwrap();
        let expected: Yaml =
            serde_yaml::from_str("[westeu, {count: 3, loc: westeu}]").unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_random_string_length() {
        let r = resolver();
        let out = r
            .resolve_str(Phase::Early, "{{ random_string(12) }}", "t")
            .unwrap();
        assert_eq!(out.len(), 12);
        assert!(out.chars().all(|c| c.is_ascii_alphabetic()));
    }

    #[test]
    fn test_include_and_template_file() {
        let temp = TempDir::new().unwrap();
        let raw = temp.path().join("motd.txt");
        std::fs::write(&raw, "plain {{ not rendered }}").unwrap();
        let tpl = temp.path().join("greet.txt");
        std::fs::write(&tpl, "hi {{ vars.who }}").unwrap();

        let mut r = resolver();
        r.resolve_vars(&vars("who: ops")).unwrap();

        let out = r
            .resolve_str(
                Phase::Early,
                &format!("{{{{ include_file('{}') }}}}", raw.display()),
                "t",
            )
            .unwrap();
        assert_eq!(out, "plain {{ not rendered }}");

        let out = r
            .resolve_str(
                Phase::Early,
                &format!("{{{{ template_file('{}') }}}}", tpl.display()),
                "t",
            )
            .unwrap();
        assert_eq!(out, "hi ops");
    }

    #[test]
    fn test_store_is_sticky_across_renders() {
        let temp = TempDir::new().unwrap();
        let state =
            State::load(&format!("file://{}/state.json", temp.path().display())).unwrap();
        let mut r = resolver();
        r.bind_store(&state);
        let first = r
            .resolve_str(Phase::Early, "{{ store('suffix', 'abc') }}", "t")
            .unwrap();
        assert_eq!(first, "abc");
        let second = r
            .resolve_str(Phase::Early, "{{ store('suffix', 'zzz') }}", "t")
            .unwrap();
        assert_eq!(second, "abc");
    }

    #[test]
    #[serial_test::serial]
    fn test_process_env_snapshot_at_construction() {
        // SAFETY: serialized, no other thread reads the environment here
        unsafe { std::env::set_var("CDF_TEST_REGION", "westeu") };
        let r = resolver();
        unsafe { std::env::remove_var("CDF_TEST_REGION") };
        // The scope holds the snapshot taken in the constructor
        assert_eq!(
            r.resolve_str(Phase::Early, "{{ env.CDF_TEST_REGION }}", "t")
                .unwrap(),
            "westeu"
        );
    }

    #[test]
    fn test_params_resolve_after_vars() {
        let mut r = resolver();
        r.resolve_vars(&vars("size: large")).unwrap();
        r.resolve_params(&vars("sku: \"{{ vars.size }}\"\ncount: 2"), Phase::Early)
            .unwrap();
        assert_eq!(
            r.resolve_str(Phase::Early, "{{ params.sku }}-{{ params.count }}", "t")
                .unwrap(),
            "large-2"
        );
    }
}
