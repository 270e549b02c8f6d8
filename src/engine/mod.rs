//! Engine bootstrap
//!
//! Ties config, resolver and state together in a fixed order: templated
//! config values resolve one at a time, and each resolved fact becomes
//! available to the values after it (`tmp_dir` before the state location,
//! the state store before `name`, `name` and `vars` before `scope`,
//! `location` and `up`).

use std::path::{Path, PathBuf};

use serde_json::Value as Json;

use crate::common::fs;
use crate::config::CdfConfig;
use crate::error::Result;
use crate::interpolate::{Phase, Resolver};
use crate::state::{self, State};

/// Bootstrap knobs coming from the CLI or the test runner
#[derive(Debug, Default, Clone)]
pub struct EngineOptions {
    /// Overrides the configured state location entirely
    pub state_uri: Option<String>,
    /// Recreate the tmp dir from scratch
    pub remove_tmp: bool,
}

pub struct Engine {
    config: CdfConfig,
    config_dir: PathBuf,
    resolver: Resolver,
    state: State,
    tmp_dir: PathBuf,
    name: String,
    scope: String,
    location: String,
    up: Option<String>,
}

impl Engine {
    pub fn bootstrap(config_path: &Path, options: &EngineOptions) -> Result<Engine> {
        let config = CdfConfig::load(config_path)?;
        Engine::from_config(config_path, config, options)
    }

    /// Bootstrap from an already-loaded (possibly test-overridden) config
    pub fn from_config(
        config_path: &Path,
        config: CdfConfig,
        options: &EngineOptions,
    ) -> Result<Engine> {
        let config_dir = fs::real_dirname(config_path);
        let mut resolver = Resolver::new(state::VERSION, &config_dir);

        let tmp_dir_str = resolver.resolve_str(Phase::Early, &config.tmp_dir, "key tmp_dir")?;
        let tmp_dir = PathBuf::from(&tmp_dir_str);
        if options.remove_tmp {
            fs::remove_dir(&tmp_dir)?;
        }
        fs::create_dir(&tmp_dir)?;
        resolver.set_cdf("tmp_dir", Json::String(tmp_dir_str));

        let state_uri = match &options.state_uri {
            Some(uri) => uri.clone(),
            None => {
                let filename =
                    resolver.resolve_str(Phase::Early, &config.state_filename, "key state_filename")?;
                let path =
                    resolver.resolve_str(Phase::Early, &config.state_path, "key state_path")?;
                format!("{}/{}", path.trim_end_matches('/'), filename)
            }
        };
        let state = State::load(&state_uri)?;
        resolver.bind_store(&state);

        let name = resolver.resolve_str(Phase::Early, &config.name, "key name")?;
        resolver.set_cdf("name", Json::String(name.clone()));

        resolver.resolve_vars(&config.vars)?;

        let scope = resolver.resolve_str(Phase::Early, &config.scope, "key scope")?;
        resolver.set_cdf("scope", Json::String(scope.clone()));
        let location = resolver.resolve_str(Phase::Early, &config.location, "key location")?;
        resolver.set_cdf("location", Json::String(location.clone()));

        let up = match &config.up {
            Some(up) => Some(resolver.resolve_str(Phase::Early, up, "key up")?),
            None => None,
        };

        state.setup(&name, &scope, &config.hook_signature())?;

        // Seed the late-phase scope from whatever the last run persisted
        resolver.update_result(state.result());
        resolver.update_hooks_result(state.hook_results());

        Ok(Engine {
            config,
            config_dir,
            resolver,
            state,
            tmp_dir,
            name,
            scope,
            location,
            up,
        })
    }

    pub fn config(&self) -> &CdfConfig {
        &self.config
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Resolved artifact location handed to the provisioner
    pub fn up_artifact(&self) -> Option<&str> {
        self.up.as_deref()
    }

    /// Resolve the deferred variables now that a provisioning result (or
    /// fresh hook output) exists
    pub fn delayed_variable_interpolate(&mut self) -> Result<()> {
        let vars = self.config.vars.clone();
        self.resolver.delayed_variable_interpolate(&vars)
    }

    /// Full late re-pass before provisioning: deferred vars, then params
    pub fn delayed_up_interpolate(&mut self) -> Result<()> {
        self.delayed_variable_interpolate()?;
        let params = self.config.params.clone();
        self.resolver.resolve_params(&params, Phase::Late)
    }

    /// Deployment parameters as JSON for the provisioner var file
    pub fn resolved_params(&mut self) -> Result<serde_json::Map<String, Json>> {
        let params = self.config.params.clone();
        let resolved = self
            .resolver
            .resolve(Phase::Late, &serde_yaml::Value::Mapping(params), "key params")?;
        match serde_json::to_value(&resolved) {
            Ok(Json::Object(map)) => Ok(map),
            _ => Ok(serde_json::Map::new()),
        }
    }

    /// Republish persisted hook results into the late-phase scope
    pub fn refresh_hooks_scope(&mut self) {
        let hooks = self.state.hook_results();
        self.resolver.update_hooks_result(hooks);
    }

    /// Republish the persisted provisioning result into the late-phase scope
    pub fn refresh_result_scope(&mut self) {
        let result = self.state.result();
        self.resolver.update_result(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DeployPhase;
    use std::fs as stdfs;
    use tempfile::TempDir;

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join(".cdf.yml");
        stdfs::write(&path, content).unwrap();
        path
    }

    const MINIMAL: &str = "name: demo\nscope: rg-demo\nlocation: eastus2\n";

    #[test]
    fn test_bootstrap_creates_tmp_and_state() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), MINIMAL);
        let engine = Engine::bootstrap(&path, &EngineOptions::default()).unwrap();
        assert_eq!(engine.name(), "demo");
        assert_eq!(engine.scope(), "rg-demo");
        assert!(engine.tmp_dir().is_dir());
        assert!(engine.tmp_dir().join("state.json").is_file());
        assert_eq!(engine.state().phase(), DeployPhase::Unknown);
    }

    #[test]
    fn test_bootstrap_resolves_templated_identity() {
        let temp = TempDir::new().unwrap();
        let yaml = "name: \"demo-{{ vars.env }}\"\nscope: \"rg-{{ cdf.name }}\"\nlocation: eastus2\nvars:\n  env: staging\n";
        // name resolves before scope, so cdf.name is visible there
        let path = write_config(temp.path(), yaml);
        let engine = Engine::bootstrap(&path, &EngineOptions::default()).unwrap();
        assert_eq!(engine.name(), "demo-staging");
        assert_eq!(engine.scope(), "rg-demo-staging");
    }

    #[test]
    fn test_state_uri_override_wins() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), MINIMAL);
        let custom = temp.path().join("elsewhere.json");
        let options = EngineOptions {
            state_uri: Some(format!("file://{}", custom.display())),
            remove_tmp: false,
        };
        let _engine = Engine::bootstrap(&path, &options).unwrap();
        assert!(custom.is_file());
        assert!(!temp.path().join(".cdf_tmp/state.json").exists());
    }

    #[test]
    fn test_result_vars_defer_until_up() {
        let temp = TempDir::new().unwrap();
        let yaml = format!("{MINIMAL}vars:\n  ip: \"{{{{ result.outputs.ip.value }}}}\"\n");
        let path = write_config(temp.path(), &yaml);
        let mut engine = Engine::bootstrap(&path, &EngineOptions::default()).unwrap();
        assert_eq!(engine.resolver().delayed_vars(), ["ip"]);

        engine
            .state()
            .set_result(
                Some(serde_json::json!({"ip": {"value": "10.1.1.1"}})),
                None,
            )
            .unwrap();
        engine.refresh_result_scope();
        engine.delayed_variable_interpolate().unwrap();
        assert_eq!(
            engine
                .resolver()
                .resolve_str(Phase::Late, "{{ vars.ip }}", "t")
                .unwrap(),
            "10.1.1.1"
        );
    }

    #[test]
    fn test_identity_survives_restart() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), MINIMAL);
        {
            let engine = Engine::bootstrap(&path, &EngineOptions::default()).unwrap();
            engine.state().transition_to_phase(DeployPhase::Up).unwrap();
        }
        // Renaming a live deployment is rejected at bootstrap
        stdfs::write(&path, "name: other\nscope: rg-demo\nlocation: eastus2\n").unwrap();
        assert!(matches!(
            Engine::bootstrap(&path, &EngineOptions::default()),
            Err(crate::error::CdfError::StateNameChanged { .. })
        ));
    }
}
