//! Error types and handling for CDF
//!
//! Uses `thiserror` for error definitions and `miette` for pretty diagnostics.
//!
//! The taxonomy follows the failure domains of the pipeline: configuration,
//! interpolation (always tagged with resolution phase and caller context),
//! state transport, hook execution, provisioning and test expectations.

use miette::Diagnostic;
use thiserror::Error;

use crate::interpolate::Phase;

/// Main error type for CDF operations
#[derive(Error, Diagnostic, Debug)]
pub enum CdfError {
    // Configuration errors
    #[error("Config file not found: {path}")]
    #[diagnostic(
        code(cdf::config::not_found),
        help("Run cdf from the deployment directory or pass --config")
    )]
    ConfigNotFound { path: String },

    #[error("Failed to parse config file '{path}': {reason}")]
    #[diagnostic(code(cdf::config::parse_failed))]
    ConfigParseFailed { path: String, reason: String },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(cdf::config::invalid))]
    ConfigInvalid { message: String },

    #[error("Hook name '{name}' can't start with '_'")]
    #[diagnostic(
        code(cdf::config::reserved_name),
        help("Names starting with '_' are reserved for internal bookkeeping")
    )]
    ReservedHookName { name: String },

    #[error("Op name '{name}' in hook '{hook}' can't start with '_'")]
    #[diagnostic(code(cdf::config::reserved_name))]
    ReservedOpName { hook: String, name: String },

    #[error("Duplicate op name '{name}' in hook '{hook}'")]
    #[diagnostic(code(cdf::config::duplicate_op))]
    DuplicateOpName { hook: String, name: String },

    // Interpolation errors
    #[error("Interpolation syntax error in phase '{phase}', context '{context}': {reason}")]
    #[diagnostic(code(cdf::interpolate::syntax))]
    InterpolationSyntax {
        phase: Phase,
        context: String,
        reason: String,
    },

    #[error(
        "Interpolation error in phase '{phase}', context '{context}', undefined variable: {reason}"
    )]
    #[diagnostic(
        code(cdf::interpolate::undefined),
        help("Check the variable name, or whether it is only available after provisioning (result.*)")
    )]
    InterpolationUndefined {
        phase: Phase,
        context: String,
        reason: String,
    },

    #[error("Interpolation runtime error in phase '{phase}', context '{context}': {reason}")]
    #[diagnostic(code(cdf::interpolate::runtime))]
    InterpolationRuntime {
        phase: Phase,
        context: String,
        reason: String,
    },

    // State errors
    #[error("Unsupported scheme for state location '{uri}'")]
    #[diagnostic(
        code(cdf::state::unsupported_scheme),
        help("Supported schemes: file:// | http:// | https://")
    )]
    StateUnsupportedScheme { uri: String },

    #[error(
        "Error while reading/decoding state '{uri}'. Did you try to change it manually? {reason}"
    )]
    #[diagnostic(code(cdf::state::corrupt))]
    StateCorrupt { uri: String, reason: String },

    #[error("State transport failure for '{uri}': {reason}")]
    #[diagnostic(code(cdf::state::transport))]
    StateTransport { uri: String, reason: String },

    #[error("Resource scope already provisioned as '{current}', requested '{requested}'. Can't change the scope before destroying")]
    #[diagnostic(code(cdf::state::scope_changed))]
    StateScopeChanged { current: String, requested: String },

    #[error("State has deployment name '{current}', config requests '{requested}'. Can't change the name before destroying")]
    #[diagnostic(code(cdf::state::name_changed))]
    StateNameChanged { current: String, requested: String },

    // Hook errors
    #[error("Unknown hook name '{name}'. Supported hooks: {supported}")]
    #[diagnostic(code(cdf::hook::unknown))]
    UnknownHook { name: String, supported: String },

    #[error("Call recursion limit reached ({depth}) hook: {hook}")]
    #[diagnostic(
        code(cdf::hook::recursion_limit),
        help("Check for call-type ops forming a loop between hooks")
    )]
    HookRecursionLimit { hook: String, depth: usize },

    #[error("Not a known boolean evaluation of condition for hook '{hook}', expression '{expression}'")]
    #[diagnostic(code(cdf::hook::unrecognized_condition))]
    UnrecognizedCondition { hook: String, expression: String },

    #[error("Failed during {kind} execution in op '{op}' in hook '{hook}'.\n{reason}")]
    #[diagnostic(code(cdf::hook::op_failed))]
    HookOpFailed {
        hook: String,
        op: String,
        kind: String,
        reason: String,
    },

    // Provisioner errors
    #[error("Provisioner error: {message}")]
    #[diagnostic(code(cdf::provisioner::failed))]
    ProvisionerFailed { message: String },

    // Test errors
    #[error("Test '{test}' failed with msg '{msg}'")]
    #[diagnostic(code(cdf::test::failed))]
    TestFailed { test: String, msg: String },

    #[error("At least one test failed")]
    #[diagnostic(code(cdf::test::matrix_failed))]
    TestMatrixFailed,

    // Process execution errors
    #[error("Run command error. {message}")]
    #[diagnostic(code(cdf::process::run_failed))]
    CommandFailed { message: String },

    // File system errors
    #[error("Failed to read file '{path}': {reason}")]
    #[diagnostic(code(cdf::fs::read_failed))]
    FileReadFailed { path: String, reason: String },

    #[error("Failed to write file '{path}': {reason}")]
    #[diagnostic(code(cdf::fs::write_failed))]
    FileWriteFailed { path: String, reason: String },

    #[error("Failed to create directory '{path}': {reason}")]
    #[diagnostic(code(cdf::fs::dir_create_failed))]
    DirCreateFailed { path: String, reason: String },

    #[error("Failed to remove directory '{path}': {reason}")]
    #[diagnostic(code(cdf::fs::dir_remove_failed))]
    DirRemoveFailed { path: String, reason: String },

    // Git errors (upgrade-path sources)
    #[error("Git operation failed: {message}")]
    #[diagnostic(code(cdf::git::operation_failed))]
    GitOperationFailed { message: String },

    #[error("Failed to clone repository '{url}': {reason}")]
    #[diagnostic(
        code(cdf::git::clone_failed),
        help("Check that the URL is correct and you have access to the repository")
    )]
    GitCloneFailed { url: String, reason: String },

    #[error("Failed to resolve git ref '{git_ref}': {reason}")]
    #[diagnostic(code(cdf::git::ref_resolve_failed))]
    GitRefResolveFailed { git_ref: String, reason: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(cdf::fs::io_error))]
    IoError { message: String },
}

impl From<std::io::Error> for CdfError {
    fn from(err: std::io::Error) -> Self {
        CdfError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<git2::Error> for CdfError {
    fn from(err: git2::Error) -> Self {
        CdfError::GitOperationFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias using miette for error handling
pub type Result<T> = miette::Result<T, CdfError>;
