//! Host platform detection for op filtering
//!
//! Op platform filters use the names `linux`, `darwin` and `windows`.

/// Current platform name as used by op `platform` filters
pub fn current() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}
