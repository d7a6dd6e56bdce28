//! Built-in recorded operations.
//!
//! Each submodule wraps one family of impure calls with [`crate::intercept`]
//! so a host program gets record/replay for them out of the box. Kinds here
//! are also what the diff engine's per-kind normalizations target.

pub mod db;
pub mod env;
pub mod filesystem;
pub mod process;

use crate::envelope::Registry;

/// Directory name for the harness's own state. File operations under it are
/// never recorded; they reflect how the tool ran, not what the program did.
pub const STATE_DIR: &str = ".retrace";

/// Whether a file path belongs to the recorded program rather than to the
/// harness itself.
pub fn record_path(path: &str) -> bool {
    !std::path::Path::new(path)
        .components()
        .any(|component| component.as_os_str() == STATE_DIR)
}

/// Registers every built-in operation kind.
pub fn register_builtin_operations(registry: &mut Registry) {
    registry.register::<filesystem::LoadFile>();
    registry.register::<filesystem::WriteFile>();
    registry.register::<filesystem::FindMatching>();
    registry.register::<env::GetEnv>();
    registry.register::<process::RunCmd>();
    registry.register::<db::Query>();
}
