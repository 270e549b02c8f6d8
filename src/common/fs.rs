//! Common file system operations with unified error handling

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CdfError, Result};

/// Read the full content of a file
pub fn read_content(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| CdfError::FileReadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Write content to a file, creating parent directories as needed
pub fn write_content(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, content).map_err(|e| CdfError::FileWriteFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Create a directory and its parents, no-op when it already exists
pub fn create_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|e| CdfError::DirCreateFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Remove a directory tree, no-op when it does not exist
pub fn remove_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Ok(());
    }
    fs::remove_dir_all(path).map_err(|e| CdfError::DirRemoveFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Directory containing a file path, resolved through symlinks
pub fn real_dirname(path: &Path) -> PathBuf {
    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    resolved
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Mark a file as executable by owner/group/other (no-op on Windows)
pub fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o755);
        fs::set_permissions(path, perms).map_err(|e| CdfError::FileWriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_parents_and_round_trips() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a/b/file.txt");
        write_content(&path, "payload").unwrap();
        assert_eq!(read_content(&path).unwrap(), "payload");
    }

    #[test]
    fn test_remove_missing_dir_is_noop() {
        let temp = TempDir::new().unwrap();
        remove_dir(&temp.path().join("missing")).unwrap();
    }

    #[test]
    fn test_read_missing_file_fails() {
        let temp = TempDir::new().unwrap();
        let err = read_content(&temp.path().join("nope")).unwrap_err();
        assert!(matches!(err, CdfError::FileReadFailed { .. }));
    }
}
