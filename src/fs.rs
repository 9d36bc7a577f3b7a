// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};
use std::process::Command;

pub fn path_to_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::InvalidPath(path.to_path_buf()))
}

/// Temporary sibling path used for write-then-rename.
pub fn temp_sibling(path: &Path) -> Result<PathBuf> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::InvalidPath(path.to_path_buf()))?;
    let random_suffix: u64 = rand::Rng::random(&mut rand::rng());
    Ok(parent.join(format!(".tmp-{:x}", random_suffix)))
}

/// Move a finished file into place. The temp file is removed if the rename fails.
pub fn commit_temp(temp_path: &Path, path: &Path) -> Result<()> {
    std::fs::rename(temp_path, path).map_err(|e| {
        if temp_path.exists() {
            let _ = std::fs::remove_file(temp_path);
        }
        Error::WriteFile {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

/// Atomically write data to a file using a temporary file and rename.
/// A reader never observes a half-written file.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    use std::fs;
    use std::io::Write;

    let temp_path = temp_sibling(path)?;

    let mut file = fs::File::create(&temp_path).map_err(|e| Error::WriteFile {
        path: temp_path.clone(),
        source: e,
    })?;

    file.write_all(contents).map_err(|e| Error::WriteFile {
        path: temp_path.clone(),
        source: e,
    })?;

    file.sync_all().map_err(|e| Error::WriteFile {
        path: temp_path.clone(),
        source: e,
    })?;

    drop(file);

    commit_temp(&temp_path, path)
}

/// Atomically write secret file with owner-only permissions.
pub fn atomic_write_secret(path: &Path, contents: &[u8]) -> Result<()> {
    let temp_path = temp_sibling(path)?;
    write_secret_file(&temp_path, contents)?;
    commit_temp(&temp_path, path)
}

#[cfg(unix)]
pub fn write_secret_file(path: &Path, contents: &[u8]) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| Error::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;

    file.write_all(contents).map_err(|e| Error::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

#[cfg(windows)]
pub fn write_secret_file(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| Error::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    // Restrict to current user only via icacls - MUST succeed
    let path_str = path_to_str(path)?;

    let username = std::env::var("USERNAME")
        .or_else(|_| std::env::var("USERDOMAIN_ROAMINGPROFILE"))
        .or_else(|_| {
            Command::new("whoami")
                .output()
                .ok()
                .and_then(|o| String::from_utf8(o.stdout).ok())
                .map(|s| s.trim().to_string())
                .ok_or(std::env::VarError::NotPresent)
        })
        .map_err(|_| {
            Error::Config("Cannot determine current user for file permissions".to_string())
        })?;

    let output = Command::new("icacls")
        .args([
            path_str,
            "/inheritance:r",
            "/grant:r",
            &format!("{}:F", username),
        ])
        .output()
        .map_err(|e| Error::Config(format!("Failed to run icacls: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);

        // Never leave a world-readable private key behind
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove insecure key file");
        }

        return Err(Error::Config(format!(
            "Failed to set file permissions: {}\n\
             Key file not saved.\n\
             icacls error: {}",
            path.display(),
            stderr.trim()
        )));
    }

    Ok(())
}

#[cfg(not(any(unix, windows)))]
pub fn write_secret_file(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| Error::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Restrict a file to owner read-only.
#[cfg(unix)]
pub fn set_owner_read_only(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o400)).map_err(|e| {
        Error::WriteFile {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

#[cfg(not(unix))]
pub fn set_owner_read_only(path: &Path) -> Result<()> {
    let mut perms = std::fs::metadata(path)
        .map_err(|e| Error::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?
        .permissions();
    perms.set_readonly(true);
    std::fs::set_permissions(path, perms).map_err(|e| Error::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

/// True if `path` exists and holds at least one byte.
pub fn is_non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Check if a command is available on PATH.
pub fn command_exists(command: &str) -> bool {
    #[cfg(windows)]
    let probe = Command::new("where").arg(command).output();
    #[cfg(not(windows))]
    let probe = Command::new("which").arg(command).output();

    probe.map(|o| o.status.success()).unwrap_or(false)
}

/// Refuses file operations outside the managed config roots.
#[derive(Debug, Clone)]
pub struct PathGuard {
    roots: Vec<PathBuf>,
}

impl PathGuard {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Fails with `PathSafetyViolation` unless `path` lies inside one of the roots.
    pub fn assert_not_touching_files(&self, path: &Path, operation: &str) -> Result<()> {
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir));
        let inside = self.roots.iter().any(|root| path.starts_with(root));

        if escapes || !inside {
            return Err(Error::PathSafetyViolation {
                operation: operation.to_string(),
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }
}
