// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

mod linux;
mod macos;
pub mod nss;
pub mod wizard;
mod windows;

pub use linux::LinuxTrust;
pub use macos::MacOsTrust;
pub use windows::WindowsTrust;

use crate::error::{Error, Result};
use crate::fs::{path_to_str, PathGuard};
use crate::sudo::Sudo;
use crate::ui::UserInterface;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Options that change how the CA is registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustOptions {
    /// Never install NSS tooling; fall back to the manual Firefox flow.
    pub skip_certutil_install: bool,
}

/// OS-specific trust store registration and privileged file access.
pub trait TrustAdapter: Send + Sync {
    /// Register the CA with the OS store and, best effort, browser NSS databases.
    fn add_to_trust_store(&self, ca_cert: &Path, options: &TrustOptions) -> Result<()>;

    /// Undo [`TrustAdapter::add_to_trust_store`]. Failing sub-steps are logged and skipped.
    fn remove_from_trust_store(&self, ca_cert: &Path) -> Result<()>;

    /// Append `127.0.0.1  <domain>` to the hosts file unless the domain already appears.
    fn add_domain_to_hosts_file_if_missing(&self, domain: &str) -> Result<()>;

    fn read_protected_file(&self, path: &Path) -> Result<Vec<u8>>;

    fn write_protected_file(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Recursively delete a file or directory.
    fn delete_protected_files(&self, path: &Path) -> Result<()>;

    /// Whether elevated commands can run without a password prompt.
    fn has_elevated_access(&self) -> Result<bool>;

    fn name(&self) -> &'static str;
}

/// What an adapter needs from the rest of the program.
#[derive(Clone)]
pub struct PlatformContext {
    pub app_name: String,
    pub sudo: Sudo,
    pub guard: PathGuard,
    pub ui: Arc<dyn UserInterface>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Linux,
    Windows,
}

impl Platform {
    pub fn current() -> Result<Self> {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Result<Self> {
        match os {
            "macos" => Ok(Platform::MacOs),
            "linux" => Ok(Platform::Linux),
            "windows" => Ok(Platform::Windows),
            other => Err(Error::UnsupportedPlatform(other.to_string())),
        }
    }

    pub fn adapter(self, ctx: PlatformContext) -> Box<dyn TrustAdapter> {
        match self {
            Platform::MacOs => Box::new(MacOsTrust::new(ctx)),
            Platform::Linux => Box::new(LinuxTrust::new(ctx)),
            Platform::Windows => Box::new(WindowsTrust::new(ctx)),
        }
    }
}

/// Validate a path for use in trust store operations.
/// Prevents command injection and path traversal attacks.
pub fn validate_cert_path(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(Error::ReadFile {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "File not found"),
        });
    }

    if !path.is_file() {
        return Err(Error::TrustStore(format!(
            "Path is not a regular file: {}",
            path.display()
        )));
    }

    let canonical = path.canonicalize().map_err(|e| Error::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let path_str = canonical
        .to_str()
        .ok_or_else(|| Error::TrustStore("Path contains invalid UTF-8 characters".to_string()))?;

    if let Some(c) = dangerous_char(path_str) {
        return Err(Error::TrustStore(format!(
            "Path contains dangerous character '{}': {}",
            c,
            path.display()
        )));
    }

    // Could be interpreted as an option
    if path_str.starts_with('-') {
        return Err(Error::TrustStore(format!(
            "Path cannot start with dash: {}",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Validate an environment variable path (HOME, LOCALAPPDATA, ...).
/// Returns canonicalized path or None if invalid/unsafe.
pub fn validate_env_path(env_var: &str) -> Option<PathBuf> {
    let value = std::env::var(env_var).ok()?;
    let path = PathBuf::from(&value);

    if !path.is_dir() {
        return None;
    }

    let canonical = path.canonicalize().ok()?;
    let path_str = canonical.to_str()?;
    if dangerous_char(path_str).is_some() {
        return None;
    }

    Some(canonical)
}

fn dangerous_char(s: &str) -> Option<char> {
    const DANGEROUS_CHARS: &[char] = &[
        ';', '&', '|', '$', '`', '(', ')', '{', '}', '[', ']', '<', '>', '!', '~', '*', '?', '#',
        '\n', '\r', '\0',
    ];
    DANGEROUS_CHARS.iter().copied().find(|c| s.contains(*c))
}

/// True if `domain` does not appear anywhere in the hosts file contents.
pub fn hosts_entry_needed(hosts_contents: &str, domain: &str) -> bool {
    !hosts_contents.contains(domain)
}

pub fn hosts_line(domain: &str) -> String {
    format!("127.0.0.1  {}\n", domain)
}

/// Hosts file handling shared by the Unix adapters.
fn unix_add_hosts_entry(ctx: &PlatformContext, hosts_file: &Path, domain: &str) -> Result<()> {
    let contents = std::fs::read_to_string(hosts_file).map_err(|e| Error::ReadFile {
        path: hosts_file.to_path_buf(),
        source: e,
    })?;
    if !hosts_entry_needed(&contents, domain) {
        tracing::debug!(domain, "hosts file already mentions domain");
        return Ok(());
    }

    // Keep the new entry on its own line
    let mut line = String::new();
    if !contents.is_empty() && !contents.ends_with('\n') {
        line.push('\n');
    }
    line.push_str(&hosts_line(domain));

    let output = ctx.sudo.run_with_input(
        "tee",
        &["-a", path_to_str(hosts_file)?],
        Some(line.as_bytes()),
    )?;
    if !output.status.success() {
        return Err(Error::TrustStore(format!(
            "Failed to add {} to {}: {}",
            domain,
            hosts_file.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    tracing::debug!(domain, "added hosts file entry");
    Ok(())
}

fn unix_read_protected(ctx: &PlatformContext, path: &Path) -> Result<Vec<u8>> {
    ctx.guard.assert_not_touching_files(path, "read")?;
    let output = ctx.sudo.run_checked(
        "cat",
        &[path_to_str(path)?],
        &format!("Failed to read {}", path.display()),
    )?;
    Ok(output.stdout)
}

fn unix_write_protected(ctx: &PlatformContext, path: &Path, contents: &[u8]) -> Result<()> {
    ctx.guard.assert_not_touching_files(path, "write")?;
    let path_str = path_to_str(path)?;
    if path.exists() {
        ctx.sudo
            .run_checked("rm", &["-f", path_str], "Failed to replace protected file")?;
    }
    crate::fs::write_secret_file(path, contents)?;
    ctx.sudo
        .run_checked("chown", &["0", path_str], "Failed to protect file")?;
    ctx.sudo
        .run_checked("chmod", &["600", path_str], "Failed to protect file")?;
    Ok(())
}

fn unix_delete_protected(ctx: &PlatformContext, path: &Path) -> Result<()> {
    ctx.guard.assert_not_touching_files(path, "delete")?;
    ctx.sudo.run_checked(
        "rm",
        &["-rf", path_to_str(path)?],
        &format!("Failed to delete {}", path.display()),
    )?;
    Ok(())
}

/// Run a best-effort sub-step, logging failures instead of propagating them.
fn best_effort(step: &str, result: Result<()>) {
    if let Err(e) = result {
        tracing::warn!(step, error = %e, "trust store step failed, continuing");
    }
}
