// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! The on-disk certin workspace: config layout, the bound trust adapter and
//! the certificate engine. CA and domain certificate lifecycles are built on
//! top of this in `authority` and `cert`.

use crate::config::{Config, Paths, CA_LAYOUT_VERSION};
use crate::error::{Error, Result};
use crate::fs::{atomic_write, is_non_empty_file, PathGuard};
use crate::openssl::{CertEngine, OpensslEngine};
use crate::sudo::Sudo;
use crate::trust::{Platform, PlatformContext, TrustAdapter, TrustOptions};
use crate::ui::UserInterface;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Knobs for one run, resolved from `config.toml` and CLI flags.
#[derive(Debug, Clone, Copy)]
pub struct WorkspaceOptions {
    pub ca_days: u32,
    pub cert_days: u32,
    pub trust: TrustOptions,
    pub skip_hosts_file: bool,
}

impl WorkspaceOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ca_days: config.ca_days,
            cert_days: config.cert_days,
            trust: TrustOptions {
                skip_certutil_install: config.skip_certutil_install,
            },
            skip_hosts_file: config.skip_hosts_file,
        }
    }
}

impl Default for WorkspaceOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct Workspace {
    pub(crate) paths: Paths,
    pub(crate) options: WorkspaceOptions,
    pub(crate) engine: Box<dyn CertEngine>,
    pub(crate) platform: Box<dyn TrustAdapter>,
    pub(crate) ui: Arc<dyn UserInterface>,
}

impl Workspace {
    pub fn new(
        paths: Paths,
        options: WorkspaceOptions,
        engine: Box<dyn CertEngine>,
        platform: Box<dyn TrustAdapter>,
        ui: Arc<dyn UserInterface>,
    ) -> Self {
        Self {
            paths,
            options,
            engine,
            platform,
            ui,
        }
    }

    /// Workspace backed by `openssl` and the trust adapter for this OS.
    pub fn for_current_platform(
        paths: Paths,
        options: WorkspaceOptions,
        sudo_timeout_secs: u64,
        ui: Arc<dyn UserInterface>,
    ) -> Result<Self> {
        let platform = Platform::current()?;
        tracing::debug!(?platform, root = %paths.base.display(), "binding workspace");

        let ctx = PlatformContext {
            app_name: paths.app_name.clone(),
            sudo: Sudo::new(sudo_timeout_secs),
            guard: paths.guard(),
            ui: Arc::clone(&ui),
        };
        let engine = Box::new(OpensslEngine::new(paths.rand_file.clone()));

        Ok(Self::new(
            paths,
            options,
            engine,
            platform.adapter(ctx),
            ui,
        ))
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn options(&self) -> &WorkspaceOptions {
        &self.options
    }

    pub fn ui(&self) -> &dyn UserInterface {
        self.ui.as_ref()
    }

    /// Fails with `PathSafetyViolation` unless `path` lies under a config root.
    pub fn assert_not_touching_files(&self, path: &Path, operation: &str) -> Result<()> {
        self.guard().assert_not_touching_files(path, operation)
    }

    fn guard(&self) -> PathGuard {
        self.paths.guard()
    }

    /// A cached leaf certificate exists for `common_name`.
    pub fn has_certificate_for(&self, common_name: &str) -> bool {
        self.paths
            .domain_cert(common_name)
            .map(|cert| is_non_empty_file(&cert))
            .unwrap_or(false)
    }

    /// Common names with a domain directory, sorted.
    pub fn configured_domains(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.paths.domains_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::ReadDir {
                    path: self.paths.domains_dir.clone(),
                    source: e,
                })
            }
        };

        let mut domains: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(|n| n.replace("_wildcard_", "*")))
            .collect();
        domains.sort();
        Ok(domains)
    }

    /// Drop the cached key, CSR and certificate for `common_name`.
    pub fn remove_domain(&self, common_name: &str) -> Result<()> {
        let dir = self.paths.domain_dir(common_name)?;
        self.assert_not_touching_files(&dir, "remove")?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!(domain = common_name, "removed cached domain certificate");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Remove {
                path: dir,
                source: e,
            }),
        }
    }

    /// Reset OpenSSL's `ca` bookkeeping and stamp the layout version.
    pub(crate) fn seed_config_files(&self) -> Result<()> {
        atomic_write(&self.paths.ca_version, CA_LAYOUT_VERSION.as_bytes())?;
        atomic_write(&self.paths.ca_database, b"")?;
        atomic_write(&self.paths.ca_serial, b"01")?;
        Ok(())
    }

    /// Remove the CA from every trust store, then delete all generated state.
    pub fn uninstall_ca(&self) -> Result<()> {
        tracing::debug!(store = self.platform.name(), "removing CA from trust stores");
        self.platform.remove_from_trust_store(&self.paths.ca_cert)?;

        let mut targets = vec![self.paths.domains_dir.clone(), self.paths.ca_dir.clone()];
        targets.extend(self.paths.legacy_base.iter().cloned());

        for target in targets {
            self.assert_not_touching_files(&target, "delete")?;
            if target.exists() {
                tracing::debug!(path = %target.display(), "deleting");
                self.platform.delete_protected_files(&target)?;
            }
        }
        Ok(())
    }

    /// Run `f` with a readable copy of the CA key and the CA certificate path.
    ///
    /// The key copy lives in a private temp file that is removed when `f`
    /// returns, whether or not it succeeded.
    pub(crate) fn with_ca_credentials<T>(
        &self,
        f: impl FnOnce(&Path, &Path) -> Result<T>,
    ) -> Result<T> {
        let key = self.platform.read_protected_file(&self.paths.ca_key)?;

        let mut temp_key = tempfile::Builder::new()
            .prefix("certin-ca-")
            .suffix(".key")
            .tempfile()
            .map_err(|e| Error::WriteFile {
                path: std::env::temp_dir(),
                source: e,
            })?;
        temp_key.write_all(&key).map_err(|e| Error::WriteFile {
            path: temp_key.path().to_path_buf(),
            source: e,
        })?;
        temp_key.flush().map_err(|e| Error::WriteFile {
            path: temp_key.path().to_path_buf(),
            source: e,
        })?;

        f(temp_key.path(), &self.paths.ca_cert)
    }

    /// Show the password notice unless elevated commands already run unprompted.
    pub(crate) fn notify_password_if_needed(&self, reason: &str) -> Result<()> {
        if !self.platform.has_elevated_access()? {
            tracing::debug!("no cached sudo credentials");
            self.ui.password_request_notice(reason);
        }
        Ok(())
    }

    /// Hold the config directory lock until the guard is dropped.
    pub(crate) fn lock(&self) -> Result<ConfigLock> {
        ConfigLock::acquire(&self.paths.lock_path())
    }
}

/// Advisory exclusive lock serializing runs against one config directory.
pub struct ConfigLock {
    _file: File,
}

impl ConfigLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::WriteFile {
                path: path.to_path_buf(),
                source: e,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { _file: file }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                tracing::info!(lock = %path.display(), "another certin run holds the lock, waiting");
                file.lock_exclusive().map_err(|e| {
                    Error::Config(format!("Failed to acquire lock {}: {}", path.display(), e))
                })?;
                Ok(Self { _file: file })
            }
            Err(e) => {
                let msg = match e.kind() {
                    std::io::ErrorKind::PermissionDenied => "Permission denied accessing lock file",
                    _ => "Failed to acquire lock",
                };
                Err(Error::Config(format!("{}: {}", msg, e)))
            }
        }
    }

    /// True if another process currently holds the lock at `path`.
    #[cfg(test)]
    fn is_held(path: &Path) -> bool {
        match OpenOptions::new().write(true).open(path) {
            Ok(file) => file.try_lock_exclusive().is_err(),
            Err(_) => false,
        }
    }
}
