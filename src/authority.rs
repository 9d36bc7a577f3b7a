// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Certificate authority lifecycle.
//!
//! ```text
//! Absent ──install──▶ InstalledTrusted ──uninstall──▶ Absent
//!                        │        ▲
//!           cert unreadable       repair (or reinstall)
//!                        ▼        │
//!                       Unreadable
//! ```

use crate::error::{Error, Result};
use crate::fs::atomic_write;
use crate::templates::CaCertConfig;
use crate::workspace::Workspace;

pub const SUDO_REASON_CLEAN_TRUST_STORE: &str = "we need your permission to access your OS trust \
     store, in order to remove any pertinent self-signed certificates";

/// Readiness of the local CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaState {
    /// No CA key on disk.
    Absent,
    /// Key present and certificate parses.
    InstalledTrusted,
    /// Key present but the certificate cannot be read, typically one stored
    /// by an older release as a protected file.
    Unreadable,
}

impl Workspace {
    pub fn ca_state(&self) -> CaState {
        if !self.paths.ca_key_exists() {
            CaState::Absent
        } else if self.engine.check_certificate(&self.paths.ca_cert).is_ok() {
            CaState::InstalledTrusted
        } else {
            CaState::Unreadable
        }
    }

    /// Create a fresh CA and register it with the trust stores.
    ///
    /// Any previous CA is uninstalled first, along with every certificate it
    /// signed.
    pub fn install_certificate_authority(&self) -> Result<()> {
        tracing::debug!("uninstalling any existing certificate authority");
        self.uninstall_ca()?;

        self.paths.ensure_dirs()?;
        self.seed_config_files()?;

        let scratch = tempfile::tempdir().map_err(|e| Error::CreateDir {
            path: std::env::temp_dir(),
            source: e,
        })?;
        let temp_key = scratch.path().join("ca-private-key.key");

        tracing::debug!("generating a CA key and self-signed certificate");
        self.engine.generate_key(&temp_key)?;
        let config = CaCertConfig {
            name: self.paths.app_name.clone(),
            days: self.options.ca_days,
        };
        self.engine
            .self_sign_ca(&temp_key, &config, &self.paths.ca_cert)?;

        let key = std::fs::read(&temp_key).map_err(|e| Error::ReadFile {
            path: temp_key.clone(),
            source: e,
        })?;
        tracing::debug!("saving CA key as a protected file");
        self.platform
            .write_protected_file(&self.paths.ca_key, &key)?;

        tracing::debug!(store = self.platform.name(), "adding CA to trust stores");
        self.platform
            .add_to_trust_store(&self.paths.ca_cert, &self.options.trust)?;

        Ok(())
    }

    /// Make sure the CA certificate is a plain readable file, repairing or
    /// reinstalling the CA if it is not.
    pub fn ensure_ca_cert_readable(&self) -> Result<()> {
        if self.engine.check_certificate(&self.paths.ca_cert).is_ok() {
            return Ok(());
        }

        tracing::debug!("CA certificate is unreadable, rewriting it as a normal file");
        if let Err(e) = self.rewrite_ca_cert() {
            tracing::debug!(error = %e, "CA certificate repair failed, reinstalling");
            return self.install_certificate_authority();
        }

        if let Err(e) = self.engine.check_certificate(&self.paths.ca_cert) {
            tracing::debug!(error = %e, "CA certificate still unreadable, reinstalling");
            return self.install_certificate_authority();
        }
        Ok(())
    }

    /// Remove certin's CA from the trust stores and delete all generated state.
    pub fn cleanup_trust_store(&self) -> Result<()> {
        self.ui
            .log("Cleaning up any relevant self-signed certificates from your trust store");
        self.notify_password_if_needed(SUDO_REASON_CLEAN_TRUST_STORE)?;

        let _lock = self.lock()?;
        self.uninstall_ca()?;
        self.ui.log("Trust store cleanup: complete");
        Ok(())
    }

    fn rewrite_ca_cert(&self) -> Result<()> {
        let cert = self.platform.read_protected_file(&self.paths.ca_cert)?;
        self.platform.delete_protected_files(&self.paths.ca_cert)?;
        atomic_write(&self.paths.ca_cert, &cert)
    }
}
