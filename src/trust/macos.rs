// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};
use crate::fs::{command_exists, path_to_str};
use crate::trust::nss::{self, Certutil, NssLocation};
use crate::trust::{
    best_effort, unix_add_hosts_entry, unix_delete_protected, unix_read_protected,
    unix_write_protected, validate_cert_path, validate_env_path, wizard, PlatformContext,
    TrustAdapter, TrustOptions,
};
use std::path::{Path, PathBuf};
use std::process::Command;

const SYSTEM_KEYCHAIN: &str = "/Library/Keychains/System.keychain";
const FIREFOX_BUNDLE_PATH: &str = "/Applications/Firefox.app";
const FIREFOX_BIN_PATH: &str = "/Applications/Firefox.app/Contents/MacOS/firefox";
const HOSTS_FILE_PATH: &str = "/etc/hosts";

/// The system keychain covers Safari, Chrome and most tools. Firefox keeps
/// its own NSS databases, reached through Homebrew's `nss` package.
pub struct MacOsTrust {
    ctx: PlatformContext,
}

impl MacOsTrust {
    pub fn new(ctx: PlatformContext) -> Self {
        Self { ctx }
    }

    fn is_firefox_installed(&self) -> bool {
        Path::new(FIREFOX_BUNDLE_PATH).exists()
    }

    fn firefox_databases(&self) -> Vec<nss::NssDatabase> {
        match validate_env_path("HOME") {
            Some(home) => nss::find_databases(&[NssLocation::Profiles(
                home.join("Library")
                    .join("Application Support")
                    .join("Firefox")
                    .join("Profiles"),
            )]),
            None => Vec::new(),
        }
    }

    fn manual_firefox_flow(&self, ca_cert: &Path) -> Result<()> {
        wizard::open_certificate_in_firefox(&self.ctx.ui, &[FIREFOX_BIN_PATH], ca_cert)
    }
}

impl TrustAdapter for MacOsTrust {
    fn add_to_trust_store(&self, ca_cert: &Path, options: &TrustOptions) -> Result<()> {
        let safe_cert_path = validate_cert_path(ca_cert)?;

        tracing::debug!("adding CA to the system keychain");
        self.ctx.sudo.run_checked(
            "security",
            &[
                "add-trusted-cert",
                "-d",
                "-r",
                "trustRoot",
                "-k",
                SYSTEM_KEYCHAIN,
                "-p",
                "ssl",
                "-p",
                "basic",
                path_to_str(&safe_cert_path)?,
            ],
            "Failed to add certificate to the system keychain",
        )?;

        if !self.is_firefox_installed() {
            tracing::debug!("Firefox not found, skipping Firefox trust stores");
            return Ok(());
        }

        if !is_nss_installed() {
            if options.skip_certutil_install {
                tracing::debug!("certutil missing and install disabled, using manual flow");
                return self.manual_firefox_flow(&safe_cert_path);
            }
            if !command_exists("brew") {
                tracing::debug!("Homebrew not found, cannot install certutil; using manual flow");
                return self.manual_firefox_flow(&safe_cert_path);
            }
            tracing::debug!("installing certutil through Homebrew");
            best_effort("brew install nss", brew(&["install", "nss"]).map(|_| ()));
        }

        nss::close_firefox(self.ctx.ui.as_ref());
        match certutil_path() {
            Ok(binary) => nss::add_to_databases(
                &Certutil::new(binary, &self.ctx.app_name),
                &self.firefox_databases(),
                &safe_cert_path,
            ),
            Err(e) => tracing::warn!(error = %e, "could not locate certutil, skipping Firefox"),
        }

        Ok(())
    }

    fn remove_from_trust_store(&self, ca_cert: &Path) -> Result<()> {
        if ca_cert.exists() {
            best_effort(
                "remove from system keychain",
                path_to_str(ca_cert).and_then(|cert| {
                    self.ctx
                        .sudo
                        .run_checked(
                            "security",
                            &["remove-trusted-cert", "-d", cert],
                            "Failed to remove certificate from the system keychain",
                        )
                        .map(|_| ())
                }),
            );
        }

        if self.is_firefox_installed() && is_nss_installed() {
            match certutil_path() {
                Ok(binary) => nss::remove_after_firefox_closed(
                    self.ctx.ui.as_ref(),
                    &Certutil::new(binary, &self.ctx.app_name),
                    &self.firefox_databases(),
                ),
                Err(e) => tracing::debug!(error = %e, "could not locate certutil"),
            }
        }

        Ok(())
    }

    fn add_domain_to_hosts_file_if_missing(&self, domain: &str) -> Result<()> {
        unix_add_hosts_entry(&self.ctx, Path::new(HOSTS_FILE_PATH), domain)
    }

    fn read_protected_file(&self, path: &Path) -> Result<Vec<u8>> {
        unix_read_protected(&self.ctx, path)
    }

    fn write_protected_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        unix_write_protected(&self.ctx, path, contents)
    }

    fn delete_protected_files(&self, path: &Path) -> Result<()> {
        unix_delete_protected(&self.ctx, path)
    }

    fn has_elevated_access(&self) -> Result<bool> {
        self.ctx.sudo.has_sudo()
    }

    fn name(&self) -> &'static str {
        "macOS Keychain"
    }
}

fn brew(args: &[&str]) -> Result<String> {
    let output = Command::new("brew")
        .args(args)
        .output()
        .map_err(|e| Error::Command {
            command: format!("brew {}", args.join(" ")),
            stderr: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(Error::Command {
            command: format!("brew {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn is_nss_installed() -> bool {
    brew(&["list", "-1"])
        .map(|list| lists_formula(&list, "nss"))
        .unwrap_or(false)
}

fn lists_formula(brew_list: &str, formula: &str) -> bool {
    brew_list.lines().any(|line| line.trim() == formula)
}

fn certutil_path() -> Result<PathBuf> {
    let prefix = brew(&["--prefix", "nss"])?;
    Ok(PathBuf::from(prefix.trim()).join("bin").join("certutil"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_formula_matches_whole_lines() {
        let list = "git\nnss\nopenssl@3\n";
        assert!(lists_formula(list, "nss"));
        assert!(!lists_formula("nspr\nnss-tools\n", "nss"));
        assert!(!lists_formula("", "nss"));
    }
}
