// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use crate::error::Result;
use crate::fs::{command_exists, path_to_str};
use crate::trust::nss::{self, Certutil, NssLocation};
use crate::trust::{
    best_effort, unix_add_hosts_entry, unix_delete_protected, unix_read_protected,
    unix_write_protected, validate_cert_path, validate_env_path, wizard, PlatformContext,
    TrustAdapter, TrustOptions,
};
use std::path::{Path, PathBuf};

const SYSTEM_CA_DIR: &str = "/usr/local/share/ca-certificates";
const FIREFOX_BIN_PATH: &str = "/usr/bin/firefox";
const CHROME_BIN_PATH: &str = "/usr/bin/google-chrome";
const HOSTS_FILE_PATH: &str = "/etc/hosts";

/// Linux keeps several trust stores: the system bundle, Firefox's own NSS
/// databases and the per-user NSS database Chrome reads.
pub struct LinuxTrust {
    ctx: PlatformContext,
}

impl LinuxTrust {
    pub fn new(ctx: PlatformContext) -> Self {
        Self { ctx }
    }

    fn system_cert_path(&self) -> PathBuf {
        Path::new(SYSTEM_CA_DIR).join(format!("{}.crt", self.ctx.app_name))
    }

    fn certutil(&self) -> Certutil {
        Certutil::new("certutil", &self.ctx.app_name)
    }

    fn firefox_databases(&self) -> Vec<nss::NssDatabase> {
        match real_user_home() {
            Some(home) => nss::find_databases(&firefox_locations(&home)),
            None => Vec::new(),
        }
    }

    fn chrome_databases(&self) -> Vec<nss::NssDatabase> {
        match real_user_home() {
            Some(home) => {
                nss::find_databases(&[NssLocation::Dir(home.join(".pki").join("nssdb"))])
            }
            None => Vec::new(),
        }
    }

    fn install_certutil(&self) -> Result<()> {
        tracing::debug!("NSS tooling is not installed, trying apt");
        self.ctx.sudo.run_checked(
            "apt",
            &["install", "-y", "libnss3-tools"],
            "Failed to install libnss3-tools",
        )?;
        Ok(())
    }
}

impl TrustAdapter for LinuxTrust {
    fn add_to_trust_store(&self, ca_cert: &Path, options: &TrustOptions) -> Result<()> {
        let safe_cert_path = validate_cert_path(ca_cert)?;
        let cert_str = path_to_str(&safe_cert_path)?;
        let dest = self.system_cert_path();

        tracing::debug!("adding CA to the system trust store");
        self.ctx.sudo.run_checked(
            "cp",
            &[cert_str, path_to_str(&dest)?],
            "Failed to copy certificate to trust store",
        )?;
        self.ctx.sudo.run_checked(
            "update-ca-certificates",
            &[] as &[&str],
            "Failed to update trust store",
        )?;

        if Path::new(FIREFOX_BIN_PATH).exists() {
            if !command_exists("certutil") && !options.skip_certutil_install {
                best_effort("install certutil", self.install_certutil());
            }
            if command_exists("certutil") {
                nss::close_firefox(self.ctx.ui.as_ref());
                nss::add_to_databases(
                    &self.certutil(),
                    &self.firefox_databases(),
                    &safe_cert_path,
                );
            } else {
                tracing::debug!("certutil unavailable, using the manual Firefox flow");
                best_effort(
                    "firefox wizard",
                    wizard::open_certificate_in_firefox(
                        &self.ctx.ui,
                        &[FIREFOX_BIN_PATH],
                        &safe_cert_path,
                    ),
                );
            }
        } else {
            tracing::debug!("Firefox not found, skipping Firefox trust stores");
        }

        if Path::new(CHROME_BIN_PATH).exists() {
            if !command_exists("certutil") {
                self.ctx.ui.warn_chrome_on_linux_without_certutil();
            } else {
                nss::close_firefox(self.ctx.ui.as_ref());
                nss::add_to_databases(
                    &self.certutil(),
                    &self.chrome_databases(),
                    &safe_cert_path,
                );
            }
        } else {
            tracing::debug!("Chrome not found, skipping Chrome trust store");
        }

        Ok(())
    }

    fn remove_from_trust_store(&self, ca_cert: &Path) -> Result<()> {
        let dest = self.system_cert_path();
        best_effort(
            "remove system certificate",
            path_to_str(&dest).and_then(|dest| {
                self.ctx
                    .sudo
                    .run_checked("rm", &["-f", dest], "Failed to remove certificate")
                    .map(|_| ())
            }),
        );
        best_effort(
            "update system trust store",
            self.ctx
                .sudo
                .run_checked(
                    "update-ca-certificates",
                    &[] as &[&str],
                    "Failed to update trust store",
                )
                .map(|_| ()),
        );

        if command_exists("certutil") {
            tracing::debug!(cert = %ca_cert.display(), "removing CA from NSS databases");
            let ui = self.ctx.ui.as_ref();
            if Path::new(FIREFOX_BIN_PATH).exists() {
                nss::remove_after_firefox_closed(ui, &self.certutil(), &self.firefox_databases());
            }
            if Path::new(CHROME_BIN_PATH).exists() {
                nss::remove_after_firefox_closed(ui, &self.certutil(), &self.chrome_databases());
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
        "Linux ca-certificates"
    }
}

/// Firefox profile roots: native, Snap and Flatpak.
fn firefox_locations(home: &Path) -> Vec<NssLocation> {
    vec![
        NssLocation::Profiles(home.join(".mozilla").join("firefox")),
        NssLocation::Profiles(
            home.join("snap")
                .join("firefox")
                .join("common")
                .join(".mozilla")
                .join("firefox"),
        ),
        NssLocation::Profiles(
            home.join(".var")
                .join("app")
                .join("org.mozilla.firefox")
                .join(".mozilla")
                .join("firefox"),
        ),
    ]
}

/// Get the real user's home directory, even when running with sudo.
fn real_user_home() -> Option<PathBuf> {
    if let Ok(sudo_user) = std::env::var("SUDO_USER") {
        if sudo_user
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        {
            let home = PathBuf::from("/home").join(&sudo_user);
            if home.is_dir() {
                return Some(home);
            }
        }
    }

    validate_env_path("HOME")
}
