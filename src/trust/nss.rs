// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Firefox and Chrome NSS certificate databases.

use crate::error::{Error, Result};
use crate::fs::path_to_str;
use crate::ui::UserInterface;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

const FIREFOX_POLL_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NssVersion {
    /// `cert8.db`, addressed by plain directory
    Legacy,
    /// `cert9.db`, addressed with the `sql:` prefix
    Modern,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NssDatabase {
    pub dir: PathBuf,
    pub version: NssVersion,
}

impl NssDatabase {
    /// Value for certutil's `-d` argument.
    pub fn dir_arg(&self) -> Result<String> {
        let dir = path_to_str(&self.dir)?;
        Ok(match self.version {
            NssVersion::Legacy => dir.to_string(),
            NssVersion::Modern => format!("sql:{}", dir),
        })
    }
}

/// Where to look for NSS databases.
#[derive(Debug, Clone)]
pub enum NssLocation {
    /// A single database directory, e.g. `~/.pki/nssdb`
    Dir(PathBuf),
    /// A directory of profiles, each possibly holding a database
    Profiles(PathBuf),
}

/// Every NSS database under `locations`. A directory holding both
/// `cert8.db` and `cert9.db` yields one entry per version.
pub fn find_databases(locations: &[NssLocation]) -> Vec<NssDatabase> {
    let mut databases = Vec::new();

    for location in locations {
        match location {
            NssLocation::Dir(dir) => push_databases(dir, &mut databases),
            NssLocation::Profiles(root) => {
                let entries = match std::fs::read_dir(root) {
                    Ok(entries) => entries,
                    Err(_) => continue,
                };
                let mut profiles: Vec<PathBuf> = entries
                    .flatten()
                    .map(|e| e.path())
                    .filter(|p| p.is_dir())
                    .collect();
                profiles.sort();
                for profile in profiles {
                    push_databases(&profile, &mut databases);
                }
            }
        }
    }

    databases
}

fn push_databases(dir: &Path, databases: &mut Vec<NssDatabase>) {
    tracing::debug!(dir = %dir.display(), "checking for NSS database");
    if dir.join("cert8.db").exists() {
        databases.push(NssDatabase {
            dir: dir.to_path_buf(),
            version: NssVersion::Legacy,
        });
    }
    if dir.join("cert9.db").exists() {
        databases.push(NssDatabase {
            dir: dir.to_path_buf(),
            version: NssVersion::Modern,
        });
    }
}

/// NSS `certutil` (not the Windows tool of the same name).
#[derive(Debug, Clone)]
pub struct Certutil {
    pub binary: PathBuf,
    pub nickname: String,
}

impl Certutil {
    pub fn new(binary: impl Into<PathBuf>, nickname: &str) -> Self {
        Self {
            binary: binary.into(),
            nickname: nickname.to_string(),
        }
    }

    pub fn add(&self, db: &NssDatabase, cert: &Path) -> Result<()> {
        let dir_arg = db.dir_arg()?;
        // Replace any earlier certificate with the same nickname
        let _ = self.run(&["-D", "-d", &dir_arg, "-n", &self.nickname]);
        self.run(&[
            "-A",
            "-d",
            &dir_arg,
            "-t",
            "C,,",
            "-i",
            path_to_str(cert)?,
            "-n",
            &self.nickname,
        ])
    }

    pub fn remove(&self, db: &NssDatabase) -> Result<()> {
        let dir_arg = db.dir_arg()?;
        self.run(&["-D", "-d", &dir_arg, "-n", &self.nickname])
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::CommandNotFound {
                        command: self.binary.display().to_string(),
                        hint: crate::sudo::get_install_hint("certutil"),
                    }
                } else {
                    Error::Command {
                        command: self.binary.display().to_string(),
                        stderr: e.to_string(),
                    }
                }
            })?;
        if !output.status.success() {
            return Err(Error::TrustStore(format!(
                "certutil {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Add `cert` to every database, logging and skipping failures.
pub fn add_to_databases(certutil: &Certutil, databases: &[NssDatabase], cert: &Path) {
    for db in databases {
        match certutil.add(db, cert) {
            Ok(()) => tracing::debug!(db = %db.dir.display(), "added CA to NSS database"),
            Err(e) => tracing::warn!(
                db = %db.dir.display(),
                error = %e,
                "failed to add CA to NSS database, continuing"
            ),
        }
    }
}

/// Remove the nickname from every database, logging and skipping failures.
pub fn remove_from_databases(certutil: &Certutil, databases: &[NssDatabase]) {
    for db in databases {
        match certutil.remove(db) {
            Ok(()) => tracing::debug!(db = %db.dir.display(), "removed CA from NSS database"),
            Err(e) => tracing::debug!(
                db = %db.dir.display(),
                error = %e,
                "failed to remove CA from NSS database, continuing"
            ),
        }
    }
}

/// Remove the nickname from every database once Firefox has been closed.
pub fn remove_after_firefox_closed(
    ui: &dyn UserInterface,
    certutil: &Certutil,
    databases: &[NssDatabase],
) {
    remove_after_firefox_closed_with(
        ui,
        is_firefox_open,
        Duration::from_millis(FIREFOX_POLL_INTERVAL_MS),
        certutil,
        databases,
    );
}

fn remove_after_firefox_closed_with(
    ui: &dyn UserInterface,
    is_open: impl FnMut() -> bool,
    poll_interval: Duration,
    certutil: &Certutil,
    databases: &[NssDatabase],
) {
    if databases.is_empty() {
        return;
    }
    close_firefox_with(ui, is_open, poll_interval);
    remove_from_databases(certutil, databases);
}

/// Firefox keeps its NSS database in memory and writes it back on exit,
/// so it must be closed before the database is changed.
pub fn close_firefox(ui: &dyn UserInterface) {
    close_firefox_with(
        ui,
        is_firefox_open,
        Duration::from_millis(FIREFOX_POLL_INTERVAL_MS),
    );
}

pub fn close_firefox_with(
    ui: &dyn UserInterface,
    mut is_open: impl FnMut() -> bool,
    poll_interval: Duration,
) {
    if is_open() {
        ui.close_firefox_before_continuing();
        while is_open() {
            thread::sleep(poll_interval);
        }
    }
}

fn is_firefox_open() -> bool {
    Command::new("ps")
        .arg("aux")
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).contains("firefox"))
        .unwrap_or(false)
}
