// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Key, CSR and certificate generation through the `openssl` command line tool.

use crate::error::{Error, Result};
use crate::fs::{commit_temp, is_non_empty_file, set_owner_read_only, temp_sibling};
use crate::templates::{CaCertConfig, DomainCertConfig, DomainCsrConfig};
use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::NamedTempFile;

/// Certificate operations the CA lifecycle depends on.
///
/// Every output is written next to its final location and renamed into place,
/// so an interrupted run never leaves a partial file behind.
pub trait CertEngine: Send + Sync {
    /// Generate a 2048-bit RSA key, readable only by the owner.
    fn generate_key(&self, path: &Path) -> Result<()>;

    /// Self-sign the CA certificate for `key`.
    fn self_sign_ca(&self, key: &Path, config: &CaCertConfig, out: &Path) -> Result<()>;

    /// Create a CSR for an existing key. Names are expanded with wildcards.
    fn create_csr(&self, key: &Path, config: &DomainCsrConfig, out: &Path) -> Result<()>;

    /// Sign `csr` with the CA, valid for `days`.
    fn sign_certificate(
        &self,
        csr: &Path,
        ca_key: &Path,
        ca_cert: &Path,
        config: &DomainCertConfig,
        out: &Path,
        days: u32,
    ) -> Result<()>;

    /// Fails if the certificate at `path` cannot be parsed.
    fn check_certificate(&self, path: &Path) -> Result<()>;
}

pub struct OpensslEngine {
    binary: PathBuf,
    rand_file: PathBuf,
}

impl OpensslEngine {
    pub fn new(rand_file: PathBuf) -> Self {
        Self::with_binary("openssl", rand_file)
    }

    pub fn with_binary(binary: impl Into<PathBuf>, rand_file: PathBuf) -> Self {
        Self {
            binary: binary.into(),
            rand_file,
        }
    }

    fn run<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Command::new(&self.binary)
            .args(args)
            .env("RANDFILE", &self.rand_file)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::ToolNotFound(self.binary.display().to_string())
                } else {
                    Error::Command {
                        command: self.binary.display().to_string(),
                        stderr: e.to_string(),
                    }
                }
            })
    }

    /// Run with `out` replaced by a temp sibling, then move the result into place.
    fn run_to_output(
        &self,
        out: &Path,
        args: impl FnOnce(&Path) -> Vec<std::ffi::OsString>,
        on_failure: impl FnOnce(String) -> Error,
    ) -> Result<()> {
        let temp = temp_sibling(out)?;
        let result = self.run(args(&temp));

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                return Err(e);
            }
        };

        if !output.status.success() || !is_non_empty_file(&temp) {
            let _ = std::fs::remove_file(&temp);
            return Err(on_failure(stderr_of(&output)));
        }

        commit_temp(&temp, out)
    }
}

impl CertEngine for OpensslEngine {
    fn generate_key(&self, path: &Path) -> Result<()> {
        tracing::debug!(path = %path.display(), "generating RSA key");
        self.run_to_output(
            path,
            |temp| {
                os_args([
                    OsStr::new("genrsa"),
                    OsStr::new("-out"),
                    temp.as_os_str(),
                    OsStr::new("2048"),
                ])
            },
            |stderr| Error::KeyGeneration {
                path: path.to_path_buf(),
                stderr,
            },
        )?;
        set_owner_read_only(path)
    }

    fn self_sign_ca(&self, key: &Path, config: &CaCertConfig, out: &Path) -> Result<()> {
        tracing::debug!(out = %out.display(), days = config.days, "self-signing CA certificate");
        let config_file = write_config(&config.render())?;
        let days = config.days.to_string();
        self.run_to_output(
            out,
            |temp| {
                os_args([
                    OsStr::new("req"),
                    OsStr::new("-new"),
                    OsStr::new("-x509"),
                    OsStr::new("-config"),
                    config_file.path().as_os_str(),
                    OsStr::new("-key"),
                    key.as_os_str(),
                    OsStr::new("-out"),
                    temp.as_os_str(),
                    OsStr::new("-days"),
                    OsStr::new(&days),
                ])
            },
            |stderr| Error::Signing {
                path: out.to_path_buf(),
                stderr,
            },
        )
    }

    fn create_csr(&self, key: &Path, config: &DomainCsrConfig, out: &Path) -> Result<()> {
        tracing::debug!(common_name = %config.common_name, "creating certificate signing request");
        let config_file = write_config(&config.render())?;
        self.run_to_output(
            out,
            |temp| {
                os_args([
                    OsStr::new("req"),
                    OsStr::new("-new"),
                    OsStr::new("-config"),
                    config_file.path().as_os_str(),
                    OsStr::new("-key"),
                    key.as_os_str(),
                    OsStr::new("-out"),
                    temp.as_os_str(),
                ])
            },
            |stderr| Error::Command {
                command: "openssl req -new".into(),
                stderr,
            },
        )
    }

    fn sign_certificate(
        &self,
        csr: &Path,
        ca_key: &Path,
        ca_cert: &Path,
        config: &DomainCertConfig,
        out: &Path,
        days: u32,
    ) -> Result<()> {
        tracing::debug!(common_name = %config.common_name, days, "signing domain certificate");
        let config_file = write_config(&config.render())?;
        let days = days.to_string();
        self.run_to_output(
            out,
            |temp| {
                os_args([
                    OsStr::new("ca"),
                    OsStr::new("-config"),
                    config_file.path().as_os_str(),
                    OsStr::new("-in"),
                    csr.as_os_str(),
                    OsStr::new("-out"),
                    temp.as_os_str(),
                    OsStr::new("-keyfile"),
                    ca_key.as_os_str(),
                    OsStr::new("-cert"),
                    ca_cert.as_os_str(),
                    OsStr::new("-days"),
                    OsStr::new(&days),
                    OsStr::new("-batch"),
                ])
            },
            |stderr| Error::Signing {
                path: out.to_path_buf(),
                stderr,
            },
        )
    }

    fn check_certificate(&self, path: &Path) -> Result<()> {
        let output = self.run([
            OsStr::new("x509"),
            OsStr::new("-in"),
            path.as_os_str(),
            OsStr::new("-noout"),
        ])?;
        if !output.status.success() {
            return Err(Error::CertParse(format!(
                "{}: {}",
                path.display(),
                stderr_of(&output)
            )));
        }
        Ok(())
    }
}

/// Rendered config in a temp file that is removed when dropped.
fn write_config(contents: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new().map_err(|e| Error::WriteFile {
        path: std::env::temp_dir(),
        source: e,
    })?;
    file.write_all(contents.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| Error::WriteFile {
            path: file.path().to_path_buf(),
            source: e,
        })?;
    Ok(file)
}

fn os_args<'a>(args: impl IntoIterator<Item = &'a OsStr>) -> Vec<std::ffi::OsString> {
    args.into_iter().map(|a| a.to_os_string()).collect()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}
