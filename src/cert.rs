// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Domain certificates: the CA-backed dev flow, detached headless
//! certificates, and placing the resulting PEM bundle on disk.

use crate::error::{Error, Result};
use crate::fs::atomic_write_secret;
use crate::templates::{include_wildcards, DomainCertConfig, DomainCsrConfig};
use crate::ui::UserInterface;
use crate::workspace::Workspace;
use crate::x509;
use once_cell::sync::Lazy;
use rcgen::{
    CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use regex::Regex;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use std::path::{Path, PathBuf};

// One or more dot-separated labels, optionally behind a single leading wildcard
static FQDN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\*\.)?[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$")
        .expect("FQDN regex should compile")
});

/// Maximum certificate validity (10 years).
pub const MAX_CERT_DAYS: u32 = 3650;

/// Validity of headless certificates.
pub const HEADLESS_CERT_DAYS: u32 = 2;

const HEADLESS_KEY_BITS: usize = 2048;

const MAX_DOMAIN_LEN: usize = 253;

pub const SUDO_REASON_NEW_CERT: &str =
    "we are attempting to set appropriate file permissions on your new cert and private key";

/// Validate that the validity period is within allowed bounds.
///
/// # Errors
/// Returns an error if `days` is 0 or exceeds [`MAX_CERT_DAYS`].
pub fn validate_days(days: u32) -> Result<()> {
    if days == 0 {
        return Err(Error::InvalidDays("days cannot be 0".into()));
    }
    if days > MAX_CERT_DAYS {
        return Err(Error::InvalidDays(format!(
            "days cannot exceed {} (10 years)",
            MAX_CERT_DAYS
        )));
    }
    Ok(())
}

/// Check that `domain` is a DNS name certin can issue for.
pub fn validate_fqdn(domain: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidDomain {
        domain: domain.to_string(),
        reason: reason.to_string(),
    };

    if domain.is_empty() {
        return Err(invalid("domain cannot be empty"));
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(invalid("domain is longer than 253 characters"));
    }
    if !FQDN_REGEX.is_match(domain) {
        return Err(invalid("not a fully qualified domain name"));
    }
    Ok(())
}

/// A certificate request: the common name plus extra subject alternative names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertRequest {
    pub common_name: String,
    pub subject_alt_names: Vec<String>,
}

impl CertRequest {
    pub fn new(common_name: impl Into<String>, subject_alt_names: Vec<String>) -> Self {
        Self {
            common_name: common_name.into(),
            subject_alt_names,
        }
    }

    /// The common name followed by every alternative name.
    pub fn names(&self) -> Vec<String> {
        std::iter::once(self.common_name.clone())
            .chain(self.subject_alt_names.iter().cloned())
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        for name in self.names() {
            validate_fqdn(&name)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        if self.subject_alt_names.is_empty() {
            self.common_name.clone()
        } else {
            format!(
                "{} (SANs: {})",
                self.common_name,
                self.subject_alt_names.join(", ")
            )
        }
    }
}

/// Extra data [`Workspace::certificate_for`] should return.
#[derive(Debug, Clone, Copy, Default)]
pub struct CertificateOptions {
    /// Return the CA certificate bytes.
    pub include_ca: bool,
    /// Return the CA certificate path.
    pub include_ca_path: bool,
}

#[derive(Debug, Clone)]
pub struct DomainData {
    pub key: Vec<u8>,
    pub cert: Vec<u8>,
    pub ca: Option<Vec<u8>>,
    pub ca_path: Option<PathBuf>,
}

/// PEM-encoded private key and certificate.
#[derive(Debug, Clone)]
pub struct CertPem {
    pub key: String,
    pub cert: String,
}

impl Workspace {
    /// Key and certificate for `request`, issuing them on first use.
    ///
    /// Installs the CA when it is missing. Unless hosts file editing is
    /// disabled, the common name is also pointed at 127.0.0.1.
    pub fn certificate_for(
        &self,
        request: &CertRequest,
        options: CertificateOptions,
    ) -> Result<DomainData> {
        request.validate()?;
        let _lock = self.lock()?;
        let common_name = &request.common_name;

        if !self.paths.ca_key_exists() {
            tracing::debug!("root CA is not installed yet, installing it");
            self.install_certificate_authority()?;
        } else if options.include_ca || options.include_ca_path {
            tracing::debug!("root CA is installed, making sure its certificate is readable");
            self.ensure_ca_cert_readable()?;
        }

        if self.has_certificate_for(common_name) {
            tracing::debug!(domain = %common_name, "reusing cached certificate");
            self.warn_if_stale(request);
        } else {
            tracing::debug!(domain = %common_name, "no cached certificate, generating one");
            self.generate_domain_certificate(request)?;
        }

        if !self.options.skip_hosts_file {
            self.platform
                .add_domain_to_hosts_file_if_missing(common_name)?;
        }

        let key = read(&self.paths.domain_key(common_name)?)?;
        let cert = read(&self.paths.domain_cert(common_name)?)?;
        let ca = if options.include_ca {
            Some(read(&self.paths.ca_cert)?)
        } else {
            None
        };
        let ca_path = options
            .include_ca_path
            .then(|| self.paths.ca_cert.clone());

        Ok(DomainData {
            key,
            cert,
            ca,
            ca_path,
        })
    }

    /// Issue a new key and CA-signed certificate into the domain directory.
    pub fn generate_domain_certificate(&self, request: &CertRequest) -> Result<()> {
        validate_days(self.options.cert_days)?;
        let common_name = &request.common_name;
        self.paths.ensure_domain_dir(common_name)?;

        let key = self.paths.domain_key(common_name)?;
        let csr = self.paths.domain_csr(common_name)?;
        let cert = self.paths.domain_cert(common_name)?;

        tracing::debug!(domain = %common_name, "generating domain key");
        self.engine.generate_key(&key)?;

        tracing::debug!(domain = %common_name, "generating certificate signing request");
        let csr_config = DomainCsrConfig {
            common_name: common_name.clone(),
            subject_alt_names: request.subject_alt_names.clone(),
        };
        self.engine.create_csr(&key, &csr_config, &csr)?;

        tracing::debug!(domain = %common_name, "signing domain certificate with the CA");
        self.with_ca_credentials(|ca_key, ca_cert| {
            // `openssl ca` keeps a copy of every issued cert; nothing reads them
            let new_certs = tempfile::tempdir().map_err(|e| Error::CreateDir {
                path: std::env::temp_dir(),
                source: e,
            })?;
            let config = DomainCertConfig {
                serial: self.paths.ca_serial.clone(),
                database: self.paths.ca_database.clone(),
                new_certs_dir: new_certs.path().to_path_buf(),
                days: self.options.cert_days,
                common_name: common_name.clone(),
                subject_alt_names: request.subject_alt_names.clone(),
            };
            self.engine
                .sign_certificate(&csr, ca_key, ca_cert, &config, &cert, self.options.cert_days)
        })
    }

    /// Cached certificates are reused as-is; say so when one looks wrong.
    fn warn_if_stale(&self, request: &CertRequest) {
        let path = match self.paths.domain_cert(&request.common_name) {
            Ok(path) => path,
            Err(_) => return,
        };
        let info = match x509::parse_cert_file(&path) {
            Ok(info) => info,
            Err(e) => {
                tracing::debug!(error = %e, "could not inspect cached certificate");
                return;
            }
        };

        let hint = format!(
            "run `{} remove {}` to issue a new one",
            self.paths.app_name, request.common_name
        );
        if info.is_expired() {
            self.ui.warn(&format!(
                "the cached certificate for {} expired on {}; {}",
                request.common_name,
                info.expiry_string(),
                hint
            ));
        }
        let missing = info.missing_names(&include_wildcards(&request.names()));
        if !missing.is_empty() {
            self.ui.warn(&format!(
                "the cached certificate for {} does not cover {}; {}",
                request.common_name,
                missing.join(", "),
                hint
            ));
        }
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Dev mode: a certificate signed by the local, trusted CA.
pub fn ensure_dev_cert_exists(workspace: &Workspace, request: &CertRequest) -> Result<CertPem> {
    let ui = workspace.ui();
    let common_name = &request.common_name;

    tracing::debug!(domain = %common_name, "searching for a cached certificate");
    if workspace.has_certificate_for(common_name) {
        tracing::debug!(domain = %common_name, "found a cached certificate");
    } else {
        ui.log(&format!("no existing certificate found for {}", common_name));
        ui.log(&format!(
            "creating a new x509 certificate for {}",
            request.describe()
        ));
        workspace.notify_password_if_needed(SUDO_REASON_NEW_CERT)?;
    }

    let data = workspace.certificate_for(request, CertificateOptions::default())?;
    tracing::debug!(domain = %common_name, "certificate generation complete");

    Ok(CertPem {
        key: String::from_utf8_lossy(&data.key).into_owned(),
        cert: String::from_utf8_lossy(&data.cert).into_owned(),
    })
}

/// Headless mode: a short-lived self-signed certificate, no CA and no trust
/// store changes.
pub fn generate_headless(request: &CertRequest) -> Result<CertPem> {
    request.validate()?;
    tracing::debug!(domain = %request.common_name, "generating headless certificate");

    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, request.common_name.as_str());

    for name in include_wildcards(&request.names()) {
        params.subject_alt_names.push(SanType::DnsName(
            name.clone()
                .try_into()
                .map_err(|_| Error::InvalidDomain {
                    domain: name.clone(),
                    reason: "Invalid DNS name".into(),
                })?,
        ));
    }

    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::ContentCommitment,
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::DataEncipherment,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(HEADLESS_CERT_DAYS as i64);

    let key_pair = generate_rsa_key()?;
    let cert = params.self_signed(&key_pair)?;

    Ok(CertPem {
        key: key_pair.serialize_pem(),
        cert: cert.pem(),
    })
}

fn generate_rsa_key() -> Result<KeyPair> {
    let private_key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, HEADLESS_KEY_BITS)
        .map_err(|e| Error::RsaKey(e.to_string()))?;
    let pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| Error::RsaKey(e.to_string()))?;
    Ok(KeyPair::from_pem(&pem)?)
}

/// Where and how to write the PEM bundle.
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub path: PathBuf,
    /// Overwrite an existing file without asking.
    pub force: bool,
    /// Ask before overwriting an existing file.
    pub interactive: bool,
}

/// Result of [`ensure_cert_exists`] that is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertOutcome {
    Written { path: PathBuf, size: u64 },
    /// The user chose to keep the existing file. Nothing was written.
    Declined,
}

/// Generate a certificate with `generate` and write `key + "\n" + cert` to
/// the output path.
///
/// An existing output file is replaced silently with `force`, after a prompt
/// when interactive, and otherwise only if it is still present once
/// generation finishes.
pub fn ensure_cert_exists(
    ui: &dyn UserInterface,
    output: &OutputOptions,
    request: &CertRequest,
    generate: impl FnOnce() -> Result<CertPem>,
) -> Result<CertOutcome> {
    let path = &output.path;
    let found_existing = path.exists();

    let pem = generate()?;
    if pem.key.trim().is_empty() || pem.cert.trim().is_empty() {
        return Err(Error::EmptyCertificate(path.clone()));
    }

    if found_existing {
        if output.force {
            tracing::debug!(path = %path.display(), "force mode enabled, overwriting");
        } else if output.interactive {
            ui.log(&format!(
                "an existing file was found at your specified output path {}.",
                path.display()
            ));
            if !ui.confirm_overwrite(path) {
                ui.log("Exiting at user's request");
                return Ok(CertOutcome::Declined);
            }
        } else if !path.exists() {
            return Err(Error::GenerationOutputMissing(path.clone()));
        }
    }

    atomic_write_secret(path, format!("{}\n{}", pem.key, pem.cert).as_bytes())?;

    let size = std::fs::metadata(path)
        .map_err(|e| Error::ReadFile {
            path: path.clone(),
            source: e,
        })?
        .len();
    if size == 0 {
        return Err(Error::EmptyCertificate(path.clone()));
    }

    ui.log(&format!(
        "wrote x509 certificate for {} to {} ({:.1} Kb)",
        request.describe(),
        path.display(),
        size as f64 / 1024.0
    ));
    Ok(CertOutcome::Written {
        path: path.clone(),
        size,
    })
}
