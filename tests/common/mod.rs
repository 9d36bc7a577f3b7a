// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Test doubles for the trust store, the certificate engine and the UI.

#![allow(dead_code)]

use certin::templates::{include_wildcards, CaCertConfig, DomainCertConfig, DomainCsrConfig};
use certin::{
    CertEngine, Error, OpensslEngine, Paths, PathGuard, Result, TrustAdapter, TrustOptions,
    UserInterface, Workspace, WorkspaceOptions,
};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DnType,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Trust adapter that records every call and uses plain file operations.
pub struct FakeTrust {
    guard: PathGuard,
    calls: Arc<Mutex<Vec<String>>>,
    elevated: bool,
}

impl TrustAdapter for FakeTrust {
    fn add_to_trust_store(&self, ca_cert: &Path, options: &TrustOptions) -> Result<()> {
        assert!(ca_cert.exists(), "CA cert should exist before it is trusted");
        self.record(format!(
            "add-trust:{}:{}",
            ca_cert.display(),
            options.skip_certutil_install
        ));
        Ok(())
    }

    fn remove_from_trust_store(&self, _ca_cert: &Path) -> Result<()> {
        self.record("remove-trust".to_string());
        Ok(())
    }

    fn add_domain_to_hosts_file_if_missing(&self, domain: &str) -> Result<()> {
        self.record(format!("hosts:{}", domain));
        Ok(())
    }

    fn read_protected_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.guard.assert_not_touching_files(path, "read")?;
        self.record(format!("read:{}", path.display()));
        std::fs::read(path).map_err(|e| Error::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn write_protected_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.guard.assert_not_touching_files(path, "write")?;
        self.record(format!("write:{}", path.display()));
        std::fs::write(path, contents).map_err(|e| Error::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn delete_protected_files(&self, path: &Path) -> Result<()> {
        self.guard.assert_not_touching_files(path, "delete")?;
        self.record(format!("delete:{}", path.display()));
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        result.map_err(|e| Error::Remove {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn has_elevated_access(&self) -> Result<bool> {
        Ok(self.elevated)
    }

    fn name(&self) -> &'static str {
        "fake trust store"
    }
}

impl FakeTrust {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Counters and failure switches shared with [`RcgenEngine`].
#[derive(Default)]
pub struct EngineState {
    pub keys: AtomicUsize,
    pub self_signs: AtomicUsize,
    pub csrs: AtomicUsize,
    pub signs: AtomicUsize,
    /// Number of upcoming `check_certificate` calls that should fail.
    pub failing_checks: AtomicUsize,
    pub fail_signing: AtomicBool,
    /// CA key paths handed to `sign_certificate`.
    pub signing_keys: Mutex<Vec<PathBuf>>,
}

/// In-process certificate engine built on rcgen.
pub struct RcgenEngine {
    state: Arc<EngineState>,
}

fn write(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| Error::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })
}

fn validity(params: &mut CertificateParams, days: u32) {
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(days as i64);
}

impl CertEngine for RcgenEngine {
    fn generate_key(&self, path: &Path) -> Result<()> {
        self.state.keys.fetch_add(1, Ordering::SeqCst);
        let key = KeyPair::generate()?;
        write(path, &key.serialize_pem())
    }

    fn self_sign_ca(&self, key: &Path, config: &CaCertConfig, out: &Path) -> Result<()> {
        self.state.self_signs.fetch_add(1, Ordering::SeqCst);
        let key = KeyPair::from_pem(&read(key)?)?;

        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, config.name.as_str());
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        validity(&mut params, config.days);

        write(out, &params.self_signed(&key)?.pem())
    }

    fn create_csr(&self, key: &Path, config: &DomainCsrConfig, out: &Path) -> Result<()> {
        self.state.csrs.fetch_add(1, Ordering::SeqCst);
        let key = KeyPair::from_pem(&read(key)?)?;

        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, config.common_name.as_str());
        let names: Vec<&str> = std::iter::once(config.common_name.as_str())
            .chain(config.subject_alt_names.iter().map(String::as_str))
            .collect();
        for name in include_wildcards(&names) {
            params
                .subject_alt_names
                .push(SanType::DnsName(name.try_into()?));
        }

        write(out, &params.serialize_request(&key)?.pem()?)
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
        self.state.signs.fetch_add(1, Ordering::SeqCst);
        self.state
            .signing_keys
            .lock()
            .unwrap()
            .push(ca_key.to_path_buf());

        if self.state.fail_signing.load(Ordering::SeqCst) {
            return Err(Error::Signing {
                path: out.to_path_buf(),
                stderr: "simulated signing failure".into(),
            });
        }
        // `openssl ca` needs its bookkeeping files
        assert!(config.serial.exists(), "serial file should be seeded");
        assert!(config.database.exists(), "index file should be seeded");
        assert_eq!(config.days, days);

        let mut csr_params = CertificateSigningRequestParams::from_pem(&read(csr)?)?;
        validity(&mut csr_params.params, days);
        csr_params.params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let issuer = Issuer::from_ca_cert_pem(&read(ca_cert)?, KeyPair::from_pem(&read(ca_key)?)?)?;
        write(out, &csr_params.signed_by(&issuer)?.pem())
    }

    fn check_certificate(&self, path: &Path) -> Result<()> {
        let failing = self.state.failing_checks.load(Ordering::SeqCst);
        if failing > 0 {
            self.state.failing_checks.store(failing - 1, Ordering::SeqCst);
            return Err(Error::CertParse("simulated unreadable certificate".into()));
        }
        certin::parse_cert_file(path).map(|_| ())
    }
}

/// UI that records what it was asked to show.
#[derive(Default)]
pub struct RecordingUi {
    pub allow_overwrite: bool,
    pub password_notices: Mutex<Vec<String>>,
    pub logs: Mutex<Vec<String>>,
    pub warnings: Mutex<Vec<String>>,
}

impl UserInterface for RecordingUi {
    fn password_request_notice(&self, reason: &str) {
        self.password_notices
            .lock()
            .unwrap()
            .push(reason.to_string());
    }
    fn close_firefox_before_continuing(&self) {}
    fn start_firefox_wizard(&self, _host: &str) -> Result<()> {
        Ok(())
    }
    fn wait_for_firefox_wizard(&self) -> Result<()> {
        Ok(())
    }
    fn warn_chrome_on_linux_without_certutil(&self) {}
    fn windows_encryption_password(&self) -> Result<String> {
        Ok("secret".to_string())
    }
    fn confirm_overwrite(&self, _path: &Path) -> bool {
        self.allow_overwrite
    }
    fn log(&self, message: &str) {
        self.logs.lock().unwrap().push(message.to_string());
    }
    fn warn(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }
}

/// A workspace rooted in a temp dir, with handles on every fake.
pub struct TestWorkspace {
    pub workspace: Workspace,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub engine: Arc<EngineState>,
    pub ui: Arc<RecordingUi>,
    pub root: PathBuf,
    pub legacy: PathBuf,
    _temp_dir: TempDir,
}

pub struct Setup {
    pub options: WorkspaceOptions,
    pub elevated: bool,
    /// Sign with the openssl CLI instead of the in-process engine.
    pub openssl: bool,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            options: WorkspaceOptions::default(),
            elevated: true,
            openssl: false,
        }
    }
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self::with(Setup::default())
    }

    pub fn with(setup: Setup) -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");
        let root = temp_dir.path().join("certin");
        let legacy = temp_dir.path().join("legacy-config");
        let paths = Paths::with_base("certin", root.clone(), Some(legacy.clone()));

        let calls = Arc::new(Mutex::new(Vec::new()));
        let engine = Arc::new(EngineState::default());
        let ui = Arc::new(RecordingUi::default());

        let trust = FakeTrust {
            guard: paths.guard(),
            calls: Arc::clone(&calls),
            elevated: setup.elevated,
        };
        let cert_engine: Box<dyn CertEngine> = if setup.openssl {
            Box::new(OpensslEngine::new(paths.rand_file.clone()))
        } else {
            Box::new(RcgenEngine {
                state: Arc::clone(&engine),
            })
        };
        let workspace = Workspace::new(
            paths,
            setup.options,
            cert_engine,
            Box::new(trust),
            ui.clone(),
        );

        Self {
            workspace,
            calls,
            engine,
            ui,
            root,
            legacy,
            _temp_dir: temp_dir,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn paths(&self) -> &Paths {
        self.workspace.paths()
    }

    pub fn temp_path(&self) -> &Path {
        self._temp_dir.path()
    }
}
