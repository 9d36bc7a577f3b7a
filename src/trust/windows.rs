// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};
use crate::fs::{path_to_str, write_secret_file};
use crate::key;
use crate::trust::{
    best_effort, hosts_entry_needed, hosts_line, validate_cert_path, wizard, PlatformContext,
    TrustAdapter, TrustOptions,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

const HOSTS_FILE_PATH: &str = "C:\\Windows\\System32\\Drivers\\etc\\hosts";
const MAX_PASSWORD_ATTEMPTS: usize = 3;

/// The user root store covers Edge, Chrome and most tools. Firefox can only
/// be configured through its own import wizard.
///
/// There is no root-owned storage to hide the CA key in, so private keys are
/// kept PKCS#8-encrypted under a password asked for once per run.
pub struct WindowsTrust {
    ctx: PlatformContext,
    password: Mutex<Option<String>>,
}

impl WindowsTrust {
    pub fn new(ctx: PlatformContext) -> Self {
        Self {
            ctx,
            password: Mutex::new(None),
        }
    }

    fn encryption_password(&self) -> Result<String> {
        let mut cached = self.password.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(password) = cached.as_ref() {
            return Ok(password.clone());
        }
        let password = self.ctx.ui.windows_encryption_password()?;
        *cached = Some(password.clone());
        Ok(password)
    }

    fn forget_password(&self) {
        *self.password.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn decrypt(&self, path: &Path, encrypted: &[u8]) -> Result<Vec<u8>> {
        for attempt in 1..=MAX_PASSWORD_ATTEMPTS {
            let password = self.encryption_password()?;
            match key::decrypt_key_pem(encrypted, &password) {
                Ok(pem) => return Ok(pem.into_bytes()),
                Err(Error::PasswordIncorrect) => {
                    tracing::debug!(attempt, path = %path.display(), "wrong key password");
                    self.forget_password();
                    self.ctx
                        .ui
                        .warn("Incorrect password for the certin CA key, please try again");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::PasswordIncorrect)
    }

    fn certutil(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("certutil")
            .args(args)
            .output()
            .map_err(|e| Error::Command {
                command: format!("certutil {}", args.join(" ")),
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            // certutil reports errors on stdout
            return Err(Error::TrustStore(format!(
                "certutil {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stdout).trim()
            )));
        }
        Ok(())
    }
}

impl TrustAdapter for WindowsTrust {
    fn add_to_trust_store(&self, ca_cert: &Path, _options: &TrustOptions) -> Result<()> {
        let safe_cert_path = validate_cert_path(ca_cert)?;

        tracing::debug!("adding CA to the user root store");
        self.certutil(&["-addstore", "-user", "root", path_to_str(&safe_cert_path)?])?;

        if firefox_installed() {
            best_effort(
                "firefox wizard",
                wizard::open_certificate_in_firefox(
                    &self.ctx.ui,
                    &["cmd", "/C", "start", "firefox"],
                    &safe_cert_path,
                ),
            );
        }

        Ok(())
    }

    fn remove_from_trust_store(&self, _ca_cert: &Path) -> Result<()> {
        self.ctx.ui.warn(
            "Removing old certificates from trust stores. You may be prompted to grant \
             permission for this. It's safe to delete old certin certificates.",
        );
        best_effort(
            "certutil -delstore",
            self.certutil(&["-delstore", "-user", "root", &self.ctx.app_name]),
        );
        Ok(())
    }

    fn add_domain_to_hosts_file_if_missing(&self, domain: &str) -> Result<()> {
        let hosts = Path::new(HOSTS_FILE_PATH);
        let contents = std::fs::read_to_string(hosts).map_err(|e| Error::ReadFile {
            path: hosts.to_path_buf(),
            source: e,
        })?;
        if !hosts_entry_needed(&contents, domain) {
            return Ok(());
        }

        let mut line = String::new();
        if !contents.is_empty() && !contents.ends_with('\n') {
            line.push_str("\r\n");
        }
        line.push_str(&hosts_line(domain));

        // Needs an elevated shell; there is no sudo to fall back on
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(hosts)
            .map_err(|e| Error::WriteFile {
                path: hosts.to_path_buf(),
                source: e,
            })?;
        file.write_all(line.as_bytes())
            .map_err(|e| Error::WriteFile {
                path: hosts.to_path_buf(),
                source: e,
            })
    }

    fn read_protected_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.ctx.guard.assert_not_touching_files(path, "read")?;
        let contents = std::fs::read(path).map_err(|e| Error::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        if key::is_encrypted_key_pem(&contents) {
            return self.decrypt(path, &contents);
        }
        Ok(contents)
    }

    fn write_protected_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.ctx.guard.assert_not_touching_files(path, "write")?;
        if key::is_private_key_pem(contents) {
            let encrypted = key::encrypt_key_pem(contents, &self.encryption_password()?)?;
            return write_secret_file(path, encrypted.as_bytes());
        }
        write_secret_file(path, contents)
    }

    fn delete_protected_files(&self, path: &Path) -> Result<()> {
        self.ctx.guard.assert_not_touching_files(path, "delete")?;
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Remove {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    fn has_elevated_access(&self) -> Result<bool> {
        self.ctx.sudo.has_sudo()
    }

    fn name(&self) -> &'static str {
        "Windows Certificate Store"
    }
}

fn firefox_installed() -> bool {
    ["ProgramFiles", "ProgramFiles(x86)"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|dir| {
            PathBuf::from(dir)
                .join("Mozilla Firefox")
                .join("firefox.exe")
        })
        .any(|exe| exe.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::PathGuard;
    use crate::sudo::Sudo;
    use crate::ui::UserInterface;
    use std::collections::VecDeque;
    use std::sync::Arc;

    #[derive(Default)]
    struct PasswordUi {
        answers: Mutex<VecDeque<&'static str>>,
        prompts: Mutex<usize>,
        warnings: Mutex<Vec<String>>,
    }

    impl PasswordUi {
        fn answering(answers: &[&'static str]) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.iter().copied().collect()),
                ..Default::default()
            })
        }

        fn prompts(&self) -> usize {
            *self.prompts.lock().unwrap()
        }
    }

    impl UserInterface for PasswordUi {
        fn password_request_notice(&self, _reason: &str) {}
        fn close_firefox_before_continuing(&self) {}
        fn start_firefox_wizard(&self, _host: &str) -> Result<()> {
            Ok(())
        }
        fn wait_for_firefox_wizard(&self) -> Result<()> {
            Ok(())
        }
        fn warn_chrome_on_linux_without_certutil(&self) {}
        fn windows_encryption_password(&self) -> Result<String> {
            *self.prompts.lock().unwrap() += 1;
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .map(str::to_string)
                .ok_or_else(|| Error::Config("no password entered".into()))
        }
        fn confirm_overwrite(&self, _path: &Path) -> bool {
            false
        }
        fn log(&self, _message: &str) {}
        fn warn(&self, message: &str) {
            self.warnings.lock().unwrap().push(message.to_string());
        }
    }

    fn adapter(root: &Path, ui: Arc<PasswordUi>) -> WindowsTrust {
        WindowsTrust::new(PlatformContext {
            app_name: "certin".into(),
            sudo: Sudo::new(5),
            guard: PathGuard::new(vec![root.to_path_buf()]),
            ui,
        })
    }

    fn key_pem() -> String {
        rcgen::KeyPair::generate()
            .expect("key should be generated")
            .serialize_pem()
    }

    #[test]
    fn test_key_is_stored_encrypted_and_password_cached() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("private-key.key");
        let ui = PasswordUi::answering(&["correct horse"]);
        let trust = adapter(dir.path(), ui.clone());
        let key = key_pem();

        trust
            .write_protected_file(&path, key.as_bytes())
            .expect("key should be written");
        let on_disk = std::fs::read(&path).unwrap();
        assert!(key::is_encrypted_key_pem(&on_disk));
        assert!(!String::from_utf8_lossy(&on_disk).contains("BEGIN PRIVATE KEY"));

        let read = trust.read_protected_file(&path).expect("key should be read");
        assert_eq!(
            pem::parse(&read).unwrap().contents(),
            pem::parse(&key).unwrap().contents()
        );
        assert_eq!(ui.prompts(), 1, "password should be asked once per run");
    }

    #[test]
    fn test_wrong_password_is_asked_again() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("private-key.key");
        let writer = adapter(dir.path(), PasswordUi::answering(&["right"]));
        writer.write_protected_file(&path, key_pem().as_bytes()).unwrap();

        let ui = PasswordUi::answering(&["wrong", "right"]);
        let reader = adapter(dir.path(), ui.clone());
        let read = reader
            .read_protected_file(&path)
            .expect("second password should decrypt");
        assert!(key::is_private_key_pem(&read));
        assert_eq!(ui.prompts(), 2);
        assert_eq!(ui.warnings.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_repeated_wrong_passwords_give_up() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("private-key.key");
        let writer = adapter(dir.path(), PasswordUi::answering(&["right"]));
        writer.write_protected_file(&path, key_pem().as_bytes()).unwrap();

        let ui = PasswordUi::answering(&["a", "b", "c", "right"]);
        let err = adapter(dir.path(), ui.clone())
            .read_protected_file(&path)
            .unwrap_err();
        assert!(matches!(err, Error::PasswordIncorrect));
        assert_eq!(ui.prompts(), MAX_PASSWORD_ATTEMPTS);
    }

    #[test]
    fn test_certificates_are_stored_as_is() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("certificate.cert");
        let ui = PasswordUi::answering(&[]);
        let trust = adapter(dir.path(), ui.clone());
        let cert = b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";

        trust.write_protected_file(&path, cert).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), cert);
        assert_eq!(trust.read_protected_file(&path).unwrap(), cert);
        assert_eq!(ui.prompts(), 0);
    }

    #[test]
    fn test_protected_operations_stay_inside_config_dirs() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let root = dir.path().join("certin");
        std::fs::create_dir_all(&root).unwrap();
        let outside = dir.path().join("outside.txt");
        std::fs::write(&outside, b"keep me").unwrap();
        let trust = adapter(&root, PasswordUi::answering(&["pw"]));

        assert!(matches!(
            trust.read_protected_file(&outside),
            Err(Error::PathSafetyViolation { .. })
        ));
        assert!(matches!(
            trust.write_protected_file(&outside, key_pem().as_bytes()),
            Err(Error::PathSafetyViolation { .. })
        ));
        assert!(matches!(
            trust.delete_protected_files(&outside),
            Err(Error::PathSafetyViolation { .. })
        ));
        assert_eq!(std::fs::read(&outside).unwrap(), b"keep me");
    }
}
