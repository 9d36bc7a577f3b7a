// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};
use crate::fs::PathGuard;
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current config file version. Increment when making breaking changes.
const CONFIG_VERSION: u32 = 1;

/// Application name used when none is given.
pub const DEFAULT_APP_NAME: &str = "certin";

/// Marker written to the CA version file. This is v2 of the CA layout.
pub const CA_LAYOUT_VERSION: &str = "2";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Config file version for future migration support
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    /// Lifetime of the dev CA in days (only used when a CA is created)
    #[serde(default = "default_ca_days")]
    pub ca_days: u32,
    /// Lifetime of domain certificates in days
    #[serde(default = "default_cert_days")]
    pub cert_days: u32,
    /// How long to wait for a sudo command before giving up
    #[serde(default = "default_sudo_timeout_secs")]
    pub sudo_timeout_secs: u64,
    /// Never try to install NSS tooling (certutil) automatically
    #[serde(default)]
    pub skip_certutil_install: bool,
    /// Never touch the hosts file
    #[serde(default)]
    pub skip_hosts_file: bool,
}

fn default_config_version() -> u32 {
    CONFIG_VERSION
}

fn default_ca_days() -> u32 {
    180
}

fn default_cert_days() -> u32 {
    30
}

fn default_sudo_timeout_secs() -> u64 {
    120
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            ca_days: default_ca_days(),
            cert_days: default_cert_days(),
            sudo_timeout_secs: default_sudo_timeout_secs(),
            skip_certutil_install: false,
            skip_hosts_file: false,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| Error::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })?;
            toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?
        } else {
            Self::default()
        };

        if Self::migrate(&mut config) && path.exists() {
            config.save(path)?;
        }

        config.validate()?;

        Ok(config)
    }

    /// Bring an older config up to the current version.
    /// Returns true if the config was modified.
    fn migrate(config: &mut Self) -> bool {
        if config.config_version >= CONFIG_VERSION {
            return false;
        }

        let mut current_version = config.config_version;
        while current_version < CONFIG_VERSION {
            match current_version {
                0 => {
                    // v0 files could carry zero to mean "default"
                    if config.ca_days == 0 {
                        config.ca_days = default_ca_days();
                    }
                    if config.cert_days == 0 {
                        config.cert_days = default_cert_days();
                    }
                    current_version = 1;
                }
                _ => {
                    tracing::warn!(version = current_version, "skipping unknown config version");
                    current_version += 1;
                }
            }
        }

        config.config_version = CONFIG_VERSION;
        true
    }

    fn validate(&self) -> Result<()> {
        use crate::cert::validate_days;

        if self.config_version > CONFIG_VERSION {
            tracing::warn!(
                found = self.config_version,
                supported = CONFIG_VERSION,
                "config.toml is newer than this version of certin; some settings may be ignored"
            );
        }

        validate_days(self.cert_days)?;
        validate_days(self.ca_days)?;

        if self.sudo_timeout_secs == 0 {
            return Err(Error::Config("sudo_timeout_secs must be at least 1".into()));
        }

        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        crate::fs::atomic_write(path, content.as_bytes())
    }
}

/// On-disk layout for one application identity.
#[derive(Debug, Clone)]
pub struct Paths {
    pub app_name: String,
    pub base: PathBuf,
    /// Older config location, still a valid target for cleanup.
    pub legacy_base: Option<PathBuf>,
    pub ca_dir: PathBuf,
    pub ca_key: PathBuf,
    pub ca_cert: PathBuf,
    pub ca_serial: PathBuf,
    pub ca_database: PathBuf,
    pub ca_version: PathBuf,
    pub domains_dir: PathBuf,
    pub rand_file: PathBuf,
    pub config: PathBuf,
}

impl Paths {
    pub fn new(app_name: &str) -> Result<Self> {
        validate_app_name(app_name)?;
        let (base, legacy_base) = match std::env::var("CERTIN_ROOT") {
            Ok(custom_root) => (Self::custom_root(&custom_root)?, None),
            Err(_) => (Self::base_dir(app_name)?, Self::legacy_dir(app_name)),
        };
        Ok(Self::with_base(app_name, base, legacy_base))
    }

    /// Build the layout under an explicit root directory.
    pub fn with_base(app_name: &str, base: PathBuf, legacy_base: Option<PathBuf>) -> Self {
        let ca_dir = base.join("certificate-authority");
        Self {
            app_name: app_name.to_string(),
            ca_key: ca_dir.join("private-key.key"),
            ca_cert: ca_dir.join("certificate.cert"),
            ca_serial: ca_dir.join("serial"),
            ca_database: ca_dir.join("index.txt"),
            ca_version: base.join(format!("{}-ca-version", app_name)),
            domains_dir: base.join("domains"),
            rand_file: base.join(".rnd"),
            config: base.join("config.toml"),
            ca_dir,
            legacy_base,
            base,
        }
    }

    fn custom_root(custom_root: &str) -> Result<PathBuf> {
        let path = PathBuf::from(custom_root);
        if !path.is_absolute() {
            return Err(Error::Config(format!(
                "CERTIN_ROOT must be an absolute path, got: {}",
                custom_root
            )));
        }
        Ok(path)
    }

    fn base_dir(app_name: &str) -> Result<PathBuf> {
        // When running with sudo, keep using the original user's directory
        #[cfg(target_os = "linux")]
        if let Ok(sudo_user) = std::env::var("SUDO_USER") {
            if sudo_user
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
            {
                let user_home = PathBuf::from("/home").join(&sudo_user);
                if user_home.is_dir() {
                    return Ok(user_home.join(".local").join("share").join(app_name));
                }
            }
        }

        if let Some(proj_dirs) = ProjectDirs::from("", "", app_name) {
            Ok(proj_dirs.data_dir().to_path_buf())
        } else if let Some(base_dirs) = BaseDirs::new() {
            Ok(base_dirs.home_dir().join(format!(".{}", app_name)))
        } else {
            Err(Error::Config(
                "Could not determine a home directory. Set CERTIN_ROOT to choose a location."
                    .into(),
            ))
        }
    }

    /// Config directory used by earlier releases.
    fn legacy_dir(app_name: &str) -> Option<PathBuf> {
        #[cfg(windows)]
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            return Some(PathBuf::from(local).join(app_name).join("config"));
        }

        #[cfg(target_os = "linux")]
        // SAFETY: geteuid has no preconditions
        if unsafe { libc::geteuid() } == 0 {
            return Some(
                PathBuf::from("/usr/local/share")
                    .join(".config")
                    .join(app_name),
            );
        }

        BaseDirs::new().map(|dirs| dirs.home_dir().join(".config").join(app_name))
    }

    /// Sanitize a domain name for safe use in file paths.
    /// Wildcard domains (e.g., `*.localhost`) map `*` to `_wildcard_`.
    pub fn sanitize_domain_for_filename(domain: &str) -> Result<String> {
        let invalid = |reason: &str| Error::InvalidDomain {
            domain: domain.to_string(),
            reason: reason.to_string(),
        };

        if domain.is_empty() {
            return Err(invalid("domain cannot be empty"));
        }
        if domain.contains('\0') {
            return Err(invalid("domain contains null byte"));
        }
        if domain.contains('%') {
            return Err(invalid(
                "domain contains percent encoding (potential path traversal)",
            ));
        }
        if domain.contains("..") {
            return Err(invalid("domain contains path traversal sequence"));
        }
        if domain.contains('/') || domain.contains('\\') {
            return Err(invalid("domain contains path separator"));
        }
        if domain.starts_with('.') || domain.ends_with('.') {
            return Err(invalid("domain cannot start or end with a dot"));
        }

        let sanitized = domain.replace('*', "_wildcard_");

        for c in sanitized.chars() {
            if !c.is_ascii_alphanumeric() && c != '.' && c != '-' && c != '_' {
                return Err(Error::InvalidDomain {
                    domain: domain.to_string(),
                    reason: format!("domain contains invalid character: '{}'", c),
                });
            }
        }

        Ok(sanitized)
    }

    pub fn domain_dir(&self, common_name: &str) -> Result<PathBuf> {
        let safe = Self::sanitize_domain_for_filename(common_name)?;
        Ok(self.domains_dir.join(safe))
    }

    pub fn domain_key(&self, common_name: &str) -> Result<PathBuf> {
        Ok(self.domain_dir(common_name)?.join("private-key.key"))
    }

    pub fn domain_csr(&self, common_name: &str) -> Result<PathBuf> {
        Ok(self
            .domain_dir(common_name)?
            .join("certificate-signing-request.csr"))
    }

    pub fn domain_cert(&self, common_name: &str) -> Result<PathBuf> {
        Ok(self.domain_dir(common_name)?.join("certificate.crt"))
    }

    /// Lock file serializing runs against this config directory.
    /// Lives beside the directory so uninstall cannot delete it mid-run.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .base
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| self.app_name.clone().into());
        name.push(".lock");
        self.base.with_file_name(name)
    }

    /// Create any missing config directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.base, &self.domains_dir, &self.ca_dir] {
            create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn ensure_domain_dir(&self, common_name: &str) -> Result<PathBuf> {
        let dir = self.domain_dir(common_name)?;
        create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn ca_key_exists(&self) -> bool {
        self.ca_key.exists()
    }

    /// Guard covering every directory this identity may write to.
    pub fn guard(&self) -> PathGuard {
        let mut roots = vec![self.base.clone()];
        roots.extend(self.legacy_base.iter().cloned());
        PathGuard::new(roots)
    }
}

fn create_dir_all(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| Error::CreateDir {
            path: dir.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

fn validate_app_name(app_name: &str) -> Result<()> {
    let ok = !app_name.is_empty()
        && !app_name.starts_with('.')
        && app_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !ok {
        return Err(Error::Config(format!(
            "Invalid app name '{}': use letters, digits, '.', '-' or '_'",
            app_name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.ca_days, 180);
        assert_eq!(config.cert_days, 30);
        assert!(!config.skip_certutil_install);
        assert!(!config.skip_hosts_file);
    }

    #[test]
    fn test_config_load_missing_file() {
        let path = PathBuf::from("/nonexistent/config.toml");
        let config =
            Config::load(&path).expect("Config should load with defaults for missing file");
        assert_eq!(config.cert_days, 30);
        assert_eq!(config.ca_days, 180);
    }

    #[test]
    fn test_config_load_partial() {
        let mut file = NamedTempFile::new().expect("temp file should be created");
        writeln!(file, "cert_days = 14").expect("write cert_days should succeed");
        writeln!(file, "skip_hosts_file = true").expect("write skip_hosts_file should succeed");

        let config = Config::load(file.path()).expect("Config should load with partial values");
        assert_eq!(config.cert_days, 14);
        assert_eq!(config.ca_days, 180);
        assert!(config.skip_hosts_file);
    }

    #[test]
    fn test_config_migrates_v0_zero_days() {
        let mut file = NamedTempFile::new().expect("temp file should be created");
        writeln!(file, "config_version = 0").unwrap();
        writeln!(file, "cert_days = 0").unwrap();

        let config = Config::load(file.path()).expect("v0 config should migrate");
        assert_eq!(config.config_version, 1);
        assert_eq!(config.cert_days, 30);

        let saved = std::fs::read_to_string(file.path()).unwrap();
        assert!(saved.contains("config_version = 1"));
    }

    #[test]
    fn test_config_invalid_days() {
        let mut file = NamedTempFile::new().expect("temp file should be created");
        writeln!(file, "ca_days = 999999").unwrap();
        assert!(Config::load(file.path()).is_err());

        let mut file = NamedTempFile::new().expect("temp file should be created");
        writeln!(file, "cert_days = 0").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_paths_layout() {
        let paths = Paths::with_base("demo", PathBuf::from("/data/demo"), None);
        assert_eq!(
            paths.ca_key,
            PathBuf::from("/data/demo/certificate-authority/private-key.key")
        );
        assert_eq!(
            paths.ca_cert,
            PathBuf::from("/data/demo/certificate-authority/certificate.cert")
        );
        assert_eq!(
            paths.ca_serial,
            PathBuf::from("/data/demo/certificate-authority/serial")
        );
        assert_eq!(
            paths.ca_database,
            PathBuf::from("/data/demo/certificate-authority/index.txt")
        );
        assert_eq!(paths.ca_version, PathBuf::from("/data/demo/demo-ca-version"));
        assert_eq!(
            paths.domain_cert("app.local").unwrap(),
            PathBuf::from("/data/demo/domains/app.local/certificate.crt")
        );
        assert_eq!(
            paths.domain_csr("app.local").unwrap(),
            PathBuf::from("/data/demo/domains/app.local/certificate-signing-request.csr")
        );
        assert_eq!(paths.lock_path(), PathBuf::from("/data/demo.lock"));
    }

    #[test]
    fn test_paths_are_deterministic() {
        let a = Paths::with_base("demo", PathBuf::from("/x"), None);
        let b = Paths::with_base("demo", PathBuf::from("/x"), None);
        assert_eq!(a.ca_key, b.ca_key);
        assert_eq!(
            a.domain_key("foo.test").unwrap(),
            b.domain_key("foo.test").unwrap()
        );
    }

    #[test]
    fn test_ensure_dirs_is_idempotent() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let paths = Paths::with_base("demo", dir.path().join("demo"), None);
        paths.ensure_dirs().expect("first ensure_dirs should succeed");
        std::fs::write(paths.ca_dir.join("keep"), b"x").unwrap();
        paths.ensure_dirs().expect("second ensure_dirs should succeed");
        assert!(paths.domains_dir.is_dir());
        assert!(paths.ca_dir.join("keep").exists());
    }

    #[test]
    fn test_guard_covers_legacy_dir() {
        let paths = Paths::with_base(
            "demo",
            PathBuf::from("/data/demo"),
            Some(PathBuf::from("/home/u/.config/demo")),
        );
        let guard = paths.guard();
        assert!(guard
            .assert_not_touching_files(Path::new("/home/u/.config/demo/x"), "delete")
            .is_ok());
        assert!(guard
            .assert_not_touching_files(Path::new("/home/u/.ssh/id_rsa"), "read")
            .is_err());
    }

    #[test]
    fn test_sanitize_domain_rejects_path_traversal() {
        assert!(Paths::sanitize_domain_for_filename("..").is_err());
        assert!(Paths::sanitize_domain_for_filename("../etc/passwd").is_err());
        assert!(Paths::sanitize_domain_for_filename("foo/bar").is_err());
        assert!(Paths::sanitize_domain_for_filename("C:\\Windows").is_err());
        assert!(Paths::sanitize_domain_for_filename("foo\0bar").is_err());
        assert!(Paths::sanitize_domain_for_filename("foo bar").is_err());
        assert!(Paths::sanitize_domain_for_filename("").is_err());
    }

    #[test]
    fn test_sanitize_domain_wildcard() {
        assert_eq!(
            Paths::sanitize_domain_for_filename("*.example.com")
                .expect("wildcard example.com should be valid"),
            "_wildcard_.example.com"
        );
        assert_eq!(
            Paths::sanitize_domain_for_filename("app.local").unwrap(),
            "app.local"
        );
    }

    #[test]
    fn test_app_name_validation() {
        assert!(validate_app_name("certin").is_ok());
        assert!(validate_app_name("my-app_2").is_ok());
        assert!(validate_app_name("").is_err());
        assert!(validate_app_name("../evil").is_err());
        assert!(validate_app_name("a/b").is_err());
    }
}
