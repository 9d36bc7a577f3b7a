// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Local development certificates: a trusted dev CA, per-domain leaf
//! certificates signed by it, and short-lived headless certificates for CI.
//!
//! ```rust,no_run
//! use certin::{CertRequest, CertificateOptions, Config, Paths, TerminalUi, Workspace, WorkspaceOptions};
//! use std::sync::Arc;
//!
//! let paths = Paths::new("certin")?;
//! let config = Config::load(&paths.config)?;
//! let workspace = Workspace::for_current_platform(
//!     paths,
//!     WorkspaceOptions::from_config(&config),
//!     config.sudo_timeout_secs,
//!     Arc::new(TerminalUi::new(false)),
//! )?;
//!
//! let request = CertRequest::new("app.local", vec!["api.app.local".into()]);
//! let data = workspace.certificate_for(&request, CertificateOptions::default())?;
//! assert!(!data.cert.is_empty());
//! # Ok::<(), certin::Error>(())
//! ```

/// CA install, repair and uninstall.
pub mod authority;
/// Domain and headless certificates.
pub mod cert;
/// Configuration and on-disk layout.
pub mod config;
/// Error types.
pub mod error;
/// Filesystem utilities.
pub mod fs;
/// CA key encryption.
pub mod key;
/// Certificate engine backed by the openssl CLI.
pub mod openssl;
/// Elevated command execution.
pub mod sudo;
/// OpenSSL config templates.
pub mod templates;
/// System and browser trust stores.
pub mod trust;
/// User prompts.
pub mod ui;
/// Workspace orchestration.
pub mod workspace;
/// X.509 certificate parsing.
pub mod x509;

pub use authority::CaState;
pub use cert::{
    ensure_cert_exists, ensure_dev_cert_exists, generate_headless, validate_days, validate_fqdn,
    CertOutcome, CertPem, CertRequest, CertificateOptions, DomainData, OutputOptions,
    HEADLESS_CERT_DAYS, MAX_CERT_DAYS,
};
pub use config::{Config, Paths, DEFAULT_APP_NAME};
pub use error::{Error, Result};
pub use fs::PathGuard;
pub use openssl::{CertEngine, OpensslEngine};
pub use sudo::Sudo;
pub use templates::include_wildcards;
pub use trust::{Platform, PlatformContext, TrustAdapter, TrustOptions};
pub use ui::{TerminalUi, UserInterface};
pub use workspace::{Workspace, WorkspaceOptions};
pub use x509::{parse_cert_file, parse_cert_pem, CertInfo};
