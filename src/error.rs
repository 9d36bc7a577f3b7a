// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Platform not supported: \"{0}\"")]
    UnsupportedPlatform(String),

    #[error("OpenSSL not found: '{0}' is required to generate certificates. Make sure it is installed and available in your PATH")]
    ToolNotFound(String),

    #[error("Failed to generate private key {path}: {stderr}")]
    KeyGeneration { path: PathBuf, stderr: String },

    #[error("Failed to sign certificate {path}: {stderr}")]
    Signing { path: PathBuf, stderr: String },

    #[error("Cannot {operation} {path}; it is outside known certin config directories!")]
    PathSafetyViolation { operation: String, path: PathBuf },

    #[error("Unexpected error while trying to detect sudo elevation: {0}")]
    SudoProbe(String),

    #[error("pem file at {0} was not found after generation attempt")]
    GenerationOutputMissing(PathBuf),

    #[error("{0}: .pem file has zero size. This is a bug in certin, please report it")]
    EmptyCertificate(PathBuf),

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Certificate generation failed: {0}")]
    CertGen(#[from] rcgen::Error),

    #[error("Failed to generate RSA key: {0}")]
    RsaKey(String),

    #[error("Invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    #[error("Invalid validity period: {0}")]
    InvalidDays(String),

    #[error("Invalid path (non-UTF8): {0}")]
    InvalidPath(PathBuf),

    #[error("Trust store operation failed: {0}")]
    TrustStore(String),

    #[error("Elevated operation timed out after {seconds} seconds.\nThe sudo prompt may have been ignored or the operation is hanging.")]
    TrustStoreTimeout { seconds: u64 },

    #[error("Sudo authentication failed or was cancelled.\nThis operation requires elevated privileges.")]
    SudoFailed,

    #[error("Command '{command}' not found.\n{hint}")]
    CommandNotFound { command: String, hint: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Command failed: {command}\n{stderr}")]
    Command { command: String, stderr: String },

    #[error("Failed to parse certificate: {0}")]
    CertParse(String),

    #[error("Failed to encrypt key: {0}")]
    KeyEncryption(String),

    #[error("Failed to decrypt key: {0}")]
    KeyDecryption(String),

    #[error("Incorrect password for the encrypted CA key")]
    PasswordIncorrect,

    #[error("Manual trust wizard failed: {0}")]
    Wizard(String),
}

pub type Result<T> = std::result::Result<T, Error>;
