// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! OpenSSL configuration files for CA self-signing, domain CSRs and domain signing.

use std::fmt::Write;
use std::path::PathBuf;

/// Section name used as `default_ca` in signing configs.
pub const DEFAULT_CA_SECTION: &str = "certin_ca";

/// Expand each name with its wildcard form: `a.com` becomes `a.com, *.a.com`.
/// Order is preserved and duplicates are kept. Names that already are
/// wildcards are kept as they are.
pub fn include_wildcards<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut out = Vec::with_capacity(names.len() * 2);
    for name in names {
        let name = name.as_ref();
        out.push(name.to_string());
        if !name.starts_with("*.") {
            out.push(format!("*.{}", name));
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct CaCertConfig {
    pub name: String,
    pub days: u32,
}

#[derive(Debug, Clone)]
pub struct DomainCsrConfig {
    pub common_name: String,
    pub subject_alt_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DomainCertConfig {
    pub serial: PathBuf,
    pub database: PathBuf,
    pub new_certs_dir: PathBuf,
    pub days: u32,
    pub common_name: String,
    pub subject_alt_names: Vec<String>,
}

impl CaCertConfig {
    pub fn render(&self) -> String {
        format!(
            "[ req ]\n\
             default_bits = 2048\n\
             default_md = sha256\n\
             default_days = {days}\n\
             prompt = no\n\
             distinguished_name = req_distinguished_name\n\
             x509_extensions = v3_ca\n\
             \n\
             [ req_distinguished_name ]\n\
             commonName = {name}\n\
             \n\
             [ v3_ca ]\n\
             basicConstraints = critical, CA:true\n\
             keyUsage = critical, keyCertSign, cRLSign, digitalSignature\n\
             subjectKeyIdentifier = hash\n\
             authorityKeyIdentifier = keyid:always, issuer\n",
            days = self.days,
            name = self.name,
        )
    }
}

impl DomainCsrConfig {
    pub fn render(&self) -> String {
        let names = names_with_wildcards(&self.common_name, &self.subject_alt_names);
        format!(
            "[ req ]\n\
             default_bits = 2048\n\
             default_md = sha256\n\
             prompt = no\n\
             distinguished_name = req_distinguished_name\n\
             req_extensions = v3_req\n\
             \n\
             [ req_distinguished_name ]\n\
             commonName = {cn}\n\
             \n\
             [ v3_req ]\n\
             subjectAltName = @alt_names\n\
             \n\
             [ alt_names ]\n\
             {alt_names}",
            cn = self.common_name,
            alt_names = alt_names_section(&names),
        )
    }
}

impl DomainCertConfig {
    pub fn render(&self) -> String {
        let names = names_with_wildcards(&self.common_name, &self.subject_alt_names);
        format!(
            "[ ca ]\n\
             default_ca = {section}\n\
             \n\
             [ {section} ]\n\
             new_certs_dir = {new_certs_dir}\n\
             database = {database}\n\
             serial = {serial}\n\
             default_md = sha256\n\
             default_days = {days}\n\
             policy = certin_policy\n\
             copy_extensions = copy\n\
             x509_extensions = certin_leaf\n\
             unique_subject = no\n\
             \n\
             [ certin_policy ]\n\
             commonName = supplied\n\
             \n\
             [ certin_leaf ]\n\
             basicConstraints = CA:false\n\
             keyUsage = digitalSignature, keyEncipherment\n\
             extendedKeyUsage = serverAuth, clientAuth\n\
             subjectKeyIdentifier = hash\n\
             authorityKeyIdentifier = keyid, issuer\n\
             subjectAltName = @alt_names\n\
             \n\
             [ alt_names ]\n\
             {alt_names}",
            section = DEFAULT_CA_SECTION,
            new_certs_dir = config_path(&self.new_certs_dir),
            database = config_path(&self.database),
            serial = config_path(&self.serial),
            days = self.days,
            alt_names = alt_names_section(&names),
        )
    }
}

fn names_with_wildcards(common_name: &str, alt_names: &[String]) -> Vec<String> {
    let mut names = Vec::with_capacity(alt_names.len() + 1);
    names.push(common_name.to_string());
    names.extend(alt_names.iter().cloned());
    include_wildcards(&names)
}

fn alt_names_section(names: &[String]) -> String {
    let mut out = String::new();
    for (i, name) in names.iter().enumerate() {
        // writing to a String cannot fail
        let _ = writeln!(out, "DNS.{} = {}", i + 1, name);
    }
    out
}

// OpenSSL config values treat backslashes as escapes
fn config_path(path: &std::path::Path) -> String {
    path.display().to_string().replace('\\', "/")
}
