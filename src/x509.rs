// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Read certificate details without shelling out to openssl.

use crate::error::{Error, Result};
use std::path::Path;
use x509_parser::prelude::*;

#[derive(Debug, Clone)]
pub struct CertInfo {
    pub not_after_timestamp: i64,
    pub common_name: Option<String>,
    /// DNS names from the subjectAltName extension, in certificate order
    pub subject_alt_names: Vec<String>,
    pub is_ca: bool,
    pub server_auth: bool,
    pub client_auth: bool,
}

impl CertInfo {
    pub fn expiry_string(&self) -> String {
        match ::time::OffsetDateTime::from_unix_timestamp(self.not_after_timestamp) {
            Ok(dt) => format!("{}-{:02}-{:02}", dt.year(), dt.month() as u8, dt.day()),
            Err(_) => "Invalid date".to_string(),
        }
    }

    pub fn days_remaining(&self) -> i64 {
        let now = ::time::OffsetDateTime::now_utc();
        match ::time::OffsetDateTime::from_unix_timestamp(self.not_after_timestamp) {
            Ok(expiry) => (expiry - now).whole_days(),
            Err(_) => -1, // Treat invalid timestamps as expired
        }
    }

    pub fn is_expired(&self) -> bool {
        ::time::OffsetDateTime::now_utc().unix_timestamp() > self.not_after_timestamp
    }

    /// Requested names the certificate does not list as a subjectAltName.
    pub fn missing_names<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        names
            .iter()
            .map(|n| n.as_ref())
            .filter(|n| {
                !self
                    .subject_alt_names
                    .iter()
                    .any(|san| san.eq_ignore_ascii_case(n))
            })
            .map(String::from)
            .collect()
    }
}

pub fn parse_cert_file(path: &Path) -> Result<CertInfo> {
    let pem_data = std::fs::read_to_string(path).map_err(|e| Error::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_cert_pem(&pem_data)
}

/// Parse the first certificate in `pem_str`. Other PEM blocks (such as a
/// private key in a bundle) are skipped.
pub fn parse_cert_pem(pem_str: &str) -> Result<CertInfo> {
    let blocks = ::pem::parse_many(pem_str)
        .map_err(|e| Error::CertParse(format!("Failed to parse PEM: {}", e)))?;

    let pem = blocks
        .iter()
        .find(|p| p.tag() == "CERTIFICATE")
        .ok_or_else(|| Error::CertParse("No CERTIFICATE block found".into()))?;

    let (_, cert) = X509Certificate::from_der(pem.contents())
        .map_err(|e| Error::CertParse(format!("Invalid X.509: {}", e)))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(String::from);

    let mut info = CertInfo {
        not_after_timestamp: cert.validity().not_after.timestamp(),
        common_name,
        subject_alt_names: Vec::new(),
        is_ca: false,
        server_auth: false,
        client_auth: false,
    };

    for ext in cert.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::SubjectAlternativeName(san) => {
                for name in &san.general_names {
                    if let GeneralName::DNSName(dns) = name {
                        info.subject_alt_names.push(dns.to_string());
                    }
                }
            }
            ParsedExtension::BasicConstraints(bc) => {
                info.is_ca = bc.ca;
            }
            ParsedExtension::ExtendedKeyUsage(eku) => {
                info.server_auth = eku.server_auth;
                info.client_auth = eku.client_auth;
            }
            _ => {}
        }
    }

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{
        BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
        SanType,
    };

    fn self_signed(names: &[&str], days: i64, is_ca: bool) -> String {
        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, names[0]);
        for name in names {
            params.subject_alt_names.push(SanType::DnsName(
                name.to_string()
                    .try_into()
                    .expect("name should be a valid DNS name"),
            ));
        }
        if is_ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        } else {
            params.extended_key_usages = vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ];
        }
        let now = ::time::OffsetDateTime::now_utc();
        params.not_before = now - ::time::Duration::days(1);
        params.not_after = now + ::time::Duration::days(days);

        let key = KeyPair::generate().expect("key pair should be generated");
        params
            .self_signed(&key)
            .expect("certificate should be signed")
            .pem()
    }

    #[test]
    fn test_parse_leaf_cert() {
        let pem = self_signed(&["app.test", "*.app.test"], 30, false);
        let info = parse_cert_pem(&pem).expect("certificate should parse");

        assert_eq!(info.common_name.as_deref(), Some("app.test"));
        assert_eq!(info.subject_alt_names, vec!["app.test", "*.app.test"]);
        assert!(!info.is_ca);
        assert!(info.server_auth);
        assert!(info.client_auth);
        assert!(!info.is_expired());
        assert!((29..=30).contains(&info.days_remaining()));
    }

    #[test]
    fn test_parse_ca_cert() {
        let pem = self_signed(&["certin"], 180, true);
        let info = parse_cert_pem(&pem).expect("certificate should parse");
        assert!(info.is_ca);
        assert!(!info.server_auth);
    }

    #[test]
    fn test_parse_skips_leading_key_block() {
        let key = KeyPair::generate().expect("key pair should be generated");
        let bundle = format!(
            "{}\n{}",
            key.serialize_pem(),
            self_signed(&["bundle.test"], 2, false)
        );
        let info = parse_cert_pem(&bundle).expect("bundle should parse");
        assert_eq!(info.common_name.as_deref(), Some("bundle.test"));
    }

    #[test]
    fn test_parse_rejects_non_certificate() {
        let key = KeyPair::generate().expect("key pair should be generated");
        assert!(matches!(
            parse_cert_pem(&key.serialize_pem()),
            Err(Error::CertParse(_))
        ));
        assert!(parse_cert_pem("not pem").is_err());
    }

    #[test]
    fn test_missing_names_is_case_insensitive() {
        let pem = self_signed(&["app.test", "*.app.test"], 30, false);
        let info = parse_cert_pem(&pem).expect("certificate should parse");
        assert!(info.missing_names(&["APP.test", "*.app.test"]).is_empty());
        assert_eq!(
            info.missing_names(&["app.test", "api.app.test"]),
            vec!["api.app.test".to_string()]
        );
    }

    #[test]
    fn test_expiry_string() {
        let pem = self_signed(&["app.test"], 30, false);
        let info = parse_cert_pem(&pem).expect("certificate should parse");
        let expiry = info.expiry_string();
        assert_eq!(expiry.len(), 10);
        assert_eq!(expiry.chars().nth(4), Some('-'));
        assert_eq!(expiry.chars().nth(7), Some('-'));
    }
}
