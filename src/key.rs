// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Password protection for the CA private key.

use crate::error::{Error, Result};
use pkcs8::der::asn1::AnyRef;
use pkcs8::der::Decode;
use pkcs8::spki::AlgorithmIdentifierRef;
use pkcs8::{EncryptedPrivateKeyInfo, LineEnding, ObjectIdentifier, PrivateKeyInfo};

pub const ENCRYPTED_KEY_TAG: &str = "ENCRYPTED PRIVATE KEY";

const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// True if `contents` is a PEM private key, in PKCS#8 or PKCS#1 form.
pub fn is_private_key_pem(contents: &[u8]) -> bool {
    pem::parse(contents).is_ok_and(|p| matches!(p.tag(), "PRIVATE KEY" | "RSA PRIVATE KEY"))
}

/// True if `contents` is a PEM encrypted PKCS#8 key.
pub fn is_encrypted_key_pem(contents: &[u8]) -> bool {
    pem::parse(contents).is_ok_and(|p| p.tag() == ENCRYPTED_KEY_TAG)
}

/// Encrypt a PEM private key with `password` (scrypt + AES-256-CBC).
/// PKCS#1 RSA keys, as written by older `openssl genrsa`, are wrapped first.
pub fn encrypt_key_pem(key_pem: &[u8], password: &str) -> Result<String> {
    use rand::RngCore;

    if password.is_empty() {
        return Err(Error::KeyEncryption("Password cannot be empty".to_string()));
    }

    let pem_obj = pem::parse(key_pem)
        .map_err(|e| Error::KeyEncryption(format!("Failed to parse PEM: {}", e)))?;

    let pki = match pem_obj.tag() {
        "PRIVATE KEY" => PrivateKeyInfo::from_der(pem_obj.contents())
            .map_err(|e| Error::KeyEncryption(format!("Failed to parse key: {}", e)))?,
        "RSA PRIVATE KEY" => PrivateKeyInfo::new(
            AlgorithmIdentifierRef {
                oid: RSA_ENCRYPTION,
                parameters: Some(AnyRef::NULL),
            },
            pem_obj.contents(),
        ),
        other => {
            return Err(Error::KeyEncryption(format!(
                "Unsupported key format: {}",
                other
            )))
        }
    };

    let mut rng = rand::rng();
    let mut salt = [0u8; 16];
    let mut iv = [0u8; 16];
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut iv);

    let params = pkcs8::pkcs5::pbes2::Parameters::scrypt_aes256cbc(
        pkcs8::pkcs5::scrypt::Params::recommended(),
        &salt,
        &iv,
    )
    .map_err(|e| Error::KeyEncryption(format!("Failed to create encryption params: {}", e)))?;

    let encrypted = pki
        .encrypt_with_params(params, password)
        .map_err(|e| Error::KeyEncryption(format!("Encryption failed: {}", e)))?;

    let pem_str = encrypted
        .to_pem(ENCRYPTED_KEY_TAG, LineEnding::LF)
        .map_err(|e| Error::KeyEncryption(format!("Failed to convert to PEM: {}", e)))?;

    Ok(pem_str.to_string())
}

/// Decrypt a key written by [`encrypt_key_pem`], returning a PKCS#8 PEM.
pub fn decrypt_key_pem(encrypted_pem: &[u8], password: &str) -> Result<String> {
    if password.is_empty() {
        return Err(Error::KeyDecryption("Password cannot be empty".to_string()));
    }

    let pem_obj = pem::parse(encrypted_pem)
        .map_err(|e| Error::KeyDecryption(format!("Failed to parse encrypted PEM: {}", e)))?;

    let encrypted = EncryptedPrivateKeyInfo::from_der(pem_obj.contents())
        .map_err(|e| Error::KeyDecryption(format!("Failed to parse encrypted key: {}", e)))?;

    let decrypted = encrypted
        .decrypt(password)
        .map_err(|_| Error::PasswordIncorrect)?;

    let pem_str = decrypted
        .to_pem("PRIVATE KEY", LineEnding::LF)
        .map_err(|e| Error::KeyDecryption(format!("Failed to convert to PEM: {}", e)))?;

    Ok(pem_str.to_string())
}
