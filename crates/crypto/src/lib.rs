//! # RSA helpers for configuration secrets
//!
//! Passwords stored in configuration files may be RSA-encrypted (PKCS#1 v1.5
//! padding) and base64 encoded. The data sources call [`decrypt_base64`] with
//! the configured private key; operators produce the ciphertext with
//! [`encrypt_base64`] and the matching public key.
//!
//! Keys are PEM text, either PKCS#1 (`RSA PRIVATE KEY` / `RSA PUBLIC KEY`) or
//! PKCS#8 (`PRIVATE KEY` / `PUBLIC KEY`).

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine,
};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

pub mod error;

pub use error::CryptoError;

/// Decrypts a base64 encoded ciphertext with a PEM private key and returns
/// the plaintext as a string.
pub fn decrypt_base64(ciphertext: &str, private_key_pem: &str) -> Result<String, CryptoError> {
    let ciphertext = ciphertext.trim();
    let data = STANDARD
        .decode(ciphertext)
        .or_else(|_| URL_SAFE.decode(ciphertext))?;
    let plaintext = decrypt(&data, private_key_pem)?;
    Ok(String::from_utf8(plaintext)?)
}

/// Decrypts raw ciphertext bytes with a PEM private key.
pub fn decrypt(ciphertext: &[u8], private_key_pem: &str) -> Result<Vec<u8>, CryptoError> {
    let key = parse_private_key(private_key_pem)?;
    Ok(key.decrypt(Pkcs1v15Encrypt, ciphertext)?)
}

/// Encrypts `plaintext` for the holder of the private key and returns the
/// ciphertext base64 encoded.
///
/// `key_pem` may be a public key or a private key; for the latter the public
/// half is used.
pub fn encrypt_base64(plaintext: &str, key_pem: &str) -> Result<String, CryptoError> {
    let key = parse_public_key(key_pem)
        .or_else(|_| parse_private_key(key_pem).map(|private| private.to_public_key()))?;
    let mut rng = rand::thread_rng();
    let data = key.encrypt(&mut rng, Pkcs1v15Encrypt, plaintext.as_bytes())?;
    Ok(STANDARD.encode(data))
}

pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    let pem = pem.trim();
    RsaPrivateKey::from_pkcs1_pem(pem).or_else(|pkcs1_err| {
        RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|pkcs8_err| CryptoError::Key(format!("{pkcs1_err}; {pkcs8_err}")))
    })
}

pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    let pem = pem.trim();
    RsaPublicKey::from_pkcs1_pem(pem).or_else(|pkcs1_err| {
        RsaPublicKey::from_public_key_pem(pem)
            .map_err(|spki_err| CryptoError::Key(format!("{pkcs1_err}; {spki_err}")))
    })
}
