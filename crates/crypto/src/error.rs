use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Ciphertext is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Failed to read the RSA key: {0}")]
    Key(String),

    #[error("RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("Decrypted data is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
