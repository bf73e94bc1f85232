//! Certificate issuance errors

use thiserror::Error;

/// Errors that can occur while creating or parsing certificates
#[derive(Debug, Error)]
pub enum PkiError {
    /// Underlying OpenSSL failure
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    /// Certificate or key material could not be decoded
    #[error("Invalid PEM: {0}")]
    InvalidPem(String),

    /// Requested validity is not usable
    #[error("Invalid validity: {0}")]
    InvalidValidity(String),
}
