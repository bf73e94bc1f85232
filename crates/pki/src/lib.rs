//! Certificate Issuer
//!
//! Creates self-signed cluster CAs and mints RSA-4096 client identities
//! signed by them. Controllers use distinct identities per role, such as
//! `iks:nodegroup-controller` against the cluster CA and
//! `operator-etcd-client` against the etcd CA.
//!
//! # Example
//!
//! ```no_run
//! use pki::{create_ca, create_and_sign_cert, CertConfig};
//!
//! # fn example() -> Result<(), pki::PkiError> {
//! let ca = create_ca("kubernetes", None)?;
//! let issued = create_and_sign_cert(&ca, &CertConfig {
//!     common_name: "iks:nodegroup-controller".to_string(),
//!     organizations: vec!["iks:nodegroup-controller".to_string()],
//!     ..Default::default()
//! }, None)?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod issuer;

pub use error::PkiError;
pub use issuer::{
    create_and_sign_cert, create_ca, generate_rsa_key, public_key_pem, CertConfig, CertificateAuthority, IssuedCert,
    DEFAULT_CA_TTL_DAYS, DEFAULT_CERT_TTL_DAYS, KEY_BITS,
};
