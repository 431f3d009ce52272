//! Message cryptography for `tchat`.
//!
//! - [`keys`] owns the user's RSA keypair: generation, persistence, and the
//!   cache of counterpart public keys.
//! - [`pem`] converts public keys between canonical PEM and the stripped
//!   form that travels over the API.
//! - [`envelope`] seals and opens [`HybridEnvelope`]s.
//!
//! [`envelope::encrypt`] and [`envelope::decrypt`] are the only places where
//! message plaintext crosses into or out of ciphertext.
//!
//! [`HybridEnvelope`]: tchat_proto::envelope::HybridEnvelope

pub mod envelope;
pub mod keys;
pub mod pem;

use std::path::PathBuf;

/// Errors that can occur during key management and envelope operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The envelope could not be opened: wrong private key, failed integrity
    /// check, or a malformed field.
    ///
    /// This is always recoverable. Callers render a placeholder for the
    /// affected message and carry on.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// A key was empty or not a parseable RSA key.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Sealing a message failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The RSA keypair could not be generated or encoded.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// A key file could not be read or written.
    #[error("key file {path}: {source}")]
    Persistence {
        /// File or directory that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}
