// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Property tests for the envelope engine.
//!
//! 1. Any plaintext sealed for a key opens with that key unchanged.
//! 2. Flipping any single bit of the auth tag or the ciphertext makes the
//!    envelope fail to open.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use proptest::prelude::*;
use tchat::crypto::CryptoError;
use tchat::crypto::envelope::encrypt;
use tchat::crypto::keys::Keypair;

static KEYS: LazyLock<Keypair> = LazyLock::new(|| Keypair::generate().unwrap());

/// Flip one bit of a base64 field, picking the bit by `index` modulo the
/// field's bit length.
fn flip_bit(field: &str, index: usize) -> String {
    let mut bytes = STANDARD.decode(field).unwrap();
    let bit = index % (bytes.len() * 8);
    bytes[bit / 8] ^= 1 << (bit % 8);
    STANDARD.encode(bytes)
}

proptest! {
    // Each case pays for an RSA-OAEP operation.
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn sealed_plaintext_opens_unchanged(text in "\\PC{0,256}") {
        let envelope = encrypt(&text, KEYS.public_pem()).unwrap();
        prop_assert_eq!(KEYS.open(&envelope).unwrap(), text);
    }

    #[test]
    fn flipped_tag_bit_is_rejected(text in "\\PC{0,64}", index in any::<usize>()) {
        let mut envelope = encrypt(&text, KEYS.public_pem()).unwrap();
        envelope.auth_tag = flip_bit(&envelope.auth_tag, index);
        prop_assert!(matches!(KEYS.open(&envelope), Err(CryptoError::Decryption(_))));
    }

    #[test]
    fn flipped_ciphertext_bit_is_rejected(text in "\\PC{1,64}", index in any::<usize>()) {
        let mut envelope = encrypt(&text, KEYS.public_pem()).unwrap();
        envelope.encrypted_message = flip_bit(&envelope.encrypted_message, index);
        prop_assert!(matches!(KEYS.open(&envelope), Err(CryptoError::Decryption(_))));
    }
}
