//! Hybrid envelope encryption.
//!
//! Each message body is sealed under a fresh AES-256-GCM key and a fresh
//! 16-byte IV; the AES key is then sealed to the recipient with RSA-OAEP
//! (SHA-256). The detached GCM tag travels as `authTag`. Every field is
//! standard base64.
//!
//! Neither operation touches disk or the network.

use aes_gcm::AesGcm;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit, OsRng, rand_core::RngCore};
use aes_gcm::aes::Aes256;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use tchat_proto::envelope::{EnvelopePair, HybridEnvelope};

use super::CryptoError;
use super::keys::Keypair;
use super::pem::wrap_pem;

/// AES-256-GCM with a 16-byte IV.
type MessageCipher = AesGcm<Aes256, U16>;

const SYMMETRIC_KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

/// Parse a recipient public key given either as canonical PEM or in the
/// stripped form.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKey`] for empty or unparseable keys.
pub fn parse_public_key(key: &str) -> Result<RsaPublicKey, CryptoError> {
    if key.trim().is_empty() {
        return Err(CryptoError::InvalidKey("empty recipient key".to_string()));
    }
    RsaPublicKey::from_public_key_pem(&wrap_pem(key))
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Seal `plaintext` for the holder of `recipient_key`.
///
/// A new symmetric key and IV are drawn for every call, so sealing the same
/// text twice never yields the same envelope.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKey`] if the recipient key is empty or
/// unparseable, or [`CryptoError::Encryption`] if a primitive fails.
pub fn encrypt(plaintext: &str, recipient_key: &str) -> Result<HybridEnvelope, CryptoError> {
    let public_key = parse_public_key(recipient_key)?;

    let mut symmetric_key = Zeroizing::new([0u8; SYMMETRIC_KEY_LEN]);
    OsRng.fill_bytes(&mut symmetric_key[..]);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let cipher = MessageCipher::new_from_slice(&symmetric_key[..])
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let mut body = plaintext.as_bytes().to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut body)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let encrypted_key = public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &symmetric_key[..])
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(HybridEnvelope {
        iv: STANDARD.encode(iv),
        encrypted_key: STANDARD.encode(encrypted_key),
        encrypted_message: STANDARD.encode(body),
        auth_tag: STANDARD.encode(tag),
    })
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(value)
        .map_err(|_| CryptoError::Decryption(format!("{name} is not valid base64")))
}

/// Open an envelope with the local private key.
///
/// # Errors
///
/// Returns [`CryptoError::Decryption`] when the envelope was sealed to a
/// different key, when the tag does not verify, or when any field is
/// malformed. Never returns partially decrypted text.
pub fn decrypt(envelope: &HybridEnvelope, private_key: &RsaPrivateKey) -> Result<String, CryptoError> {
    let iv = decode_field("iv", &envelope.iv)?;
    let encrypted_key = decode_field("encryptedKey", &envelope.encrypted_key)?;
    let mut body = decode_field("encryptedMessage", &envelope.encrypted_message)?;
    let tag = decode_field("authTag", &envelope.auth_tag)?;

    if iv.len() != IV_LEN {
        return Err(CryptoError::Decryption(format!(
            "iv must be {IV_LEN} bytes, got {}",
            iv.len()
        )));
    }
    if tag.len() != TAG_LEN {
        return Err(CryptoError::Decryption(format!(
            "authTag must be {TAG_LEN} bytes, got {}",
            tag.len()
        )));
    }

    let symmetric_key = Zeroizing::new(
        private_key
            .decrypt_blinded(&mut OsRng, Oaep::new::<Sha256>(), &encrypted_key)
            .map_err(|_| CryptoError::Decryption("symmetric key does not unwrap".to_string()))?,
    );
    let cipher = MessageCipher::new_from_slice(&symmetric_key)
        .map_err(|_| CryptoError::Decryption("symmetric key has wrong length".to_string()))?;
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(&iv),
            b"",
            &mut body,
            GenericArray::from_slice(&tag),
        )
        .map_err(|_| CryptoError::Decryption("authentication tag mismatch".to_string()))?;

    String::from_utf8(body)
        .map_err(|_| CryptoError::Decryption("plaintext is not valid UTF-8".to_string()))
}

/// Seal one outgoing message twice: once to the receiver and once to the
/// sender's own key, so the sender can read their history later.
///
/// # Errors
///
/// Propagates the first [`encrypt`] failure.
pub fn seal_pair(plaintext: &str, receiver_key: &str, own: &Keypair) -> Result<EnvelopePair, CryptoError> {
    Ok(EnvelopePair {
        for_receiver: encrypt(plaintext, receiver_key)?,
        for_sender: encrypt(plaintext, own.public_pem())?,
    })
}

impl Keypair {
    /// Open an envelope sealed to this keypair's public key.
    ///
    /// # Errors
    ///
    /// See [`decrypt`].
    pub fn open(&self, envelope: &HybridEnvelope) -> Result<String, CryptoError> {
        decrypt(envelope, self.private_key())
    }
}
