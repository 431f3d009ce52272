//! The hybrid envelope: the storage and wire representation of one
//! encrypted message body.
//!
//! Every field is standard base64. An envelope is only meaningful to the
//! holder of the private key matching the public key that sealed
//! `encrypted_key`.

use serde::{Deserialize, Serialize};

/// One encrypted message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridEnvelope {
    /// Random nonce for the symmetric cipher.
    pub iv: String,
    /// One-time symmetric key, sealed under the recipient's public key.
    pub encrypted_key: String,
    /// Message body under the symmetric key.
    pub encrypted_message: String,
    /// Integrity tag over `encrypted_message`.
    pub auth_tag: String,
}

/// The two independently sealed copies produced for every outgoing message.
///
/// The copies are never interchangeable: `for_receiver` opens only with the
/// receiver's private key and `for_sender` only with the sender's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopePair {
    /// Copy sealed to the sender's own public key.
    #[serde(rename = "contentForSender")]
    pub for_sender: HybridEnvelope,
    /// Copy sealed to the receiver's public key.
    #[serde(rename = "contentForReceiver")]
    pub for_receiver: HybridEnvelope,
}
