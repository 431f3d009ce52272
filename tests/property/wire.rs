// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Property tests for the realtime frame codec.
//!
//! 1. Arbitrary text never panics the server-frame decoder.
//! 2. Any delivered message survives encode → decode.
//! 3. Frames with an unknown `type` are always rejected.

use proptest::prelude::*;
use tchat_proto::codec::{self, ProtocolError};
use tchat_proto::envelope::HybridEnvelope;
use tchat_proto::frame::{DeliveredMessage, ServerFrame};

fn arb_envelope() -> impl Strategy<Value = HybridEnvelope> {
    (
        "[A-Za-z0-9+/=]{0,32}",
        "[A-Za-z0-9+/=]{0,64}",
        "[A-Za-z0-9+/=]{0,64}",
        "[A-Za-z0-9+/=]{0,32}",
    )
        .prop_map(|(iv, encrypted_key, encrypted_message, auth_tag)| HybridEnvelope {
            iv,
            encrypted_key,
            encrypted_message,
            auth_tag,
        })
}

fn arb_delivered() -> impl Strategy<Value = DeliveredMessage> {
    (".{0,24}", ".{0,24}", arb_envelope(), ".{0,32}").prop_map(
        |(id, sender_id, content, timestamp)| DeliveredMessage {
            id,
            sender_id,
            content,
            timestamp,
        },
    )
}

proptest! {
    #[test]
    fn decode_never_panics_on_arbitrary_text(text in ".{0,256}") {
        let _ = codec::decode_server(&text);
    }

    #[test]
    fn delivered_message_survives_codec(msg in arb_delivered()) {
        let frame = ServerFrame::Message(msg);
        let text = codec::encode_server(&frame).unwrap();
        prop_assert_eq!(codec::decode_server(&text).unwrap(), frame);
    }

    #[test]
    fn unknown_frame_types_are_rejected(kind in "[a-z]{1,12}") {
        prop_assume!(kind != "message");
        let text = format!(r#"{{"type":"{kind}","id":"1"}}"#);
        prop_assert!(matches!(
            codec::decode_server(&text),
            Err(ProtocolError::Unrecognized(_))
        ));
    }
}
