//! Property tests for live-frame decoding.
//!
//! Uses proptest to verify:
//! 1. Arbitrary text never panics `decode_event` (it returns `Err`).
//! 2. Frames carrying a known tag with random fields never panic either.
//! 3. A receipt can never carry a client temporary id or the `sent` state.

use proptest::prelude::*;
use skillchat_proto::codec::{self, CodecError};

const TAGS: [&str; 7] = [
    "newMessage",
    "deliveryReceipt",
    "syncResponse",
    "typingStart",
    "typingStop",
    "presenceChange",
    "unknown",
];

proptest! {
    #[test]
    fn random_text_never_panics(frame in ".{0,512}") {
        let _ = codec::decode_event(&frame);
    }

    #[test]
    fn tagged_frames_with_random_fields_never_panic(
        tag in prop::sample::select(TAGS.to_vec()),
        key in "[a-zA-Z]{1,12}",
        value in "[a-z0-9 -]{0,24}",
        number in any::<i64>(),
    ) {
        let frame = format!(
            r#"{{"type":"{tag}","{key}":"{value}","sequence":{number},"currentSequence":{number}}}"#
        );
        let _ = codec::decode_event(&frame);
    }

    #[test]
    fn receipts_for_temporary_ids_are_rejected(suffix in "[0-9a-f]{8}") {
        let frame = format!(
            r#"{{"type":"deliveryReceipt","messageId":"temp-{suffix}","status":"read"}}"#
        );
        prop_assert!(matches!(codec::decode_event(&frame), Err(CodecError::Invalid(_))));
    }

    #[test]
    fn receipts_cannot_report_sent(id in "m[0-9]{1,6}") {
        let frame = format!(
            r#"{{"type":"deliveryReceipt","messageId":"{id}","status":"sent"}}"#
        );
        prop_assert!(matches!(codec::decode_event(&frame), Err(CodecError::SentReceipt(_))));
    }
}
