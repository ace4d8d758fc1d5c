//! Property-based tests for the stream wire format
//!
//! The key invariant: decoding the encoder's output for any frame sequence,
//! chunked at arbitrary byte boundaries, reconstructs the identical ordered
//! sequence of (name, payload) pairs.

use super::{Frame, FrameDecoder};
use proptest::prelude::*;
use serde_json::Value;

/// Frame names of the shape the protocol uses
fn arb_frame_name() -> impl Strategy<Value = String> {
    "[a-z]{1,12}(\\.[a-z]{1,12})?"
}

/// Simple JSON payload (no deeply nested structures)
fn arb_json_payload() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1_000_000i64..1_000_000).prop_map(|n| Value::Number(n.into())),
        // Printable text, including spaces, quotes and backslashes; JSON
        // escaping keeps the encoded body on one line.
        "[ -~]{0,40}".prop_map(Value::String),
        proptest::collection::hash_map("[a-z_]{1,8}", "[ -~]{0,20}", 0..4).prop_map(|m| {
            Value::Object(m.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
        }),
    ]
}

fn arb_frame() -> impl Strategy<Value = Frame> {
    (arb_frame_name(), arb_json_payload()).prop_map(|(name, payload)| Frame::new(name, payload))
}

proptest! {
    #[test]
    fn round_trip_with_arbitrary_chunking(
        frames in proptest::collection::vec(arb_frame(), 0..8),
        chunk_size in 1usize..32,
    ) {
        let wire: String = frames.iter().map(Frame::encode).collect();

        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        for chunk in wire.as_bytes().chunks(chunk_size) {
            decoded.extend(decoder.feed(chunk));
        }

        prop_assert_eq!(decoded, frames);
        prop_assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn round_trip_one_byte_at_a_time(frames in proptest::collection::vec(arb_frame(), 1..4)) {
        let wire: String = frames.iter().map(Frame::encode).collect();

        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        for byte in wire.as_bytes() {
            decoded.extend(decoder.feed(std::slice::from_ref(byte)));
        }

        prop_assert_eq!(decoded, frames);
    }

    #[test]
    fn decoder_never_panics_on_garbage(chunks in proptest::collection::vec(
        proptest::collection::vec(any::<u8>(), 0..64), 0..8,
    )) {
        let mut decoder = FrameDecoder::new();
        for chunk in &chunks {
            let _ = decoder.feed(chunk);
        }
    }
}
