//! Property tests for the codec.
//!
//! Uses proptest to verify the round-trip, determinism, and width-selection
//! invariants across generated value trees, and that the decoder stays
//! total on arbitrary input.

use proptest::prelude::*;
use spindle_common::Value;
use spindle_pickle::{decode_values, encode_values};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::None),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<f64>()
            .prop_filter("NaN is not structurally equal to itself", |f| !f.is_nan())
            .prop_map(Value::Double),
        "[a-z0-9]{0,12}".prop_map(Value::string),
    ]
}

fn key_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![any::<i64>().prop_map(Value::Int), "[a-z]{1,6}".prop_map(Value::string)]
}

/// Value trees over the decoder-supported subset (no tensors).
fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        scalar_strategy(),
        prop::collection::vec(any::<i64>(), 0..6).prop_map(Value::int_list),
    ];
    leaf.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::list),
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::tuple),
            prop::collection::vec((key_strategy(), inner), 0..4).prop_map(Value::dict),
        ]
    })
}

// ---------------------------------------------------------------------------
// Round-trip and determinism
// ---------------------------------------------------------------------------

proptest! {
    /// Any supported value decodes back structurally equal.
    #[test]
    fn prop_roundtrip(value in value_strategy()) {
        let bytes = encode_values(std::slice::from_ref(&value)).unwrap();
        let decoded = decode_values(&bytes).unwrap();
        prop_assert_eq!(decoded.len(), 1);
        prop_assert_eq!(&decoded[0], &value);
    }

    /// Encoding the same value twice with fresh sessions is byte-identical.
    #[test]
    fn prop_encoding_is_deterministic(value in value_strategy()) {
        let first = encode_values(std::slice::from_ref(&value)).unwrap();
        let second = encode_values(std::slice::from_ref(&value)).unwrap();
        prop_assert_eq!(first, second);
    }

    /// A value written twice under the same identity decodes to entries
    /// sharing one identity.
    #[test]
    fn prop_shared_identity_survives(elements in prop::collection::vec(any::<i64>(), 0..6)) {
        let value = Value::list(elements.into_iter().map(Value::Int).collect());
        let bytes = encode_values(&[value.clone(), value]).unwrap();
        let decoded = decode_values(&bytes).unwrap();
        prop_assert_eq!(decoded[0].object_id(), decoded[1].object_id());
    }
}

// ---------------------------------------------------------------------------
// Integer width selection
// ---------------------------------------------------------------------------

proptest! {
    /// The opcode after PROTO/MARK is selected strictly by range.
    #[test]
    fn prop_int_width_by_range(n in any::<i64>()) {
        let bytes = encode_values(&[Value::Int(n)]).unwrap();
        let expected = if (-128..=127).contains(&n) {
            0x4b // BININT1
        } else if (i64::from(i32::MIN)..=i64::from(i32::MAX)).contains(&n) {
            0x4a // BININT
        } else {
            0x8a // LONG1
        };
        prop_assert_eq!(bytes[3], expected, "value {}", n);
    }
}

// ---------------------------------------------------------------------------
// Decoder totality
// ---------------------------------------------------------------------------

proptest! {
    /// Arbitrary bytes after a valid PROTO never panic the decoder.
    #[test]
    fn prop_decoder_is_total(tail in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut bytes = vec![0x80, 0x02];
        bytes.extend(tail);
        let _ = decode_values(&bytes);
    }

    /// Fully arbitrary input never panics either.
    #[test]
    fn prop_decoder_rejects_garbage_headers(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = decode_values(&bytes);
    }

    /// Truncating a valid stream anywhere short of STOP fails cleanly.
    #[test]
    fn prop_truncation_fails_cleanly(cut in 0usize..14) {
        let bytes =
            [0x80, 0x02, 0x28, 0x58, 0x02, 0x00, 0x00, 0x00, 0x61, 0x62, 0x71, 0x00, 0x74, 0x2e];
        prop_assert!(decode_values(&bytes[..cut]).is_err());
    }
}
