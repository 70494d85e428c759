//! Path-encoding invariants (design §4.9, testable property 9, scenario S5):
//! round-trip fidelity and order preservation across the baseline type set.

use ambertree::pathkey::{decode, encode, Value};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

#[test]
fn s5_number_and_infinity_ordering_matches_byte_order() {
    let values = [
        Value::NegInfinity,
        Value::Number(-1.5),
        Value::Number(-0.5),
        Value::Number(0.0),
        Value::Number(0.5),
        Value::Number(1.5),
        Value::PosInfinity,
    ];
    let encoded: Vec<Vec<u8>> = values.iter().map(|v| encode(v).expect("encode")).collect();
    for pair in encoded.windows(2) {
        assert!(pair[0] < pair[1], "{pair:?} not in ascending byte order");
    }
}

#[test]
fn scalars_round_trip_exactly() {
    let samples = vec![
        Value::Null,
        Value::Bool(true),
        Value::Bool(false),
        Value::NegInfinity,
        Value::PosInfinity,
        Value::Str("hello world".to_string()),
        Value::Symbol("my-symbol".to_string()),
        Value::Custom("my-tag".to_string()),
        Value::Instant(Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).single().expect("valid datetime")),
        Value::Sequence(vec![Value::Number(1.0), Value::Str("x".to_string())]),
    ];
    for v in samples {
        let bytes = encode(&v).expect("encode");
        let (decoded, consumed) = decode(&bytes).expect("decode");
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, v);
    }
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![Just(Value::Null), any::<bool>().prop_map(Value::Bool), ".*".prop_map(Value::Str)]
}

proptest! {
    #[test]
    fn round_trip_holds_for_arbitrary_scalars(v in arb_scalar()) {
        let bytes = encode(&v).expect("encode");
        let (decoded, consumed) = decode(&bytes).expect("decode");
        prop_assert_eq!(consumed, bytes.len());
        prop_assert_eq!(decoded, v);
    }

    #[test]
    fn numbers_round_trip_within_float_precision(n in -1.0e12f64..1.0e12) {
        let bytes = encode(&Value::Number(n)).expect("encode");
        let (decoded, _) = decode(&bytes).expect("decode");
        let Value::Number(got) = decoded else { panic!("expected Number") };
        prop_assert!((got - n).abs() <= 1e-9 * n.abs().max(1.0));
    }

    #[test]
    fn encoded_order_matches_numeric_order(a in -1.0e9f64..1.0e9, b in -1.0e9f64..1.0e9) {
        let ea = encode(&Value::Number(a)).expect("encode a");
        let eb = encode(&Value::Number(b)).expect("encode b");
        if a < b {
            prop_assert!(ea < eb);
        } else if a > b {
            prop_assert!(ea > eb);
        }
    }

    #[test]
    fn strings_preserve_lexicographic_order(a in "[a-z]{0,12}", b in "[a-z]{0,12}") {
        let ea = encode(&Value::Str(a.clone())).expect("encode a");
        let eb = encode(&Value::Str(b.clone())).expect("encode b");
        prop_assert_eq!(ea < eb, a < b);
    }
}
