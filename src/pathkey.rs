//! Order-preserving encoding of typed values into byte strings (§4.9).
//!
//! The tree only ever compares raw bytes, so any typed value that needs to
//! sort the way its type naturally sorts (numbers numerically, instants
//! chronologically, sequences lexicographically) has to be turned into a
//! byte string up front that preserves that order under plain
//! `Ord for [u8]`. This module is the "legacy" scheme carried over
//! unchanged rather than redesigned: each value is framed as
//! `<type-byte><body>`, with fixed-width types needing no further framing
//! and variable-width types escaping any embedded `0x00` and terminating
//! with `0x00 0x00`.
//!
//! Grounded in `nexuslite`'s `thiserror`-and-`log`-at-the-boundary idiom
//! (seen throughout `utils/errors.rs` and `utils/logger.rs`) applied to a
//! new concern: a small value model plus its encode/decode pair.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use log::warn;
use parking_lot::RwLock;

use crate::error::Error;

const TAG_NULL: u8 = 0x10;
const TAG_BOOL_FALSE: u8 = 0x20;
const TAG_BOOL_TRUE: u8 = 0x21;
const TAG_INSTANT: u8 = 0x25;
const TAG_NEG_INF: u8 = 0x30;
const TAG_NUMBER: u8 = 0x31;
const TAG_POS_INF: u8 = 0x32;
const TAG_SYMBOL: u8 = 0x68;
const TAG_CUSTOM: u8 = 0x69;
const TAG_STRING: u8 = 0x70;
const TAG_SEQUENCE: u8 = 0xa0;

/// The terminator byte for a [`Value::Sequence`] and the byte refused by
/// [`register_type`] — it can never be a real type tag, so a decoder can
/// always tell "start of next element" from "end of sequence" by whether
/// the next byte is zero.
const SEQUENCE_END: u8 = 0x00;

/// A value that can be encoded into (and recovered from) an
/// order-preserving byte string.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Instant(DateTime<Utc>),
    NegInfinity,
    /// Finite, non-NaN. Infinities are represented by the dedicated
    /// [`Value::NegInfinity`]/[`Value::PosInfinity`] variants instead.
    Number(f64),
    PosInfinity,
    Symbol(String),
    Custom(String),
    Str(String),
    Sequence(Vec<Value>),
}

fn push_escaped(raw: &[u8], out: &mut Vec<u8>) {
    for &b in raw {
        if b == 0x00 {
            out.push(0x00);
            out.push(0xff);
        } else {
            out.push(b);
        }
    }
    out.push(0x00);
    out.push(0x00);
}

/// Reads an escaped, double-zero-terminated body starting at `bytes[0]`.
/// Returns the unescaped bytes and the number of input bytes consumed
/// (including the terminator).
fn read_escaped(bytes: &[u8]) -> Result<(Vec<u8>, usize), Error> {
    let mut raw = Vec::new();
    let mut i = 0;
    loop {
        let b = *bytes.get(i).ok_or_else(|| Error::CorruptState {
            detail: "path-encoded body ended before its terminator".to_string(),
        })?;
        if b == 0x00 {
            let next = *bytes.get(i + 1).ok_or_else(|| Error::CorruptState {
                detail: "path-encoded body ended mid-escape".to_string(),
            })?;
            match next {
                0x00 => return Ok((raw, i + 2)),
                0xff => {
                    raw.push(0x00);
                    i += 2;
                }
                other => {
                    return Err(Error::CorruptState {
                        detail: format!("invalid escape byte 0x{other:02x} in path encoding"),
                    });
                }
            }
        } else {
            raw.push(b);
            i += 1;
        }
    }
}

/// Fractional digits carried by the fixed-point decimal string (§4.9's
/// "`s` ... fixed-point `%f` for floats"). Wide enough that rounding to
/// this many places never loses more than a fraction of a ULP at the
/// magnitudes this engine's keys actually use.
const NUMBER_FRACTION_DIGITS: usize = 12;

/// Replace each digit of a fixed-point decimal string with `9 - digit`,
/// leaving the decimal point untouched — the "nines-complement" step of
/// §4.9's number encoding, applied to negative numbers so that a more
/// negative value produces a lexicographically smaller digit string.
fn nines_complement(digits: &str) -> String {
    digits
        .chars()
        .map(|c| if c == '.' { c } else { char::from_digit(9 - c.to_digit(10).expect("decimal digit"), 10).expect("0..=9") })
        .collect()
}

/// §4.9's legacy number encoding: a decimal string `s`, a sign prefix
/// (`_` non-negative, `-` negative with every digit nines-complemented), a
/// 3-digit length field counting `s`'s integer-part digits (inverted via
/// `1000 - len` for negative numbers, so a longer — i.e. more negative —
/// integer part sorts first), an `x` separator, then the (possibly
/// complemented) digit string itself.
fn encode_number(n: f64, out: &mut Vec<u8>) {
    let negative = n < 0.0;
    let magnitude = n.abs();
    let s = format!("{:.*}", NUMBER_FRACTION_DIGITS, magnitude);
    let int_len = s.find('.').unwrap_or(s.len());
    let int_len = u32::try_from(int_len).unwrap_or(u32::MAX);

    let mut body = Vec::with_capacity(5 + s.len());
    if negative {
        body.push(b'-');
        body.extend_from_slice(format!("{:03}", 1000 - int_len).as_bytes());
        body.push(b'x');
        body.extend_from_slice(nines_complement(&s).as_bytes());
    } else {
        body.push(b'_');
        body.extend_from_slice(format!("{int_len:03}").as_bytes());
        body.push(b'x');
        body.extend_from_slice(s.as_bytes());
    }
    push_escaped(&body, out);
}

/// Inverts [`encode_number`]: inspect the sign byte, skip the five prefix
/// bytes (sign + 3 length digits + `x`), and invert the nines-complement
/// if negative (§4.9 step 4).
fn decode_number(body: &[u8]) -> Result<f64, Error> {
    let bad = || Error::CorruptState { detail: "malformed number body in path encoding".to_string() };
    let negative = match *body.first().ok_or_else(bad)? {
        b'_' => false,
        b'-' => true,
        _ => return Err(bad()),
    };
    let digits = body.get(5..).ok_or_else(bad)?;
    let digits = std::str::from_utf8(digits).map_err(|_| bad())?;
    let decimal = if negative { nines_complement(digits) } else { digits.to_string() };
    let magnitude: f64 = decimal.parse().map_err(|_| bad())?;
    Ok(if negative { -magnitude } else { magnitude })
}

/// Encode `value` as an order-preserving byte string.
///
/// # Errors
/// This implementation never fails, but returns a `Result` so future
/// user-registered type bytes (see [`register_type`]) can surface
/// [`Error::NoMatchingEncoder`] without changing the signature.
pub fn encode(value: &Value) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(false) => out.push(TAG_BOOL_FALSE),
        Value::Bool(true) => out.push(TAG_BOOL_TRUE),
        Value::NegInfinity => out.push(TAG_NEG_INF),
        Value::PosInfinity => out.push(TAG_POS_INF),
        Value::Instant(dt) => {
            out.push(TAG_INSTANT);
            push_escaped(dt.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes(), &mut out);
        }
        Value::Number(n) => {
            out.push(TAG_NUMBER);
            encode_number(*n, &mut out);
        }
        Value::Symbol(s) => {
            out.push(TAG_SYMBOL);
            push_escaped(s.as_bytes(), &mut out);
        }
        Value::Custom(s) => {
            out.push(TAG_CUSTOM);
            push_escaped(s.as_bytes(), &mut out);
        }
        Value::Str(s) => {
            out.push(TAG_STRING);
            push_escaped(s.as_bytes(), &mut out);
        }
        Value::Sequence(items) => {
            out.push(TAG_SEQUENCE);
            for item in items {
                out.extend(encode(item)?);
            }
            out.push(SEQUENCE_END);
        }
    }
    Ok(out)
}

/// Decode one value starting at `bytes[0]`, returning the value and the
/// number of bytes it consumed.
///
/// # Errors
/// Returns [`Error::NoMatchingDecoder`] for an unrecognized type byte, and
/// [`Error::CorruptState`] if a variable-length body or a sequence is
/// truncated or malformed.
pub fn decode(bytes: &[u8]) -> Result<(Value, usize), Error> {
    let tag = *bytes.first().ok_or_else(|| Error::CorruptState { detail: "empty path-encoded key".to_string() })?;
    match tag {
        TAG_NULL => Ok((Value::Null, 1)),
        TAG_BOOL_FALSE => Ok((Value::Bool(false), 1)),
        TAG_BOOL_TRUE => Ok((Value::Bool(true), 1)),
        TAG_NEG_INF => Ok((Value::NegInfinity, 1)),
        TAG_POS_INF => Ok((Value::PosInfinity, 1)),
        TAG_INSTANT => {
            let (raw, consumed) = read_escaped(&bytes[1..])?;
            let s = String::from_utf8(raw)
                .map_err(|e| Error::CorruptState { detail: format!("instant body is not UTF-8: {e}") })?;
            let dt = DateTime::parse_from_rfc3339(&s)
                .map_err(|e| Error::CorruptState { detail: format!("invalid instant {s:?}: {e}") })?
                .with_timezone(&Utc);
            Ok((Value::Instant(dt), 1 + consumed))
        }
        TAG_NUMBER => {
            let (raw, consumed) = read_escaped(&bytes[1..])?;
            Ok((Value::Number(decode_number(&raw)?), 1 + consumed))
        }
        TAG_SYMBOL | TAG_CUSTOM | TAG_STRING => {
            let (raw, consumed) = read_escaped(&bytes[1..])?;
            let s = String::from_utf8(raw)
                .map_err(|e| Error::CorruptState { detail: format!("string body is not UTF-8: {e}") })?;
            let value = match tag {
                TAG_SYMBOL => Value::Symbol(s),
                TAG_CUSTOM => Value::Custom(s),
                _ => Value::Str(s),
            };
            Ok((value, 1 + consumed))
        }
        TAG_SEQUENCE => {
            let mut items = Vec::new();
            let mut pos = 1;
            loop {
                let next = *bytes.get(pos).ok_or_else(|| Error::CorruptState {
                    detail: "sequence ended before its terminator".to_string(),
                })?;
                if next == SEQUENCE_END {
                    pos += 1;
                    break;
                }
                let (item, consumed) = decode(&bytes[pos..])?;
                items.push(item);
                pos += consumed;
            }
            Ok((Value::Sequence(items), pos))
        }
        other => Err(Error::NoMatchingDecoder { type_byte: other }),
    }
}

static CUSTOM_TYPE_BYTES: LazyLock<RwLock<HashMap<u8, &'static str>>> = LazyLock::new(|| RwLock::new(HashMap::new()));

/// Reserve a type byte for an application-defined extension to the
/// baseline type registry above. This crate's own decoder doesn't
/// dispatch on these — it's a collision guard so independently-written
/// extensions sharing a process don't silently pick the same byte.
///
/// # Errors
/// Returns [`Error::NoMatchingEncoder`]-shaped rejection (via
/// [`Error::InvalidDatabase`]) if `byte` is `0x00`, the reserved sequence
/// terminator.
pub fn register_type(byte: u8, name: &'static str) -> Result<(), Error> {
    if byte == SEQUENCE_END {
        return Err(Error::InvalidDatabase {
            reason: "type byte 0x00 is reserved as the sequence terminator".to_string(),
        });
    }
    let mut map = CUSTOM_TYPE_BYTES.write();
    if let Some(&previous) = map.get(&byte) {
        if previous != name {
            warn!("redefining path-encoding type byte 0x{byte:02x}: {previous} -> {name}");
        }
    }
    map.insert(byte, name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Value) -> Value {
        let bytes = encode(&v).expect("encode");
        let (decoded, consumed) = decode(&bytes).expect("decode");
        assert_eq!(consumed, bytes.len());
        decoded
    }

    #[test]
    fn scalars_round_trip() {
        assert_eq!(round_trip(Value::Null), Value::Null);
        assert_eq!(round_trip(Value::Bool(true)), Value::Bool(true));
        assert_eq!(round_trip(Value::Bool(false)), Value::Bool(false));
        assert_eq!(round_trip(Value::Str("hello".to_string())), Value::Str("hello".to_string()));
        assert_eq!(round_trip(Value::Symbol("foo/bar".to_string())), Value::Symbol("foo/bar".to_string()));
    }

    #[test]
    fn string_with_embedded_null_round_trips() {
        let s = "a\u{0}b".to_string();
        assert_eq!(round_trip(Value::Str(s.clone())), Value::Str(s));
    }

    #[test]
    fn numbers_round_trip_approximately() {
        for n in [0.0, 1.0, -1.0, 3.25, -3.25, 1.0e10, -1.0e10, 0.0001, -0.0001] {
            let Value::Number(got) = round_trip(Value::Number(n)) else { unreachable!() };
            assert!((got - n).abs() < 1e-9 * n.abs().max(1.0), "{got} vs {n}");
        }
    }

    #[test]
    fn number_byte_order_matches_numeric_order() {
        let values = [-1.0e10, -3.25, -1.0, -0.0001, 0.0, 0.0001, 1.0, 3.25, 1.0e10];
        let mut encoded: Vec<Vec<u8>> = values.iter().map(|&n| encode(&Value::Number(n)).expect("encode")).collect();
        let sorted = {
            let mut s = encoded.clone();
            s.sort();
            s
        };
        assert_eq!(encoded, sorted);
        encoded.sort();
    }

    #[test]
    fn neg_inf_sorts_below_number_sorts_below_pos_inf() {
        let neg_inf = encode(&Value::NegInfinity).expect("encode");
        let num = encode(&Value::Number(42.0)).expect("encode");
        let pos_inf = encode(&Value::PosInfinity).expect("encode");
        assert!(neg_inf < num);
        assert!(num < pos_inf);
    }

    #[test]
    fn shorter_sequence_sorts_before_its_own_extension() {
        let a = encode(&Value::Sequence(vec![Value::Number(1.0)])).expect("encode");
        let b = encode(&Value::Sequence(vec![Value::Number(1.0), Value::Number(2.0)])).expect("encode");
        assert!(a < b);
    }

    #[test]
    fn sequence_round_trips() {
        let seq = Value::Sequence(vec![Value::Null, Value::Bool(true), Value::Str("x".to_string())]);
        assert_eq!(round_trip(seq.clone()), seq);
    }

    #[test]
    fn register_type_rejects_the_reserved_terminator_byte() {
        assert!(register_type(0x00, "nope").is_err());
        assert!(register_type(0xe0, "demo-extension").is_ok());
    }
}
