//! Result codec for replayable handler outcomes.
//!
//! Every outcome is written as a small frame:
//!
//! ```text
//! +-------+---------+-----+----------------+-----------------+
//! | "IC"  | version | tag | len (u32, BE)  | JSON payload    |
//! +-------+---------+-----+----------------+-----------------+
//! ```
//!
//! The tag distinguishes a successful value (`0`) from a recorded handler
//! error (`1`), so a replay can reconstruct which of the two occurred.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAGIC: [u8; 2] = *b"IC";
const VERSION: u8 = 1;
const TAG_VALUE: u8 = 0;
const TAG_ERROR: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 2 + 4;

/// Outcome of one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome<T, E> {
    Value(T),
    Error(E),
}

impl<T, E> Outcome<T, E> {
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            Outcome::Value(v) => Ok(v),
            Outcome::Error(e) => Err(e),
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(v) => Outcome::Value(v),
            Err(e) => Outcome::Error(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame too short: {0} bytes")]
    Truncated(usize),

    #[error("bad frame magic")]
    BadMagic,

    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown outcome tag {0}")]
    UnknownTag(u8),

    #[error("payload length mismatch: header says {declared}, frame has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("payload serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Encodes an outcome into a self-describing frame.
pub fn encode<T, E>(outcome: &Outcome<T, E>) -> Result<Vec<u8>, CodecError>
where
    T: Serialize,
    E: Serialize,
{
    let (tag, payload) = match outcome {
        Outcome::Value(v) => (TAG_VALUE, serde_json::to_vec(v)?),
        Outcome::Error(e) => (TAG_ERROR, serde_json::to_vec(e)?),
    };

    let len = u32::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge(payload.len()))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&MAGIC);
    frame.push(VERSION);
    frame.push(tag);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Encodes a successful value.
pub fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    encode::<&T, ()>(&Outcome::Value(value))
}

/// Encodes a handler error.
pub fn encode_error<E: Serialize>(error: &E) -> Result<Vec<u8>, CodecError> {
    encode::<(), &E>(&Outcome::Error(error))
}

/// Decodes a frame produced by [`encode`].
pub fn decode<T, E>(bytes: &[u8]) -> Result<Outcome<T, E>, CodecError>
where
    T: DeserializeOwned,
    E: DeserializeOwned,
{
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated(bytes.len()));
    }
    if bytes[..2] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    if bytes[2] != VERSION {
        return Err(CodecError::UnsupportedVersion(bytes[2]));
    }

    let tag = bytes[3];
    let declared = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != declared {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }

    match tag {
        TAG_VALUE => Ok(Outcome::Value(serde_json::from_slice(payload)?)),
        TAG_ERROR => Ok(Outcome::Error(serde_json::from_slice(payload)?)),
        other => Err(CodecError::UnknownTag(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Receipt {
        order_no: String,
        amount_cents: i64,
        tags: Vec<String>,
    }

    #[test]
    fn test_frame_header_layout() {
        let frame = encode_value(&"OK").unwrap();
        assert_eq!(&frame[..2], b"IC");
        assert_eq!(frame[2], VERSION);
        assert_eq!(frame[3], TAG_VALUE);

        let len = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
        assert_eq!(len, frame.len() - HEADER_LEN);
        assert_eq!(&frame[HEADER_LEN..], br#""OK""#);
    }

    #[test]
    fn test_value_and_error_are_distinguished() {
        let value = encode_value(&"same").unwrap();
        let error = encode_error(&"same").unwrap();
        assert_ne!(value, error);

        let decoded: Outcome<String, String> = decode(&error).unwrap();
        assert_eq!(decoded, Outcome::Error("same".to_string()));
    }

    #[test]
    fn test_empty_and_composite_values() {
        let unit: Outcome<(), String> = decode(&encode_value(&()).unwrap()).unwrap();
        assert_eq!(unit, Outcome::Value(()));

        let none: Outcome<Option<i32>, String> = decode(&encode_value(&None::<i32>).unwrap()).unwrap();
        assert_eq!(none, Outcome::Value(None));

        let receipt = Receipt {
            order_no: "ORD-7".to_string(),
            amount_cents: 1250,
            tags: vec!["gift".to_string()],
        };
        let decoded: Outcome<Receipt, String> = decode(&encode_value(&receipt).unwrap()).unwrap();
        assert_eq!(decoded.into_result().unwrap(), receipt);
    }

    #[test]
    fn test_rejects_malformed_frames() {
        assert!(matches!(decode::<String, String>(b"IC"), Err(CodecError::Truncated(2))));

        let mut frame = encode_value(&42).unwrap();
        frame[0] = b'X';
        assert!(matches!(decode::<i32, String>(&frame), Err(CodecError::BadMagic)));

        let mut frame = encode_value(&42).unwrap();
        frame[2] = 9;
        assert!(matches!(
            decode::<i32, String>(&frame),
            Err(CodecError::UnsupportedVersion(9))
        ));

        let mut frame = encode_value(&42).unwrap();
        frame[3] = 7;
        assert!(matches!(decode::<i32, String>(&frame), Err(CodecError::UnknownTag(7))));

        let mut frame = encode_value(&42).unwrap();
        frame.push(b' ');
        assert!(matches!(
            decode::<i32, String>(&frame),
            Err(CodecError::LengthMismatch { declared: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_wrong_shape_is_a_serde_error() {
        let frame = encode_value(&"not a number").unwrap();
        assert!(matches!(decode::<i64, String>(&frame), Err(CodecError::Serde(_))));
    }
}
