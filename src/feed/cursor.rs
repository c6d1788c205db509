//! HMAC-signed opaque pagination cursors.
//!
//! Format: `base64url(payload_bytes || hmac_sha256(payload_bytes, secret))`.
//! The payload itself is a `::`-joined tuple whose shape depends on the sort
//! mode; verification recomputes the MAC and compares it in constant time
//! before any field is parsed back out, so a tampered cursor never reaches
//! a query planner with attacker-controlled SQL-adjacent text.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AppError;

/// Constant-time byte comparison: always walks the full length of `a` so
/// timing doesn't leak how many leading bytes matched.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

type HmacSha256 = Hmac<Sha256>;

const MAX_CURSOR_BYTES: usize = 512;
const MAC_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum Cursor {
    New { created_at: DateTime<Utc>, uri: String },
    Top { score: i64, created_at: DateTime<Utc>, uri: String },
    Hot { created_at: DateTime<Utc>, uri: String, query_time: DateTime<Utc> },
}

impl Cursor {
    fn encode_payload(&self) -> String {
        match self {
            Cursor::New { created_at, uri } => format!("new::{}::{}", created_at.to_rfc3339(), uri),
            Cursor::Top { score, created_at, uri } => {
                format!("top::{}::{}::{}", score, created_at.to_rfc3339(), uri)
            }
            Cursor::Hot { created_at, uri, query_time } => {
                format!("hot::{}::{}::{}", created_at.to_rfc3339(), uri, query_time.to_rfc3339())
            }
        }
    }

    fn decode_payload(payload: &str) -> Result<Self, AppError> {
        let parts: Vec<&str> = payload.split("::").collect();
        match parts.as_slice() {
            ["new", created_at, uri] => Ok(Cursor::New {
                created_at: parse_rfc3339(created_at)?,
                uri: validate_uri(uri)?,
            }),
            ["top", score, created_at, uri] => Ok(Cursor::Top {
                score: score.parse().map_err(|_| AppError::InvalidCursor)?,
                created_at: parse_rfc3339(created_at)?,
                uri: validate_uri(uri)?,
            }),
            ["hot", created_at, uri, query_time] => Ok(Cursor::Hot {
                created_at: parse_rfc3339(created_at)?,
                uri: validate_uri(uri)?,
                query_time: parse_rfc3339(query_time)?,
            }),
            _ => Err(AppError::InvalidCursor),
        }
    }

    pub fn encode(&self, secret: &str) -> String {
        let payload = self.encode_payload();
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        let tag = mac.finalize().into_bytes();

        let mut raw = Vec::with_capacity(payload.len() + MAC_LEN);
        raw.extend_from_slice(payload.as_bytes());
        raw.extend_from_slice(&tag);
        URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(encoded: &str, secret: &str) -> Result<Self, AppError> {
        if encoded.len() > MAX_CURSOR_BYTES {
            return Err(AppError::InvalidCursor);
        }
        let raw = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| AppError::InvalidCursor)?;
        if raw.len() <= MAC_LEN {
            return Err(AppError::InvalidCursor);
        }
        let (payload_bytes, tag) = raw.split_at(raw.len() - MAC_LEN);

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(payload_bytes);
        let expected = mac.finalize().into_bytes();

        if !constant_time_eq(expected.as_slice(), tag) {
            return Err(AppError::InvalidCursor);
        }

        let payload = std::str::from_utf8(payload_bytes).map_err(|_| AppError::InvalidCursor)?;
        Self::decode_payload(payload)
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| AppError::InvalidCursor)
}

fn validate_uri(uri: &str) -> Result<String, AppError> {
    if !uri.starts_with("at://") || uri.len() > MAX_CURSOR_BYTES {
        return Err(AppError::InvalidCursor);
    }
    Ok(uri.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Cursor {
        Cursor::New {
            created_at: Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap(),
            uri: "at://did:plc:abc/social.coves.feed.post/xyz".to_string(),
        }
    }

    #[test]
    fn test_round_trip() {
        let cursor = sample();
        let encoded = cursor.encode("secret-1");
        let decoded = Cursor::decode(&encoded, "secret-1").unwrap();
        assert_eq!(cursor, decoded);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let encoded = sample().encode("secret-1");
        assert!(matches!(Cursor::decode(&encoded, "secret-2"), Err(AppError::InvalidCursor)));
    }

    #[test]
    fn test_single_bit_tamper_rejected() {
        let encoded = sample().encode("secret-1");
        let mut raw = URL_SAFE_NO_PAD.decode(&encoded).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(raw);
        assert!(matches!(Cursor::decode(&tampered, "secret-1"), Err(AppError::InvalidCursor)));
    }

    #[test]
    fn test_oversized_cursor_rejected_before_decode() {
        let huge = "a".repeat(MAX_CURSOR_BYTES + 1);
        assert!(matches!(Cursor::decode(&huge, "secret-1"), Err(AppError::InvalidCursor)));
    }

    #[test]
    fn test_hot_cursor_round_trip() {
        let cursor = Cursor::Hot {
            created_at: Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap(),
            uri: "at://did:plc:abc/social.coves.feed.post/xyz".to_string(),
            query_time: Utc.with_ymd_and_hms(2026, 7, 28, 12, 5, 0).unwrap(),
        };
        let encoded = cursor.encode("secret-1");
        assert_eq!(Cursor::decode(&encoded, "secret-1").unwrap(), cursor);
    }
}
