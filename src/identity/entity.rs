//! Classification and decoding of raw route entities.

use bech32::Hrp;
use thiserror::Error;

/// Owner key is a 32-byte public key represented as a lowercase hexadecimal
/// string.
pub type OwnerKey = String;

/// Length of a hex-encoded owner key.
pub const OWNER_KEY_HEX_LEN: usize = 64;

/// Length of an abbreviated owner-key prefix.
pub const KEY_PREFIX_LEN: usize = 8;

/// Human-readable part of a self-certifying encoded public key.
const ENCODED_KEY_HRP: &str = "npub";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while decoding an identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The raw entity is malformed and cannot be decoded.
    #[error("malformed identity '{entity}': {message}")]
    Decode { entity: String, message: String },
}

/// Result type for identity operations.
pub type Result<T> = std::result::Result<T, IdentityError>;

// =============================================================================
// EntityRef
// =============================================================================

/// A classified raw entity from a route parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    /// A full 64-character hex public key.
    HexKey(OwnerKey),
    /// A bech32-encoded public key ("npub1...").
    Encoded(String),
    /// An 8-character hex key prefix.
    Prefix(String),
    /// A name-service handle containing '@' ("name@domain" or "@domain").
    Handle(String),
    /// None of the recognized forms.
    Unrecognized(String),
}

impl EntityRef {
    /// Classify a raw entity string without performing any decoding.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.contains('@') {
            return EntityRef::Handle(raw.to_string());
        }
        if raw.len() == OWNER_KEY_HEX_LEN && is_hex(raw) {
            return EntityRef::HexKey(raw.to_ascii_lowercase());
        }
        if raw.to_ascii_lowercase().starts_with(ENCODED_KEY_HRP) {
            return EntityRef::Encoded(raw.to_string());
        }
        if raw.len() == KEY_PREFIX_LEN && is_hex(raw) {
            return EntityRef::Prefix(raw.to_ascii_lowercase());
        }
        EntityRef::Unrecognized(raw.to_string())
    }
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

// =============================================================================
// Encoded Key Decoding
// =============================================================================

/// Decode a bech32-encoded public key into its hex form.
///
/// The human-readable part must be `npub` and the payload must be exactly
/// 32 bytes.
pub fn decode_encoded_key(encoded: &str) -> Result<OwnerKey> {
    let decode_err = |message: String| IdentityError::Decode {
        entity: encoded.to_string(),
        message,
    };

    let (hrp, data) = bech32::decode(encoded).map_err(|e| decode_err(e.to_string()))?;

    let expected = Hrp::parse(ENCODED_KEY_HRP).expect("static hrp");
    if hrp != expected {
        return Err(decode_err(format!(
            "unexpected prefix '{}', expected '{}'",
            hrp, ENCODED_KEY_HRP
        )));
    }
    if data.len() != 32 {
        return Err(decode_err(format!(
            "expected 32-byte key, got {} bytes",
            data.len()
        )));
    }

    Ok(hex::encode(data))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known test vector: npub for the all-zeros-except-last-byte style
    // keys is awkward to produce by hand, so encode one here instead.
    fn encode_key(hex_key: &str) -> String {
        let bytes = hex::decode(hex_key).unwrap();
        let hrp = Hrp::parse(ENCODED_KEY_HRP).unwrap();
        bech32::encode::<bech32::Bech32>(hrp, &bytes).unwrap()
    }

    #[test]
    fn classifies_hex_key() {
        let key = "a".repeat(64);
        assert_eq!(EntityRef::parse(&key), EntityRef::HexKey(key));
    }

    #[test]
    fn classifies_prefix() {
        assert_eq!(
            EntityRef::parse("a1b2c3d4"),
            EntityRef::Prefix("a1b2c3d4".to_string())
        );
    }

    #[test]
    fn uppercase_hex_is_normalized_to_lowercase() {
        let key = "A1B2C3D4".repeat(8);
        assert_eq!(
            EntityRef::parse(&key),
            EntityRef::HexKey(key.to_ascii_lowercase())
        );
        assert_eq!(
            EntityRef::parse("A1B2C3D4"),
            EntityRef::Prefix("a1b2c3d4".to_string())
        );
    }

    #[test]
    fn classifies_handle() {
        assert_eq!(
            EntityRef::parse("alice@example.com"),
            EntityRef::Handle("alice@example.com".to_string())
        );
        // A malformed handle is still a handle; resolution decides its fate.
        assert_eq!(
            EntityRef::parse("notreal@"),
            EntityRef::Handle("notreal@".to_string())
        );
    }

    #[test]
    fn classifies_encoded_key() {
        assert!(matches!(
            EntityRef::parse("npub1xyz"),
            EntityRef::Encoded(_)
        ));
    }

    #[test]
    fn decode_round_trips() {
        let key = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";
        let encoded = encode_key(key);
        assert_eq!(decode_encoded_key(&encoded).unwrap(), key);
    }

    #[test]
    fn decode_rejects_malformed() {
        assert!(decode_encoded_key("npub1notbech32!!!").is_err());
        assert!(decode_encoded_key("npub1").is_err());
    }

    #[test]
    fn decode_rejects_wrong_prefix() {
        let key = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";
        let bytes = hex::decode(key).unwrap();
        let hrp = Hrp::parse("nsec").unwrap();
        let encoded = bech32::encode::<bech32::Bech32>(hrp, &bytes).unwrap();
        assert!(decode_encoded_key(&encoded).is_err());
    }
}
