//! The voyage identifier.

use crate::IdError;

/// Number of random bytes in a voyage token.
const TOKEN_BYTES: usize = 6;

/// A voyage identifier: `voyage-{hex}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VoyageId([u8; TOKEN_BYTES]);

impl VoyageId {
    /// The prefix shared by every voyage ID, and therefore by every
    /// instance name this system creates.
    pub const PREFIX: &'static str = "voyage-";

    /// Creates a new ID from fresh random bytes.
    #[must_use]
    pub fn new() -> Self {
        Self(rand::random())
    }

    /// Creates an ID from raw token bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; TOKEN_BYTES]) -> Self {
        Self(bytes)
    }

    /// Returns the raw token bytes.
    #[must_use]
    pub const fn bytes(&self) -> [u8; TOKEN_BYTES] {
        self.0
    }

    /// Parses an ID from a string.
    ///
    /// The string must be `voyage-` followed by exactly twelve lowercase
    /// hex characters.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let Some(token) = s.strip_prefix(Self::PREFIX) else {
            return Err(IdError::InvalidPrefix {
                expected: Self::PREFIX,
                actual: s.chars().take(Self::PREFIX.len()).collect(),
            });
        };

        if token.len() != TOKEN_BYTES * 2 {
            return Err(IdError::InvalidToken {
                token: token.to_string(),
                message: format!("expected {} hex characters", TOKEN_BYTES * 2),
            });
        }

        if token.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(IdError::InvalidToken {
                token: token.to_string(),
                message: "hex must be lowercase".to_string(),
            });
        }

        let mut bytes = [0u8; TOKEN_BYTES];
        hex::decode_to_slice(token, &mut bytes).map_err(|e| IdError::InvalidToken {
            token: token.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self(bytes))
    }

    /// Returns the token portion (without the prefix).
    #[must_use]
    pub fn token(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for VoyageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for VoyageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.token())
    }
}

impl std::str::FromStr for VoyageId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for VoyageId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for VoyageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voyage_id_roundtrip() {
        let id = VoyageId::new();
        let s = id.to_string();
        let parsed: VoyageId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_voyage_id_format() {
        let id = VoyageId::from_bytes([0x3f, 0x9a, 0x0c, 0x11, 0xb2, 0xde]);
        assert_eq!(id.to_string(), "voyage-3f9a0c11b2de");
        assert_eq!(id.token(), "3f9a0c11b2de");
    }

    #[test]
    fn test_voyage_id_invalid_prefix() {
        let result: Result<VoyageId, _> = "trip-3f9a0c11b2de".parse();
        assert_eq!(
            result,
            Err(IdError::InvalidPrefix {
                expected: "voyage-",
                actual: "trip-3f".to_string(),
            })
        );
    }

    #[test]
    fn test_voyage_id_empty() {
        let result: Result<VoyageId, _> = "".parse();
        assert_eq!(result, Err(IdError::Empty));
    }

    #[test]
    fn test_voyage_id_bad_token() {
        for input in [
            "voyage-3f9a0c11b2d",
            "voyage-3f9a0c11b2dez",
            "voyage-3F9A0C11B2DE",
            "voyage-zz9a0c11b2de",
        ] {
            let result: Result<VoyageId, _> = input.parse();
            assert!(
                matches!(result, Err(IdError::InvalidToken { .. })),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn test_voyage_id_json_roundtrip() {
        let id = VoyageId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: VoyageId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_fresh_ids_differ() {
        let ids: std::collections::HashSet<_> = (0..64).map(|_| VoyageId::new()).collect();
        assert_eq!(ids.len(), 64);
    }
}
