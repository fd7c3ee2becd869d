//! Opaque continuation tokens for paginated reads.
//!
//! Tokens are self-describing: they embed the cursor ulid and the object
//! type filter they were issued under. Callers must treat them as opaque
//! strings; any mutation fails validation on the next request.

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Pagination cursor carried between calls.
///
/// `ulid` is the position in the ulid-ordered result set; `object_type` is
/// the filter the token was issued under (empty for reads that do not
/// filter by object type). Encoding is deterministic: the same cursor
/// always yields the same token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationToken {
    pub ulid: String,
    #[serde(default)]
    pub object_type: String,
}

impl ContinuationToken {
    pub fn new(ulid: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self {
            ulid: ulid.into(),
            object_type: object_type.into(),
        }
    }

    /// Serializes the token into its opaque wire form.
    pub fn encode(&self) -> String {
        // Struct-to-JSON serialization of plain strings cannot fail.
        serde_json::to_string(self).expect("continuation token serialization")
    }

    /// Parses and validates an opaque token.
    pub fn parse(token: &str) -> StorageResult<Self> {
        serde_json::from_str(token).map_err(|e| StorageError::InvalidContinuationToken {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let token = ContinuationToken::new("01HQXJ0G4R8ZJ2V9Q3T5W7Y9AB", "document");
        let parsed = ContinuationToken::parse(&token.encode()).unwrap();
        assert_eq!(parsed, token);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = ContinuationToken::new("01HQXJ0G4R8ZJ2V9Q3T5W7Y9AB", "");
        let b = ContinuationToken::new("01HQXJ0G4R8ZJ2V9Q3T5W7Y9AB", "");
        assert_eq!(a.encode(), b.encode());
    }

    #[test]
    fn test_malformed_token_rejected() {
        for bad in ["", "not json", "{\"ulid\":42}", "{}"] {
            let result = ContinuationToken::parse(bad);
            assert!(
                matches!(
                    result,
                    Err(StorageError::InvalidContinuationToken { .. })
                ),
                "expected rejection for {bad:?}, got {result:?}"
            );
        }
    }

    #[test]
    fn test_missing_object_type_defaults_empty() {
        let parsed = ContinuationToken::parse("{\"ulid\":\"01HQXJ\"}").unwrap();
        assert_eq!(parsed.ulid, "01HQXJ");
        assert_eq!(parsed.object_type, "");
    }
}
