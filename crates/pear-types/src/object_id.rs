//! Git object ids and ref tables.

use crate::{Result, TypeError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Map of ref name (including `HEAD`) to the object it points at.
pub type RefTable = BTreeMap<String, ObjectId>;

/// A git object id as a lowercase 40 character hex string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(String);

impl ObjectId {
    /// Parses an object id, accepting upper or lower case hex.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != 40 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidObjectId(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Returns the hex representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the raw 20 bytes.
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        // Validated on construction.
        if let Ok(raw) = hex::decode(&self.0) {
            out.copy_from_slice(&raw);
        }
        out
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ObjectId> for String {
    fn from(value: ObjectId) -> Self {
        value.0
    }
}

impl std::str::FromStr for ObjectId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const OID: &str = "89abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_parse_lowercases() {
        let oid = ObjectId::parse(&OID.to_uppercase()).unwrap();
        assert_eq!(oid.as_str(), OID);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(ObjectId::parse("").is_err());
        assert!(ObjectId::parse(&OID[..39]).is_err());
        assert!(ObjectId::parse(&format!("{}0", OID)).is_err());
        assert!(ObjectId::parse("zzabcdef0123456789abcdef0123456789abcdef").is_err());
    }

    #[test]
    fn test_serde_validates() {
        let oid: ObjectId = serde_json::from_str(&format!("\"{}\"", OID)).unwrap();
        assert_eq!(oid.to_string(), OID);
        assert!(serde_json::from_str::<ObjectId>("\"nope\"").is_err());
    }

    #[test]
    fn test_ref_table_json_shape() {
        let mut refs = RefTable::new();
        refs.insert("HEAD".into(), ObjectId::parse(OID).unwrap());
        refs.insert("refs/heads/master".into(), ObjectId::parse(OID).unwrap());
        let json = serde_json::to_value(&refs).unwrap();
        assert_eq!(json["HEAD"], OID);
        assert_eq!(json["refs/heads/master"], OID);
    }

    proptest! {
        #[test]
        fn prop_bytes_match_hex(bytes in proptest::array::uniform20(any::<u8>())) {
            let oid = ObjectId::parse(&hex::encode(bytes)).unwrap();
            prop_assert_eq!(oid.to_bytes(), bytes);
        }
    }
}
