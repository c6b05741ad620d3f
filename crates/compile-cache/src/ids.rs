//! 128-bit identifiers used as cache keys and schema versions.
//!
//! Modeled on `models::Id` (an 8-byte analogue with the same shape: a
//! `Display`/`FromStr` pair around a lowercase hex string, and manual
//! `serde` impls that delegate to that string) but doubled in width, since
//! both a cache key and a schema version are defined by the rest of this
//! crate as 16 raw bytes.

use std::fmt;
use std::str::FromStr;

/// A 16-byte identifier. `CacheKey` and `SchemaVersion` are thin,
/// non-interchangeable wrappers around this shape so the compiler keeps
/// them from being accidentally swapped at call sites.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bytes16([u8; 16]);

impl Bytes16 {
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub const fn zero() -> Self {
        Self([0u8; 16])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 16]
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn into_bytes(self) -> [u8; 16] {
        self.0
    }

    pub fn as_uuid(&self) -> uuid::Uuid {
        uuid::Uuid::from_bytes(self.0)
    }
}

impl From<[u8; 16]> for Bytes16 {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid 16-byte hex identifier: {0}")]
pub struct ParseBytes16Error(#[from] hex::FromHexError);

impl FromStr for Bytes16 {
    type Err = ParseBytes16Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let no_dashes: String = s.chars().filter(|c| *c != '-').collect();
        let vec_bytes = hex::decode(no_dashes)?;
        let exact: [u8; 16] = vec_bytes
            .as_slice()
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(exact))
    }
}

impl fmt::Display for Bytes16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Bytes16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl serde::Serialize for Bytes16 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        format!("{self}").serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Bytes16 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        let str_val = std::borrow::Cow::<'de, str>::deserialize(deserializer)?;
        Bytes16::from_str(str_val.as_ref())
            .map_err(|err| D::Error::custom(format!("invalid identifier: {err}")))
    }
}

macro_rules! bytes16_newtype {
    ($name:ident) => {
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(Bytes16);

        impl $name {
            pub const fn new(bytes: [u8; 16]) -> Self {
                Self(Bytes16::new(bytes))
            }

            pub fn is_zero(&self) -> bool {
                self.0.is_zero()
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            pub fn into_bytes(self) -> [u8; 16] {
                self.0.into_bytes()
            }

            pub fn as_uuid(&self) -> uuid::Uuid {
                self.0.as_uuid()
            }
        }

        impl From<[u8; 16]> for $name {
            fn from(bytes: [u8; 16]) -> Self {
                Self(Bytes16::new(bytes))
            }
        }

        impl FromStr for $name {
            type Err = ParseBytes16Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Bytes16::from_str(s)?))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

bytes16_newtype!(CacheKey);
bytes16_newtype!(SchemaVersion);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_from_str() {
        let key = CacheKey::new([0xab; 16]);
        let text = key.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(CacheKey::from_str(&text).unwrap(), key);
    }

    #[test]
    fn cache_key_and_schema_version_are_distinct_types() {
        let bytes = [1u8; 16];
        let key = CacheKey::new(bytes);
        let ver = SchemaVersion::new(bytes);
        assert_eq!(key.as_bytes(), ver.as_bytes());
        // But they are not the same Rust type, so this would not compile:
        // let _: CacheKey = ver;
    }

    #[test]
    fn as_uuid_preserves_bytes() {
        let key = CacheKey::new([0x11; 16]);
        assert_eq!(key.as_uuid().as_bytes(), key.as_bytes());
    }
}
