//! The `ConfigSpace` contract and the `ConfigValue`/config-map data model.
//!
//! `ConfigSpace` is the boundary this crate depends on but never
//! implements: the real dynamic-configuration framework lives elsewhere in
//! the server. A [`MapConfigSpace`] test fixture is provided behind
//! `#[cfg(any(test, feature = "test-support"))]` so this crate's own tests,
//! doctests, and downstream integration tests can exercise the wire format
//! without pulling in that framework.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::request::ProtocolVersion;

/// An opaque JSON-ish scalar carried through by the `ConfigSpace` codec.
/// The core never inspects it — it only needs to round-trip through
/// `serde_json`, the same contract `models::RawValue` establishes for
/// catalog specs in this workspace.
#[derive(Clone, serde::Serialize)]
#[serde(transparent)]
pub struct OpaqueValue(Box<serde_json::value::RawValue>);

impl OpaqueValue {
    pub fn from_value(value: &serde_json::Value) -> Self {
        Self(
            serde_json::value::RawValue::from_string(value.to_string())
                .expect("serde_json::Value always serializes to valid JSON"),
        )
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::from_str(self.0.get()).expect("OpaqueValue always carries valid JSON")
    }

    pub fn get(&self) -> &str {
        self.0.get()
    }
}

impl std::fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

impl PartialEq for OpaqueValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.get() == other.0.get()
    }
}
impl Eq for OpaqueValue {}

impl<'de> serde::Deserialize<'de> for OpaqueValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let inner = Box::<serde_json::value::RawValue>::deserialize(deserializer)?;
        Ok(Self(inner))
    }
}

/// Where a [`ConfigValue`] originated.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Session,
    Database,
    System,
}

/// The scope a setting is declared at. Left open-ended (spec: `enum {
/// SESSION, DATABASE, SYSTEM, ... }`) since the dynamic configuration
/// framework this crate treats as a boundary may define more scopes than
/// these three; unrecognized scopes still round-trip via `Other`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigScope {
    Session,
    Database,
    System,
    Other(String),
}

impl ConfigScope {
    fn as_str(&self) -> &str {
        match self {
            ConfigScope::Session => "session",
            ConfigScope::Database => "database",
            ConfigScope::System => "system",
            ConfigScope::Other(s) => s.as_str(),
        }
    }
}

impl serde::Serialize for ConfigScope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for ConfigScope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "session" => ConfigScope::Session,
            "database" => ConfigScope::Database,
            "system" => ConfigScope::System,
            _ => ConfigScope::Other(s),
        })
    }
}

/// A single configuration value, as stored in a [`ConfigMap`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConfigValue {
    pub name: String,
    pub value: OpaqueValue,
    pub source: ConfigSource,
    pub scope: ConfigScope,
}

/// A configuration map: setting name to value, with the deterministic
/// iteration order `BTreeMap` gives for free.
pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// Errors produced by a `ConfigSpace` implementation, boxed so the trait
/// stays object-safe regardless of the concrete framework behind it.
pub type ConfigSpaceError = Box<dyn std::error::Error + Send + Sync>;

/// The abstract contract this crate consumes from the dynamic
/// configuration framework. The core never constructs a
/// `ConfigSpace` itself except via [`ConfigSpace::rebuild`], which is how
/// the deserializer rehydrates an older configuration shape using the
/// caller-supplied handle purely as a factory.
pub trait ConfigSpace: std::fmt::Debug + Send + Sync {
    /// `(id, descriptor)` — a stable 16-byte identifier for this
    /// configuration shape, and the bytes that describe it.
    fn describe(&self) -> ([u8; 16], bytes::Bytes);

    /// Encode zero or more maps with overlay semantics: later maps
    /// override earlier ones. An all-empty invocation produces empty
    /// bytes.
    fn encode_configs(&self, maps: &[&ConfigMap]) -> Result<bytes::Bytes, ConfigSpaceError>;

    /// Inverse of encoding a single map.
    fn decode(&self, bytes: &[u8]) -> Result<ConfigMap, ConfigSpaceError>;

    /// Construct a new `ConfigSpace` handle describing a different shape,
    /// using `self` only as a capability to reach the underlying
    /// framework (the returned handle need not share any state with
    /// `self`). Used when a deserialized record's embedded id doesn't
    /// match the reader's own `ConfigSpace`.
    fn rebuild(
        &self,
        id: [u8; 16],
        descriptor: bytes::Bytes,
        protocol_version: ProtocolVersion,
    ) -> Result<Arc<dyn ConfigSpace>, ConfigSpaceError>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fixture {
    //! An in-memory `ConfigSpace` for tests. Not a production implementation
    //! — it has no notion of setting types, defaults, or validation, which
    //! the real dynamic-configuration framework (out of scope here) owns.

    use super::*;

    #[derive(Debug, Clone)]
    pub struct MapConfigSpace {
        id: [u8; 16],
        descriptor: bytes::Bytes,
    }

    impl MapConfigSpace {
        pub fn new(id: [u8; 16], descriptor: impl Into<bytes::Bytes>) -> Self {
            Self {
                id,
                descriptor: descriptor.into(),
            }
        }
    }

    impl ConfigSpace for MapConfigSpace {
        fn describe(&self) -> ([u8; 16], bytes::Bytes) {
            (self.id, self.descriptor.clone())
        }

        fn encode_configs(&self, maps: &[&ConfigMap]) -> Result<bytes::Bytes, ConfigSpaceError> {
            let mut overlay: ConfigMap = ConfigMap::new();
            for map in maps {
                for (k, v) in map.iter() {
                    overlay.insert(k.clone(), v.clone());
                }
            }
            if overlay.is_empty() {
                return Ok(bytes::Bytes::new());
            }
            let json = serde_json::to_vec(&overlay)
                .map_err(|e| -> ConfigSpaceError { Box::new(e) })?;
            Ok(bytes::Bytes::from(json))
        }

        fn decode(&self, bytes: &[u8]) -> Result<ConfigMap, ConfigSpaceError> {
            if bytes.is_empty() {
                return Ok(ConfigMap::new());
            }
            serde_json::from_slice(bytes).map_err(|e| -> ConfigSpaceError { Box::new(e) })
        }

        fn rebuild(
            &self,
            id: [u8; 16],
            descriptor: bytes::Bytes,
            _protocol_version: ProtocolVersion,
        ) -> Result<Arc<dyn ConfigSpace>, ConfigSpaceError> {
            Ok(Arc::new(MapConfigSpace { id, descriptor }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::MapConfigSpace;
    use super::*;

    fn value(name: &str, n: i64) -> ConfigValue {
        ConfigValue {
            name: name.to_string(),
            value: OpaqueValue::from_value(&serde_json::json!(n)),
            source: ConfigSource::Session,
            scope: ConfigScope::Session,
        }
    }

    #[test]
    fn empty_maps_encode_to_empty_bytes() {
        let space = MapConfigSpace::new([0; 16], Vec::new());
        let encoded = space.encode_configs(&[]).unwrap();
        assert!(encoded.is_empty());

        let empty_map = ConfigMap::new();
        let encoded = space.encode_configs(&[&empty_map]).unwrap();
        assert!(encoded.is_empty());
    }

    #[test]
    fn overlay_semantics_prefer_later_maps() {
        let space = MapConfigSpace::new([0; 16], Vec::new());
        let mut base = ConfigMap::new();
        base.insert("x".to_string(), value("x", 1));
        let mut over = ConfigMap::new();
        over.insert("x".to_string(), value("x", 2));

        let encoded = space.encode_configs(&[&base, &over]).unwrap();
        let decoded = space.decode(&encoded).unwrap();
        assert_eq!(decoded["x"].value.to_value(), serde_json::json!(2));
    }
}
