//! The `CompilationRequest` value object: every input that can change
//! what the query compiler produces, bundled behind one cache key.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;

use crate::config_space::{ConfigMap, ConfigSpace};
use crate::error::{BinaryProtocolError, Error};
use crate::ids::{CacheKey, SchemaVersion};
use crate::source::{InputLanguage, Source};
use crate::wire;

/// `(major, minor)` protocol version. Majors `>= 1` only; major `0` is
/// rejected at deserialization.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub const fn is_supported(self) -> bool {
        self.major >= 1
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Output encoding requested for compiled query results.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Binary,
    Json,
    JsonElements,
    None,
}

impl OutputFormat {
    pub const fn tag_byte(self) -> u8 {
        match self {
            OutputFormat::Binary => b'b',
            OutputFormat::Json => b'j',
            OutputFormat::JsonElements => b'J',
            OutputFormat::None => b'n',
        }
    }

    pub fn from_tag_byte(tag: u8) -> Result<Self, Error> {
        match tag {
            b'b' => Ok(OutputFormat::Binary),
            b'j' => Ok(OutputFormat::Json),
            b'J' => Ok(OutputFormat::JsonElements),
            b'n' => Ok(OutputFormat::None),
            other => Err(BinaryProtocolError::UnknownOutputFormat(other).into()),
        }
    }
}

/// Input encoding of bound query arguments (flags bit 0).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InputFormat {
    Binary,
    Json,
}

impl InputFormat {
    const fn is_json(self) -> bool {
        matches!(self, InputFormat::Json)
    }

    const fn from_flag(is_json: bool) -> Self {
        if is_json {
            InputFormat::Json
        } else {
            InputFormat::Binary
        }
    }
}

const FLAG_INPUT_FORMAT_JSON: u8 = 1 << 0;
const FLAG_EXPECT_ONE: u8 = 1 << 1;
const FLAG_INLINE_TYPEIDS: u8 = 1 << 2;
const FLAG_INLINE_TYPENAMES: u8 = 1 << 3;
const FLAG_INLINE_OBJECTIDS: u8 = 1 << 4;
const FLAG_RESERVED_MASK: u8 = 0b0001_1111;

/// A module-alias key: `None` sorts before every `Some`, and `Some` sorts
/// lexicographically — the canonical ordering a stable cache key needs
/// from a map whose keys can themselves be absent. Using this as a
/// `BTreeMap` key makes that ordering a property of the type rather than
/// something the serializer has to re-derive by sorting on every call.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ModAliasKey(pub Option<String>);

/// Module aliases: an optional mapping from an optional module-name key to
/// a module-name value. `None` overall is the "absent" sentinel; `Some(empty
/// map)` is distinct from absent and participates in the cache key as an
/// explicit empty list.
pub type ModAliases = BTreeMap<ModAliasKey, String>;

/// Immutable bundle of every input that can change compiler output.
/// Construct with [`Request::new`] or [`RequestBuilder`]; derive copies with
/// `with_*` mutators, which clear the memoized `cache_key` and `serialize()`
/// buffer.
#[derive(Clone)]
pub struct Request {
    source: Source,
    protocol_version: ProtocolVersion,
    schema_version: Option<SchemaVersion>,
    config_space: Arc<dyn ConfigSpace>,
    output_format: OutputFormat,
    input_format: InputFormat,
    expect_one: bool,
    implicit_limit: i64,
    inline_typeids: bool,
    inline_typenames: bool,
    inline_objectids: bool,
    role_name: String,
    branch_name: String,
    modaliases: Option<ModAliases>,
    session_config: Option<ConfigMap>,
    database_config: Option<ConfigMap>,
    system_config: Option<ConfigMap>,

    cache_key: Arc<OnceLock<CacheKey>>,
    serialized_cache: Arc<OnceLock<Bytes>>,
}

impl std::fmt::Debug for Request {
    // The memoized `serialized_cache` is the entire wire record (source body
    // included); show its length rather than dumping it, same reasoning as
    // `Source`'s own `Debug` impl.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("source", &self.source)
            .field("config_space_id", &hex::encode(self.config_space.describe().0))
            .field("protocol_version", &self.protocol_version)
            .field("schema_version", &self.schema_version)
            .field("output_format", &self.output_format)
            .field("input_format", &self.input_format)
            .field("expect_one", &self.expect_one)
            .field("implicit_limit", &self.implicit_limit)
            .field("inline_typeids", &self.inline_typeids)
            .field("inline_typenames", &self.inline_typenames)
            .field("inline_objectids", &self.inline_objectids)
            .field("role_name", &self.role_name)
            .field("branch_name", &self.branch_name)
            .field("modaliases", &self.modaliases)
            .field("session_config", &self.session_config)
            .field("database_config", &self.database_config)
            .field("system_config", &self.system_config)
            .field("cache_key", &self.cache_key.get())
            .field(
                "serialized_cache_len",
                &self.serialized_cache.get().map(Bytes::len),
            )
            .finish()
    }
}

/// Fields needed to construct a [`Request`]. Grouped into
/// a struct (rather than a 16-argument function) the way this workspace
/// groups wide constructors, e.g. `models::ConnectorConfig`.
pub struct NewRequest {
    pub source: Source,
    pub protocol_version: ProtocolVersion,
    pub config_space: Arc<dyn ConfigSpace>,
    pub output_format: OutputFormat,
    pub input_format: InputFormat,
    pub expect_one: bool,
    pub implicit_limit: i64,
    pub inline_typeids: bool,
    pub inline_typenames: bool,
    pub inline_objectids: bool,
    pub role_name: String,
    pub branch_name: String,
}

impl Request {
    /// The only wire-format version this build writes and reads.
    pub const WIRE_VERSION: u8 = 1;

    /// A fluent alternative to [`NewRequest`] for call sites that would
    /// otherwise build the struct field by field with a string of defaults.
    pub fn builder(source: Source, config_space: Arc<dyn ConfigSpace>) -> RequestBuilder {
        RequestBuilder::new(source, config_space)
    }

    pub fn new(fields: NewRequest) -> Self {
        Self {
            source: fields.source,
            protocol_version: fields.protocol_version,
            schema_version: None,
            config_space: fields.config_space,
            output_format: fields.output_format,
            input_format: fields.input_format,
            expect_one: fields.expect_one,
            implicit_limit: fields.implicit_limit,
            inline_typeids: fields.inline_typeids,
            inline_typenames: fields.inline_typenames,
            inline_objectids: fields.inline_objectids,
            role_name: fields.role_name,
            branch_name: fields.branch_name,
            modaliases: None,
            session_config: None,
            database_config: None,
            system_config: None,
            cache_key: Arc::new(OnceLock::new()),
            serialized_cache: Arc::new(OnceLock::new()),
        }
    }

    fn with_derived_cleared(&self) -> (Arc<OnceLock<CacheKey>>, Arc<OnceLock<Bytes>>) {
        (Arc::new(OnceLock::new()), Arc::new(OnceLock::new()))
    }

    pub fn with_modaliases(&self, modaliases: Option<ModAliases>) -> Self {
        let (cache_key, serialized_cache) = self.with_derived_cleared();
        Self {
            modaliases,
            cache_key,
            serialized_cache,
            ..self.clone()
        }
    }

    pub fn with_session_config(&self, session_config: Option<ConfigMap>) -> Self {
        let (cache_key, serialized_cache) = self.with_derived_cleared();
        Self {
            session_config,
            cache_key,
            serialized_cache,
            ..self.clone()
        }
    }

    pub fn with_database_config(&self, database_config: Option<ConfigMap>) -> Self {
        let (cache_key, serialized_cache) = self.with_derived_cleared();
        Self {
            database_config,
            cache_key,
            serialized_cache,
            ..self.clone()
        }
    }

    pub fn with_system_config(&self, system_config: Option<ConfigMap>) -> Self {
        let (cache_key, serialized_cache) = self.with_derived_cleared();
        Self {
            system_config,
            cache_key,
            serialized_cache,
            ..self.clone()
        }
    }

    pub fn with_schema_version(&self, schema_version: SchemaVersion) -> Self {
        let (cache_key, serialized_cache) = self.with_derived_cleared();
        Self {
            schema_version: Some(schema_version),
            cache_key,
            serialized_cache,
            ..self.clone()
        }
    }

    // -- accessors --------------------------------------------------------

    pub fn source(&self) -> &Source {
        &self.source
    }
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }
    pub fn schema_version(&self) -> Option<SchemaVersion> {
        self.schema_version
    }
    pub fn input_language(&self) -> InputLanguage {
        self.source.kind()
    }
    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }
    pub fn input_format(&self) -> InputFormat {
        self.input_format
    }
    pub fn expect_one(&self) -> bool {
        self.expect_one
    }
    pub fn implicit_limit(&self) -> i64 {
        self.implicit_limit
    }
    pub fn inline_typeids(&self) -> bool {
        self.inline_typeids
    }
    pub fn inline_typenames(&self) -> bool {
        self.inline_typenames
    }
    pub fn inline_objectids(&self) -> bool {
        self.inline_objectids
    }
    pub fn role_name(&self) -> &str {
        &self.role_name
    }
    pub fn branch_name(&self) -> &str {
        &self.branch_name
    }
    pub fn modaliases(&self) -> Option<&ModAliases> {
        self.modaliases.as_ref()
    }
    pub fn session_config(&self) -> Option<&ConfigMap> {
        self.session_config.as_ref()
    }
    pub fn database_config(&self) -> Option<&ConfigMap> {
        self.database_config.as_ref()
    }
    pub fn system_config(&self) -> Option<&ConfigMap> {
        self.system_config.as_ref()
    }
    pub fn config_space(&self) -> &Arc<dyn ConfigSpace> {
        &self.config_space
    }

    /// The embedded `ConfigSpace` id without requiring a full
    /// deserialization, exposed for callers that need to tell which
    /// configuration shape a request was built against without decoding it.
    pub fn config_space_id(&self) -> [u8; 16] {
        self.config_space.describe().0
    }

    pub(crate) fn flags_byte(&self) -> u8 {
        let mut flags = 0u8;
        if self.input_format.is_json() {
            flags |= FLAG_INPUT_FORMAT_JSON;
        }
        if self.expect_one {
            flags |= FLAG_EXPECT_ONE;
        }
        if self.inline_typeids {
            flags |= FLAG_INLINE_TYPEIDS;
        }
        if self.inline_typenames {
            flags |= FLAG_INLINE_TYPENAMES;
        }
        if self.inline_objectids {
            flags |= FLAG_INLINE_OBJECTIDS;
        }
        flags
    }

    pub(crate) fn from_flags_byte(flags: u8) -> (InputFormat, bool, bool, bool, bool) {
        let flags = flags & FLAG_RESERVED_MASK; // reserved bits are masked off, not rejected, on read
        (
            InputFormat::from_flag(flags & FLAG_INPUT_FORMAT_JSON != 0),
            flags & FLAG_EXPECT_ONE != 0,
            flags & FLAG_INLINE_TYPEIDS != 0,
            flags & FLAG_INLINE_TYPENAMES != 0,
            flags & FLAG_INLINE_OBJECTIDS != 0,
        )
    }

    /// Triggers serialization (and therefore cache-key derivation) if it
    /// has not already happened, then returns the 16-byte content-addressed
    /// identity.
    pub fn cache_key(&self) -> Result<CacheKey, Error> {
        if let Some(key) = self.cache_key.get() {
            return Ok(*key);
        }
        self.serialize()?;
        Ok(*self
            .cache_key
            .get()
            .expect("serialize() always populates cache_key"))
    }

    /// Serializes this request to its versioned binary form, memoizing the
    /// result. Fails with [`Error::InvalidState`] if `schema_version` has
    /// not been set — every serialized request is pinned to a schema.
    pub fn serialize(&self) -> Result<Bytes, Error> {
        if let Some(buf) = self.serialized_cache.get() {
            return Ok(buf.clone());
        }
        tracing::trace!(role = %self.role_name, branch = %self.branch_name, "serializing compilation request");
        let (buf, key) = wire::ser::serialize(self)?;
        let _ = self.cache_key.set(key);
        let _ = self.serialized_cache.set(buf.clone());
        Ok(buf)
    }

    /// Installs a cache key and serialized buffer taken directly from a
    /// decoded wire record, bypassing re-derivation. The deserializer is the
    /// only caller: `database_config`/`system_config` are never written to
    /// the wire (they influence a cache key only through the combined
    /// overlay hashed in at write time — see `wire::ser`), so a
    /// reconstructed request generally cannot reproduce the original cache
    /// key by re-serializing itself. Trusting the writer's trailing key and
    /// echoing back its own input bytes as `serialized_cache` is exactly
    /// what keeps the round-trip invariant (`deserialize(r.serialize())`
    /// has the same `cache_key` as `r`) true regardless of whether those
    /// two scopes were set.
    pub(crate) fn with_trusted_serialization(self, cache_key: CacheKey, serialized: Bytes) -> Self {
        let _ = self.cache_key.set(cache_key);
        let _ = self.serialized_cache.set(serialized);
        self
    }

    /// Reconstructs a `Request` from a buffer previously produced by
    /// [`Request::serialize`].
    ///
    /// `query_text` is the plaintext query, needed to rehydrate
    /// `Structural` and `Sql` sources, which do not carry their plaintext
    /// on the wire. `config_space` is the reader's own `ConfigSpace`
    /// handle, used to decode the embedded configuration unless the
    /// buffer's descriptor id differs, in which case a new handle is
    /// built via [`ConfigSpace::rebuild`].
    pub fn deserialize(
        buf: &[u8],
        query_text: &str,
        config_space: Arc<dyn ConfigSpace>,
    ) -> Result<Self, Error> {
        tracing::trace!(len = buf.len(), "deserializing compilation request");
        wire::de::deserialize(buf, query_text, config_space, false)
    }

    /// As [`Request::deserialize`], but additionally recomputes the
    /// running hash over the decoded fields and verifies it matches the
    /// trailing cache key, catching corruption the plain [`Request::deserialize`]
    /// would silently accept.
    ///
    /// This check is only conclusive for records whose `database_config`
    /// and `system_config` were both absent at write time: neither scope
    /// is ever present on the wire, so a reconstructed request's combined
    /// view can only ever reflect `session_config`. A record written with
    /// either scope set will report a spurious mismatch here even with no
    /// corruption at all — use plain [`Request::deserialize`] for those and
    /// rely on the embedded trailing key instead of an independent
    /// recompute.
    pub fn deserialize_verified(
        buf: &[u8],
        query_text: &str,
        config_space: Arc<dyn ConfigSpace>,
    ) -> Result<Self, Error> {
        wire::de::deserialize(buf, query_text, config_space, true)
    }
}

/// Fields compared by [`Request`]'s equality: every input that can change
/// compiler output, *except* the combined view of
/// `database_config`/`system_config`, which is deliberately not exposed
/// here since comparing it requires a fallible round-trip through the
/// `ConfigSpace` codec (see [`Request::content_equal`]).
impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
            && self.protocol_version == other.protocol_version
            && self.schema_version == other.schema_version
            && self.input_language() == other.input_language()
            && self.output_format == other.output_format
            && self.input_format == other.input_format
            && self.expect_one == other.expect_one
            && self.implicit_limit == other.implicit_limit
            && self.inline_typeids == other.inline_typeids
            && self.inline_typenames == other.inline_typenames
            && self.inline_objectids == other.inline_objectids
            && self.role_name == other.role_name
            && self.branch_name == other.branch_name
            && self.modaliases == other.modaliases
    }
}

impl Eq for Request {}

impl Request {
    /// The full equality law for a `Request`, including the
    /// combined-config comparison that `PartialEq` cannot express (it
    /// requires invoking the fallible `ConfigSpace::encode_configs`).
    pub fn content_equal(&self, other: &Self) -> Result<bool, Error> {
        if self != other {
            return Ok(false);
        }
        let mine = combined_config_bytes(self)?;
        let theirs = combined_config_bytes(other)?;
        Ok(mine == theirs)
    }
}

pub(crate) fn combined_config_bytes(request: &Request) -> Result<Bytes, Error> {
    let empty = ConfigMap::new();
    let system = request.system_config.as_ref().unwrap_or(&empty);
    let database = request.database_config.as_ref().unwrap_or(&empty);
    let session = request.session_config.as_ref().unwrap_or(&empty);
    request
        .config_space
        .encode_configs(&[system, database, session])
        .map_err(Error::config_space)
}

impl std::hash::Hash for Request {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Two requests with the same cache key are interchangeable for
        // caching purposes, so hash on that. Requests that haven't been
        // serialized yet pay the cost of serialization the first time
        // they're hashed, same as the first call to `cache_key()`.
        match self.cache_key() {
            Ok(key) => key.as_bytes().hash(state),
            Err(_) => self.role_name.hash(state), // unreachable in practice: schema_version is required before hashing is meaningful
        }
    }
}

/// Fluent builder for [`Request`], defaulting every field `NewRequest`
/// would otherwise force a caller to spell out explicitly. `role_name` and
/// `branch_name` have no sensible default and must be set before
/// [`RequestBuilder::build`].
pub struct RequestBuilder {
    source: Source,
    config_space: Arc<dyn ConfigSpace>,
    protocol_version: ProtocolVersion,
    output_format: OutputFormat,
    input_format: InputFormat,
    expect_one: bool,
    implicit_limit: i64,
    inline_typeids: bool,
    inline_typenames: bool,
    inline_objectids: bool,
    role_name: Option<String>,
    branch_name: Option<String>,
    schema_version: Option<SchemaVersion>,
    modaliases: Option<ModAliases>,
    session_config: Option<ConfigMap>,
    database_config: Option<ConfigMap>,
    system_config: Option<ConfigMap>,
}

impl RequestBuilder {
    fn new(source: Source, config_space: Arc<dyn ConfigSpace>) -> Self {
        Self {
            source,
            config_space,
            protocol_version: ProtocolVersion::new(1, 0),
            output_format: OutputFormat::Binary,
            input_format: InputFormat::Binary,
            expect_one: false,
            implicit_limit: 0,
            inline_typeids: false,
            inline_typenames: false,
            inline_objectids: false,
            role_name: None,
            branch_name: None,
            schema_version: None,
            modaliases: None,
            session_config: None,
            database_config: None,
            system_config: None,
        }
    }

    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }
    pub fn input_format(mut self, format: InputFormat) -> Self {
        self.input_format = format;
        self
    }
    pub fn expect_one(mut self, expect_one: bool) -> Self {
        self.expect_one = expect_one;
        self
    }
    pub fn implicit_limit(mut self, limit: i64) -> Self {
        self.implicit_limit = limit;
        self
    }
    pub fn inline_typeids(mut self, inline: bool) -> Self {
        self.inline_typeids = inline;
        self
    }
    pub fn inline_typenames(mut self, inline: bool) -> Self {
        self.inline_typenames = inline;
        self
    }
    pub fn inline_objectids(mut self, inline: bool) -> Self {
        self.inline_objectids = inline;
        self
    }
    pub fn role_name(mut self, role_name: impl Into<String>) -> Self {
        self.role_name = Some(role_name.into());
        self
    }
    pub fn branch_name(mut self, branch_name: impl Into<String>) -> Self {
        self.branch_name = Some(branch_name.into());
        self
    }
    pub fn schema_version(mut self, version: SchemaVersion) -> Self {
        self.schema_version = Some(version);
        self
    }
    pub fn modaliases(mut self, modaliases: ModAliases) -> Self {
        self.modaliases = Some(modaliases);
        self
    }
    pub fn session_config(mut self, config: ConfigMap) -> Self {
        self.session_config = Some(config);
        self
    }
    pub fn database_config(mut self, config: ConfigMap) -> Self {
        self.database_config = Some(config);
        self
    }
    pub fn system_config(mut self, config: ConfigMap) -> Self {
        self.system_config = Some(config);
        self
    }

    pub fn build(self) -> Result<Request, Error> {
        let role_name = self
            .role_name
            .ok_or_else(|| Error::invalid_state("role_name", "building a request"))?;
        let branch_name = self
            .branch_name
            .ok_or_else(|| Error::invalid_state("branch_name", "building a request"))?;

        let mut request = Request::new(NewRequest {
            source: self.source,
            protocol_version: self.protocol_version,
            config_space: self.config_space,
            output_format: self.output_format,
            input_format: self.input_format,
            expect_one: self.expect_one,
            implicit_limit: self.implicit_limit,
            inline_typeids: self.inline_typeids,
            inline_typenames: self.inline_typenames,
            inline_objectids: self.inline_objectids,
            role_name,
            branch_name,
        });
        if let Some(version) = self.schema_version {
            request = request.with_schema_version(version);
        }
        if self.modaliases.is_some() {
            request = request.with_modaliases(self.modaliases);
        }
        if self.session_config.is_some() {
            request = request.with_session_config(self.session_config);
        }
        if self.database_config.is_some() {
            request = request.with_database_config(self.database_config);
        }
        if self.system_config.is_some() {
            request = request.with_system_config(self.system_config);
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_space::fixture::MapConfigSpace;
    use bytes::Bytes;

    fn sample_request() -> Request {
        Request::new(NewRequest {
            source: Source::structural(Bytes::from_static(b"\x00"), "select 1"),
            protocol_version: ProtocolVersion::new(3, 0),
            config_space: Arc::new(MapConfigSpace::new([0u8; 16], Vec::new())),
            output_format: OutputFormat::Binary,
            input_format: InputFormat::Binary,
            expect_one: false,
            implicit_limit: 0,
            inline_typeids: false,
            inline_typenames: false,
            inline_objectids: false,
            role_name: "admin".to_string(),
            branch_name: "main".to_string(),
        })
        .with_schema_version(SchemaVersion::new([2u8; 16]))
    }

    #[test]
    fn serialize_fails_without_schema_version() {
        let request = Request::new(NewRequest {
            source: Source::sql("select 1"),
            protocol_version: ProtocolVersion::new(3, 0),
            config_space: Arc::new(MapConfigSpace::new([0u8; 16], Vec::new())),
            output_format: OutputFormat::Binary,
            input_format: InputFormat::Binary,
            expect_one: false,
            implicit_limit: 0,
            inline_typeids: false,
            inline_typenames: false,
            inline_objectids: false,
            role_name: "admin".to_string(),
            branch_name: "main".to_string(),
        });
        let err = request.serialize().unwrap_err();
        assert!(matches!(err, Error::InvalidState { field: "schema_version", .. }));
    }

    #[test]
    fn mutator_clears_derived_cache() {
        let request = sample_request();
        let _ = request.cache_key().unwrap();
        assert!(request.cache_key.get().is_some());

        let mutated = request.with_modaliases(request.modaliases().cloned());
        assert!(mutated.cache_key.get().is_none());
    }

    #[test]
    fn no_op_mutator_preserves_cache_key() {
        let request = sample_request();
        let before = request.cache_key().unwrap();
        let same = request.with_modaliases(request.modaliases().cloned());
        let after = same.cache_key().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn inline_typeids_changes_cache_key() {
        let a = sample_request();
        let mut fields_with_inline = a.clone();
        fields_with_inline.inline_typeids = true;
        fields_with_inline.cache_key = Arc::new(OnceLock::new());
        fields_with_inline.serialized_cache = Arc::new(OnceLock::new());

        assert_ne!(a.cache_key().unwrap(), fields_with_inline.cache_key().unwrap());
    }

    fn config_value(name: &str, n: i64, scope: crate::config_space::ConfigScope) -> crate::config_space::ConfigValue {
        use crate::config_space::{ConfigSource, ConfigValue, OpaqueValue};
        let source = match &scope {
            crate::config_space::ConfigScope::Session => ConfigSource::Session,
            crate::config_space::ConfigScope::Database => ConfigSource::Database,
            crate::config_space::ConfigScope::System => ConfigSource::System,
            crate::config_space::ConfigScope::Other(_) => ConfigSource::Session,
        };
        ConfigValue {
            name: name.to_string(),
            value: OpaqueValue::from_value(&serde_json::json!(n)),
            source,
            scope,
        }
    }

    #[test]
    fn database_config_shadowed_by_session_does_not_change_cache_key() {
        use crate::config_space::ConfigScope;

        let mut session = ConfigMap::new();
        session.insert("work_mem".to_string(), config_value("work_mem", 64, ConfigScope::Session));

        let mut database_a = ConfigMap::new();
        database_a.insert("work_mem".to_string(), config_value("work_mem", 1, ConfigScope::Database));
        let mut database_b = ConfigMap::new();
        database_b.insert("work_mem".to_string(), config_value("work_mem", 2, ConfigScope::Database));

        let base = sample_request().with_session_config(Some(session));
        let with_a = base.with_database_config(Some(database_a));
        let with_b = base.with_database_config(Some(database_b));

        // The session value for `work_mem` always wins over either database
        // value, so the combined view — and therefore the cache key — is
        // unaffected by which database map was set.
        assert_eq!(with_a.cache_key().unwrap(), with_b.cache_key().unwrap());
    }

    #[test]
    fn database_config_changes_cache_key_when_it_affects_the_combined_view() {
        use crate::config_space::ConfigScope;

        let mut database_a = ConfigMap::new();
        database_a.insert("work_mem".to_string(), config_value("work_mem", 1, ConfigScope::Database));
        let mut database_b = ConfigMap::new();
        database_b.insert("work_mem".to_string(), config_value("work_mem", 2, ConfigScope::Database));

        let base = sample_request();
        let with_a = base.with_database_config(Some(database_a));
        let with_b = base.with_database_config(Some(database_b));

        // With no session override, the database value is what the
        // compiler actually sees, so changing it must change the key.
        assert_ne!(with_a.cache_key().unwrap(), with_b.cache_key().unwrap());
    }

    #[test]
    fn builder_requires_role_and_branch_name() {
        let err = Request::builder(
            Source::sql("select 1"),
            Arc::new(MapConfigSpace::new([0u8; 16], Vec::new())),
        )
        .build()
        .unwrap_err();
        assert!(matches!(err, Error::InvalidState { field: "role_name", .. }));
    }

    #[test]
    fn builder_produces_an_equivalent_request() {
        let built = Request::builder(
            Source::structural(Bytes::from_static(b"\x00"), "select 1"),
            Arc::new(MapConfigSpace::new([0u8; 16], Vec::new())),
        )
        .protocol_version(ProtocolVersion::new(3, 0))
        .role_name("admin")
        .branch_name("main")
        .schema_version(SchemaVersion::new([2u8; 16]))
        .build()
        .unwrap();

        assert_eq!(built.cache_key().unwrap(), sample_request().cache_key().unwrap());
    }

    #[test]
    fn debug_does_not_dump_serialized_cache_bytes() {
        let request = sample_request();
        let _ = request.serialize().unwrap();
        let debug = format!("{request:?}");
        // The serialized buffer is many bytes long; if it were dumped
        // verbatim the debug string would be far longer than this.
        assert!(debug.len() < 2000, "debug output unexpectedly large: {debug}");
        assert!(debug.contains("serialized_cache_len"));
        assert!(!debug.contains("serialized_cache\":"));
    }
}
