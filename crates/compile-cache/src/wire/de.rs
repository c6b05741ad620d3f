//! Deserialization of a [`crate::request::Request`] from its versioned
//! binary form, mirroring `wire::ser` field for field.
//!
//! The fields are *read* in wire order, which is not the same as the order
//! they feed the running hash (the source fingerprint, for instance, hashes
//! in between the ConfigSpace descriptor and the session-config block, but
//! its bytes aren't available to read until the source body shows up later
//! on the wire). So parsing and hashing happen in two separate passes: this
//! module reads every field as a plain byte cursor first, then — only when
//! a caller asked to verify — replays the captured bytes through the hasher
//! in the cache key's own logical order.

use std::sync::Arc;

use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use bytes::Bytes;

use crate::config_space::ConfigSpace;
use crate::error::{BinaryProtocolError, Error};
use crate::ids::{CacheKey, SchemaVersion};
use crate::request::{
    combined_config_bytes, ModAliasKey, ModAliases, NewRequest, OutputFormat, ProtocolVersion,
    Request,
};
use crate::source::{InputLanguage, Source};

type Blake2b128 = Blake2b<U16>;

struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn pos(&self) -> usize {
        self.offset
    }

    fn span_from(&self, start: usize) -> &'a [u8] {
        &self.buf[start..self.offset]
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], Error> {
        let available = self.buf.len().saturating_sub(self.offset);
        if available < n {
            return Err(BinaryProtocolError::Truncated {
                field,
                offset: self.offset,
                needed: n,
                available,
            }
            .into());
        }
        let out = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(out)
    }

    fn read_u8(&mut self, field: &'static str) -> Result<u8, Error> {
        Ok(self.take(1, field)?[0])
    }

    fn read_u16_be(&mut self, field: &'static str) -> Result<u16, Error> {
        let b = self.take(2, field)?;
        Ok(u16::from_be_bytes(b.try_into().unwrap()))
    }

    fn read_i64_be(&mut self, field: &'static str) -> Result<i64, Error> {
        let b = self.take(8, field)?;
        Ok(i64::from_be_bytes(b.try_into().unwrap()))
    }

    fn read_i32_be(&mut self, field: &'static str) -> Result<i32, Error> {
        let b = self.take(4, field)?;
        Ok(i32::from_be_bytes(b.try_into().unwrap()))
    }

    fn read_len_prefixed(&mut self, field: &'static str) -> Result<&'a [u8], Error> {
        let len = self.read_i32_be(field)?;
        if len < 0 {
            return Err(BinaryProtocolError::NegativeLength { field, found: len }.into());
        }
        self.take(len as usize, field)
    }

    /// Reads a NUL-terminated C-string, returning the UTF-8 slice excluding
    /// the terminator and advancing past it.
    fn read_cstring(&mut self, field: &'static str) -> Result<&'a str, Error> {
        let start = self.offset;
        let nul = self.buf[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(BinaryProtocolError::Truncated {
                field,
                offset: start,
                needed: 1,
                available: 0,
            })?;
        let bytes = &self.buf[start..start + nul];
        self.offset = start + nul + 1;
        std::str::from_utf8(bytes).map_err(|source| {
            BinaryProtocolError::InvalidUtf8 {
                field,
                source,
            }
            .into()
        })
    }
}

pub(crate) fn deserialize(
    buf: &[u8],
    query_text: &str,
    config_space: Arc<dyn ConfigSpace>,
    verify: bool,
) -> Result<Request, Error> {
    let mut r = Reader::new(buf);

    // 1. Version byte.
    let version = r.read_u8("version")?;
    if version != Request::WIRE_VERSION {
        return Err(Error::UnsupportedVersion {
            found: version,
            supported: Request::WIRE_VERSION,
        });
    }

    // 2. Flags byte.
    let flags = r.read_u8("flags")?;
    let (input_format, expect_one, inline_typeids, inline_typenames, inline_objectids) =
        Request::from_flags_byte(flags);

    // 3. protocol_version.
    let major = r.read_u16_be("protocol_version.major")?;
    let minor = r.read_u16_be("protocol_version.minor")?;
    let protocol_version = ProtocolVersion::new(major, minor);
    if !protocol_version.is_supported() {
        return Err(Error::UnsupportedVersion {
            found: 0,
            supported: 1,
        });
    }

    // 4. output_format.
    let output_format_tag = r.read_u8("output_format")?;
    let output_format = OutputFormat::from_tag_byte(output_format_tag)?;

    // 5. implicit_limit.
    let implicit_limit = r.read_i64_be("implicit_limit")?;

    // 6. modaliases.
    let modaliases_start = r.pos();
    let modaliases = read_modaliases(&mut r)?;
    let modaliases_span = r.span_from(modaliases_start);

    // 7. ConfigSpace descriptor.
    let config_span_start = r.pos();
    let wire_config_space_id: [u8; 16] = r.take(16, "config_space.id")?.try_into().unwrap();
    let descriptor = Bytes::copy_from_slice(r.read_len_prefixed("config_space.descriptor")?);
    let config_space_span = r.span_from(config_span_start);

    let (reader_id, _) = config_space.describe();
    let config_space = if reader_id == wire_config_space_id {
        config_space
    } else {
        config_space
            .rebuild(wire_config_space_id, descriptor, protocol_version)
            .map_err(Error::config_space)?
    };

    // 9. Session-config block. Zero-length bytes mean absent, per the
    // contract that an all-empty encode produces empty bytes and an
    // absent map is indistinguishable on the wire from a present-empty
    // one.
    let session_config_bytes = r.read_len_prefixed("session_config")?;
    let session_config = if session_config_bytes.is_empty() {
        None
    } else {
        Some(
            config_space
                .decode(session_config_bytes)
                .map_err(Error::config_space)?,
        )
    };

    // 12. Source body. Materialization is deferred until the language tag
    // is known at step 14.
    let source_body = r.read_len_prefixed("source.body")?;

    // 13. schema_version.
    let schema_version_bytes: [u8; 16] = r.take(16, "schema_version")?.try_into().unwrap();
    let schema_version = SchemaVersion::from(schema_version_bytes);

    // 14. input_language tag.
    let input_language_tag = r.read_u8("input_language")?;
    let input_language = InputLanguage::from_tag_byte(input_language_tag)?;
    let source = Source::decode(input_language, Bytes::copy_from_slice(source_body), query_text)?;

    // 15-16. role_name, branch_name.
    let role_name_bytes = r.read_len_prefixed("role_name")?;
    let role_name = std::str::from_utf8(role_name_bytes)
        .map(str::to_string)
        .map_err(|source| BinaryProtocolError::InvalidUtf8 {
            field: "role_name",
            source,
        })?;

    let branch_name_bytes = r.read_len_prefixed("branch_name")?;
    let branch_name = std::str::from_utf8(branch_name_bytes)
        .map(str::to_string)
        .map_err(|source| BinaryProtocolError::InvalidUtf8 {
            field: "branch_name",
            source,
        })?;

    // 17. Trailing cache key.
    let trailing = r.take(16, "trailing_cache_key")?;
    let trailing_key = CacheKey::from(<[u8; 16]>::try_from(trailing).unwrap());

    let request = Request::new(NewRequest {
        source,
        protocol_version,
        config_space,
        output_format,
        input_format,
        expect_one,
        implicit_limit,
        inline_typeids,
        inline_typenames,
        inline_objectids,
        role_name,
        branch_name,
    });
    let request = request.with_schema_version(schema_version);
    let request = request.with_modaliases(modaliases);
    let request = request.with_session_config(session_config);

    if verify {
        // Replay every captured field through the hash in the cache key's
        // own logical order, which departs from the wire-read order above
        // right where the source fingerprint and schema_version sit.
        let combined = combined_config_bytes(&request)?;

        let mut hasher = Blake2b128::new();
        hasher.update(&[version]);
        hasher.update(&[flags]);
        hasher.update(&major.to_be_bytes());
        hasher.update(&minor.to_be_bytes());
        hasher.update(&[output_format_tag]);
        hasher.update(&implicit_limit.to_be_bytes());
        hasher.update(modaliases_span);
        hasher.update(config_space_span);
        hasher.update(request.source().cache_key().as_bytes());
        hasher.update(session_config_bytes);
        hasher.update(&combined);
        hasher.update(&schema_version_bytes);
        hasher.update(request.input_language().name().as_bytes());
        hasher.update(role_name_bytes);
        hasher.update(branch_name_bytes);

        let digest = hasher.finalize();
        let mut computed = [0u8; 16];
        computed.copy_from_slice(&digest);
        let computed_key = CacheKey::from(computed);
        if computed_key != trailing_key {
            return Err(BinaryProtocolError::CacheKeyMismatch {
                stored: trailing_key,
                computed: computed_key,
            }
            .into());
        }
    }

    // Trust the writer for the cache key and the serialized form: the
    // combined database/system/session overlay that helped derive
    // `trailing_key` is not reconstructable from the buffer alone, so
    // re-deriving the key by re-serializing this request would silently
    // produce a different value whenever either scope was set at write
    // time. Installing the wire's own trailing bytes as the memoized cache
    // key (and the input buffer as the memoized serialized form) is what
    // keeps `deserialize(r.serialize()).cache_key() == r.cache_key()` true
    // unconditionally.
    let request = request.with_trusted_serialization(trailing_key, Bytes::copy_from_slice(buf));

    Ok(request)
}

fn read_modaliases(r: &mut Reader) -> Result<Option<ModAliases>, Error> {
    let count = r.read_i32_be("modaliases.count")?;
    if count < 0 {
        return Ok(None);
    }
    let mut map = ModAliases::new();
    for _ in 0..count {
        let key_present = r.read_u8("modaliases[].key.present")?;
        let key = match key_present {
            0 => None,
            1 => Some(r.read_cstring("modaliases[].key")?.to_string()),
            other => {
                return Err(BinaryProtocolError::InvalidPresenceTag {
                    field: "modaliases[].key.present",
                    found: other,
                }
                .into());
            }
        };
        let value = r.read_cstring("modaliases[].value")?.to_string();
        map.insert(ModAliasKey(key), value);
    }
    Ok(Some(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_space::fixture::MapConfigSpace;
    use crate::request::InputFormat;
    use bytes::Bytes as B;

    fn base_request() -> Request {
        Request::new(NewRequest {
            source: Source::sql("select 1"),
            protocol_version: ProtocolVersion::new(2, 1),
            config_space: Arc::new(MapConfigSpace::new([7u8; 16], Vec::new())),
            output_format: OutputFormat::Json,
            input_format: InputFormat::Binary,
            expect_one: true,
            implicit_limit: 100,
            inline_typeids: true,
            inline_typenames: false,
            inline_objectids: false,
            role_name: "edgedb".to_string(),
            branch_name: "main".to_string(),
        })
        .with_schema_version(SchemaVersion::new([9u8; 16]))
    }

    #[test]
    fn round_trips_a_plain_sql_request() {
        let original = base_request();
        let buf = original.serialize().unwrap();

        let restored = Request::deserialize(
            &buf,
            "select 1",
            Arc::new(MapConfigSpace::new([7u8; 16], Vec::new())),
        )
        .unwrap();

        assert_eq!(original.cache_key().unwrap(), restored.cache_key().unwrap());
        assert_eq!(restored.role_name(), "edgedb");
        assert_eq!(restored.branch_name(), "main");
        assert_eq!(restored.output_format(), OutputFormat::Json);
        assert!(restored.expect_one());
    }

    #[test]
    fn verified_round_trip_succeeds() {
        let original = base_request();
        let buf = original.serialize().unwrap();
        let restored = Request::deserialize_verified(
            &buf,
            "select 1",
            Arc::new(MapConfigSpace::new([7u8; 16], Vec::new())),
        )
        .unwrap();
        assert_eq!(original.cache_key().unwrap(), restored.cache_key().unwrap());
    }

    #[test]
    fn verified_round_trip_rejects_corruption() {
        let original = base_request();
        let buf = original.serialize().unwrap();
        let mut corrupted = buf.to_vec();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xff;

        let err = Request::deserialize_verified(
            &corrupted,
            "select 1",
            Arc::new(MapConfigSpace::new([7u8; 16], Vec::new())),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::BinaryProtocol(BinaryProtocolError::CacheKeyMismatch { .. })
        ));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let original = base_request();
        let mut buf = original.serialize().unwrap().to_vec();
        buf[0] = 99;
        let err = Request::deserialize(&buf, "select 1", Arc::new(MapConfigSpace::new([7u8; 16], Vec::new())))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedVersion { found: 99, supported: 1 }
        ));
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let original = base_request();
        let buf = original.serialize().unwrap();
        let truncated = &buf[..buf.len() / 2];
        let err = Request::deserialize(truncated, "select 1", Arc::new(MapConfigSpace::new([7u8; 16], Vec::new())))
            .unwrap_err();
        assert!(matches!(err, Error::BinaryProtocol(BinaryProtocolError::Truncated { .. })));
    }

    #[test]
    fn unrecognized_config_space_id_triggers_rebuild() {
        let mut request = base_request();
        request = request.with_session_config(None);
        let buf = request.serialize().unwrap();

        // A reader with a *different* descriptor id still decodes the
        // record correctly: `rebuild` hands it a fresh `ConfigSpace` built
        // from the embedded id and descriptor rather than failing closed.
        let reader_space = Arc::new(MapConfigSpace::new([200u8; 16], B::new()));
        let restored = Request::deserialize(&buf, "select 1", reader_space).unwrap();
        assert_eq!(restored.config_space_id(), [7u8; 16]);
    }
}
