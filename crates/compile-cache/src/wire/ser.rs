//! Serialization of a [`crate::request::Request`] to its versioned binary
//! form, and the running-hash derivation of its cache key in the same pass.
//!
//! Field order here follows the wire format's fixed step sequence exactly;
//! don't reorder these calls without re-deriving the cache key every caller
//! already depends on.

use bytes::Bytes;

use crate::config_space::ConfigMap;
use crate::error::Error;
use crate::ids::CacheKey;
use crate::request::{combined_config_bytes, Request};
use crate::wire::hash::Writer;

pub(crate) fn serialize(request: &Request) -> Result<(Bytes, CacheKey), Error> {
    let schema_version = request
        .schema_version()
        .ok_or_else(|| Error::invalid_state("schema_version", "serialization"))?;

    let mut w = Writer::new();

    // 1. Version byte.
    w.write_u8_and_hash(Request::WIRE_VERSION);

    // 2. Flags byte.
    w.write_u8_and_hash(request.flags_byte());

    // 3. protocol_version.
    w.write_u16_be_and_hash(request.protocol_version().major);
    w.write_u16_be_and_hash(request.protocol_version().minor);

    // 4. output_format.
    w.write_u8_and_hash(request.output_format().tag_byte());

    // 5. implicit_limit.
    w.write_i64_be_and_hash(request.implicit_limit());

    // 6. modaliases.
    write_modaliases(&mut w, request);

    // 7. ConfigSpace descriptor.
    let (config_space_id, descriptor) = request.config_space().describe();
    w.write_and_hash(&config_space_id);
    w.write_len_prefixed_and_hash(&descriptor);

    // 8. Hash injection of the source fingerprint. Never written: the
    // source body carries its own bytes later, at step 12.
    w.hash_only(request.source().cache_key().as_bytes());

    // 9. Session-config block: written as length-prefixed bytes, hashed as
    // the payload alone (the length prefix is not part of the key).
    write_session_config(&mut w, request)?;

    // 10. Combined-config hash input. Hashed only; database/system settings
    // never reach the wire, only their effect on this overlay.
    let combined = combined_config_bytes(request)?;
    w.hash_only(&combined);

    // 11. schema_version, hashed here for ordering; written at step 13.
    w.hash_only(schema_version.as_bytes());

    // 12. source body. Written, not hashed: its fingerprint already
    // participated at step 8.
    w.write_len_prefixed_unhashed(&request.source().serialize());

    // 13. schema_version, written (already hashed at step 11).
    w.write_only(schema_version.as_bytes());

    // 14. input_language tag, written only; the language's name is hashed
    // in its place.
    w.write_only(&[request.input_language().tag_byte()]);
    w.hash_only(request.input_language().name().as_bytes());

    // 15-16. role_name, branch_name.
    w.write_len_prefixed_hash_payload_only(request.role_name().as_bytes());
    w.write_len_prefixed_hash_payload_only(request.branch_name().as_bytes());

    // 17. Trailing cache key.
    Ok(w.finish())
}

fn write_session_config(w: &mut Writer, request: &Request) -> Result<(), Error> {
    let empty = ConfigMap::new();
    let session = request.session_config().unwrap_or(&empty);
    let encoded = request
        .config_space()
        .encode_configs(&[session])
        .map_err(Error::config_space)?;
    w.write_len_prefixed_hash_payload_only(&encoded);
    Ok(())
}

fn write_modaliases(w: &mut Writer, request: &Request) {
    match request.modaliases() {
        None => {
            w.write_i32_be_and_hash(-1);
        }
        Some(aliases) => {
            w.write_i32_be_and_hash(aliases.len() as i32);
            // `ModAliasKey`'s `Ord` puts the `None` key first and sorts the
            // rest lexicographically, so iterating the `BTreeMap` in order
            // is already the canonical order; no explicit sort needed.
            for (key, value) in aliases.iter() {
                match &key.0 {
                    None => w.write_u8_and_hash(0),
                    Some(name) => {
                        w.write_u8_and_hash(1);
                        w.write_cstring_and_hash(name.as_bytes());
                    }
                }
                w.write_cstring_and_hash(value.as_bytes());
            }
        }
    }
}
