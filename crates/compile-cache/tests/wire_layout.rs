//! Known-answer test for the wire format's fixed field order: hand-encodes
//! a minimal request byte by byte, independent of `wire::ser`, so a field
//! reordering or a hash/write bucket regression changes this test's own
//! expectations rather than silently agreeing with whatever the serializer
//! currently does.

use std::sync::Arc;

use bytes::Bytes;
use compile_cache::fixture::MapConfigSpace;
use compile_cache::{
    InputFormat, NewRequest, OutputFormat, ProtocolVersion, Request, SchemaVersion, Source,
};
use pretty_assertions::assert_eq;

fn minimal_request() -> Request {
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
fn minimal_request_byte_layout_matches_fixed_field_order() {
    let request = minimal_request();
    let buf = request.serialize().unwrap();
    let cache_key = request.cache_key().unwrap();

    let mut expected = Vec::new();
    expected.push(1u8); // version
    expected.push(0u8); // flags: binary input, no expect_one, no inline_*
    expected.extend_from_slice(&3u16.to_be_bytes()); // protocol_version.major
    expected.extend_from_slice(&0u16.to_be_bytes()); // protocol_version.minor
    expected.push(b'b'); // output_format: Binary
    expected.extend_from_slice(&0i64.to_be_bytes()); // implicit_limit
    expected.extend_from_slice(&(-1i32).to_be_bytes()); // modaliases: absent
    expected.extend_from_slice(&[0u8; 16]); // config_space id
    expected.extend_from_slice(&0i32.to_be_bytes()); // config_space descriptor: empty
    expected.extend_from_slice(&0i32.to_be_bytes()); // session_config: absent (zero-length)
    expected.extend_from_slice(&1i32.to_be_bytes()); // source body length
    expected.extend_from_slice(b"\x00"); // source body payload
    expected.extend_from_slice(&[2u8; 16]); // schema_version
    expected.push(b'E'); // input_language: Edgeql
    expected.extend_from_slice(&5i32.to_be_bytes()); // role_name length
    expected.extend_from_slice(b"admin");
    expected.extend_from_slice(&4i32.to_be_bytes()); // branch_name length
    expected.extend_from_slice(b"main");
    expected.extend_from_slice(cache_key.as_bytes()); // trailing cache key

    assert_eq!(expected.len(), 98);
    assert_eq!(buf.as_ref(), expected.as_slice());
    assert_eq!(buf[0], 1u8);
    assert_eq!(&buf[buf.len() - 16..], cache_key.as_bytes().as_slice());
}

#[test]
fn minimal_request_byte_layout_snapshot() {
    let request = minimal_request();
    let buf = request.serialize().unwrap();
    insta::assert_snapshot!(hex::encode(&buf));
}
