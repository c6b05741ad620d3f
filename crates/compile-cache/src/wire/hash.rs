//! Blake2b-128 hashing and the running-hash writer the serializer and
//! deserializer both build on.
//!
//! Several fields of the wire format are written but not hashed, hashed but
//! not written, or written in one shape (a length-prefixed buffer) while
//! only part of that shape feeds the hash. [`Writer`] gives each field its
//! own call (`write_only` / `hash_only` / `write_and_hash`) so the
//! serializer reads as a literal transcription of those per-field rules
//! rather than a single byte-for-byte buffer that's hashed wholesale
//! afterwards.

use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use bytes::{BufMut, Bytes, BytesMut};

use crate::ids::CacheKey;

type Blake2b128 = Blake2b<U16>;

/// Digest `bytes` with Blake2b, truncated to 128 bits.
pub fn blake2b128(bytes: &[u8]) -> [u8; 16] {
    let mut hasher = Blake2b128::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

/// Accumulates the serialized buffer and its running cache-key hash in one
/// pass, since almost every field participates in at least one of the two
/// and most participate in both.
pub(crate) struct Writer {
    buf: BytesMut,
    hasher: Blake2b128,
}

impl Writer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            hasher: Blake2b128::new(),
        }
    }

    pub fn write_only(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn hash_only(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn write_and_hash(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
        self.hasher.update(bytes);
    }

    pub fn write_u8_and_hash(&mut self, byte: u8) {
        self.write_and_hash(&[byte]);
    }

    pub fn write_u16_be_and_hash(&mut self, v: u16) {
        self.write_and_hash(&v.to_be_bytes());
    }

    pub fn write_i64_be_and_hash(&mut self, v: i64) {
        self.write_and_hash(&v.to_be_bytes());
    }

    pub fn write_i32_be_and_hash(&mut self, v: i32) {
        self.write_and_hash(&v.to_be_bytes());
    }

    /// Writes a NUL-terminated C-string (the bytes followed by a trailing
    /// `0x00`), hashing the same span. Used for modalias keys and values.
    pub fn write_cstring_and_hash(&mut self, bytes: &[u8]) {
        self.write_and_hash(bytes);
        self.write_and_hash(&[0u8]);
    }

    /// Writes `i32` length prefix + payload, hashing both (used by the
    /// `ConfigSpace` descriptor, whose entire written range — prefix
    /// included — participates in the cache key).
    pub fn write_len_prefixed_and_hash(&mut self, bytes: &[u8]) {
        self.write_and_hash(&(bytes.len() as i32).to_be_bytes());
        self.write_and_hash(bytes);
    }

    /// Writes an `i32` length prefix + payload, but hashes only the payload
    /// (used by `role_name`, `branch_name`, and the session-config block,
    /// whose cache-key contribution is specified as the raw bytes with no
    /// length prefix).
    pub fn write_len_prefixed_hash_payload_only(&mut self, bytes: &[u8]) {
        self.write_only(&(bytes.len() as i32).to_be_bytes());
        self.hash_only(bytes);
        self.write_only(bytes);
    }

    /// Writes an `i32` length prefix + payload, hashing neither (the
    /// source's own serialized body: its cache-key contribution is the
    /// source's fingerprint, hashed separately, not these raw bytes).
    pub fn write_len_prefixed_unhashed(&mut self, bytes: &[u8]) {
        self.write_only(&(bytes.len() as i32).to_be_bytes());
        self.write_only(bytes);
    }

    /// Finalizes the running hash as the trailing cache key, appends it to
    /// the buffer (write-only: the key is never itself hashed), and returns
    /// both.
    pub fn finish(mut self) -> (Bytes, CacheKey) {
        let digest = self.hasher.finalize();
        let mut key_bytes = [0u8; 16];
        key_bytes.copy_from_slice(&digest);
        self.buf.put_slice(&key_bytes);
        (self.buf.freeze(), CacheKey::from(key_bytes))
    }
}
