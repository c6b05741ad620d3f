//! Content-addressed descriptor for a query to be compiled.
//!
//! A [`Request`] bundles every input that can change what the query
//! compiler produces — source text, protocol and schema versions, output
//! shape, session/database/system configuration, and module aliases —
//! behind a single 128-bit [`CacheKey`] and a versioned binary wire format,
//! so a compiled-query cache and a wire protocol can both be built on top
//! of one value type instead of two.

pub mod config_space;
pub mod error;
mod ids;
pub mod request;
pub mod source;
mod wire;

pub use config_space::{ConfigMap, ConfigScope, ConfigSource, ConfigSpace, ConfigValue, OpaqueValue};
pub use error::{BinaryProtocolError, Error};
pub use ids::{CacheKey, SchemaVersion};
pub use request::{
    InputFormat, ModAliasKey, ModAliases, NewRequest, OutputFormat, ProtocolVersion, Request,
    RequestBuilder,
};
pub use source::{InputLanguage, Source, SqlParamTypes};
pub use wire::hash::blake2b128;

#[cfg(any(test, feature = "test-support"))]
pub use config_space::fixture;
