//! The versioned binary wire format: a running-hash writer/reader pair
//! (`hash`), the serializer (`ser`), and the deserializer (`de`).

pub mod hash;
pub(crate) mod de;
pub(crate) mod ser;
