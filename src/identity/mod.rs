//! Identity resolution: raw route entities to canonical owner keys.

mod entity;
mod resolver;

pub use entity::{
    decode_encoded_key, EntityRef, IdentityError, OwnerKey, Result, KEY_PREFIX_LEN,
    OWNER_KEY_HEX_LEN,
};
pub use resolver::{
    EmptyPrefixDirectory, HttpNameService, IdentityResolver, NameService, NameServiceError,
    PrefixDirectory,
};
