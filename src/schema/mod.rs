//! self-describing schema object codec
//!
//! encoded form: 4-byte magic, the type tag as a CBOR text string, then
//! the CBOR payload. the tag sits at the front so [`decode_type`] can
//! classify a blob from a bounded prefix read. encoding is deterministic:
//! the same object always produces the same bytes, hence the same ref.

mod objects;

pub use objects::{DirEntry, InlineList, List, Object};
pub use objects::{TYPE_DIR_ENTRY, TYPE_INLINE_LIST, TYPE_LIST};

use std::io::{Read, Write};

use crate::error::IoResultExt;
use crate::{Error, Result};

/// marks a blob as a schema object
const SCHEMA_MAGIC: [u8; 4] = *b"cas\0";

/// longest accepted type tag; bounds the prefix read in [`decode_type`]
const MAX_TYPE_LEN: u64 = 64;

/// registered type tags
pub fn registered_types() -> &'static [&'static str] {
    &[TYPE_DIR_ENTRY, TYPE_INLINE_LIST, TYPE_LIST]
}

/// true if the tag names a registered object type
pub fn is_registered(tag: &str) -> bool {
    registered_types().contains(&tag)
}

/// encode an object into its canonical byte form
pub fn encode<W: Write>(w: &mut W, obj: &Object) -> Result<()> {
    w.write_all(&SCHEMA_MAGIC).with_path("<schema>")?;
    ciborium::into_writer(&obj.type_tag(), &mut *w)?;
    ciborium::into_writer(obj, w)?;
    Ok(())
}

/// read only the framing header and return the type tag
///
/// anything that is not schema framing reads as [`Error::NotSchema`];
/// the payload is not touched.
pub fn decode_type<R: Read>(r: &mut R) -> Result<String> {
    let mut magic = [0u8; 4];
    if r.read_exact(&mut magic).is_err() || magic != SCHEMA_MAGIC {
        return Err(Error::NotSchema);
    }
    // a valid tag is a short CBOR text string; cap the read so a
    // corrupted length header cannot drag in the payload
    let bounded = r.take(MAX_TYPE_LEN + 2);
    ciborium::from_reader(bounded).map_err(|_| Error::NotSchema)
}

/// decode a full schema object
pub fn decode<R: Read>(r: &mut R) -> Result<Object> {
    let tag = decode_type(r)?;
    decode_payload(&tag, r)
}

/// decode the payload of an already-classified blob
pub fn decode_payload<R: Read>(tag: &str, r: R) -> Result<Object> {
    match tag {
        TYPE_DIR_ENTRY => Ok(Object::DirEntry(ciborium::from_reader(r)?)),
        TYPE_INLINE_LIST => Ok(Object::InlineList(ciborium::from_reader(r)?)),
        TYPE_LIST => Ok(Object::List(ciborium::from_reader(r)?)),
        _ => Err(Error::UnknownType(tag.to_string())),
    }
}
