use std::io::Read;
use std::path::Path;

use crate::context::Context;
use crate::error::{IoResultExt, Result};
use crate::types::{Pin, Ref, SchemaRef, SizedRef};

/// copy buffer size shared by blob writes and reads
pub(crate) const COPY_BUF: usize = 64 * 1024;

/// streaming blob sink
///
/// state machine: writes are accepted until `complete`, which finalizes
/// the hash and is idempotent. exactly one of `commit`/`close` takes
/// effect; `write` after `complete` is [`crate::Error::BlobCompleted`],
/// `commit` after `close` is [`crate::Error::BlobDiscarded`].
pub trait BlobWrite {
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// bytes written so far
    fn size(&self) -> u64;

    /// finalize the hash and return the sized ref
    fn complete(&mut self) -> Result<SizedRef>;

    /// persist the blob under its completed ref
    fn commit(&mut self) -> Result<()>;

    /// discard without committing; no-op after a successful commit
    fn close(&mut self) -> Result<()>;

    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            buf = &buf[n..];
        }
        Ok(())
    }
}

/// copy a reader into a blob sink, returning the number of bytes copied
pub fn copy_blob<R: Read + ?Sized>(src: &mut R, dst: &mut dyn BlobWrite) -> Result<u64> {
    let mut buf = [0u8; COPY_BUF];
    let mut total = 0u64;
    loop {
        let n = src.read(&mut buf).with_path("<source>")?;
        if n == 0 {
            return Ok(total);
        }
        dst.write_all(&buf[..n])?;
        total += n as u64;
    }
}

pub type BlobReader = Box<dyn Read + Send>;
pub type BlobIter<'a> = Box<dyn Iterator<Item = Result<SizedRef>> + 'a>;
pub type PinIter<'a> = Box<dyn Iterator<Item = Result<Pin>> + 'a>;
pub type SchemaIter<'a> = Box<dyn Iterator<Item = Result<SchemaRef>> + 'a>;

/// the storage contract required by the repository facade
///
/// iterators yield items in ascending canonical-ref (or pin-name) order,
/// stop after yielding an error, and apply the invalid-blob skip.
pub trait Storage {
    fn stat_blob(&self, ctx: &Context, ref_: &Ref) -> Result<u64>;

    fn fetch_blob(&self, ctx: &Context, ref_: &Ref) -> Result<(BlobReader, u64)>;

    fn begin_blob(&self, ctx: &Context) -> Result<Box<dyn BlobWrite>>;

    fn store_blob(&self, ctx: &Context, exp: &Ref, src: &mut dyn Read) -> Result<SizedRef>;

    fn iterate_blobs(&self, ctx: &Context) -> BlobIter<'_>;

    fn set_pin(&self, ctx: &Context, name: &str, ref_: &Ref) -> Result<()>;

    fn get_pin(&self, ctx: &Context, name: &str) -> Result<Ref>;

    fn delete_pin(&self, ctx: &Context, name: &str) -> Result<()>;

    fn iterate_pins(&self, ctx: &Context) -> PinIter<'_>;

    /// schema-index capability, if this storage has one
    fn as_indexer(&self) -> Option<&dyn BlobIndexer> {
        None
    }

    /// copy-on-write file import capability, if this storage has one
    fn as_importer(&self) -> Option<&dyn FileImporter> {
        None
    }
}

/// type-indexed iteration over schema blobs
pub trait BlobIndexer {
    /// iterate schema blobs, optionally restricted to the given type tags
    fn iterate_schema(&self, ctx: &Context, types: &[&str]) -> SchemaIter<'_>;

    /// drive the index to completion, re-deriving cached types when `force`
    fn reindex_schema(&self, ctx: &Context, force: bool) -> Result<()>;

    /// fetch a blob known (or cached) to be a schema object
    fn fetch_schema(&self, ctx: &Context, ref_: &Ref) -> Result<(BlobReader, u64)>;
}

/// zero-copy import of local files
pub trait FileImporter {
    fn import_file(&self, ctx: &Context, path: &Path) -> Result<SizedRef>;
}
