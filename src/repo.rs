use std::io::{self, Read};

use crate::config::{Config, DEFAULT_PIN};
use crate::context::Context;
use crate::error::{IoResultExt, Result};
use crate::hash::hash_bytes;
use crate::schema::{self, Object};
use crate::storage::{
    BlobIndexer, BlobIter, BlobReader, BlobWrite, PinIter, SchemaIter, Storage,
};
use crate::store::LocalStore;
use crate::types::{Ref, SizedRef};
use crate::Error;

/// content-addressable repository
///
/// thin coordinator over a [`Storage`] backend. adds the ref policy the
/// backends don't carry: empty blobs are generated rather than stored,
/// known blobs are deduplicated before any bytes are read, and empty pin
/// names resolve to the configured default.
pub struct Repo {
    st: Box<dyn Storage>,
    pin_default: String,
}

impl Repo {
    /// open a local repository per the config
    pub fn open(config: &Config) -> Result<Self> {
        let st = LocalStore::open(&config.dir, config.create)?;
        Ok(Self::with_storage(
            Box::new(st),
            config.pin_default.clone(),
        ))
    }

    /// wrap an arbitrary storage backend
    pub fn with_storage(st: Box<dyn Storage>, pin_default: impl Into<String>) -> Self {
        let mut pin_default = pin_default.into();
        if pin_default.is_empty() {
            pin_default = DEFAULT_PIN.to_string();
        }
        Self { st, pin_default }
    }

    /// the underlying storage
    pub fn storage(&self) -> &dyn Storage {
        self.st.as_ref()
    }

    fn pin_name<'a>(&'a self, name: &'a str) -> &'a str {
        if name.is_empty() {
            &self.pin_default
        } else {
            name
        }
    }

    fn indexer(&self) -> Result<&dyn BlobIndexer> {
        self.st
            .as_indexer()
            .ok_or(Error::NotSupported("schema indexing"))
    }

    pub fn stat_blob(&self, ctx: &Context, ref_: &Ref) -> Result<u64> {
        if ref_.is_empty() {
            return Ok(0);
        }
        self.st.stat_blob(ctx, ref_)
    }

    pub fn fetch_blob(&self, ctx: &Context, ref_: &Ref) -> Result<(BlobReader, u64)> {
        if ref_.is_empty() {
            // empty blobs are generated, never read from disk
            return Ok((Box::new(io::empty()), 0));
        }
        self.st.fetch_blob(ctx, ref_)
    }

    pub fn begin_blob(&self, ctx: &Context) -> Result<Box<dyn BlobWrite>> {
        self.st.begin_blob(ctx)
    }

    /// store a byte stream, verifying it against `exp` when non-zero
    ///
    /// an empty expected ref asserts the stream is empty and stores
    /// nothing; a known expected ref short-circuits without reading.
    pub fn store_blob(
        &self,
        ctx: &Context,
        exp: &Ref,
        src: &mut dyn Read,
    ) -> Result<SizedRef> {
        if exp.is_empty() {
            let mut probe = [0u8; 1];
            let n = src.read(&mut probe).with_path("<source>")?;
            if n != 0 {
                return Err(Error::RefMismatch {
                    exp: *exp,
                    got: Ref::ZERO,
                });
            }
            return Ok(SizedRef::new(Ref::EMPTY, 0));
        }
        if !exp.is_zero() {
            if let Ok(size) = self.stat_blob(ctx, exp) {
                return Ok(SizedRef::new(*exp, size));
            }
        }
        self.st.store_blob(ctx, exp, src)
    }

    /// encode and store a schema object
    pub fn store_schema(&self, ctx: &Context, obj: &Object) -> Result<SizedRef> {
        let mut buf = Vec::new();
        schema::encode(&mut buf, obj)?;
        let exp = hash_bytes(&buf);
        self.store_blob(ctx, &exp.ref_, &mut &buf[..])
    }

    /// fetch and decode a schema object
    pub fn fetch_object(&self, ctx: &Context, ref_: &Ref) -> Result<Object> {
        let (mut r, _size) = self.fetch_blob(ctx, ref_)?;
        schema::decode(&mut r)
    }

    pub fn iterate_blobs(&self, ctx: &Context) -> BlobIter<'_> {
        self.st.iterate_blobs(ctx)
    }

    pub fn set_pin(&self, ctx: &Context, name: &str, ref_: &Ref) -> Result<()> {
        self.st.set_pin(ctx, self.pin_name(name), ref_)
    }

    pub fn get_pin(&self, ctx: &Context, name: &str) -> Result<Ref> {
        self.st.get_pin(ctx, self.pin_name(name))
    }

    pub fn delete_pin(&self, ctx: &Context, name: &str) -> Result<()> {
        self.st.delete_pin(ctx, self.pin_name(name))
    }

    pub fn iterate_pins(&self, ctx: &Context) -> PinIter<'_> {
        self.st.iterate_pins(ctx)
    }

    /// iterate schema blobs; requires the indexing capability
    pub fn iterate_schema(&self, ctx: &Context, types: &[&str]) -> Result<SchemaIter<'_>> {
        Ok(self.indexer()?.iterate_schema(ctx, types))
    }

    /// rebuild the schema-type index; requires the indexing capability
    pub fn reindex_schema(&self, ctx: &Context, force: bool) -> Result<()> {
        self.indexer()?.reindex_schema(ctx, force)
    }

    /// fetch a schema blob; requires the indexing capability
    pub fn fetch_schema(&self, ctx: &Context, ref_: &Ref) -> Result<(BlobReader, u64)> {
        if ref_.is_empty() {
            return Err(Error::NotSchema);
        }
        self.indexer()?.fetch_schema(ctx, ref_)
    }
}
