use std::collections::{HashSet, VecDeque};
use std::fs::{self, File, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::context::Context;
use crate::error::{IoResultExt, Result};
use crate::schema;
use crate::storage::{BlobIndexer, BlobReader, SchemaIter, Storage};
use crate::store::tmpfile::RO_PERM;
use crate::store::LocalStore;
use crate::types::{Ref, SchemaRef};
use crate::xattrs::{self, XATTR_SCHEMA_TYPE};
use crate::Error;

impl BlobIndexer for LocalStore {
    fn iterate_schema(&self, ctx: &Context, types: &[&str]) -> SchemaIter<'_> {
        let filter = if types.is_empty() {
            None
        } else {
            Some(types.iter().map(|t| t.to_string()).collect())
        };
        Box::new(SchemaIterator::new(self, ctx.clone(), filter, false))
    }

    fn reindex_schema(&self, ctx: &Context, force: bool) -> Result<()> {
        for sr in SchemaIterator::new(self, ctx.clone(), None, force) {
            sr?;
        }
        Ok(())
    }

    fn fetch_schema(&self, ctx: &Context, ref_: &Ref) -> Result<(BlobReader, u64)> {
        if ref_.is_zero() {
            return Err(Error::InvalidRef);
        }
        // a cached empty tag is a definite "not a schema blob"; a missing
        // cache is resolved by fetching
        if let Ok(Some(typ)) = xattrs::get_string(&self.blob_path(ref_), XATTR_SCHEMA_TYPE) {
            if typ.is_empty() {
                return Err(Error::NotSchema);
            }
        }
        self.fetch_blob(ctx, ref_)
    }
}

/// schema blobs in ascending ref order, type-filtered
///
/// each blob's type tag comes from the `cas.schema.type` xattr when
/// cached, and is derived from the framing header and backfilled
/// otherwise. non-schema blobs (empty tag) are skipped.
pub(crate) struct SchemaIterator<'a> {
    store: &'a LocalStore,
    ctx: Context,
    filter: Option<HashSet<String>>,
    force: bool,
    names: Option<VecDeque<String>>,
    failed: bool,
}

impl<'a> SchemaIterator<'a> {
    pub fn new(
        store: &'a LocalStore,
        ctx: Context,
        filter: Option<HashSet<String>>,
        force: bool,
    ) -> Self {
        Self {
            store,
            ctx,
            filter,
            force,
            names: None,
            failed: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let dir = self.store.blobs_dir();
        let rd = match fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.names = Some(VecDeque::new());
                return Ok(());
            }
            Err(e) => {
                return Err(Error::Io {
                    path: dir,
                    source: e,
                })
            }
        };
        let mut names = Vec::new();
        for entry in rd {
            let entry = entry.with_path(&dir)?;
            if !entry.metadata().with_path(entry.path())?.is_file() {
                continue;
            }
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        self.names = Some(names.into());
        Ok(())
    }

    /// resolve the type tag for one blob file; empty means "not schema"
    fn blob_type(&self, name: &str) -> Result<String> {
        let path = self.store.blobs_dir().join(name);
        if !self.force {
            match xattrs::get_string(&path, XATTR_SCHEMA_TYPE) {
                Ok(Some(typ)) => return Ok(typ),
                Ok(None) => {}
                // unreadable cache degrades to re-derivation
                Err(e) => tracing::debug!(blob = name, error = %e, "schema type cache unreadable"),
            }
        }
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => return Err(Error::Io { path, source: e }),
        };
        let typ = match schema::decode_type(&mut file) {
            Ok(typ) => typ,
            Err(Error::NotSchema) => String::new(),
            Err(e) => return Err(e),
        };
        drop(file);
        if let Err(e) = cache_type(&path, &typ) {
            tracing::warn!(blob = name, error = %e, "schema type not cached, will re-derive");
        }
        Ok(typ)
    }

    fn advance(&mut self) -> Result<Option<SchemaRef>> {
        if self.names.is_none() {
            self.fill()?;
        }
        loop {
            self.ctx.check()?;
            let Some(name) = self.names.as_mut().unwrap().pop_front() else {
                return Ok(None);
            };
            let typ = self.blob_type(&name)?;
            if typ.is_empty() {
                continue;
            }
            if let Some(filter) = &self.filter {
                if !filter.contains(&typ) {
                    continue;
                }
            }
            let ref_ = Ref::parse(&name)?;
            let meta = match fs::metadata(self.store.blobs_dir().join(&name)) {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(Error::Io {
                        path: self.store.blobs_dir().join(&name),
                        source: e,
                    })
                }
            };
            if self.store.remove_if_invalid(meta.len(), &ref_)? {
                continue;
            }
            return Ok(Some(SchemaRef {
                ref_,
                size: meta.len(),
                typ,
            }));
        }
    }
}

impl Iterator for SchemaIterator<'_> {
    type Item = Result<SchemaRef>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.advance() {
            Ok(Some(sr)) => Some(Ok(sr)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// write the derived tag back onto the blob
///
/// committed blobs are read-only, so the file flips to writable for the
/// duration of the xattr update and back afterwards.
fn cache_type(path: &Path, typ: &str) -> Result<()> {
    fs::set_permissions(path, Permissions::from_mode(0o644)).with_path(path)?;
    let res = xattrs::set(path, XATTR_SCHEMA_TYPE, typ.as_bytes());
    let _ = fs::set_permissions(path, Permissions::from_mode(RO_PERM));
    res
}
