//! filesystem import pipeline
//!
//! turns live files and directory trees into content-addressed blobs and
//! a balanced Merkle-DAG of [`DirEntry`] pages. every entry point comes
//! in two modes: *store* persists blob contents, *index* only hashes
//! them (directory pages are stored in both modes, so an indexed tree is
//! walkable).

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::DEFAULT_DIR;
use crate::context::Context;
use crate::error::{IoResultExt, Result};
use crate::hash::BlobHasher;
use crate::repo::Repo;
use crate::schema::{DirEntry, InlineList, List, Object, TYPE_DIR_ENTRY};
use crate::storage::{copy_blob, BlobWrite};
use crate::types::{Ref, SizedRef};
use crate::xattrs;
use crate::Error;

/// maximum entries per directory page
#[cfg(not(test))]
pub const DIR_FANOUT: usize = 1024;
/// smaller fan-out under test so pagination is exercised
#[cfg(test)]
pub const DIR_FANOUT: usize = 16;

/// a file to be imported
///
/// `open` snapshots the file's metadata and may report a precomputed ref
/// (zero when unknown); `set_ref` records a freshly computed ref back on
/// the source for reuse. `local_path` is a capability probe: descriptors
/// backed by a local path unlock the reflink fast path.
pub trait FileDesc {
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<(Box<dyn Read + Send>, SizedRef)>;

    fn set_ref(&mut self, sr: &SizedRef);

    fn local_path(&self) -> Option<&Path> {
        None
    }
}

/// file descriptor backed by a local path
///
/// the precomputed ref comes from the `cas.ref`/`cas.size` xattr cache
/// and is trusted only while the file size is unchanged; `set_ref`
/// refreshes that cache.
pub struct LocalFile {
    path: PathBuf,
    name: String,
    size: Option<u64>,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            name,
            size: None,
        }
    }
}

impl FileDesc for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<(Box<dyn Read + Send>, SizedRef)> {
        let file = fs::File::open(&self.path).with_path(&self.path)?;
        let meta = file.metadata().with_path(&self.path)?;
        self.size = Some(meta.len());

        let mut sr = SizedRef::new(Ref::ZERO, meta.len());
        if let Some(cached) = xattrs::cached_ref(&self.path, meta.len()) {
            sr = cached;
        }
        Ok((Box::new(file), sr))
    }

    fn set_ref(&mut self, sr: &SizedRef) {
        // a size disagreement is the only rejection possible here; any
        // later change is caught by the size check at read time
        if self.size != Some(sr.size) {
            return;
        }
        if let Err(e) = xattrs::save_ref(&self.path, sr.size, &sr.ref_) {
            tracing::debug!(path = %self.path.display(), error = %e, "ref cache not saved");
        }
    }

    fn local_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

impl Repo {
    /// store a file's contents and its [`DirEntry`] schema blob
    pub fn store_file(&self, ctx: &Context, fd: &mut dyn FileDesc) -> Result<SizedRef> {
        let entry = self.store_as_file(ctx, fd, false)?;
        self.store_schema(ctx, &Object::DirEntry(entry))
    }

    /// like [`Repo::store_file`] but without persisting the contents
    pub fn index_file(&self, ctx: &Context, fd: &mut dyn FileDesc) -> Result<SizedRef> {
        let entry = self.store_as_file(ctx, fd, true)?;
        self.store_schema(ctx, &Object::DirEntry(entry))
    }

    /// store a path, dispatching on file vs directory
    pub fn store_path(&self, ctx: &Context, path: &Path) -> Result<SizedRef> {
        self.import_path(ctx, path, false)
    }

    /// index a path, dispatching on file vs directory
    pub fn index_path(&self, ctx: &Context, path: &Path) -> Result<SizedRef> {
        self.import_path(ctx, path, true)
    }

    fn import_path(&self, ctx: &Context, path: &Path, index_only: bool) -> Result<SizedRef> {
        let meta = fs::metadata(path).with_path(path)?;
        if meta.is_dir() {
            let (sr, _entry) = self.store_dir(ctx, path, index_only)?;
            return Ok(sr);
        }
        let mut fd = LocalFile::new(path);
        let entry = self.store_as_file(ctx, &mut fd, index_only)?;
        Ok(SizedRef::new(entry.ref_, entry.size))
    }

    fn store_as_file(
        &self,
        ctx: &Context,
        fd: &mut dyn FileDesc,
        index_only: bool,
    ) -> Result<DirEntry> {
        ctx.check()?;
        let (mut src, snap) = fd.open()?;
        let name = fd.name().to_string();

        if !snap.ref_.is_zero() {
            let entry = DirEntry {
                ref_: snap.ref_,
                size: snap.size,
                count: 0,
                name: name.clone(),
            };
            if index_only {
                // indexing trusts the precomputed ref outright
                return Ok(entry);
            }
            // storing only skips work if the blob is already present
            if self.stat_blob(ctx, &snap.ref_).is_ok() {
                return Ok(entry);
            }
        }

        let mut fw: Box<dyn BlobWrite> = if index_only {
            Box::new(BlobHasher::new())
        } else {
            if let Some(path) = fd.local_path().map(Path::to_path_buf) {
                if let Some(importer) = self.storage().as_importer() {
                    // clone the file if the filesystem can; any failure
                    // falls back to the ordinary copy
                    if let Ok(sr) = importer.import_file(ctx, &path) {
                        fd.set_ref(&sr);
                        return Ok(DirEntry {
                            ref_: sr.ref_,
                            size: sr.size,
                            count: 0,
                            name,
                        });
                    }
                }
            }
            self.begin_blob(ctx)?
        };

        let res = copy_verify(&mut src, fw.as_mut(), &snap, fd.local_path(), &name);
        let sr = match res {
            Ok(sr) => sr,
            Err(e) => {
                let _ = fw.close();
                return Err(e);
            }
        };
        fd.set_ref(&sr);
        if sr.ref_.is_empty() {
            // empty blobs are generated on fetch, never stored
            fw.close()?;
        } else {
            fw.commit()?;
        }
        Ok(DirEntry {
            ref_: sr.ref_,
            size: sr.size,
            count: 0,
            name,
        })
    }

    /// build the Merkle-DAG for a directory tree
    ///
    /// entries are collected recursively (skipping the repository's own
    /// directory), sorted by name, and packed into pages of
    /// [`DIR_FANOUT`], so equal trees hash identically no matter how the
    /// filesystem enumerates them.
    fn store_dir(
        &self,
        ctx: &Context,
        dir: &Path,
        index_only: bool,
    ) -> Result<(SizedRef, DirEntry)> {
        let mut base: Vec<DirEntry> = Vec::new();
        for entry in fs::read_dir(dir).with_path(dir)? {
            ctx.check()?;
            let entry = entry.with_path(dir)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == DEFAULT_DIR {
                continue;
            }
            let path = entry.path();
            if entry.file_type().with_path(&path)?.is_dir() {
                let (sr, mut sub) = self.store_dir(ctx, &path, index_only)?;
                sub.ref_ = sr.ref_;
                sub.name = name;
                base.push(sub);
            } else {
                let mut fd = LocalFile::new(path);
                base.push(self.store_as_file(ctx, &mut fd, index_only)?);
            }
        }
        base.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

        if base.len() <= DIR_FANOUT {
            return self.store_dir_page(ctx, base);
        }

        // bottom-up: inline pages first, then ref pages until one root
        let mut level: Vec<Ref> = Vec::with_capacity(base.len().div_ceil(DIR_FANOUT));
        for page in base.chunks(DIR_FANOUT) {
            let (sr, _) = self.store_dir_page(ctx, page.to_vec())?;
            level.push(sr.ref_);
        }
        let mut root = SizedRef::new(Ref::ZERO, 0);
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(DIR_FANOUT));
            for page in level.chunks(DIR_FANOUT) {
                root = self.store_list_page(ctx, page.to_vec())?;
                next.push(root.ref_);
            }
            level = next;
        }
        // stats on a paginated root are not aggregated
        Ok((
            root,
            DirEntry {
                ref_: root.ref_,
                size: 0,
                count: 0,
                name: String::new(),
            },
        ))
    }

    /// store one page of entries inline and summarize it
    fn store_dir_page(
        &self,
        ctx: &Context,
        entries: Vec<DirEntry>,
    ) -> Result<(SizedRef, DirEntry)> {
        let mut count = 0u64;
        let mut size = 0u64;
        for e in &entries {
            count += e.count + 1;
            size += e.size;
        }
        let obj = Object::InlineList(InlineList {
            elem: TYPE_DIR_ENTRY.to_string(),
            items: entries.into_iter().map(Object::DirEntry).collect(),
        });
        let sr = self.store_schema(ctx, &obj)?;
        Ok((
            sr,
            DirEntry {
                ref_: sr.ref_,
                size,
                count,
                name: String::new(),
            },
        ))
    }

    /// store one interior page of page refs
    fn store_list_page(&self, ctx: &Context, refs: Vec<Ref>) -> Result<SizedRef> {
        let obj = Object::List(List {
            elem: TYPE_DIR_ENTRY.to_string(),
            items: refs,
        });
        self.store_schema(ctx, &obj)
    }
}

/// copy a file into a blob sink, verifying the size snapshot twice
fn copy_verify(
    src: &mut Box<dyn Read + Send>,
    fw: &mut dyn BlobWrite,
    snap: &SizedRef,
    path: Option<&Path>,
    name: &str,
) -> Result<SizedRef> {
    let changed = || {
        Error::FileChanged(
            path.map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(name)),
        )
    };
    let n = copy_blob(src, fw)?;
    if n != snap.size {
        return Err(changed());
    }
    let sr = fw.complete()?;
    if sr.size != snap.size {
        return Err(changed());
    }
    Ok(sr)
}
