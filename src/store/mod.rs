//! local on-disk storage backend
//!
//! repository layout:
//! ```text
//! <root>/
//!   blobs/<canonical-ref>   mode 0444, contents hash to the filename
//!   pins/<name>             mode 0644, UTF-8 canonical ref
//!   tmp/blob_<random>       in-flight writes
//! ```

mod clone;
mod index;
mod iter;
mod tmpfile;
mod writer;

pub use writer::BlobWriter;

use std::fs::{self, File, Permissions};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::context::Context;
use crate::error::{IoResultExt, Result};
use crate::storage::{copy_blob, BlobIndexer, BlobIter, BlobReader, BlobWrite, FileImporter, PinIter, Storage};
use crate::types::{Ref, SizedRef};
use crate::Error;

const DIR_BLOBS: &str = "blobs";
const DIR_PINS: &str = "pins";
const DIR_TMP: &str = "tmp";

/// local-directory blob and pin store
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    /// open a repository directory, creating the layout when `create`
    pub fn open(dir: impl Into<PathBuf>, create: bool) -> Result<Self> {
        let dir = dir.into();
        let blobs = dir.join(DIR_BLOBS);
        if !blobs.is_dir() {
            if !create {
                return Err(Error::NoRepo(dir));
            }
            fs::create_dir_all(&blobs).with_path(&blobs)?;
        }
        for sub in [DIR_PINS, DIR_TMP] {
            let path = dir.join(sub);
            fs::create_dir_all(&path).with_path(&path)?;
        }
        Ok(Self { dir })
    }

    /// repository root path
    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn blobs_dir(&self) -> PathBuf {
        self.dir.join(DIR_BLOBS)
    }

    pub(crate) fn tmp_dir(&self) -> PathBuf {
        self.dir.join(DIR_TMP)
    }

    fn pins_dir(&self) -> PathBuf {
        self.dir.join(DIR_PINS)
    }

    pub(crate) fn blob_path(&self, ref_: &Ref) -> PathBuf {
        self.blobs_dir().join(ref_.to_string())
    }

    fn pin_path(&self, name: &str) -> Result<PathBuf> {
        validate_pin_name(name)?;
        Ok(self.pins_dir().join(name))
    }

    /// invalid-blob check and opportunistic heal
    ///
    /// the only detectable corruption is a zero-byte file stored under a
    /// non-empty ref, left by a crash mid-commit. returns true when the
    /// entry was invalid (and has been removed); a failed cleanup
    /// surfaces as a ref mismatch against the empty ref.
    pub(crate) fn remove_if_invalid(&self, size: u64, ref_: &Ref) -> Result<bool> {
        if size != 0 || ref_.is_empty() {
            return Ok(false);
        }
        tracing::debug!(blob = %ref_, "removing zero-byte crash artifact");
        let path = self.blob_path(ref_);
        let cleaned = fs::set_permissions(&path, Permissions::from_mode(0o666))
            .and_then(|_| fs::remove_file(&path));
        if cleaned.is_err() {
            return Err(Error::RefMismatch {
                exp: *ref_,
                got: Ref::EMPTY,
            });
        }
        Ok(true)
    }

    fn new_writer(&self, ctx: &Context) -> Result<BlobWriter> {
        let tmp = tmpfile::TempFile::new(&self.tmp_dir(), &self.blobs_dir(), ctx.deadline())?;
        Ok(BlobWriter::new(tmp))
    }

    /// list pins whose names match a glob pattern
    pub fn pins_matching(&self, ctx: &Context, pattern: &str) -> Result<Vec<crate::types::Pin>> {
        let glob = glob::Pattern::new(pattern)
            .map_err(|e| Error::InvalidPinName(e.to_string()))?;
        let mut pins = Vec::new();
        for pin in self.iterate_pins(ctx) {
            let pin = pin?;
            if glob.matches(&pin.name) {
                pins.push(pin);
            }
        }
        Ok(pins)
    }
}

impl Storage for LocalStore {
    fn stat_blob(&self, _ctx: &Context, ref_: &Ref) -> Result<u64> {
        if ref_.is_zero() {
            return Err(Error::InvalidRef);
        }
        let path = self.blob_path(ref_);
        let meta = fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::BlobNotFound(*ref_)
            } else {
                Error::Io { path, source: e }
            }
        })?;
        if self.remove_if_invalid(meta.len(), ref_)? {
            return Err(Error::BlobNotFound(*ref_));
        }
        Ok(meta.len())
    }

    fn fetch_blob(&self, _ctx: &Context, ref_: &Ref) -> Result<(BlobReader, u64)> {
        if ref_.is_zero() {
            return Err(Error::InvalidRef);
        }
        let path = self.blob_path(ref_);
        let file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::BlobNotFound(*ref_)
            } else {
                Error::Io {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;
        let meta = file.metadata().with_path(&path)?;
        if self.remove_if_invalid(meta.len(), ref_)? {
            return Err(Error::BlobNotFound(*ref_));
        }
        Ok((Box::new(file), meta.len()))
    }

    fn begin_blob(&self, ctx: &Context) -> Result<Box<dyn BlobWrite>> {
        ctx.check()?;
        Ok(Box::new(self.new_writer(ctx)?))
    }

    fn store_blob(&self, ctx: &Context, exp: &Ref, src: &mut dyn Read) -> Result<SizedRef> {
        ctx.check()?;
        let mut w = self.new_writer(ctx)?;
        let res = copy_blob(src, &mut w).and_then(|_| w.complete());
        let sr = match res {
            Ok(sr) => sr,
            Err(e) => {
                let _ = w.close();
                return Err(e);
            }
        };
        if !exp.is_zero() && sr.ref_ != *exp {
            w.close()?;
            return Err(Error::RefMismatch {
                exp: *exp,
                got: sr.ref_,
            });
        }
        w.commit()?;
        Ok(sr)
    }

    fn iterate_blobs(&self, ctx: &Context) -> BlobIter<'_> {
        Box::new(iter::BlobIterator::new(self, ctx.clone()))
    }

    fn set_pin(&self, ctx: &Context, name: &str, ref_: &Ref) -> Result<()> {
        ctx.check()?;
        let path = self.pin_path(name)?;
        // atomic write: temp file, then rename over the pin
        let tmp_path = self.tmp_dir().join(format!("pin_{}", uuid::Uuid::new_v4()));
        let res = (|| {
            let mut f = File::create(&tmp_path)?;
            f.write_all(ref_.to_string().as_bytes())?;
            f.sync_all()?;
            fs::set_permissions(&tmp_path, Permissions::from_mode(0o644))?;
            fs::rename(&tmp_path, &path)
        })();
        if let Err(e) = res {
            let _ = fs::remove_file(&tmp_path);
            return Err(Error::Io {
                path: path.clone(),
                source: e,
            });
        }
        Ok(())
    }

    fn get_pin(&self, _ctx: &Context, name: &str) -> Result<Ref> {
        let path = self.pin_path(name)?;
        let content = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::PinNotFound(name.to_string())
            } else {
                Error::Io { path, source: e }
            }
        })?;
        Ref::parse(content.trim())
    }

    fn delete_pin(&self, _ctx: &Context, name: &str) -> Result<()> {
        let path = self.pin_path(name)?;
        fs::remove_file(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::PinNotFound(name.to_string())
            } else {
                Error::Io { path, source: e }
            }
        })
    }

    fn iterate_pins(&self, ctx: &Context) -> PinIter<'_> {
        Box::new(iter::PinIterator::new(self, ctx.clone()))
    }

    fn as_indexer(&self) -> Option<&dyn BlobIndexer> {
        Some(self)
    }

    fn as_importer(&self) -> Option<&dyn FileImporter> {
        Some(self)
    }
}

/// pin names are single filesystem components
fn validate_pin_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidPinName("empty pin name".to_string()));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(Error::InvalidPinName(name.to_string()));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidPinName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use tempfile::tempdir;

    fn test_store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path().join("repo"), true).unwrap();
        (dir, store)
    }

    fn ctx() -> Context {
        Context::background()
    }

    #[test]
    fn test_open_creates_layout() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("repo");
        LocalStore::open(&root, true).unwrap();

        assert!(root.join("blobs").is_dir());
        assert!(root.join("pins").is_dir());
        assert!(root.join("tmp").is_dir());
    }

    #[test]
    fn test_open_missing_without_create() {
        let dir = tempdir().unwrap();
        let result = LocalStore::open(dir.path().join("nope"), false);
        assert!(matches!(result, Err(Error::NoRepo(_))));
    }

    #[test]
    fn test_store_and_fetch_roundtrip() {
        let (_dir, store) = test_store();

        let sr = store
            .store_blob(&ctx(), &Ref::ZERO, &mut &b"hello"[..])
            .unwrap();
        assert_eq!(sr, hash_bytes(b"hello"));

        // on disk under its canonical name, read-only
        let path = store.blob_path(&sr.ref_);
        assert_eq!(fs::read(&path).unwrap(), b"hello");
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o444);

        let (mut r, size) = store.fetch_blob(&ctx(), &sr.ref_).unwrap();
        assert_eq!(size, 5);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");

        assert_eq!(store.stat_blob(&ctx(), &sr.ref_).unwrap(), 5);
    }

    #[test]
    fn test_store_blob_ref_mismatch() {
        let (_dir, store) = test_store();

        let exp = hash_bytes(b"hello").ref_;
        let result = store.store_blob(&ctx(), &exp, &mut &b"world"[..]);
        match result {
            Err(Error::RefMismatch { exp: e, got }) => {
                assert_eq!(e, exp);
                assert_eq!(got, hash_bytes(b"world").ref_);
            }
            other => panic!("unexpected: {other:?}"),
        }

        // nothing was left behind
        assert_eq!(fs::read_dir(store.blobs_dir()).unwrap().count(), 0);
        assert_eq!(fs::read_dir(store.tmp_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_stat_zero_ref() {
        let (_dir, store) = test_store();
        assert!(matches!(
            store.stat_blob(&ctx(), &Ref::ZERO),
            Err(Error::InvalidRef)
        ));
        assert!(matches!(
            store.fetch_blob(&ctx(), &Ref::ZERO),
            Err(Error::InvalidRef)
        ));
    }

    #[test]
    fn test_stat_missing() {
        let (_dir, store) = test_store();
        let r = hash_bytes(b"never stored").ref_;
        assert!(matches!(
            store.stat_blob(&ctx(), &r),
            Err(Error::BlobNotFound(_))
        ));
    }

    #[test]
    fn test_crash_recovery_on_stat() {
        let (_dir, store) = test_store();

        // simulate a crash: zero-byte file under a non-empty ref
        let r = hash_bytes(b"lost content").ref_;
        let path = store.blob_path(&r);
        fs::write(&path, b"").unwrap();

        assert!(matches!(
            store.stat_blob(&ctx(), &r),
            Err(Error::BlobNotFound(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_crash_recovery_on_fetch() {
        let (_dir, store) = test_store();

        let r = hash_bytes(b"lost content").ref_;
        let path = store.blob_path(&r);
        fs::write(&path, b"").unwrap();
        fs::set_permissions(&path, Permissions::from_mode(0o444)).unwrap();

        assert!(matches!(
            store.fetch_blob(&ctx(), &r),
            Err(Error::BlobNotFound(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_pin_roundtrip() {
        let (_dir, store) = test_store();

        let r = hash_bytes(b"pinned").ref_;
        store.set_pin(&ctx(), "release", &r).unwrap();
        assert_eq!(store.get_pin(&ctx(), "release").unwrap(), r);

        // pins are 0644 and hold the canonical string
        let path = store.path().join("pins/release");
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
        assert_eq!(fs::read_to_string(&path).unwrap(), r.to_string());

        store.delete_pin(&ctx(), "release").unwrap();
        assert!(matches!(
            store.get_pin(&ctx(), "release"),
            Err(Error::PinNotFound(_))
        ));
    }

    #[test]
    fn test_pin_overwrite() {
        let (_dir, store) = test_store();

        let r1 = hash_bytes(b"one").ref_;
        let r2 = hash_bytes(b"two").ref_;
        store.set_pin(&ctx(), "head", &r1).unwrap();
        store.set_pin(&ctx(), "head", &r2).unwrap();
        assert_eq!(store.get_pin(&ctx(), "head").unwrap(), r2);
    }

    #[test]
    fn test_dangling_pin_is_legal() {
        let (_dir, store) = test_store();

        let r = hash_bytes(b"not stored anywhere").ref_;
        store.set_pin(&ctx(), "dangling", &r).unwrap();
        assert_eq!(store.get_pin(&ctx(), "dangling").unwrap(), r);
    }

    #[test]
    fn test_invalid_pin_names() {
        let (_dir, store) = test_store();
        let r = hash_bytes(b"x").ref_;

        for bad in ["", "a/b", ".", "..", "nul\0name"] {
            assert!(
                matches!(store.set_pin(&ctx(), bad, &r), Err(Error::InvalidPinName(_))),
                "accepted: {bad:?}"
            );
        }
    }

    #[test]
    fn test_delete_missing_pin() {
        let (_dir, store) = test_store();
        assert!(matches!(
            store.delete_pin(&ctx(), "ghost"),
            Err(Error::PinNotFound(_))
        ));
    }

    #[test]
    fn test_pins_matching() {
        let (_dir, store) = test_store();
        let r = hash_bytes(b"x").ref_;

        store.set_pin(&ctx(), "build-a", &r).unwrap();
        store.set_pin(&ctx(), "build-b", &r).unwrap();
        store.set_pin(&ctx(), "root", &r).unwrap();

        let pins = store.pins_matching(&ctx(), "build-*").unwrap();
        assert_eq!(pins.len(), 2);
        assert!(pins.iter().all(|p| p.name.starts_with("build-")));
    }

    #[test]
    fn test_capabilities_present() {
        let (_dir, store) = test_store();
        assert!(store.as_indexer().is_some());
        assert!(store.as_importer().is_some());
    }

    #[test]
    fn test_begin_blob_respects_cancel() {
        let (_dir, store) = test_store();
        let (ctx, handle) = Context::cancellable();
        handle.cancel();
        assert!(matches!(store.begin_blob(&ctx), Err(Error::Cancelled)));
    }
}
