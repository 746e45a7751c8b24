use std::collections::VecDeque;
use std::fs;

use crate::context::Context;
use crate::error::{IoResultExt, Result};
use crate::store::LocalStore;
use crate::types::{Pin, Ref, SizedRef};
use crate::Error;

/// blobs in ascending canonical-ref order
///
/// non-regular entries are skipped, zero-byte crash artifacts are healed
/// and skipped, and an unparsable filename ends the iteration with an
/// error. yields at most one `Err`, then fuses.
pub(crate) struct BlobIterator<'a> {
    store: &'a LocalStore,
    ctx: Context,
    entries: Option<VecDeque<(String, u64)>>,
    failed: bool,
}

impl<'a> BlobIterator<'a> {
    pub fn new(store: &'a LocalStore, ctx: Context) -> Self {
        Self {
            store,
            ctx,
            entries: None,
            failed: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let dir = self.store.blobs_dir();
        let rd = match fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.entries = Some(VecDeque::new());
                return Ok(());
            }
            Err(e) => {
                return Err(Error::Io {
                    path: dir,
                    source: e,
                })
            }
        };
        let mut entries = Vec::new();
        for entry in rd {
            let entry = entry.with_path(&dir)?;
            let meta = entry.metadata().with_path(entry.path())?;
            if !meta.is_file() {
                continue;
            }
            entries.push((entry.file_name().to_string_lossy().into_owned(), meta.len()));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        self.entries = Some(entries.into());
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<SizedRef>> {
        self.ctx.check()?;
        if self.entries.is_none() {
            self.fill()?;
        }
        let entries = self.entries.as_mut().unwrap();
        while let Some((name, size)) = entries.pop_front() {
            let ref_ = Ref::parse(&name)?;
            if self.store.remove_if_invalid(size, &ref_)? {
                continue;
            }
            return Ok(Some(SizedRef::new(ref_, size)));
        }
        Ok(None)
    }
}

impl Iterator for BlobIterator<'_> {
    type Item = Result<SizedRef>;

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

/// pins in ascending name order
pub(crate) struct PinIterator<'a> {
    store: &'a LocalStore,
    ctx: Context,
    names: Option<VecDeque<String>>,
    failed: bool,
}

impl<'a> PinIterator<'a> {
    pub fn new(store: &'a LocalStore, ctx: Context) -> Self {
        Self {
            store,
            ctx,
            names: None,
            failed: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let dir = self.store.pins_dir();
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

    fn advance(&mut self) -> Result<Option<Pin>> {
        self.ctx.check()?;
        if self.names.is_none() {
            self.fill()?;
        }
        let names = self.names.as_mut().unwrap();
        let Some(name) = names.pop_front() else {
            return Ok(None);
        };
        let path = self.store.pins_dir().join(&name);
        let content = fs::read_to_string(&path).with_path(&path)?;
        let ref_ = Ref::parse(content.trim())?;
        Ok(Some(Pin { name, ref_ }))
    }
}

impl Iterator for PinIterator<'_> {
    type Item = Result<Pin>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.advance() {
            Ok(Some(pin)) => Some(Ok(pin)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::storage::Storage;
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
    fn test_iterate_blobs_sorted() {
        let (_dir, store) = test_store();

        let mut stored = Vec::new();
        for content in [&b"one"[..], b"two", b"three", b"four"] {
            stored.push(store.store_blob(&ctx(), &Ref::ZERO, &mut &content[..]).unwrap());
        }
        stored.sort_by_key(|sr| sr.ref_.to_string());

        let got: Vec<SizedRef> = store
            .iterate_blobs(&ctx())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(got, stored);
    }

    #[test]
    fn test_iterate_empty_store() {
        let (_dir, store) = test_store();
        assert_eq!(store.iterate_blobs(&ctx()).count(), 0);
    }

    #[test]
    fn test_iterate_heals_crash_artifacts() {
        let (_dir, store) = test_store();

        let kept = store
            .store_blob(&ctx(), &Ref::ZERO, &mut &b"kept"[..])
            .unwrap();

        let broken = hash_bytes(b"broken").ref_;
        let broken_path = store.blob_path(&broken);
        fs::write(&broken_path, b"").unwrap();

        let got: Vec<SizedRef> = store
            .iterate_blobs(&ctx())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(got, vec![kept]);
        assert!(!broken_path.exists());
    }

    #[test]
    fn test_iterate_bad_filename_errors() {
        let (_dir, store) = test_store();

        fs::write(store.blobs_dir().join("not-a-ref"), b"junk").unwrap();

        let mut it = store.iterate_blobs(&ctx());
        assert!(matches!(it.next(), Some(Err(Error::RefParse(_)))));
        // fused after the first error
        assert!(it.next().is_none());
    }

    #[test]
    fn test_iterate_skips_subdirectories() {
        let (_dir, store) = test_store();
        fs::create_dir(store.blobs_dir().join("sha256:bogusdir")).unwrap();
        assert_eq!(store.iterate_blobs(&ctx()).count(), 0);
    }

    #[test]
    fn test_iterate_pins_sorted() {
        let (_dir, store) = test_store();
        let r = hash_bytes(b"x").ref_;

        for name in ["zeta", "alpha", "mid"] {
            store.set_pin(&ctx(), name, &r).unwrap();
        }

        let pins: Vec<Pin> = store.iterate_pins(&ctx()).collect::<Result<_>>().unwrap();
        let names: Vec<&str> = pins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_iterate_pins_bad_contents() {
        let (_dir, store) = test_store();

        fs::write(store.path().join("pins/broken"), b"garbage").unwrap();

        let mut it = store.iterate_pins(&ctx());
        assert!(matches!(it.next(), Some(Err(Error::RefParse(_)))));
        assert!(it.next().is_none());
    }

    #[test]
    fn test_iterate_cancelled() {
        let (_dir, store) = test_store();
        store
            .store_blob(&ctx(), &Ref::ZERO, &mut &b"data"[..])
            .unwrap();

        let (cctx, handle) = Context::cancellable();
        handle.cancel();
        let mut it = store.iterate_blobs(&cctx);
        assert!(matches!(it.next(), Some(Err(Error::Cancelled))));
        assert!(it.next().is_none());
    }
}
