use crate::hash::BlobHasher;
use crate::storage::BlobWrite;
use crate::store::tmpfile::TempFile;
use crate::types::SizedRef;
use crate::{Error, Result};

/// streaming writer for one new blob
///
/// pairs a temp file with a streaming hasher so the ref is known at
/// `complete` without re-reading. implements the store's writer state
/// machine: Open → (write*) → Completed → Committed, with `close`
/// reachable from every state before commit.
pub struct BlobWriter {
    tmp: Option<TempFile>,
    hw: BlobHasher,
}

impl BlobWriter {
    pub(crate) fn new(tmp: TempFile) -> Self {
        Self {
            tmp: Some(tmp),
            hw: BlobHasher::new(),
        }
    }
}

impl BlobWrite for BlobWriter {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        // the hasher rejects writes after complete; checking it first
        // keeps hash and file contents in lockstep
        self.hw.write(buf)?;
        let tmp = self.tmp.as_mut().ok_or(Error::BlobCompleted)?;
        let mut written = 0;
        while written < buf.len() {
            let n = tmp.write(&buf[written..])?;
            if n == 0 {
                return Err(Error::Io {
                    path: tmp.path().to_path_buf(),
                    source: std::io::ErrorKind::WriteZero.into(),
                });
            }
            written += n;
        }
        Ok(buf.len())
    }

    fn size(&self) -> u64 {
        self.hw.size()
    }

    fn complete(&mut self) -> Result<SizedRef> {
        self.hw.complete()
    }

    fn commit(&mut self) -> Result<()> {
        let tmp = self.tmp.as_mut().ok_or(Error::BlobDiscarded)?;
        let sr = self.hw.complete()?;
        tmp.commit(&sr.ref_)?;
        self.tmp = None;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut tmp) = self.tmp.take() {
            tmp.close();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn dirs(root: &Path) -> (PathBuf, PathBuf) {
        let tmp = root.join("tmp");
        let blobs = root.join("blobs");
        fs::create_dir_all(&tmp).unwrap();
        fs::create_dir_all(&blobs).unwrap();
        (tmp, blobs)
    }

    fn writer(tmp: &Path, blobs: &Path) -> BlobWriter {
        BlobWriter::new(TempFile::new(tmp, blobs, None).unwrap())
    }

    #[test]
    fn test_write_complete_commit() {
        let dir = tempdir().unwrap();
        let (tmp, blobs) = dirs(dir.path());

        let mut w = writer(&tmp, &blobs);
        w.write_all(b"blob ").unwrap();
        w.write_all(b"content").unwrap();
        assert_eq!(w.size(), 12);

        let sr = w.complete().unwrap();
        assert_eq!(sr, hash_bytes(b"blob content"));
        w.commit().unwrap();

        assert_eq!(
            fs::read(blobs.join(sr.ref_.to_string())).unwrap(),
            b"blob content"
        );
    }

    #[test]
    fn test_write_after_complete() {
        let dir = tempdir().unwrap();
        let (tmp, blobs) = dirs(dir.path());

        let mut w = writer(&tmp, &blobs);
        w.write_all(b"data").unwrap();
        w.complete().unwrap();

        assert!(matches!(w.write(b"more"), Err(Error::BlobCompleted)));
        w.close().unwrap();
    }

    #[test]
    fn test_commit_implies_complete() {
        let dir = tempdir().unwrap();
        let (tmp, blobs) = dirs(dir.path());

        let mut w = writer(&tmp, &blobs);
        w.write_all(b"implicit").unwrap();
        w.commit().unwrap();

        let sr = w.complete().unwrap();
        assert!(blobs.join(sr.ref_.to_string()).exists());
    }

    #[test]
    fn test_commit_after_close_discarded() {
        let dir = tempdir().unwrap();
        let (tmp, blobs) = dirs(dir.path());

        let mut w = writer(&tmp, &blobs);
        w.write_all(b"thrown away").unwrap();
        w.close().unwrap();

        assert!(matches!(w.commit(), Err(Error::BlobDiscarded)));
        assert_eq!(fs::read_dir(&blobs).unwrap().count(), 0);
        assert_eq!(fs::read_dir(&tmp).unwrap().count(), 0);
    }

    #[test]
    fn test_close_after_commit_noop() {
        let dir = tempdir().unwrap();
        let (tmp, blobs) = dirs(dir.path());

        let mut w = writer(&tmp, &blobs);
        w.write_all(b"kept").unwrap();
        w.commit().unwrap();
        w.close().unwrap();

        let sr = hash_bytes(b"kept");
        assert!(blobs.join(sr.ref_.to_string()).exists());
    }

    #[test]
    fn test_no_trace_after_close() {
        let dir = tempdir().unwrap();
        let (tmp, blobs) = dirs(dir.path());

        let mut w = writer(&tmp, &blobs);
        w.write_all(b"abandoned").unwrap();
        w.close().unwrap();

        assert_eq!(fs::read_dir(&tmp).unwrap().count(), 0);
        assert_eq!(fs::read_dir(&blobs).unwrap().count(), 0);
    }
}
