use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::{IoResultExt, Result};
use crate::types::Ref;
use crate::Error;

/// on-disk mode of committed blobs
pub(crate) const RO_PERM: u32 = 0o444;

/// in-flight blob file under `tmp/`
///
/// exactly one of `commit`/`close` takes effect. `commit` renames the
/// file into `blobs/` under its ref; `close` unlinks it. every error
/// path removes the temp file so nothing partial survives.
pub(crate) struct TempFile {
    path: PathBuf,
    blobs_dir: PathBuf,
    file: Option<File>,
    deadline: Option<Instant>,
}

impl TempFile {
    pub fn new(tmp_dir: &Path, blobs_dir: &Path, deadline: Option<Instant>) -> Result<Self> {
        let path = tmp_dir.join(format!("blob_{}", uuid::Uuid::new_v4()));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .with_path(&path)?;
        Ok(Self {
            path,
            blobs_dir: blobs_dir.to_path_buf(),
            file: Some(file),
            deadline,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// the open temp file, for direct syscall access (reflink)
    pub fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or(Error::BlobDiscarded)
    }

    /// write a chunk, honoring the context deadline
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded);
            }
        }
        let file = self.file.as_mut().ok_or(Error::BlobDiscarded)?;
        file.write(buf).with_path(&self.path)
    }

    /// seek back to the start, for hashing an imported snapshot
    pub fn rewind(&mut self) -> Result<()> {
        let file = self.file.as_mut().ok_or(Error::BlobDiscarded)?;
        file.seek(SeekFrom::Start(0)).with_path(&self.path)?;
        Ok(())
    }

    /// move the file into `blobs/` under the given ref
    ///
    /// a rename collision means the blob is already present with the
    /// same content (filenames are refs), so replacing it is equivalent
    /// to keeping it.
    pub fn commit(&mut self, ref_: &Ref) -> Result<()> {
        let file = self.file.take().ok_or(Error::BlobDiscarded)?;
        let res = file
            .sync_all()
            .and_then(|_| fs::set_permissions(&self.path, Permissions::from_mode(RO_PERM)))
            .and_then(|_| fs::rename(&self.path, self.blobs_dir.join(ref_.to_string())));
        drop(file);
        if let Err(e) = res {
            let _ = fs::remove_file(&self.path);
            return Err(Error::Io {
                path: self.path.clone(),
                source: e,
            });
        }
        Ok(())
    }

    /// discard the file; idempotent, no-op after commit
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

impl Read for TempFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.file.as_mut() {
            Some(f) => f.read(buf),
            None => Ok(0),
        }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        self.close();
    }
}
