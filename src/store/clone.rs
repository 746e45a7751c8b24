use std::fs::File;
use std::path::Path;

use crate::context::Context;
use crate::error::{IoResultExt, Result};
use crate::hash::BlobHasher;
use crate::storage::{copy_blob, BlobWrite, FileImporter};
use crate::store::tmpfile::TempFile;
use crate::store::LocalStore;
use crate::types::SizedRef;
use crate::Error;

/// copy-on-write clone of `src` into `dst`
///
/// filesystems or kernels without reflink support report
/// [`Error::CloneUnsupported`] so callers can fall back to a plain copy.
#[cfg(target_os = "linux")]
fn clone_file(src: &File, dst: &File) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let ret = unsafe { libc::ioctl(dst.as_raw_fd(), libc::FICLONE as _, src.as_raw_fd()) };
    if ret == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EOPNOTSUPP) | Some(libc::EINVAL) | Some(libc::EXDEV) | Some(libc::ENOSYS) => {
            Err(Error::CloneUnsupported)
        }
        _ => Err(Error::Io {
            path: "<ficlone>".into(),
            source: err,
        }),
    }
}

#[cfg(not(target_os = "linux"))]
fn clone_file(_src: &File, _dst: &File) -> Result<()> {
    Err(Error::CloneUnsupported)
}

impl FileImporter for LocalStore {
    /// import a local file without copying its data
    ///
    /// the source is cloned into a temp file first; hashing the clone
    /// (not the source) makes the result immune to concurrent writers.
    fn import_file(&self, ctx: &Context, path: &Path) -> Result<SizedRef> {
        ctx.check()?;
        let src = File::open(path).with_path(path)?;
        let mut tmp = TempFile::new(&self.tmp_dir(), &self.blobs_dir(), ctx.deadline())?;
        clone_file(&src, tmp.file()?)?;

        tmp.rewind()?;
        let mut hasher = BlobHasher::new();
        copy_blob(&mut tmp, &mut hasher)?;
        let sr = hasher.complete()?;

        if sr.ref_.is_empty() {
            // empty blobs are generated on fetch, never stored
            tmp.close();
            return Ok(sr);
        }
        tmp.commit(&sr.ref_)?;
        Ok(sr)
    }
}
