use sha2::{Digest, Sha256};

use crate::storage::BlobWrite;
use crate::types::{Ref, SizedRef};
use crate::{Error, Result};

/// hash a byte slice, returning its ref and length
pub fn hash_bytes(data: &[u8]) -> SizedRef {
    let digest: [u8; 32] = Sha256::digest(data).into();
    SizedRef::new(Ref::from_bytes(digest), data.len() as u64)
}

/// streaming blob hasher
///
/// implements [`BlobWrite`] as a hash-only sink: it persists nothing, so
/// `commit` and `close` are no-ops. used directly for index-only file
/// imports and as the hashing half of the on-disk blob writer.
pub struct BlobHasher {
    hasher: Option<Sha256>,
    size: u64,
    done: Option<SizedRef>,
}

impl BlobHasher {
    pub fn new() -> Self {
        Self {
            hasher: Some(Sha256::new()),
            size: 0,
            done: None,
        }
    }
}

impl Default for BlobHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobWrite for BlobHasher {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let hasher = match &mut self.hasher {
            Some(h) => h,
            None => return Err(Error::BlobCompleted),
        };
        hasher.update(buf);
        self.size += buf.len() as u64;
        Ok(buf.len())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn complete(&mut self) -> Result<SizedRef> {
        if let Some(sr) = self.done {
            return Ok(sr);
        }
        // write() guarantees the hasher is present until first completion
        let hasher = self.hasher.take().ok_or(Error::BlobCompleted)?;
        let digest: [u8; 32] = hasher.finalize().into();
        let sr = SizedRef::new(Ref::from_bytes(digest), self.size);
        self.done = Some(sr);
        Ok(sr)
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
