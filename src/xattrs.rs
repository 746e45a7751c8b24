use std::path::Path;

use crate::types::{Ref, SizedRef};
use crate::{Error, Result};

/// logical xattr namespace for all repository attributes
pub const XATTR_NS: &str = "cas.";

/// schema type tag cached on blob files; empty value means "not a schema blob"
pub const XATTR_SCHEMA_TYPE: &str = "cas.schema.type";

/// precomputed ref cached on source files by the importer
pub const XATTR_REF: &str = "cas.ref";

/// blob size recorded next to `cas.ref`; the cache is trusted only if it
/// matches the live file size
pub const XATTR_SIZE: &str = "cas.size";

/// map a logical attribute name to the platform attribute name
///
/// linux restricts unprivileged processes to the `user.` namespace
#[cfg(target_os = "linux")]
fn platform_name(name: &str) -> String {
    format!("user.{name}")
}

#[cfg(not(target_os = "linux"))]
fn platform_name(name: &str) -> String {
    name.to_string()
}

fn xattr_err(path: &Path, e: &std::io::Error) -> Error {
    Error::Xattr {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// read an attribute; `Ok(None)` means the attribute is not set
pub fn get(path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
    match xattr::get(path, platform_name(name)) {
        Ok(v) => Ok(v),
        Err(e) if e.raw_os_error() == Some(libc::ENODATA) => Ok(None),
        Err(e) => Err(xattr_err(path, &e)),
    }
}

/// read an attribute as a UTF-8 string; `Ok(None)` means not set
pub fn get_string(path: &Path, name: &str) -> Result<Option<String>> {
    match get(path, name)? {
        None => Ok(None),
        Some(v) => String::from_utf8(v)
            .map(Some)
            .map_err(|_| Error::Xattr {
                path: path.to_path_buf(),
                message: format!("{name}: not valid utf-8"),
            }),
    }
}

/// set an attribute
pub fn set(path: &Path, name: &str, value: &[u8]) -> Result<()> {
    xattr::set(path, platform_name(name), value).map_err(|e| xattr_err(path, &e))
}

/// list logical attribute names present on the path
///
/// filesystems without xattr support report an empty list, not an error
pub fn list(path: &Path) -> Result<Vec<String>> {
    let names = match xattr::list(path) {
        Ok(iter) => iter,
        Err(e)
            if e.raw_os_error() == Some(libc::ENOTSUP)
                || e.raw_os_error() == Some(libc::EOPNOTSUPP) =>
        {
            return Ok(vec![]);
        }
        Err(e) => return Err(xattr_err(path, &e)),
    };
    let prefix = platform_name("");
    let mut out: Vec<String> = names
        .filter_map(|n| {
            let n = n.to_string_lossy().into_owned();
            n.strip_prefix(&prefix).map(|s| s.to_string())
        })
        .collect();
    out.sort();
    Ok(out)
}

/// read the importer's cached ref from a source file
///
/// the cache is trusted only if the recorded size matches `size`; a
/// missing or stale cache reads as `None`
pub fn cached_ref(path: &Path, size: u64) -> Option<SizedRef> {
    let cached_size = get_string(path, XATTR_SIZE).ok()??;
    if cached_size.parse::<u64>().ok()? != size {
        return None;
    }
    let ref_str = get_string(path, XATTR_REF).ok()??;
    let ref_ = Ref::parse(&ref_str).ok()?;
    Some(SizedRef::new(ref_, size))
}

/// record a computed ref on a source file for later reuse
pub fn save_ref(path: &Path, size: u64, ref_: &Ref) -> Result<()> {
    set(path, XATTR_REF, ref_.to_string().as_bytes())?;
    set(path, XATTR_SIZE, size.to_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use std::fs;
    use tempfile::tempdir;

    /// returns None when the filesystem under test lacks xattr support
    fn xattr_file(dir: &tempfile::TempDir, name: &str) -> Option<std::path::PathBuf> {
        let path = dir.path().join(name);
        fs::write(&path, b"content").unwrap();
        if set(&path, "cas.probe", b"1").is_err() {
            return None;
        }
        Some(path)
    }

    #[test]
    fn test_get_unset_is_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"x").unwrap();

        // not-set must be distinguishable from io errors even without
        // xattr support
        match get(&path, "cas.nothing") {
            Ok(None) | Err(Error::Xattr { .. }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_set_get_roundtrip() {
        let dir = tempdir().unwrap();
        let Some(path) = xattr_file(&dir, "f") else {
            return;
        };

        set(&path, XATTR_SCHEMA_TYPE, b"cas:DirEntry").unwrap();
        let v = get_string(&path, XATTR_SCHEMA_TYPE).unwrap();
        assert_eq!(v.as_deref(), Some("cas:DirEntry"));
    }

    #[test]
    fn test_list_logical_names() {
        let dir = tempdir().unwrap();
        let Some(path) = xattr_file(&dir, "f") else {
            return;
        };

        set(&path, XATTR_REF, b"x").unwrap();
        set(&path, XATTR_SIZE, b"7").unwrap();

        let names = list(&path).unwrap();
        assert!(names.contains(&XATTR_REF.to_string()));
        assert!(names.contains(&XATTR_SIZE.to_string()));
    }

    #[test]
    fn test_ref_cache_roundtrip() {
        let dir = tempdir().unwrap();
        let Some(path) = xattr_file(&dir, "f") else {
            return;
        };

        let sr = hash_bytes(b"content");
        save_ref(&path, 7, &sr.ref_).unwrap();

        assert_eq!(cached_ref(&path, 7), Some(SizedRef::new(sr.ref_, 7)));
    }

    #[test]
    fn test_ref_cache_rejects_size_mismatch() {
        let dir = tempdir().unwrap();
        let Some(path) = xattr_file(&dir, "f") else {
            return;
        };

        let sr = hash_bytes(b"content");
        save_ref(&path, 7, &sr.ref_).unwrap();

        assert_eq!(cached_ref(&path, 8), None);
    }

    #[test]
    fn test_ref_cache_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"content").unwrap();

        assert_eq!(cached_ref(&path, 7), None);
    }
}
