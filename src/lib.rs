//! casket - content-addressable store
//!
//! a local, on-disk repository that stores opaque byte streams ("blobs")
//! under their SHA-256 hash, with named mutable pointers ("pins") and a
//! schema-object layer that represents whole directory trees as a
//! balanced Merkle-DAG of blobs.
//!
//! # Core concepts
//!
//! - **Blob**: an immutable byte sequence, stored read-only under its
//!   canonical ref (`sha256:<hex>`)
//! - **Ref**: the content reference; the zero ref means "not supplied",
//!   the empty ref names the empty blob and is never stored
//! - **Pin**: a named mutable pointer into the immutable graph
//! - **Schema object**: a blob in a self-describing encoding
//!   ([`schema::DirEntry`], [`schema::InlineList`], [`schema::List`])
//!
//! # Example usage
//!
//! ```no_run
//! use casket::{Config, Context, Repo};
//! use std::path::Path;
//!
//! let repo = Repo::open(&Config::at(".cas").create()).unwrap();
//! let ctx = Context::background();
//!
//! // import a directory tree and pin its root
//! let root = repo.store_path(&ctx, Path::new("/srv/data")).unwrap();
//! repo.set_pin(&ctx, "", &root.ref_).unwrap();
//! ```

mod config;
mod context;
mod error;
mod hash;
mod import;
mod repo;
mod types;

pub mod schema;
pub mod storage;
pub mod store;
pub mod xattrs;

pub use config::{Config, DEFAULT_DIR, DEFAULT_PIN};
pub use context::{CancelHandle, Context};
pub use error::{Error, IoResultExt, Result};
pub use hash::{hash_bytes, BlobHasher};
pub use import::{FileDesc, LocalFile, DIR_FANOUT};
pub use repo::Repo;
pub use store::LocalStore;
pub use types::{Pin, Ref, SchemaRef, SizedRef, REF_ALGO};
