//! Durable key-value blob storage.
//!
//! The session store keeps its blob here. `FileBlobStore` writes one JSON
//! file per key into the data directory; `MemoryBlobStore` keeps blobs in
//! process memory.

pub mod blob;

pub use blob::{BlobStore, FileBlobStore, MemoryBlobStore};
