//! Persistent settings storage interface.
//!
//! Subsystems that carry settings across power cycles (plunger
//! calibration, nudge tuning) write opaque byte blobs keyed by name.
//! The flash-backed implementation lives in the firmware layer; this
//! crate only defines the contract, so the algorithm crates stay
//! host-testable with in-memory stands-ins.
//!
//! Blob schemas are private to each client, and versioning is by blob
//! size: a client that changes its schema changes its size, and a load
//! returning an unexpected size is treated the same as a missing blob.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

/// Storage failure (flash write error, corrupt directory, and so on).
/// Absence of a blob is not an error; see [`BlobLoad::Missing`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StoreError;

/// Outcome of a successful load call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlobLoad {
    /// The blob exists; this many bytes were written to the buffer.
    Loaded(usize),
    /// No blob is stored under that name; the caller applies defaults.
    Missing,
}

/// An opaque blob store keyed by name.
pub trait BlobStore {
    fn save(&mut self, name: &str, blob: &[u8]) -> Result<(), StoreError>;
    fn load(&mut self, name: &str, buf: &mut [u8]) -> Result<BlobLoad, StoreError>;
}
