//! Low-level primitives for building the storage engine.
//!
//! Includes byte utilities, positioned file I/O, the byte handler pipeline
//! and the database directory lock.

/// Byte-level utilities and encoding/decoding.
pub mod bytes;

/// Advisory locking of the database directory.
pub mod concurrency;

/// Compression and encryption handlers applied to serialized pages.
pub mod handler;

/// Positioned file I/O.
pub mod io;
