//! Tripwire: provenance log, BLAKE3 hashing and artifact drift detection.

pub mod drift;
pub mod eventlog;
pub mod hasher;
