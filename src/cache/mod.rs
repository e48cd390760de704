//! In-process cache for resolved records
//!
//! This module provides the adaptive-TTL cache that sits in front of every
//! provider chain. Successful values start at the data kind's base TTL and
//! grow toward its maximum while they keep being read; exhausted resolutions
//! leave short-lived error markers so failing keys are not re-resolved on
//! every request.

mod store;

pub use store::{CacheEntry, CacheStats, CacheStore, EntryStats, Lookup, TtlPolicy};
