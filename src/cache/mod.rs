//! Read cache: memoized remote reads keyed by request fingerprint.

pub mod fingerprint;
pub mod read_cache;

pub use fingerprint::{canonical_json, document_key, fingerprint, ReadKind};
pub use read_cache::{CacheEntry, CachedRead, ReadCache};
