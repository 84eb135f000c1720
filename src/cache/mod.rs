//! # Cache Module
//!
//! Time-bounded caching for extractor results.
//!
//! Only search candidates are cached: they carry metadata and request URLs,
//! never stream URLs, so a cached entry cannot go stale the way a stream
//! locator does. Entries expire after `SEARCH_CACHE_TTL_SECS`; the hourly
//! maintenance task in [`crate::bot`] prunes whatever expired in between.
//!
//! ```env
//! SEARCH_CACHE_TTL_SECS=600   # Lifetime of a cached search in seconds
//! ```

pub mod ttl_cache;

pub use ttl_cache::TtlCache;
