//! Bounded caches shared by the ingestion, registration and flush paths
//!
//! - **`ttl`**: capacity-bounded LRU with per-entry lifetime, purged once per
//!   reporting interval by the flush loop
//! - **`sizing`**: capacity derived from expected trace throughput

pub mod sizing;
pub mod ttl;

pub use sizing::{trace_cache_size, TRACE_CACHE_INTERVALS, TRACE_CACHE_MIN_SIZE};
pub use ttl::TtlCache;
