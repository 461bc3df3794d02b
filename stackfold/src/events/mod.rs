//! Trace events and their per-interval aggregation

pub mod store;
pub mod trace;

pub use store::{group_by_process, KeyToEvents, OriginEvents, TraceEventStore};
pub use trace::{Frame, Trace, TraceEventMeta, TraceEvents, TraceKey};
