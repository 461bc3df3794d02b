//! Per-process profile generation
//!
//! - **`model`**: the serializable profile object
//! - **`tables`**: deduplicating string / function / mapping / location tables
//! - **`generator`**: turns aggregated trace events into a validated profile

pub mod generator;
pub mod model;
pub mod tables;

pub use generator::{single_origin, validate, ProfileGenerator, MAX_TABLE_ENTRIES};
pub use model::{Function, Line, Location, Mapping, Profile, ResolvedLine, Sample, SampleType};
pub use tables::{DedupTable, StringTable};
