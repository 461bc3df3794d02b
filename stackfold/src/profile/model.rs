//! Profile object produced for one process per reporting interval
//!
//! All cross references are indices into the profile's own tables:
//!
//! ```text
//! Sample ──range──▶ location_indices ──▶ Location ──▶ Line ──▶ Function ──▶ string_table
//!    │                                      │
//!    └──▶ attribute_table ◀─────────────────┘──▶ Mapping ──▶ string_table
//! ```

use serde::Serialize;

use crate::attributes::Attribute;
use crate::domain::{Origin, Pid};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleType {
    pub origin: Origin,
    /// String table index of the type name
    pub type_name: usize,
    /// String table index of the unit
    pub unit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Function {
    pub name: usize,
    pub filename: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mapping {
    /// Encoded file id
    pub file_id: String,
    pub filename: usize,
    pub build_id: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Line {
    pub function: usize,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub mapping: Option<usize>,
    /// File-relative address, or line number for interpreted frames
    pub address: u64,
    pub lines: Vec<Line>,
    pub attributes: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub origin: Origin,
    pub locations_start_index: usize,
    pub locations_length: usize,
    /// Event count for sampling, nanoseconds for off-CPU
    pub value: i64,
    pub timestamps: Vec<u64>,
    pub attributes: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub pid: Pid,
    /// Empty if the process's cgroup could not be determined
    pub cgroup_id: String,
    /// Earliest sample timestamp, nanoseconds since the Unix epoch
    pub time_ns: u64,
    pub duration_ns: u64,
    pub sample_types: Vec<SampleType>,
    pub string_table: Vec<String>,
    pub function_table: Vec<Function>,
    pub mapping_table: Vec<Mapping>,
    pub location_table: Vec<Location>,
    pub attribute_table: Vec<Attribute>,
    pub location_indices: Vec<usize>,
    pub samples: Vec<Sample>,
}

/// One symbolized frame of a sample, as seen by a reader of the profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLine<'a> {
    pub function: &'a str,
    pub filename: &'a str,
    pub line: u32,
}

impl Profile {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn string(&self, idx: usize) -> Option<&str> {
        self.string_table.get(idx).map(String::as_str)
    }

    /// Sum of sample values for `origin`
    #[must_use]
    pub fn total(&self, origin: Origin) -> i64 {
        self.samples
            .iter()
            .filter(|sample| sample.origin == origin)
            .fold(0i64, |acc, sample| acc.saturating_add(sample.value))
    }

    /// First line of every location of a sample, leaf frame first
    ///
    /// Returns `None` if the sample index or any reference is out of range.
    #[must_use]
    pub fn sample_lines(&self, sample: usize) -> Option<Vec<ResolvedLine<'_>>> {
        let sample = self.samples.get(sample)?;
        let end = sample.locations_start_index.checked_add(sample.locations_length)?;
        self.location_indices
            .get(sample.locations_start_index..end)?
            .iter()
            .map(|&loc| {
                let line = self.location_table.get(loc)?.lines.first()?;
                let function = self.function_table.get(line.function)?;
                Some(ResolvedLine {
                    function: self.string(function.name)?,
                    filename: self.string(function.filename)?,
                    line: line.line,
                })
            })
            .collect()
    }
}
