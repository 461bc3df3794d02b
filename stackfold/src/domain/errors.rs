//! Structured error types for stackfold
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::Pid;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache capacity must be greater than zero")]
    ZeroCapacity,

    #[error("Cache capacity {0} exceeds the largest supported power of two")]
    CapacityTooLarge(usize),
}

/// Structural failure while generating one process's profile
///
/// Aborts only the affected process for the current flush.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Trace {trace} of {pid} has no frames")]
    EmptyTrace { pid: Pid, trace: String },

    #[error("{table} table of {pid} exceeds {max} entries")]
    TableOverflow { pid: Pid, table: &'static str, max: usize },

    #[error("Sample {sample} of {pid} references location range {start}..{end} beyond {len} entries")]
    LocationRangeOutOfBounds { pid: Pid, sample: usize, start: usize, end: usize, len: usize },

    #[error("{what} index {index} of {pid} is out of range ({len} entries)")]
    IndexOutOfRange { pid: Pid, what: &'static str, index: usize, len: usize },
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to serialize profiles: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to write profiles: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink rejected profiles: {0}")]
    Rejected(String),

    /// Failures of several inner sinks, each tagged with the sink name
    #[error("{}", join_sink_errors(.0))]
    Multiple(Vec<(String, SinkError)>),
}

fn join_sink_errors(errors: &[(String, SinkError)]) -> String {
    errors.iter().map(|(name, err)| format!("{name}: {err}")).collect::<Vec<_>>().join("; ")
}

#[derive(Error, Debug)]
pub enum ReporterError {
    #[error("Failed to construct {cache} cache: {source}")]
    CacheConstruction {
        cache: &'static str,
        #[source]
        source: CacheError,
    },

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Flush task failed: {0}")]
    FlushTask(String),
}

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Invalid collector configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Reporter(#[from] ReporterError),

    #[error("Failed to attach trace source: {0}")]
    SourceAttach(#[source] anyhow::Error),

    #[error("Collector was shut down")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_error_display() {
        let err = GenerationError::EmptyTrace { pid: Pid(100), trace: "ab".to_string() };
        assert_eq!(err.to_string(), "Trace ab of PID:100 has no frames");
    }

    #[test]
    fn test_multiple_sink_errors_are_joined() {
        let err = SinkError::Multiple(vec![
            ("json".to_string(), SinkError::Rejected("disk full".to_string())),
            ("log".to_string(), SinkError::Rejected("closed".to_string())),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("json: Sink rejected profiles: disk full"));
        assert!(msg.contains("log: Sink rejected profiles: closed"));
    }

    #[test]
    fn test_cache_construction_error_names_cache() {
        let err =
            ReporterError::CacheConstruction { cache: "executables", source: CacheError::ZeroCapacity };
        assert!(err.to_string().contains("executables"));
    }
}
