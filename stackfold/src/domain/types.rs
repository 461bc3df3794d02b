//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a TID where a
//! PID is expected, and make function signatures more expressive.

use serde::Serialize;
use stackfold_common::{
    FRAME_KIND_DOTNET, FRAME_KIND_HOTSPOT, FRAME_KIND_KERNEL, FRAME_KIND_NATIVE, FRAME_KIND_PERL,
    FRAME_KIND_PHP, FRAME_KIND_PYTHON, FRAME_KIND_RUBY, FRAME_KIND_V8, TRACE_ORIGIN_OFF_CPU,
    TRACE_ORIGIN_SAMPLING,
};
use std::fmt;

/// Process ID
///
/// Represents a process ID (TGID in kernel terms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

/// Thread ID
///
/// Represents a thread ID (kernel PID of the task).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// Content-derived identifier of an executable or shared object
///
/// Zero means "no file", e.g. a frame the unwinder could not attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FileId(pub u128);

impl FileId {
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Encoded form handed to symbol resolvers: 32 lowercase hex digits
    #[must_use]
    pub fn encode(self) -> String {
        format!("{:032x}", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Hash over the frames of a trace (its content signature)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TraceHash(pub u128);

impl fmt::Display for TraceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Identifies a single frame: the file plus the address (native) or line
/// (interpreted) within it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId {
    pub file_id: FileId,
    pub address_or_line: u64,
}

impl FrameId {
    #[must_use]
    pub fn new(file_id: FileId, address_or_line: u64) -> Self {
        Self { file_id, address_or_line }
    }
}

/// Class of a trace event
///
/// Sampling and off-CPU events are stored, flushed and reported separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Sampling,
    OffCpu,
}

impl Origin {
    pub const ALL: [Origin; 2] = [Origin::Sampling, Origin::OffCpu];

    /// Decode the origin tag written by the capture layer
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            TRACE_ORIGIN_SAMPLING => Some(Origin::Sampling),
            TRACE_ORIGIN_OFF_CPU => Some(Origin::OffCpu),
            _ => None,
        }
    }

    /// Slot of this origin in per-origin arrays
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Origin::Sampling => 0,
            Origin::OffCpu => 1,
        }
    }

    /// Sample type name and unit used in generated profiles
    #[must_use]
    pub fn sample_type(self) -> (&'static str, &'static str) {
        match self {
            Origin::Sampling => ("samples", "count"),
            Origin::OffCpu => ("off_cpu", "nanoseconds"),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Sampling => write!(f, "sampling"),
            Origin::OffCpu => write!(f, "off-cpu"),
        }
    }
}

/// Interpreter classification of a frame or executable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpreterKind {
    Unknown,
    Native,
    Kernel,
    Python,
    Php,
    HotSpot,
    Ruby,
    Perl,
    V8,
    Dotnet,
}

impl InterpreterKind {
    /// Decode a `FRAME_KIND_*` tag; unrecognized tags map to `Unknown`
    #[must_use]
    pub fn from_raw(kind: u8) -> Self {
        match kind {
            FRAME_KIND_NATIVE => InterpreterKind::Native,
            FRAME_KIND_KERNEL => InterpreterKind::Kernel,
            FRAME_KIND_PYTHON => InterpreterKind::Python,
            FRAME_KIND_PHP => InterpreterKind::Php,
            FRAME_KIND_HOTSPOT => InterpreterKind::HotSpot,
            FRAME_KIND_RUBY => InterpreterKind::Ruby,
            FRAME_KIND_PERL => InterpreterKind::Perl,
            FRAME_KIND_V8 => InterpreterKind::V8,
            FRAME_KIND_DOTNET => InterpreterKind::Dotnet,
            _ => InterpreterKind::Unknown,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            InterpreterKind::Unknown => "unknown",
            InterpreterKind::Native => "native",
            InterpreterKind::Kernel => "kernel",
            InterpreterKind::Python => "python",
            InterpreterKind::Php => "php",
            InterpreterKind::HotSpot => "hotspot",
            InterpreterKind::Ruby => "ruby",
            InterpreterKind::Perl => "perl",
            InterpreterKind::V8 => "v8",
            InterpreterKind::Dotnet => "dotnet",
        }
    }
}

impl fmt::Display for InterpreterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_display() {
        assert_eq!(Pid(1234).to_string(), "PID:1234");
        assert_eq!(Tid(7).to_string(), "TID:7");
    }

    #[test]
    fn test_file_id_encoding() {
        let id = FileId(0xabc);
        assert_eq!(id.encode(), "00000000000000000000000000000abc");
        assert_eq!(id.encode().len(), 32);
        assert!(!id.is_zero());
        assert!(FileId::default().is_zero());
    }

    #[test]
    fn test_origin_from_raw() {
        assert_eq!(Origin::from_raw(TRACE_ORIGIN_SAMPLING), Some(Origin::Sampling));
        assert_eq!(Origin::from_raw(TRACE_ORIGIN_OFF_CPU), Some(Origin::OffCpu));
        assert_eq!(Origin::from_raw(0), None);
        assert_eq!(Origin::Sampling.index(), 0);
        assert_eq!(Origin::OffCpu.index(), 1);
    }

    #[test]
    fn test_interpreter_kind_from_raw() {
        assert_eq!(InterpreterKind::from_raw(FRAME_KIND_NATIVE), InterpreterKind::Native);
        assert_eq!(InterpreterKind::from_raw(FRAME_KIND_PYTHON), InterpreterKind::Python);
        assert_eq!(InterpreterKind::from_raw(200), InterpreterKind::Unknown);
        assert_eq!(InterpreterKind::HotSpot.to_string(), "hotspot");
    }
}
