//! # Shared Data Structures (capture layer ↔ aggregation core)
//!
//! Defines the constants and raw layouts shared between whatever captures
//! stack traces (kernel probes, interpreter unwinders) and the userspace
//! aggregation core. All types use `#[repr(C)]` so the capture side can write
//! them into shared buffers without an intermediate encoding.
//!
//! ## Trace Origins
//!
//! Two classes of trace events are tracked independently:
//!
//! 1. **Sampling** - periodic on-CPU stack samples (perf event at N Hz)
//! 2. **Off-CPU** - stacks captured when a thread was scheduled out for
//!    longer than the configured threshold
//!
//! ## Key Types
//!
//! - [`RawFrame`] - one unwound frame as produced by the capture layer
//! - `TRACE_ORIGIN_*` - origin tags
//! - `FRAME_KIND_*` - interpreter classification of a frame

#![cfg_attr(not(test), no_std)]

// ============================================================================
// Trace Origin Constants
// ============================================================================

/// **On-CPU sampling**: trace captured by the periodic perf event
pub const TRACE_ORIGIN_SAMPLING: u32 = 1;

/// **Off-CPU**: trace captured at `finish_task_switch` after the thread was
/// off CPU for longer than the threshold. The event carries the off-CPU time.
pub const TRACE_ORIGIN_OFF_CPU: u32 = 2;

// ============================================================================
// Frame Kind Constants
// ============================================================================

pub const FRAME_KIND_UNKNOWN: u8 = 0;
pub const FRAME_KIND_PYTHON: u8 = 1;
pub const FRAME_KIND_PHP: u8 = 2;
/// Native code; `address_or_line` is a file-relative address
pub const FRAME_KIND_NATIVE: u8 = 3;
pub const FRAME_KIND_KERNEL: u8 = 4;
pub const FRAME_KIND_HOTSPOT: u8 = 5;
pub const FRAME_KIND_RUBY: u8 = 6;
pub const FRAME_KIND_PERL: u8 = 7;
pub const FRAME_KIND_V8: u8 = 8;
pub const FRAME_KIND_DOTNET: u8 = 9;

/// Maximum number of frames the capture layer unwinds per trace
pub const MAX_FRAME_UNWINDS: usize = 128;

// ============================================================================
// Shared Data Structures
// ============================================================================

/// One frame of a captured trace
///
/// **Memory Layout**: `#[repr(C)]`, 32 bytes, 8-byte aligned.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawFrame {
    /// High 64 bits of the content-derived file identifier
    pub file_id_hi: u64,

    /// Low 64 bits of the content-derived file identifier
    ///
    /// A file id of zero means the frame could not be attributed to a file.
    pub file_id_lo: u64,

    /// File-relative address for native frames, line or bytecode offset for
    /// interpreted frames
    pub address_or_line: u64,

    /// Interpreter classification (see `FRAME_KIND_*`)
    pub kind: u8,

    /// Padding for 8-byte alignment
    #[allow(clippy::pub_underscore_fields)]
    pub _padding: [u8; 7],
}

impl RawFrame {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(file_id: u128, address_or_line: u64, kind: u8) -> Self {
        Self {
            file_id_hi: (file_id >> 64) as u64,
            file_id_lo: file_id as u64,
            address_or_line,
            kind,
            _padding: [0; 7],
        }
    }

    /// Reassemble the 128-bit file identifier
    #[must_use]
    pub const fn file_id(&self) -> u128 {
        ((self.file_id_hi as u128) << 64) | self.file_id_lo as u128
    }
}
