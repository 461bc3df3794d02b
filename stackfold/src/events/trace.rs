//! Trace and aggregation data model
//!
//! A [`Trace`] is what the capture layer hands over: an ordered list of
//! frames, **leaf (innermost) frame first**. This order is kept all the way
//! into the generated profile's location ranges.
//!
//! Traces are aggregated under a [`TraceKey`] into [`TraceEvents`] for the
//! duration of one reporting interval.

use stackfold_common::{RawFrame, MAX_FRAME_UNWINDS};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::domain::{FileId, FrameId, InterpreterKind, Origin, Pid, Tid, TraceHash};

/// One frame of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame {
    pub kind: InterpreterKind,
    pub file_id: FileId,
    /// File-relative address (native) or line / bytecode offset (interpreted)
    pub address_or_line: u64,
}

impl Frame {
    #[must_use]
    pub fn new(kind: InterpreterKind, file_id: FileId, address_or_line: u64) -> Self {
        Self { kind, file_id, address_or_line }
    }

    #[must_use]
    pub fn native(file_id: FileId, address: u64) -> Self {
        Self::new(InterpreterKind::Native, file_id, address)
    }

    #[must_use]
    pub fn from_raw(raw: &RawFrame) -> Self {
        Self::new(InterpreterKind::from_raw(raw.kind), FileId(raw.file_id()), raw.address_or_line)
    }

    #[must_use]
    pub fn id(&self) -> FrameId {
        FrameId::new(self.file_id, self.address_or_line)
    }
}

/// A captured stack trace, leaf frame first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub hash: TraceHash,
    pub frames: Arc<[Frame]>,
}

impl Trace {
    /// Build a trace and derive its hash from the frames
    #[must_use]
    pub fn new(frames: Vec<Frame>) -> Self {
        let hash = hash_frames(&frames);
        Self { hash, frames: frames.into() }
    }

    /// Build a trace whose hash was already computed by the capture layer
    #[must_use]
    pub fn with_hash(hash: TraceHash, frames: Vec<Frame>) -> Self {
        Self { hash, frames: frames.into() }
    }

    /// Build a trace from raw capture-layer frames, keeping at most
    /// [`MAX_FRAME_UNWINDS`] leaf-most frames
    #[must_use]
    pub fn from_raw(frames: &[RawFrame]) -> Self {
        Self::new(frames.iter().take(MAX_FRAME_UNWINDS).map(Frame::from_raw).collect())
    }
}

/// 128-bit content hash: two independent 64-bit hashes over the frames
fn hash_frames(frames: &[Frame]) -> TraceHash {
    let mut high = DefaultHasher::new();
    frames.hash(&mut high);

    let mut low = DefaultHasher::new();
    0x5f3c_u16.hash(&mut low);
    frames.hash(&mut low);

    TraceHash((u128::from(high.finish()) << 64) | u128::from(low.finish()))
}

/// Per-event metadata delivered alongside a trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEventMeta {
    /// Wall-clock time of the event, nanoseconds since the Unix epoch
    pub timestamp_ns: u64,
    pub pid: Pid,
    pub tid: Tid,
    pub cpu: u32,
    /// Thread name
    pub comm: String,
    pub executable_path: String,
    pub origin: Origin,
    /// Time spent off CPU; zero for sampling events
    pub off_cpu_ns: u64,
}

/// Aggregation key for one reporting interval
///
/// Two events with equal keys are merged into one sample. `extra` is the
/// value returned by the sample attribute producer for the event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceKey<M> {
    pub hash: TraceHash,
    pub pid: Pid,
    pub tid: Tid,
    pub comm: String,
    pub executable_path: String,
    pub extra: M,
}

impl<M> TraceKey<M> {
    #[must_use]
    pub fn new(trace: &Trace, meta: &TraceEventMeta, extra: M) -> Self {
        Self {
            hash: trace.hash,
            pid: meta.pid,
            tid: meta.tid,
            comm: meta.comm.clone(),
            executable_path: meta.executable_path.clone(),
            extra,
        }
    }
}

/// Aggregated payload stored under a [`TraceKey`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvents {
    pub frames: Arc<[Frame]>,
    /// Number of recorded events
    pub count: u64,
    /// Event timestamps in recording order
    pub timestamps: Vec<u64>,
    /// Accumulated off-CPU time
    pub off_cpu_ns: u64,
}

impl TraceEvents {
    /// Payload for a single event
    #[must_use]
    pub fn single(trace: &Trace, meta: &TraceEventMeta) -> Self {
        Self {
            frames: Arc::clone(&trace.frames),
            count: 1,
            timestamps: vec![meta.timestamp_ns],
            off_cpu_ns: meta.off_cpu_ns,
        }
    }

    /// Accumulate another payload recorded under the same key
    pub fn merge(&mut self, other: TraceEvents) {
        self.count = self.count.saturating_add(other.count);
        self.timestamps.extend(other.timestamps);
        self.off_cpu_ns = self.off_cpu_ns.saturating_add(other.off_cpu_ns);
    }

    /// Sample value reported for this payload
    ///
    /// Event count for sampling, off-CPU nanoseconds for off-CPU events.
    #[must_use]
    pub fn value(&self, origin: Origin) -> i64 {
        let raw = match origin {
            Origin::Sampling => self.count,
            Origin::OffCpu => self.off_cpu_ns,
        };
        i64::try_from(raw).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackfold_common::FRAME_KIND_PYTHON;

    fn meta(ts: u64, off_cpu_ns: u64) -> TraceEventMeta {
        TraceEventMeta {
            timestamp_ns: ts,
            pid: Pid(100),
            tid: Tid(101),
            cpu: 0,
            comm: "worker".to_string(),
            executable_path: "/usr/bin/app".to_string(),
            origin: Origin::Sampling,
            off_cpu_ns,
        }
    }

    #[test]
    fn test_hash_depends_on_frames_and_order() {
        let a = Frame::native(FileId(1), 0x10);
        let b = Frame::native(FileId(1), 0x20);
        assert_eq!(Trace::new(vec![a, b]).hash, Trace::new(vec![a, b]).hash);
        assert_ne!(Trace::new(vec![a, b]).hash, Trace::new(vec![b, a]).hash);
        assert_ne!(Trace::new(vec![a]).hash, Trace::new(vec![a, b]).hash);
    }

    #[test]
    fn test_from_raw_keeps_order_and_kind() {
        let raw = [RawFrame::new(7, 0x40, FRAME_KIND_PYTHON), RawFrame::new(8, 0x80, 3)];
        let trace = Trace::from_raw(&raw);
        assert_eq!(trace.frames.len(), 2);
        assert_eq!(trace.frames[0], Frame::new(InterpreterKind::Python, FileId(7), 0x40));
        assert_eq!(trace.frames[1], Frame::native(FileId(8), 0x80));
    }

    #[test]
    fn test_from_raw_truncates_to_unwind_limit() {
        let raw: Vec<RawFrame> =
            (0..MAX_FRAME_UNWINDS as u64 + 10).map(|addr| RawFrame::new(1, addr, 3)).collect();
        let trace = Trace::from_raw(&raw);
        assert_eq!(trace.frames.len(), MAX_FRAME_UNWINDS);
        assert_eq!(trace.frames[0].address_or_line, 0);
        assert_eq!(trace.frames.last().unwrap().address_or_line, MAX_FRAME_UNWINDS as u64 - 1);
    }

    #[test]
    fn test_merge_accumulates() {
        let trace = Trace::new(vec![Frame::native(FileId(1), 0x10)]);
        let mut events = TraceEvents::single(&trace, &meta(1, 500));
        events.merge(TraceEvents::single(&trace, &meta(2, 700)));
        events.merge(TraceEvents::single(&trace, &meta(3, 0)));

        assert_eq!(events.count, 3);
        assert_eq!(events.timestamps, vec![1, 2, 3]);
        assert_eq!(events.value(Origin::Sampling), 3);
        assert_eq!(events.value(Origin::OffCpu), 1200);
    }

    #[test]
    fn test_key_equality_includes_extra() {
        let trace = Trace::new(vec![Frame::native(FileId(1), 0x10)]);
        let m = meta(1, 0);
        assert_eq!(TraceKey::new(&trace, &m, 1u8), TraceKey::new(&trace, &m, 1u8));
        assert_ne!(TraceKey::new(&trace, &m, 1u8), TraceKey::new(&trace, &m, 2u8));
    }
}
