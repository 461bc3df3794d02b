//! # stackfold - Trace Aggregation and Profile Reporting
//!
//! stackfold is the aggregation core of a continuous profiling agent. It
//! takes a stream of already-captured stack traces (on-CPU samples and
//! off-CPU events, tagged by process) and periodically turns them into
//! symbolized, deduplicated per-process profiles.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Capture layer (TraceSource)                    │
//! │        perf events, interpreter unwinders, synthetic            │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ traces, executable / frame / host metadata
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     stackfold (This Crate)                      │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │  Reporter    │──▶│ TraceEvent   │──▶│ Flush loop   │         │
//! │  │ (ingestion)  │   │   Store      │   │ (±20% jitter)│         │
//! │  └──────┬───────┘   └──────────────┘   └──────┬───────┘         │
//! │         │                                     │                 │
//! │         ▼                                     ▼                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │  TTL caches  │◀─▶│   Profile    │──▶│ ProfileSink  │         │
//! │  │ exe/frame/cg │   │  Generator   │   │ json/log/fn  │         │
//! │  └──────┬───────┘   └──────────────┘   └──────────────┘         │
//! │         │                                                       │
//! │         ▼                                                       │
//! │  ┌──────────────┐                                               │
//! │  │ Symbolizer   │                                               │
//! │  │  (DWARF)     │                                               │
//! │  └──────────────┘                                               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Pipeline
//!
//! - [`reporter`]: ingestion surface, cache ownership and the flush loop
//! - [`events`]: trace model and the per-origin swappable event store
//! - [`profile`]: deduplicated tables and the per-process generator
//! - [`sink`]: output sinks, including a fan-out sink
//! - [`collector`]: idempotent start/stop supervisor around a pipeline
//!
//! ### Supporting Modules
//!
//! - [`cache`]: capacity- and lifetime-bounded LRU cache and its sizing
//! - [`symbolization`]: resolver traits and the DWARF-backed implementation
//! - [`attributes`]: sample attributes and the producer hook
//! - [`procfs`]: cgroup and CPU information from /proc and /sys
//! - [`config`]: reporter and collector settings
//! - [`domain`]: core domain types (Pid, Tid, FileId, Origin) and errors
//! - [`cli`], [`synthetic`]: the `stackfold` binary's flags and demo source
//!
//! ## Guarantees
//!
//! - **Non-blocking ingestion**: recording a trace takes one per-origin write
//!   lock for one map merge; it never waits on I/O or the sink
//! - **No loss, no double counting**: every recorded event lands in exactly
//!   one flushed snapshot
//! - **Lazy symbolization**: native addresses are resolved only when they
//!   appear in a flushed profile, and cached for an hour
//!
//! ## Typical Usage
//!
//! ```rust,ignore
//! let collector = Collector::new(
//!     Arc::new(DwarfResolver::default()),
//!     Arc::new(JsonFileSink::new("profiles.json")),
//!     NoExtraAttrs,
//!     Box::new(my_capture_layer),
//! );
//! collector.start(CollectorConfig::default()).await?;
//! ```

pub mod attributes;
pub mod cache;
pub mod cli;
pub mod collector;
pub mod config;
pub mod domain;
pub mod events;
pub mod procfs;
pub mod profile;
pub mod reporter;
pub mod sink;
pub mod symbolization;
pub mod synthetic;
