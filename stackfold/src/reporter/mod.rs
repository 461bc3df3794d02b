//! # Reporter
//!
//! Owns everything between the capture layer and the sink: the trace event
//! store, the four caches, the symbol resolver and the attribute producer.
//!
//! ```text
//!   capture layer (TraceSource)
//!     │  report_trace_event ─────────────▶ TraceEventStore (per-origin maps)
//!     │  executable_metadata ─▶ SymbolResolver::prepare_file ─▶ executables cache
//!     │  frame_metadata ─────────────────▶ frames cache
//!     │  report_host_metadata ───────────▶ host metadata cache
//!     ▼
//!   flush loop (every report interval ±20%)
//!     swap_all ─▶ group by pid ─▶ ProfileGenerator ─▶ ProfileBatch ─▶ ProfileSink
//!                                   │  ▲
//!                                   ▼  │ lazy line resolution
//!                         frames / executables / cgroup caches
//! ```
//!
//! Ingestion methods never block on I/O: they take one store lock or one
//! cache lock. Symbol preparation happens on the registration path, line
//! resolution and cgroup lookups on the flush path.

pub mod flush;

use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::attributes::SampleAttrProducer;
use crate::cache::TtlCache;
use crate::config::ReporterConfig;
use crate::domain::{CacheError, FileId, FrameId, InterpreterKind, Pid, ReporterError};
use crate::events::{group_by_process, Trace, TraceEventMeta, TraceEventStore, TraceEvents, TraceKey};
use crate::procfs::ProcFs;
use crate::profile::ProfileGenerator;
use crate::sink::{ProfileBatch, ProfileSink};
use crate::symbolization::{
    ExecutableInfo, ExecutableMetadata, FrameMetadata, SourceInfo, SymbolResolver,
};

pub use flush::{add_jitter, spawn_flush_loop, FlushHandle};

/// Ingestion surface handed to the capture layer
pub trait TraceReporter: Send + Sync {
    fn report_trace_event(&self, trace: &Trace, meta: &TraceEventMeta);

    /// Whether the executable is already registered
    fn executable_known(&self, file_id: FileId) -> bool;

    fn executable_metadata(&self, metadata: ExecutableMetadata);

    /// Whether the interpreter frame is already symbolized
    fn frame_known(&self, frame_id: FrameId) -> bool;

    fn frame_metadata(&self, metadata: FrameMetadata);

    fn report_host_metadata(&self, metadata: BTreeMap<String, String>);
}

pub struct Reporter<P: SampleAttrProducer> {
    config: ReporterConfig,
    store: TraceEventStore<P::Meta>,
    executables: TtlCache<FileId, ExecutableInfo>,
    frames: TtlCache<FrameId, SourceInfo>,
    cgroups: TtlCache<Pid, String>,
    host_metadata: TtlCache<String, String>,
    /// Serializes executable registration so each file is prepared once
    registration: Mutex<()>,
    symbols: Arc<dyn SymbolResolver>,
    sink: Arc<dyn ProfileSink>,
    producer: P,
    procfs: ProcFs,
}

fn cache<K, V>(name: &'static str, capacity: usize) -> Result<TtlCache<K, V>, ReporterError>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    TtlCache::new(capacity)
        .map_err(|source: CacheError| ReporterError::CacheConstruction { cache: name, source })
}

impl<P: SampleAttrProducer> Reporter<P> {
    /// Build a reporter and all of its caches
    ///
    /// # Errors
    /// Returns an error if any cache cannot be constructed
    pub fn new(
        config: ReporterConfig,
        symbols: Arc<dyn SymbolResolver>,
        sink: Arc<dyn ProfileSink>,
        producer: P,
    ) -> Result<Self, ReporterError> {
        let trace_cache_size = config.trace_cache_size() as usize;
        let lifetimes = config.lifetimes;

        let executables = cache("executables", trace_cache_size)?;
        executables.set_lifetime(lifetimes.executables);
        let frames = cache("frames", trace_cache_size)?;
        frames.set_lifetime(lifetimes.frames);
        let cgroups = cache("cgroup", config.cgroup_cache_elements)?;
        cgroups.set_lifetime(lifetimes.cgroup);
        let host_metadata = cache("host metadata", config.host_metadata_elements)?;

        debug!(
            "Reporter caches: {} executables/frames, {} cgroups, {} host metadata",
            executables.capacity(),
            cgroups.capacity(),
            host_metadata.capacity()
        );

        Ok(Self {
            config,
            store: TraceEventStore::new(),
            executables,
            frames,
            cgroups,
            host_metadata,
            registration: Mutex::new(()),
            symbols,
            sink,
            producer,
            procfs: ProcFs::default(),
        })
    }

    /// Read cgroup membership from a different proc root
    #[must_use]
    pub fn with_procfs(mut self, procfs: ProcFs) -> Self {
        self.procfs = procfs;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &TraceEventStore<P::Meta> {
        &self.store
    }

    /// cgroup v2 id of `pid`, empty if unknown
    fn cgroup_id(&self, pid: Pid) -> String {
        if let Some(id) = self.cgroups.get(&pid) {
            return id;
        }
        match self.procfs.cgroupv2_id(pid) {
            Ok(id) => {
                let id = id.unwrap_or_default();
                self.cgroups.put(pid, id.clone());
                id
            }
            Err(e) => {
                debug!("Failed to look up cgroup of {pid}: {e:#}");
                String::new()
            }
        }
    }

    #[must_use]
    pub fn host_metadata(&self) -> BTreeMap<String, String> {
        self.host_metadata.snapshot().into_iter().collect()
    }

    /// Flush once: swap the store, generate one profile per process and
    /// hand the non-empty ones to the sink
    ///
    /// Returns the number of profiles written. Generation failures only drop
    /// the affected process.
    ///
    /// # Errors
    /// Returns the sink's error if writing failed
    pub fn report_profiles(&self) -> Result<usize, ReporterError> {
        let by_process = group_by_process(self.store.swap_all());
        if by_process.is_empty() {
            return Ok(0);
        }

        let generator = ProfileGenerator::new(&self.executables, &self.frames, &self.producer);
        let mut batch = ProfileBatch::default();
        for (pid, events) in by_process {
            match generator.generate(pid, self.cgroup_id(pid), &events) {
                Ok(profile) if profile.is_empty() => {}
                Ok(profile) => {
                    batch.profiles.insert(pid, profile);
                }
                Err(e) => warn!("Dropping profile of {pid}: {e}"),
            }
        }

        if batch.is_empty() {
            return Ok(0);
        }
        batch.host_metadata = self.host_metadata();

        let written = batch.profiles.len();
        debug!("Flushing {written} profiles with {} samples", batch.sample_count());
        self.sink.write_profiles(&batch)?;
        Ok(written)
    }

    /// Drop expired entries from every cache
    pub fn purge_expired(&self) {
        let executables = self.executables.purge_expired();
        let frames = self.frames.purge_expired();
        let cgroups = self.cgroups.purge_expired();
        let host = self.host_metadata.purge_expired();
        if executables + frames + cgroups + host > 0 {
            debug!(
                "Purged {executables} executables, {frames} frames, {cgroups} cgroups, {host} host entries"
            );
        }
    }

    /// Drop every cache entry
    pub fn purge_all(&self) {
        self.executables.purge();
        self.frames.purge();
        self.cgroups.purge();
        self.host_metadata.purge();
    }
}

impl<P: SampleAttrProducer> TraceReporter for Reporter<P> {
    fn report_trace_event(&self, trace: &Trace, meta: &TraceEventMeta) {
        let extra = self.producer.collect_extra_sample_meta(trace, meta);
        let key = TraceKey::new(trace, meta, extra);
        self.store.record(meta.origin, key, TraceEvents::single(trace, meta));
    }

    fn executable_known(&self, file_id: FileId) -> bool {
        self.executables.get_and_refresh(&file_id).is_some() || self.symbols.executable_known(file_id)
    }

    fn executable_metadata(&self, mut metadata: ExecutableMetadata) {
        let _guard = self.registration.lock();
        if self.executables.get_and_refresh(&metadata.file_id).is_some() {
            return;
        }

        let resolver = metadata.opener.take().and_then(|opener| {
            self.symbols.prepare_file(&metadata.file_name, &metadata.file_id.encode(), opener)
        });
        debug!(
            "Registered executable {} ({}), line resolver: {}",
            metadata.file_name,
            metadata.file_id,
            resolver.is_some()
        );

        self.executables.put(
            metadata.file_id,
            ExecutableInfo {
                file_name: metadata.file_name.clone(),
                build_id: metadata.build_id.clone(),
                interp: metadata.interp,
                resolver,
            },
        );

        if metadata.interp == InterpreterKind::Native {
            self.symbols.executable_metadata(&metadata);
        }
    }

    fn frame_known(&self, frame_id: FrameId) -> bool {
        self.frames.get_and_refresh(&frame_id).is_some()
    }

    fn frame_metadata(&self, metadata: FrameMetadata) {
        let id = FrameId::new(metadata.file_id, metadata.address_or_line);
        self.frames.put(id, metadata.source_info());
    }

    fn report_host_metadata(&self, metadata: BTreeMap<String, String>) {
        for (key, value) in metadata {
            self.host_metadata.put(key, value);
        }
    }
}
