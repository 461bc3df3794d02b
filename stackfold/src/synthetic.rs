//! Synthetic trace source
//!
//! Stands in for the kernel capture layer when running the binary: it
//! registers the running executable (so native frames resolve through its
//! own symbols), reports a few pre-symbolized interpreter frames, and emits
//! randomized stacks for a handful of fake processes at the configured
//! sampling frequency.

use anyhow::{Context, Result};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collector::TraceSource;
use crate::config::CollectorConfig;
use crate::domain::{FileId, InterpreterKind, Origin, Pid, Tid};
use crate::events::{Frame, Trace, TraceEventMeta};
use crate::reporter::TraceReporter;
use crate::symbolization::{file_opener, ExecutableMetadata, FrameMetadata};

const SCRIPT_FILE_ID: FileId = FileId(0x5c21_97a0);
const SCRIPT_FUNCTIONS: [(&str, u64); 3] = [("handle_request", 12), ("render", 40), ("main", 3)];

/// Number of distinct native call paths per fake process
const CALL_PATHS: usize = 8;
const MAX_DEPTH: usize = 12;

pub struct SyntheticSource {
    processes: u32,
    seed: u64,
    executable: PathBuf,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

impl SyntheticSource {
    /// Source emitting stacks for `processes` fake processes, with native
    /// frames pointing into `executable`
    pub fn new(processes: u32, executable: impl Into<PathBuf>) -> Self {
        Self { processes: processes.max(1), seed: 0x5eed, executable: executable.into(), running: None }
    }

    /// Source whose native frames point into the running binary
    ///
    /// # Errors
    /// Returns an error if the path of the running binary is unavailable
    pub fn for_current_exe(processes: u32) -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to locate the running executable")?;
        Ok(Self::new(processes, exe))
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

fn file_id_for(path: &Path) -> FileId {
    let mut high = DefaultHasher::new();
    path.hash(&mut high);
    let mut low = DefaultHasher::new();
    "stackfold".hash(&mut low);
    path.hash(&mut low);
    FileId((u128::from(high.finish()) << 64) | u128::from(low.finish()))
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
}

fn register(reporter: &dyn TraceReporter, executable: &Path) -> FileId {
    let file_id = file_id_for(executable);
    if !reporter.executable_known(file_id) {
        let name = executable.file_name().map_or_else(
            || executable.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        );
        reporter.executable_metadata(
            ExecutableMetadata::new(file_id, name, InterpreterKind::Native)
                .with_opener(file_opener(executable)),
        );
    }

    for (function, line) in SCRIPT_FUNCTIONS {
        let frame = FrameMetadata {
            file_id: SCRIPT_FILE_ID,
            address_or_line: line,
            function_name: function.to_string(),
            file_path: "app.py".to_string(),
            line_number: u32::try_from(line).unwrap_or(0),
        };
        if !reporter.frame_known(Frame::new(InterpreterKind::Python, SCRIPT_FILE_ID, line).id()) {
            reporter.frame_metadata(frame);
        }
    }

    let hostname = std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|name| name.trim().to_string())
        .unwrap_or_default();
    reporter.report_host_metadata(BTreeMap::from([
        ("host.name".to_string(), hostname),
        ("os.type".to_string(), std::env::consts::OS.to_string()),
        ("host.arch".to_string(), std::env::consts::ARCH.to_string()),
    ]));
    file_id
}

/// Native call paths, leaf first, with interpreter frames on top of some
fn call_paths(rng: &mut StdRng, file_id: FileId) -> Vec<Trace> {
    (0..CALL_PATHS)
        .map(|path| {
            let depth = rng.gen_range(2..=MAX_DEPTH);
            let mut frames: Vec<Frame> = (0..depth)
                .map(|_| Frame::native(file_id, rng.gen_range(0x1000..0x20_0000)))
                .collect();
            if path % 3 == 0 {
                let mut script: Vec<Frame> = SCRIPT_FUNCTIONS
                    .iter()
                    .map(|&(_, line)| Frame::new(InterpreterKind::Python, SCRIPT_FILE_ID, line))
                    .collect();
                script.append(&mut frames);
                frames = script;
            }
            Trace::new(frames)
        })
        .collect()
}

/// Interval between emitted batches, never zero
fn tick_period(samples_per_second: u32) -> Duration {
    (Duration::from_secs(1) / samples_per_second.max(1)).max(Duration::from_nanos(1))
}

async fn emit(
    reporter: Arc<dyn TraceReporter>,
    token: CancellationToken,
    config: CollectorConfig,
    processes: u32,
    seed: u64,
    executable: PathBuf,
) {
    let file_id = register(reporter.as_ref(), &executable);
    let mut rng = StdRng::seed_from_u64(seed);
    let traces = call_paths(&mut rng, file_id);

    let mut ticker = tokio::time::interval(tick_period(config.samples_per_second));
    let off_cpu_probability = f64::from(config.off_cpu_threshold) / f64::from(u32::MAX);
    let mut emitted: u64 = 0;

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for process in 0..processes {
            let pid = 1000 + process;
            let trace = &traces[rng.gen_range(0..traces.len())];
            let off_cpu = off_cpu_probability > 0.0 && rng.gen_bool(off_cpu_probability.min(1.0));
            let meta = TraceEventMeta {
                timestamp_ns: now_ns(),
                pid: Pid(pid),
                tid: Tid(pid + rng.gen_range(0..4)),
                cpu: rng.gen_range(0..config.present_cores.max(1)),
                comm: format!("worker-{process}"),
                executable_path: executable.display().to_string(),
                origin: if off_cpu { Origin::OffCpu } else { Origin::Sampling },
                off_cpu_ns: if off_cpu { rng.gen_range(1_000..5_000_000) } else { 0 },
            };
            reporter.report_trace_event(trace, &meta);
            emitted += 1;
        }
    }
    debug!("Synthetic source emitted {emitted} events");
}

impl TraceSource for SyntheticSource {
    fn attach(
        &mut self,
        reporter: Arc<dyn TraceReporter>,
        config: &CollectorConfig,
        pipeline: CancellationToken,
    ) -> Result<()> {
        self.detach();
        if !self.executable.exists() {
            anyhow::bail!("Executable {} does not exist", self.executable.display());
        }

        let token = pipeline.child_token();
        let task = tokio::spawn(emit(
            reporter,
            token.clone(),
            config.clone(),
            self.processes,
            self.seed,
            self.executable.clone(),
        ));
        info!(
            "Synthetic source attached: {} processes, tracers '{}'",
            self.processes, config.tracers
        );
        self.running = Some((token, task));
        Ok(())
    }

    fn detach(&mut self) {
        if let Some((token, _task)) = self.running.take() {
            token.cancel();
            info!("Synthetic source detached");
        }
    }
}
