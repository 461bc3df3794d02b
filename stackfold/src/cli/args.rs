//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{CollectorConfig, DEFAULT_TRACERS};

#[derive(Parser, Debug)]
#[command(
    name = "stackfold",
    about = "Aggregate stack traces into per-process profiles",
    after_help = "\
EXAMPLES:
    stackfold --output profiles.json             Write each flush to a JSON file
    stackfold --interval 10 --duration 60        Flush every 10s, stop after a minute
    stackfold --off-cpu-threshold 429496729      Also emit off-CPU samples (~10%)"
)]
pub struct Args {
    /// Sampling frequency in Hz
    #[arg(short, long, default_value = "20")]
    pub frequency: u32,

    /// Report interval in seconds
    #[arg(short, long, default_value = "5")]
    pub interval: u64,

    /// Monitor interval in seconds (cache sizing)
    #[arg(long, default_value = "5")]
    pub monitor_interval: u64,

    /// Off-CPU threshold out of u32::MAX (0 = off-CPU profiling disabled)
    #[arg(long, default_value = "0")]
    pub off_cpu_threshold: u32,

    /// Interpreter tracers to enable
    #[arg(long, default_value = DEFAULT_TRACERS)]
    pub tracers: String,

    /// Number of synthetic processes to emit stacks for
    #[arg(long, default_value = "3")]
    pub processes: u32,

    /// Write profiles to this JSON file (replaced on every flush)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Tag samples with the CPU they were taken on
    #[arg(long)]
    pub split_by_cpu: bool,

    /// Stop after N seconds (0 = until Ctrl-C)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Suppress per-profile summaries in the log
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    #[must_use]
    pub fn collector_config(&self, present_cores: u32) -> CollectorConfig {
        CollectorConfig {
            samples_per_second: self.frequency,
            off_cpu_threshold: self.off_cpu_threshold,
            report_interval: Duration::from_secs(self.interval),
            monitor_interval: Duration::from_secs(self.monitor_interval),
            present_cores,
            tracers: self.tracers.clone(),
        }
    }

    /// Run duration, `None` for unlimited
    #[must_use]
    pub fn run_for(&self) -> Option<Duration> {
        (self.duration > 0).then(|| Duration::from_secs(self.duration))
    }
}
