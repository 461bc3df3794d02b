//! Reporter and collector configuration

use std::time::Duration;

use crate::cache::trace_cache_size;
use crate::domain::CollectorError;

pub const DEFAULT_SAMPLES_PER_SECOND: u32 = 20;
/// Highest accepted sampling frequency
pub const MAX_SAMPLES_PER_SECOND: u32 = 1_000_000;
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_TRACERS: &str = "perl,php,python,hotspot,ruby,v8";

/// Entry lifetimes of the reporter's caches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLifetimes {
    pub executables: Duration,
    pub frames: Duration,
    pub cgroup: Duration,
}

impl Default for CacheLifetimes {
    fn default() -> Self {
        Self {
            executables: Duration::from_secs(60 * 60),
            frames: Duration::from_secs(60 * 60),
            // Processes can move between cgroups
            cgroup: Duration::from_secs(90),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReporterConfig {
    pub samples_per_second: u32,
    /// Base delay between two flushes
    pub report_interval: Duration,
    /// Interval the capture layer drains its maps at; used for cache sizing
    pub monitor_interval: Duration,
    pub present_cores: u32,
    /// Relative jitter applied to every flush delay
    pub jitter: f64,
    pub cgroup_cache_elements: usize,
    pub host_metadata_elements: usize,
    pub lifetimes: CacheLifetimes,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            samples_per_second: DEFAULT_SAMPLES_PER_SECOND,
            report_interval: DEFAULT_REPORT_INTERVAL,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            present_cores: 1,
            jitter: 0.2,
            cgroup_cache_elements: 1024,
            host_metadata_elements: 115,
            lifetimes: CacheLifetimes::default(),
        }
    }
}

impl ReporterConfig {
    /// Capacity of the executables and frames caches
    ///
    /// Sized from the monitor interval, not the report interval.
    #[must_use]
    pub fn trace_cache_size(&self) -> u32 {
        trace_cache_size(self.samples_per_second, self.monitor_interval, self.present_cores)
    }
}

/// Settings handed to [`crate::collector::Collector::start`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    pub samples_per_second: u32,
    /// Off-CPU sampling threshold; zero disables off-CPU profiling
    pub off_cpu_threshold: u32,
    pub report_interval: Duration,
    pub monitor_interval: Duration,
    pub present_cores: u32,
    /// Interpreter tracers to enable, comma separated; passed through to the
    /// trace source
    pub tracers: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            samples_per_second: DEFAULT_SAMPLES_PER_SECOND,
            off_cpu_threshold: 0,
            report_interval: DEFAULT_REPORT_INTERVAL,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            present_cores: 1,
            tracers: DEFAULT_TRACERS.to_string(),
        }
    }
}

impl CollectorConfig {
    /// # Errors
    /// Returns an error for a zero or too high frequency, or a zero interval
    /// or core count
    pub fn validate(&self) -> Result<(), CollectorError> {
        if self.samples_per_second == 0 {
            return Err(CollectorError::InvalidConfig("sample frequency must be positive".into()));
        }
        if self.samples_per_second > MAX_SAMPLES_PER_SECOND {
            return Err(CollectorError::InvalidConfig(format!(
                "sample frequency {} Hz exceeds {MAX_SAMPLES_PER_SECOND} Hz",
                self.samples_per_second
            )));
        }
        if self.report_interval.is_zero() {
            return Err(CollectorError::InvalidConfig("report interval must be positive".into()));
        }
        if self.monitor_interval.is_zero() {
            return Err(CollectorError::InvalidConfig("monitor interval must be positive".into()));
        }
        if self.present_cores == 0 {
            return Err(CollectorError::InvalidConfig("present cores must be positive".into()));
        }
        Ok(())
    }

    /// Whether a running pipeline started with `self` can serve `other`
    /// unchanged
    #[must_use]
    pub fn same_pipeline(&self, other: &CollectorConfig) -> bool {
        self.report_interval == other.report_interval
            && self.samples_per_second == other.samples_per_second
            && self.off_cpu_threshold == other.off_cpu_threshold
    }

    #[must_use]
    pub fn reporter_config(&self) -> ReporterConfig {
        ReporterConfig {
            samples_per_second: self.samples_per_second,
            report_interval: self.report_interval,
            monitor_interval: self.monitor_interval,
            present_cores: self.present_cores,
            ..ReporterConfig::default()
        }
    }
}
