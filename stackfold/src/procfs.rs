//! Process and CPU information from /proc and /sys
//!
//! Roots are configurable so tests can point the readers at fixture trees.

#![allow(unsafe_code)] // sysconf() requires unsafe

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::domain::Pid;

pub const DEFAULT_PROC_ROOT: &str = "/proc";
pub const DEFAULT_CPU_ROOT: &str = "/sys/devices/system/cpu";

/// Reader for the cgroup v2 membership of processes
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_ROOT)
    }
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// cgroup v2 path of `pid`, e.g. `/system.slice/nginx.service`
    ///
    /// Returns `Ok(None)` if the process has exited or is only in v1
    /// hierarchies.
    ///
    /// # Errors
    /// Returns an error if `/proc/<pid>/cgroup` exists but cannot be read
    pub fn cgroupv2_id(&self, pid: Pid) -> Result<Option<String>> {
        let path = self.root.join(pid.0.to_string()).join("cgroup");
        match fs::read_to_string(&path) {
            Ok(content) => Ok(parse_cgroupv2(&content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }
}

/// Extract the unified hierarchy entry (`0::<path>`) of a cgroup file
#[must_use]
pub fn parse_cgroupv2(content: &str) -> Option<String> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("0::"))
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(str::to_string)
}

/// Parse a CPU list like `0-3,8-11` or `5`
///
/// # Errors
/// Returns an error on malformed entries
pub fn parse_cpu_list(content: &str) -> Result<Vec<u32>> {
    let mut cpus = Vec::new();

    for range in content.trim().split(',').filter(|range| !range.is_empty()) {
        if let Some((start, end)) = range.split_once('-') {
            // Range like "0-3"
            let start: u32 = start.parse().with_context(|| format!("Bad CPU range '{range}'"))?;
            let end: u32 = end.parse().with_context(|| format!("Bad CPU range '{range}'"))?;
            cpus.extend(start..=end);
        } else {
            // Single CPU like "5"
            let cpu: u32 = range.parse().with_context(|| format!("Bad CPU '{range}'"))?;
            cpus.push(cpu);
        }
    }

    Ok(cpus)
}

/// Number of present CPU cores listed under `cpu_root/present`
///
/// # Errors
/// Returns an error if the file cannot be read or parsed
pub fn present_cores_from(cpu_root: &Path) -> Result<u32> {
    let path = cpu_root.join("present");
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let cpus = parse_cpu_list(&content)?;
    u32::try_from(cpus.len()).context("CPU count does not fit in u32")
}

/// Number of present CPU cores, falling back to the configured processor
/// count when /sys is unavailable
#[must_use]
pub fn present_cores() -> u32 {
    match present_cores_from(Path::new(DEFAULT_CPU_ROOT)) {
        Ok(cores) if cores > 0 => cores,
        Ok(_) => configured_processors(),
        Err(e) => {
            log::debug!("Falling back to sysconf for core count: {e:#}");
            configured_processors()
        }
    }
}

fn configured_processors() -> u32 {
    let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
    u32::try_from(count).ok().filter(|&n| n > 0).unwrap_or(1)
}
