//! Output sinks for finished profile batches

use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::domain::{Origin, Pid, SinkError};
use crate::profile::Profile;

/// Everything produced by one flush
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileBatch {
    pub profiles: BTreeMap<Pid, Profile>,
    pub host_metadata: BTreeMap<String, String>,
}

impl ProfileBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.profiles.values().map(|profile| profile.samples.len()).sum()
    }
}

/// Destination of flushed profiles
///
/// Called from a blocking context; implementations may do synchronous I/O.
pub trait ProfileSink: Send + Sync {
    /// Short name used to tag errors
    fn name(&self) -> &str;

    /// # Errors
    /// Returns an error if the batch could not be delivered
    fn write_profiles(&self, batch: &ProfileBatch) -> Result<(), SinkError>;
}

/// Fan-out to several sinks
///
/// Every sink is attempted; failures are collected and returned together.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn ProfileSink>>,
}

impl MultiSink {
    #[must_use]
    pub fn new(sinks: Vec<Box<dyn ProfileSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Box<dyn ProfileSink>) {
        self.sinks.push(sink);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ProfileSink for MultiSink {
    fn name(&self) -> &str {
        "multi"
    }

    fn write_profiles(&self, batch: &ProfileBatch) -> Result<(), SinkError> {
        let errors: Vec<(String, SinkError)> = self
            .sinks
            .iter()
            .filter_map(|sink| {
                sink.write_profiles(batch).err().map(|err| (sink.name().to_string(), err))
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SinkError::Multiple(errors))
        }
    }
}

/// Writes each batch as one JSON document, replacing the previous one
pub struct JsonFileSink {
    path: PathBuf,
    pretty: bool,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), pretty: true }
    }

    #[must_use]
    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProfileSink for JsonFileSink {
    fn name(&self) -> &str {
        "json"
    }

    fn write_profiles(&self, batch: &ProfileBatch) -> Result<(), SinkError> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            if self.pretty {
                serde_json::to_writer_pretty(&mut writer, batch)?;
            } else {
                serde_json::to_writer(&mut writer, batch)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;

        info!("Wrote {} profiles to {}", batch.profiles.len(), self.path.display());
        Ok(())
    }
}

/// Logs a one-line summary per profile
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProfileSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn write_profiles(&self, batch: &ProfileBatch) -> Result<(), SinkError> {
        for (pid, profile) in &batch.profiles {
            let top = profile
                .sample_lines(0)
                .and_then(|lines| lines.first().map(|line| line.function.to_string()))
                .unwrap_or_default();
            info!(
                "{pid} cgroup='{}': {} samples, {} sampled, {}ns off-cpu, {} locations, leaf '{top}'",
                profile.cgroup_id,
                profile.samples.len(),
                profile.total(Origin::Sampling),
                profile.total(Origin::OffCpu),
                profile.location_table.len(),
            );
        }
        Ok(())
    }
}

/// Sink backed by a closure
pub struct FnSink<F> {
    name: String,
    f: F,
}

impl<F> FnSink<F>
where
    F: Fn(&ProfileBatch) -> Result<(), SinkError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> ProfileSink for FnSink<F>
where
    F: Fn(&ProfileBatch) -> Result<(), SinkError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn write_profiles(&self, batch: &ProfileBatch) -> Result<(), SinkError> {
        (self.f)(batch)
    }
}
