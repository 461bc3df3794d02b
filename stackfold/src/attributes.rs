//! Sample attributes and the producer hook for caller-defined ones
//!
//! Every sample carries the standard thread attributes. A
//! [`SampleAttrProducer`] can add more: it extracts a typed value from each
//! trace event at ingestion time (that value becomes part of the aggregation
//! key) and turns it into attribute table entries at generation time.

use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;

use crate::events::{Trace, TraceEventMeta};

pub const THREAD_NAME: &str = "thread.name";
pub const THREAD_ID: &str = "thread.id";
pub const PROCESS_EXECUTABLE_PATH: &str = "process.executable.path";
pub const LOCATION_FILE_ID: &str = "profile.location.file_id";
pub const CPU_LOGICAL_NUMBER: &str = "cpu.logical_number";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Str(String),
    Int(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Attribute {
    pub key: String,
    pub value: AttributeValue,
}

/// Attribute table of one profile, deduplicated by key and value
#[derive(Debug, Default)]
pub struct AttributeTable {
    entries: Vec<Attribute>,
    index: HashMap<Attribute, usize>,
}

impl AttributeTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the `key`/`value` entry, inserting it if new
    pub fn intern(&mut self, key: &str, value: AttributeValue) -> usize {
        let attribute = Attribute { key: key.to_string(), value };
        if let Some(&idx) = self.index.get(&attribute) {
            return idx;
        }
        let idx = self.entries.len();
        self.entries.push(attribute.clone());
        self.index.insert(attribute, idx);
        idx
    }

    /// Intern a string attribute and append its index; empty values are skipped
    pub fn append_str(&mut self, indices: &mut Vec<usize>, key: &str, value: &str) {
        if !value.is_empty() {
            indices.push(self.intern(key, AttributeValue::Str(value.to_string())));
        }
    }

    pub fn append_int(&mut self, indices: &mut Vec<usize>, key: &str, value: i64) {
        indices.push(self.intern(key, AttributeValue::Int(value)));
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&Attribute> {
        self.entries.get(idx)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<Attribute> {
        self.entries
    }
}

/// Caller-defined per-sample metadata
pub trait SampleAttrProducer: Send + Sync + 'static {
    /// Extra metadata; part of the aggregation key
    type Meta: Hash + Eq + Clone + Send + Sync + 'static;

    /// Called on the ingestion path for every trace event
    fn collect_extra_sample_meta(&self, trace: &Trace, meta: &TraceEventMeta) -> Self::Meta;

    /// Called once per sample at generation time
    fn extra_sample_attrs(&self, attrs: &mut AttributeTable, meta: &Self::Meta) -> Vec<usize>;
}

/// Producer adding nothing beyond the standard attributes
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExtraAttrs;

impl SampleAttrProducer for NoExtraAttrs {
    type Meta = ();

    fn collect_extra_sample_meta(&self, _: &Trace, _: &TraceEventMeta) {}

    fn extra_sample_attrs(&self, _: &mut AttributeTable, _: &()) -> Vec<usize> {
        Vec::new()
    }
}

/// Producer splitting samples by the CPU they were taken on
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuAttrs;

impl SampleAttrProducer for CpuAttrs {
    type Meta = u32;

    fn collect_extra_sample_meta(&self, _: &Trace, meta: &TraceEventMeta) -> u32 {
        meta.cpu
    }

    fn extra_sample_attrs(&self, attrs: &mut AttributeTable, cpu: &u32) -> Vec<usize> {
        let mut indices = Vec::with_capacity(1);
        attrs.append_int(&mut indices, CPU_LOGICAL_NUMBER, i64::from(*cpu));
        indices
    }
}
