//! Builds one [`Profile`] from a process's aggregated trace events
//!
//! Symbolization happens here, lazily: a frame is looked up in the frames
//! cache first, then resolved through its executable's line resolver (and
//! the result cached), and otherwise reported as a synthetic line whose
//! function is the hexadecimal address.

use log::trace;
use std::hash::Hash;

use super::model::{Function, Line, Location, Mapping, Profile, Sample, SampleType};
use super::tables::{DedupTable, StringTable};
use crate::attributes::{
    AttributeTable, AttributeValue, SampleAttrProducer, LOCATION_FILE_ID, PROCESS_EXECUTABLE_PATH,
    THREAD_ID, THREAD_NAME,
};
use crate::cache::TtlCache;
use crate::domain::{FileId, FrameId, GenerationError, InterpreterKind, Origin, Pid};
use crate::events::{Frame, OriginEvents, TraceEvents, TraceKey};
use crate::symbolization::{ExecutableInfo, SourceInfo};

/// Largest number of entries in any profile table (indices fit an `i32`)
pub const MAX_TABLE_ENTRIES: usize = i32::MAX as usize;

pub struct ProfileGenerator<'a, P> {
    executables: &'a TtlCache<FileId, ExecutableInfo>,
    frames: &'a TtlCache<FrameId, SourceInfo>,
    producer: &'a P,
    max_table_entries: usize,
}

impl<'a, P: SampleAttrProducer> ProfileGenerator<'a, P> {
    #[must_use]
    pub fn new(
        executables: &'a TtlCache<FileId, ExecutableInfo>,
        frames: &'a TtlCache<FrameId, SourceInfo>,
        producer: &'a P,
    ) -> Self {
        Self { executables, frames, producer, max_table_entries: MAX_TABLE_ENTRIES }
    }

    #[must_use]
    pub fn with_max_table_entries(mut self, max: usize) -> Self {
        self.max_table_entries = max;
        self
    }

    /// Generate the profile of `pid`
    ///
    /// # Errors
    /// Returns an error if a trace has no frames, a table grows past its
    /// limit, or the finished profile references anything out of range
    pub fn generate(
        &self,
        pid: Pid,
        cgroup_id: String,
        events: &OriginEvents<P::Meta>,
    ) -> Result<Profile, GenerationError> {
        let mut builder = Builder::new();

        let sample_types = Origin::ALL
            .iter()
            .map(|&origin| {
                let (type_name, unit) = origin.sample_type();
                SampleType {
                    origin,
                    type_name: builder.strings.intern(type_name),
                    unit: builder.strings.intern(unit),
                }
            })
            .collect();

        let mut time_range: Option<(u64, u64)> = None;
        for (&origin, by_key) in events {
            let mut entries: Vec<(&TraceKey<P::Meta>, &TraceEvents)> = by_key.iter().collect();
            entries.sort_by_key(|(key, payload)| {
                (key.tid, key.hash, payload.timestamps.first().copied().unwrap_or(0))
            });

            for (key, payload) in entries {
                if payload.frames.is_empty() {
                    return Err(GenerationError::EmptyTrace { pid, trace: key.hash.to_string() });
                }

                let locations_start_index = builder.location_indices.len();
                for frame in payload.frames.iter() {
                    let location = self.location(&mut builder, frame);
                    builder.location_indices.push(location);
                }

                let mut attributes = Vec::new();
                builder.attributes.append_str(&mut attributes, THREAD_NAME, &key.comm);
                builder.attributes.append_int(&mut attributes, THREAD_ID, i64::from(key.tid.0));
                builder.attributes.append_str(
                    &mut attributes,
                    PROCESS_EXECUTABLE_PATH,
                    &key.executable_path,
                );
                attributes.extend(self.producer.extra_sample_attrs(&mut builder.attributes, &key.extra));

                for &ts in &payload.timestamps {
                    time_range = Some(match time_range {
                        Some((lo, hi)) => (lo.min(ts), hi.max(ts)),
                        None => (ts, ts),
                    });
                }

                builder.samples.push(Sample {
                    origin,
                    locations_start_index,
                    locations_length: payload.frames.len(),
                    value: payload.value(origin),
                    timestamps: payload.timestamps.clone(),
                    attributes,
                });
            }
        }

        let (time_ns, end_ns) = time_range.unwrap_or((0, 0));
        let profile = Profile {
            pid,
            cgroup_id,
            time_ns,
            duration_ns: end_ns - time_ns,
            sample_types,
            string_table: builder.strings.into_vec(),
            function_table: builder.functions.into_vec(),
            mapping_table: builder.mappings.into_vec(),
            location_table: builder.locations.into_vec(),
            attribute_table: builder.attributes.into_entries(),
            location_indices: builder.location_indices,
            samples: builder.samples,
        };
        validate(&profile, self.max_table_entries)?;

        trace!(
            "Generated profile for {pid}: {} samples, {} locations, {} functions",
            profile.samples.len(),
            profile.location_table.len(),
            profile.function_table.len()
        );
        Ok(profile)
    }

    fn location(&self, builder: &mut Builder, frame: &Frame) -> usize {
        let key = frame.id();
        if let Some(idx) = builder.locations.lookup(&key) {
            return idx;
        }

        let executable = if frame.file_id.is_zero() {
            None
        } else {
            self.executables.get_and_refresh(&frame.file_id)
        };

        let mapping = executable.as_ref().map(|exe| {
            let strings = &mut builder.strings;
            builder.mappings.intern_with(frame.file_id, || Mapping {
                file_id: frame.file_id.encode(),
                filename: strings.intern(&exe.file_name),
                build_id: strings.intern(&exe.build_id),
            })
        });

        let line = match self.source_info(frame, executable.as_ref()) {
            Some(info) => {
                let name = builder.strings.intern(&info.function_name);
                let filename = builder.strings.intern(&info.file_path);
                let function = builder.functions.intern_with((name, filename), || Function { name, filename });
                Line { function, line: info.line_number }
            }
            None => {
                let name = builder.strings.intern(&format!("0x{:x}", frame.address_or_line));
                let filename = builder
                    .strings
                    .intern(executable.as_ref().map_or("", |exe| exe.file_name.as_str()));
                let function = builder.functions.intern_with((name, filename), || Function { name, filename });
                Line { function, line: 0 }
            }
        };

        let mut attributes = Vec::new();
        if !frame.file_id.is_zero() {
            attributes.push(
                builder
                    .attributes
                    .intern(LOCATION_FILE_ID, AttributeValue::Str(frame.file_id.encode())),
            );
        }

        builder.locations.intern_with(key, || Location {
            mapping,
            address: frame.address_or_line,
            lines: vec![line],
            attributes,
        })
    }

    fn source_info(&self, frame: &Frame, executable: Option<&ExecutableInfo>) -> Option<SourceInfo> {
        let id = frame.id();
        if let Some(info) = self.frames.get_and_refresh(&id) {
            return Some(info);
        }
        if frame.kind != InterpreterKind::Native {
            return None;
        }
        let info = executable?.resolver.as_ref()?.resolve(frame.address_or_line)?;
        self.frames.put(id, info.clone());
        Some(info)
    }
}

struct Builder {
    strings: StringTable,
    functions: DedupTable<(usize, usize), Function>,
    mappings: DedupTable<FileId, Mapping>,
    locations: DedupTable<FrameId, Location>,
    attributes: AttributeTable,
    location_indices: Vec<usize>,
    samples: Vec<Sample>,
}

impl Builder {
    fn new() -> Self {
        Self {
            strings: StringTable::new(),
            functions: DedupTable::new(),
            mappings: DedupTable::new(),
            locations: DedupTable::new(),
            attributes: AttributeTable::new(),
            location_indices: Vec::new(),
            samples: Vec::new(),
        }
    }
}

fn check_table(pid: Pid, table: &'static str, len: usize, max: usize) -> Result<(), GenerationError> {
    if len > max {
        return Err(GenerationError::TableOverflow { pid, table, max });
    }
    Ok(())
}

fn check_index(pid: Pid, what: &'static str, index: usize, len: usize) -> Result<(), GenerationError> {
    if index >= len {
        return Err(GenerationError::IndexOutOfRange { pid, what, index, len });
    }
    Ok(())
}

/// Check every cross reference of a finished profile
///
/// # Errors
/// Returns the first violation found
pub fn validate(profile: &Profile, max_table_entries: usize) -> Result<(), GenerationError> {
    let pid = profile.pid;
    let strings = profile.string_table.len();

    check_table(pid, "string", strings, max_table_entries)?;
    check_table(pid, "function", profile.function_table.len(), max_table_entries)?;
    check_table(pid, "mapping", profile.mapping_table.len(), max_table_entries)?;
    check_table(pid, "location", profile.location_table.len(), max_table_entries)?;
    check_table(pid, "attribute", profile.attribute_table.len(), max_table_entries)?;

    if profile.string_table.first().map(String::as_str) != Some("") {
        return Err(GenerationError::IndexOutOfRange { pid, what: "empty string", index: 0, len: strings });
    }

    for sample_type in &profile.sample_types {
        check_index(pid, "sample type name", sample_type.type_name, strings)?;
        check_index(pid, "sample type unit", sample_type.unit, strings)?;
    }
    for function in &profile.function_table {
        check_index(pid, "function name", function.name, strings)?;
        check_index(pid, "function filename", function.filename, strings)?;
    }
    for mapping in &profile.mapping_table {
        check_index(pid, "mapping filename", mapping.filename, strings)?;
        check_index(pid, "mapping build id", mapping.build_id, strings)?;
    }
    for location in &profile.location_table {
        if let Some(mapping) = location.mapping {
            check_index(pid, "mapping", mapping, profile.mapping_table.len())?;
        }
        for line in &location.lines {
            check_index(pid, "function", line.function, profile.function_table.len())?;
        }
        for &attribute in &location.attributes {
            check_index(pid, "attribute", attribute, profile.attribute_table.len())?;
        }
    }
    for &location in &profile.location_indices {
        check_index(pid, "location", location, profile.location_table.len())?;
    }

    let indices = profile.location_indices.len();
    for (idx, sample) in profile.samples.iter().enumerate() {
        let end = sample.locations_start_index.saturating_add(sample.locations_length);
        if sample.locations_length == 0 || end > indices {
            return Err(GenerationError::LocationRangeOutOfBounds {
                pid,
                sample: idx,
                start: sample.locations_start_index,
                end,
                len: indices,
            });
        }
        for &attribute in &sample.attributes {
            check_index(pid, "attribute", attribute, profile.attribute_table.len())?;
        }
    }
    Ok(())
}

/// Aggregation payloads of one origin, keyed by trace key
///
/// Convenience for building generator input by hand.
#[must_use]
pub fn single_origin<M: Hash + Eq>(
    origin: Origin,
    events: std::collections::HashMap<TraceKey<M>, TraceEvents>,
) -> OriginEvents<M> {
    let mut grouped = OriginEvents::new();
    grouped.insert(origin, events);
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{CpuAttrs, NoExtraAttrs, CPU_LOGICAL_NUMBER};
    use crate::domain::Tid;
    use crate::events::{Trace, TraceEventMeta};
    use crate::symbolization::LineResolver;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    struct Caches {
        executables: TtlCache<FileId, ExecutableInfo>,
        frames: TtlCache<FrameId, SourceInfo>,
    }

    impl Caches {
        fn new() -> Self {
            Self { executables: TtlCache::new(64).unwrap(), frames: TtlCache::new(64).unwrap() }
        }
    }

    struct FixedResolver;

    impl LineResolver for FixedResolver {
        fn resolve(&self, address: u64) -> Option<SourceInfo> {
            (address == 0x100).then(|| SourceInfo {
                function_name: "resolved_fn".to_string(),
                file_path: "src/lib.rs".to_string(),
                line_number: 42,
            })
        }
    }

    fn meta(tid: u32, ts: u64, origin: Origin, off_cpu_ns: u64) -> TraceEventMeta {
        TraceEventMeta {
            timestamp_ns: ts,
            pid: Pid(100),
            tid: Tid(tid),
            cpu: 2,
            comm: "worker".to_string(),
            executable_path: "/usr/bin/app".to_string(),
            origin,
            off_cpu_ns,
        }
    }

    fn add<M: Hash + Eq>(
        map: &mut HashMap<TraceKey<M>, TraceEvents>,
        trace: &Trace,
        meta: &TraceEventMeta,
        extra: M,
    ) {
        let key = TraceKey::new(trace, meta, extra);
        let events = TraceEvents::single(trace, meta);
        match map.get_mut(&key) {
            Some(existing) => existing.merge(events),
            None => {
                map.insert(key, events);
            }
        }
    }

    #[test]
    fn test_string_table_seeded_before_frames() {
        let caches = Caches::new();
        let generator = ProfileGenerator::new(&caches.executables, &caches.frames, &NoExtraAttrs);
        let profile = generator.generate(Pid(1), String::new(), &OriginEvents::new()).unwrap();

        assert_eq!(profile.string_table[..5], ["", "samples", "count", "off_cpu", "nanoseconds"]);
        assert!(profile.is_empty());
    }

    #[test]
    fn test_unresolved_frame_gets_hex_symbol_and_empty_filename() {
        let caches = Caches::new();
        let generator = ProfileGenerator::new(&caches.executables, &caches.frames, &NoExtraAttrs);

        let trace = Trace::new(vec![Frame::native(FileId(0xfeed), 0xdead_beef)]);
        let mut map = HashMap::new();
        add(&mut map, &trace, &meta(1, 10, Origin::Sampling, 0), ());
        let profile =
            generator.generate(Pid(100), String::new(), &single_origin(Origin::Sampling, map)).unwrap();

        let lines = profile.sample_lines(0).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].function, "0xdeadbeef");
        assert_eq!(lines[0].filename, "");
        // No executable registered, so no mapping
        assert!(profile.mapping_table.is_empty());
        assert_eq!(profile.location_table[0].attributes.len(), 1);
    }

    #[test]
    fn test_resolver_result_is_used_and_cached() {
        let caches = Caches::new();
        caches.executables.put(
            FileId(7),
            ExecutableInfo {
                file_name: "app".to_string(),
                build_id: "abc".to_string(),
                interp: InterpreterKind::Native,
                resolver: Some(Arc::new(FixedResolver)),
            },
        );
        let generator = ProfileGenerator::new(&caches.executables, &caches.frames, &NoExtraAttrs);

        let trace = Trace::new(vec![Frame::native(FileId(7), 0x100), Frame::native(FileId(7), 0x200)]);
        let mut map = HashMap::new();
        add(&mut map, &trace, &meta(1, 10, Origin::Sampling, 0), ());
        let profile =
            generator.generate(Pid(100), String::new(), &single_origin(Origin::Sampling, map)).unwrap();

        let lines = profile.sample_lines(0).unwrap();
        assert_eq!(lines[0].function, "resolved_fn");
        assert_eq!(lines[0].filename, "src/lib.rs");
        assert_eq!(lines[0].line, 42);
        // Unresolved address of a known executable uses its file name
        assert_eq!(lines[1].function, "0x200");
        assert_eq!(lines[1].filename, "app");

        assert!(caches.frames.contains(&FrameId::new(FileId(7), 0x100)));
        assert!(!caches.frames.contains(&FrameId::new(FileId(7), 0x200)));
        assert_eq!(profile.mapping_table.len(), 1);
        assert_eq!(profile.string(profile.mapping_table[0].build_id), Some("abc"));
    }

    #[test]
    fn test_cached_interpreter_frame_skips_resolver() {
        let caches = Caches::new();
        caches.frames.put(
            FrameId::new(FileId(9), 12),
            SourceInfo {
                function_name: "handle".to_string(),
                file_path: "app.py".to_string(),
                line_number: 12,
            },
        );
        let generator = ProfileGenerator::new(&caches.executables, &caches.frames, &NoExtraAttrs);

        let trace = Trace::new(vec![
            Frame::new(InterpreterKind::Python, FileId(9), 12),
            Frame::new(InterpreterKind::Python, FileId(9), 13),
        ]);
        let mut map = HashMap::new();
        add(&mut map, &trace, &meta(1, 10, Origin::Sampling, 0), ());
        let profile =
            generator.generate(Pid(100), String::new(), &single_origin(Origin::Sampling, map)).unwrap();

        let lines = profile.sample_lines(0).unwrap();
        assert_eq!(lines[0].function, "handle");
        assert_eq!(lines[1].function, "0xd");
    }

    #[test]
    fn test_tables_are_deduplicated_across_samples() {
        let caches = Caches::new();
        let generator = ProfileGenerator::new(&caches.executables, &caches.frames, &NoExtraAttrs);

        let shared = Frame::native(FileId(1), 0x10);
        let a = Trace::new(vec![Frame::native(FileId(1), 0x20), shared]);
        let b = Trace::new(vec![Frame::native(FileId(1), 0x30), shared]);
        let mut map = HashMap::new();
        add(&mut map, &a, &meta(1, 10, Origin::Sampling, 0), ());
        add(&mut map, &b, &meta(1, 11, Origin::Sampling, 0), ());
        add(&mut map, &b, &meta(2, 12, Origin::Sampling, 0), ());
        let profile =
            generator.generate(Pid(100), String::new(), &single_origin(Origin::Sampling, map)).unwrap();

        assert_eq!(profile.samples.len(), 3);
        assert_eq!(profile.location_table.len(), 3);
        assert_eq!(profile.location_indices.len(), 6);

        let functions: HashSet<_> =
            profile.function_table.iter().map(|f| (f.filename, f.name)).collect();
        assert_eq!(functions.len(), profile.function_table.len());

        let locations: HashSet<_> = profile.location_table.iter().map(|l| l.address).collect();
        assert_eq!(locations.len(), profile.location_table.len());

        // Same file id attribute shared by every location
        assert!(profile.location_table.iter().all(|l| l.attributes == profile.location_table[0].attributes));
    }

    #[test]
    fn test_leaf_frame_first_and_values_per_origin() {
        let caches = Caches::new();
        let generator = ProfileGenerator::new(&caches.executables, &caches.frames, &NoExtraAttrs);

        let trace = Trace::new(vec![Frame::native(FileId(0), 0x1), Frame::native(FileId(0), 0x2)]);
        let mut sampling = HashMap::new();
        for ts in [10, 20, 30] {
            add(&mut sampling, &trace, &meta(1, ts, Origin::Sampling, 0), ());
        }
        let mut off_cpu = HashMap::new();
        add(&mut off_cpu, &trace, &meta(1, 40, Origin::OffCpu, 1500), ());
        add(&mut off_cpu, &trace, &meta(1, 50, Origin::OffCpu, 500), ());

        let mut events = single_origin(Origin::Sampling, sampling);
        events.insert(Origin::OffCpu, off_cpu);
        let profile = generator.generate(Pid(100), "cg".to_string(), &events).unwrap();

        assert_eq!(profile.total(Origin::Sampling), 3);
        assert_eq!(profile.total(Origin::OffCpu), 2000);
        assert_eq!(profile.time_ns, 10);
        assert_eq!(profile.duration_ns, 40);
        assert_eq!(profile.cgroup_id, "cg");

        let lines = profile.sample_lines(0).unwrap();
        assert_eq!(lines[0].function, "0x1");
        assert_eq!(lines[1].function, "0x2");
    }

    #[test]
    fn test_standard_and_extra_attributes() {
        let caches = Caches::new();
        let generator = ProfileGenerator::new(&caches.executables, &caches.frames, &CpuAttrs);

        let trace = Trace::new(vec![Frame::native(FileId(0), 0x1)]);
        let m = meta(5, 10, Origin::Sampling, 0);
        let mut map = HashMap::new();
        add(&mut map, &trace, &m, m.cpu);
        let profile =
            generator.generate(Pid(100), String::new(), &single_origin(Origin::Sampling, map)).unwrap();

        let keys: Vec<&str> = profile.samples[0]
            .attributes
            .iter()
            .map(|&idx| profile.attribute_table[idx].key.as_str())
            .collect();
        assert_eq!(keys, vec![THREAD_NAME, THREAD_ID, PROCESS_EXECUTABLE_PATH, CPU_LOGICAL_NUMBER]);
    }

    #[test]
    fn test_empty_trace_fails_generation() {
        let caches = Caches::new();
        let generator = ProfileGenerator::new(&caches.executables, &caches.frames, &NoExtraAttrs);

        let trace = Trace::new(Vec::new());
        let mut map = HashMap::new();
        add(&mut map, &trace, &meta(1, 10, Origin::Sampling, 0), ());
        let err = generator
            .generate(Pid(100), String::new(), &single_origin(Origin::Sampling, map))
            .unwrap_err();
        assert!(matches!(err, GenerationError::EmptyTrace { pid: Pid(100), .. }));
    }

    #[test]
    fn test_table_overflow_fails_generation() {
        let caches = Caches::new();
        let generator = ProfileGenerator::new(&caches.executables, &caches.frames, &NoExtraAttrs)
            .with_max_table_entries(8);

        let frames = (0..16).map(|addr| Frame::native(FileId(0), addr)).collect();
        let trace = Trace::new(frames);
        let mut map = HashMap::new();
        add(&mut map, &trace, &meta(1, 10, Origin::Sampling, 0), ());
        let err = generator
            .generate(Pid(100), String::new(), &single_origin(Origin::Sampling, map))
            .unwrap_err();
        assert!(matches!(err, GenerationError::TableOverflow { max: 8, .. }));
    }

    #[test]
    fn test_validate_rejects_bad_location_range() {
        let caches = Caches::new();
        let generator = ProfileGenerator::new(&caches.executables, &caches.frames, &NoExtraAttrs);
        let trace = Trace::new(vec![Frame::native(FileId(0), 0x1)]);
        let mut map = HashMap::new();
        add(&mut map, &trace, &meta(1, 10, Origin::Sampling, 0), ());
        let mut profile =
            generator.generate(Pid(100), String::new(), &single_origin(Origin::Sampling, map)).unwrap();

        profile.samples[0].locations_length = 5;
        assert!(matches!(
            validate(&profile, MAX_TABLE_ENTRIES),
            Err(GenerationError::LocationRangeOutOfBounds { sample: 0, .. })
        ));
    }
}
