use addr2line::Context;
use anyhow::{bail, Context as _, Result};
use gimli::{EndianArcSlice, RunTimeEndian};
use log::debug;
use object::{Object, ObjectSection, ObjectSymbol, SymbolKind};
use parking_lot::Mutex;
use rustc_demangle::demangle;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use super::bridge::{ExecutableMetadata, LineResolver, Opener, SourceInfo, SymbolResolver};

/// Largest executable [`DwarfResolver`] loads into memory by default
pub const DEFAULT_MAX_FILE_SIZE: u64 = 512 * 1024 * 1024;

/// Symbolizer for resolving file-relative addresses to source locations
///
/// DWARF line information is used when present; otherwise the ELF symbol
/// table provides at least the enclosing function name.
pub struct Symbolizer {
    ctx: Mutex<Context<EndianArcSlice<RunTimeEndian>>>,
    /// Function symbols sorted by start address
    symbols: Vec<(u64, String)>,
}

impl Symbolizer {
    /// Create a new symbolizer for the given binary
    ///
    /// # Errors
    /// Returns an error if the binary file cannot be read or parsed, or if it
    /// carries neither DWARF debug info nor a symbol table
    pub fn new<P: AsRef<Path>>(binary_path: P) -> Result<Self> {
        let binary_data = fs::read(binary_path.as_ref()).context("Failed to read binary file")?;
        Self::from_bytes(&binary_data)
    }

    /// Create a symbolizer from an in-memory object file
    ///
    /// # Errors
    /// Same as [`Symbolizer::new`], minus the read
    pub fn from_bytes(binary_data: &[u8]) -> Result<Self> {
        let obj_file = object::File::parse(binary_data).context("Failed to parse object file")?;

        let endian =
            if obj_file.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

        let load_section =
            |id: gimli::SectionId| -> Result<EndianArcSlice<RunTimeEndian>, gimli::Error> {
                let data = obj_file
                    .section_by_name(id.name())
                    .and_then(|section| section.uncompressed_data().ok())
                    .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
                Ok(EndianArcSlice::new(Arc::from(&*data), endian))
            };

        let dwarf = gimli::Dwarf::load(&load_section)?;
        let ctx = Context::from_dwarf(dwarf).context("Failed to load DWARF debug information")?;

        let mut symbols: Vec<(u64, String)> = obj_file
            .symbols()
            .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.address() != 0)
            .filter_map(|symbol| {
                let name = symbol.name().ok()?;
                Some((symbol.address(), Self::demangle_symbol(name)))
            })
            .collect();
        symbols.sort_unstable_by_key(|(address, _)| *address);
        symbols.dedup_by_key(|(address, _)| *address);

        if obj_file.section_by_name(".debug_info").is_none() && symbols.is_empty() {
            bail!("No DWARF debug info and no function symbols");
        }

        Ok(Self { ctx: Mutex::new(ctx), symbols })
    }

    /// Resolve an address to its frames, innermost inlined function first
    ///
    /// Returns an empty list if neither DWARF nor the symbol table know the
    /// address.
    pub fn resolve_frames(&self, addr: u64) -> Vec<InlinedFrame> {
        let mut result = Vec::new();

        {
            let ctx = self.ctx.lock();
            let lookup = ctx.find_frames(addr).skip_all_loads();
            if let Ok(mut frame_iter) = lookup {
                while let Ok(Some(frame)) = frame_iter.next() {
                    let function =
                        frame.function.and_then(|f| f.demangle().ok().map(|s| s.to_string()));
                    let (file, line) = frame
                        .location
                        .map_or((None, None), |loc| (loc.file.map(str::to_string), loc.line));
                    result.push(InlinedFrame { function, file, line });
                }
            };
        }

        if result.iter().all(|frame| frame.function.is_none()) {
            if let Some(name) = self.symbol_for(addr) {
                let function = Some(name.to_string());
                match result.first_mut() {
                    Some(frame) => frame.function = function,
                    None => result.push(InlinedFrame { function, file: None, line: None }),
                }
            }
        }

        result
    }

    /// Nearest function symbol starting at or below `addr`
    fn symbol_for(&self, addr: u64) -> Option<&str> {
        let idx = self.symbols.partition_point(|(start, _)| *start <= addr);
        idx.checked_sub(1).map(|i| self.symbols[i].1.as_str())
    }

    /// Demangle a Rust symbol name
    #[must_use]
    pub fn demangle_symbol(symbol: &str) -> String {
        format!("{:#}", demangle(symbol))
    }
}

impl LineResolver for Symbolizer {
    fn resolve(&self, address: u64) -> Option<SourceInfo> {
        let frame = self.resolve_frames(address).into_iter().next()?;
        Some(SourceInfo {
            function_name: frame.function?,
            file_path: frame.file.unwrap_or_default(),
            line_number: frame.line.unwrap_or(0),
        })
    }
}

/// One (possibly inlined) function at a resolved address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlinedFrame {
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// [`SymbolResolver`] that loads DWARF and symbol tables from the
/// executable's contents
pub struct DwarfResolver {
    max_file_size: u64,
}

impl Default for DwarfResolver {
    fn default() -> Self {
        Self { max_file_size: DEFAULT_MAX_FILE_SIZE }
    }
}

impl DwarfResolver {
    #[must_use]
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    fn load(&self, opener: Opener) -> Result<Symbolizer> {
        let reader = opener().context("Failed to open executable")?;
        let mut data = Vec::new();
        reader
            .take(self.max_file_size.saturating_add(1))
            .read_to_end(&mut data)
            .context("Failed to read executable")?;
        if u64::try_from(data.len()).unwrap_or(u64::MAX) > self.max_file_size {
            bail!("Executable exceeds {} bytes", self.max_file_size);
        }
        Symbolizer::from_bytes(&data)
    }
}

impl SymbolResolver for DwarfResolver {
    fn prepare_file(
        &self,
        file_name: &str,
        file_id: &str,
        opener: Opener,
    ) -> Option<Arc<dyn LineResolver>> {
        match self.load(opener) {
            Ok(symbolizer) => {
                debug!("Prepared line resolver for {file_name} ({file_id})");
                Some(Arc::new(symbolizer))
            }
            Err(e) => {
                debug!("No line resolver for {file_name} ({file_id}): {e:#}");
                None
            }
        }
    }

    fn executable_metadata(&self, metadata: &ExecutableMetadata) {
        debug!(
            "Native executable {} ({}) build id '{}'",
            metadata.file_name, metadata.file_id, metadata.build_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolization::bridge::file_opener;

    #[test]
    fn test_demangle_symbol() {
        assert_eq!(
            Symbolizer::demangle_symbol("_ZN4core3fmt5write17h0123456789abcdefE"),
            "core::fmt::write"
        );
        assert_eq!(Symbolizer::demangle_symbol("main"), "main");
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(Symbolizer::from_bytes(b"definitely not an object file").is_err());
    }

    #[test]
    fn test_resolver_returns_none_for_unreadable_file() {
        let resolver = DwarfResolver::default();
        assert!(resolver.prepare_file("missing", "00", file_opener("/nonexistent/bin")).is_none());
    }

    #[test]
    fn test_resolver_enforces_size_limit() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, &[0u8; 64]).unwrap();
        let resolver = DwarfResolver::new(16);
        let err = resolver.load(file_opener(file.path())).err().unwrap();
        assert!(err.to_string().contains("exceeds 16 bytes"));
    }

    #[test]
    fn test_resolve_frames_on_own_text_symbols() {
        let binary = std::fs::read(std::env::current_exe().unwrap()).unwrap();
        let symbolizer = Symbolizer::from_bytes(&binary).unwrap();
        let file = object::File::parse(binary.as_slice()).unwrap();
        let addresses: Vec<u64> = file
            .symbols()
            .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.is_definition())
            .map(|symbol| symbol.address())
            .filter(|&address| address != 0)
            .take(8)
            .collect();
        assert!(!addresses.is_empty());

        let named = addresses
            .iter()
            .filter(|&&address| {
                symbolizer.resolve_frames(address).first().is_some_and(|frame| frame.function.is_some())
            })
            .count();
        assert!(named > 0);
    }
}
