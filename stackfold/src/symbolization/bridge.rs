//! Seams between the reporter and whatever resolves symbols
//!
//! The reporter never opens executables itself. When it first sees an
//! executable it hands the [`SymbolResolver`] a deferred [`Opener`]; the
//! resolver may return a [`LineResolver`] that is kept alongside the
//! executable's metadata and queried lazily, one address at a time, while
//! profiles are generated.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::{FileId, InterpreterKind};

/// Deferred file-handle factory
///
/// Resolvers that do not need the file contents simply drop it.
pub type Opener = Box<dyn FnOnce() -> io::Result<Box<dyn Read + Send>> + Send>;

/// Opener reading the executable from a path on the local filesystem
#[must_use]
pub fn file_opener(path: impl Into<PathBuf>) -> Opener {
    let path = path.into();
    Box::new(move || {
        let file = File::open(&path)?;
        Ok(Box::new(file) as Box<dyn Read + Send>)
    })
}

/// Resolved source location of one address or interpreter line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceInfo {
    pub function_name: String,
    pub file_path: String,
    pub line_number: u32,
}

/// Per-executable address to source line lookup
pub trait LineResolver: Send + Sync {
    /// Resolve a file-relative address; `None` if the address is unknown
    fn resolve(&self, address: u64) -> Option<SourceInfo>;
}

/// Symbolization collaborator injected into the reporter
pub trait SymbolResolver: Send + Sync {
    /// Called once for every newly seen executable
    ///
    /// `file_id` is the executable's [`FileId`] in its encoded form.
    fn prepare_file(&self, file_name: &str, file_id: &str, opener: Opener)
        -> Option<Arc<dyn LineResolver>>;

    /// Whether this resolver already tracks the executable
    ///
    /// A `true` answer lets registration skip the executable entirely.
    fn executable_known(&self, _file_id: FileId) -> bool {
        false
    }

    /// Notification for every newly registered native executable
    fn executable_metadata(&self, _metadata: &ExecutableMetadata) {}
}

/// Resolver that never resolves anything
///
/// Every native frame is reported with the synthetic address fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResolver;

impl SymbolResolver for NoopResolver {
    fn prepare_file(&self, _: &str, _: &str, _: Opener) -> Option<Arc<dyn LineResolver>> {
        None
    }
}

/// Registration payload for an executable, as delivered by the capture layer
pub struct ExecutableMetadata {
    pub file_id: FileId,
    pub file_name: String,
    pub build_id: String,
    pub interp: InterpreterKind,
    /// Taken by the reporter when handing the executable to the resolver
    pub opener: Option<Opener>,
}

impl ExecutableMetadata {
    #[must_use]
    pub fn new(file_id: FileId, file_name: impl Into<String>, interp: InterpreterKind) -> Self {
        Self {
            file_id,
            file_name: file_name.into(),
            build_id: String::new(),
            interp,
            opener: None,
        }
    }

    #[must_use]
    pub fn with_build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = build_id.into();
        self
    }

    #[must_use]
    pub fn with_opener(mut self, opener: Opener) -> Self {
        self.opener = Some(opener);
        self
    }
}

impl fmt::Debug for ExecutableMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableMetadata")
            .field("file_id", &self.file_id)
            .field("file_name", &self.file_name)
            .field("build_id", &self.build_id)
            .field("interp", &self.interp)
            .field("opener", &self.opener.is_some())
            .finish()
    }
}

/// Already-symbolized interpreter frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    pub file_id: FileId,
    pub address_or_line: u64,
    pub function_name: String,
    pub file_path: String,
    pub line_number: u32,
}

impl FrameMetadata {
    #[must_use]
    pub fn source_info(&self) -> SourceInfo {
        SourceInfo {
            function_name: self.function_name.clone(),
            file_path: self.file_path.clone(),
            line_number: self.line_number,
        }
    }
}

/// Cached knowledge about one executable
#[derive(Clone)]
pub struct ExecutableInfo {
    pub file_name: String,
    pub build_id: String,
    pub interp: InterpreterKind,
    pub resolver: Option<Arc<dyn LineResolver>>,
}

impl fmt::Debug for ExecutableInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableInfo")
            .field("file_name", &self.file_name)
            .field("build_id", &self.build_id)
            .field("interp", &self.interp)
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_opener_reads_lazily() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\x7fELF").unwrap();

        let opener = file_opener(file.path());
        let mut contents = Vec::new();
        opener().unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"\x7fELF");
    }

    #[test]
    fn test_file_opener_missing_file_fails_on_call() {
        let opener = file_opener("/nonexistent/stackfold/binary");
        assert!(opener().is_err());
    }

    #[test]
    fn test_noop_resolver_never_prepares() {
        let opener: Opener =
            Box::new(|| -> io::Result<Box<dyn Read + Send>> { panic!("opener must not be called") });
        assert!(NoopResolver.prepare_file("app", "00", opener).is_none());
        assert!(!NoopResolver.executable_known(FileId(1)));
    }

    #[test]
    fn test_frame_metadata_to_source_info() {
        let frame = FrameMetadata {
            file_id: FileId(3),
            address_or_line: 12,
            function_name: "handler".to_string(),
            file_path: "app.py".to_string(),
            line_number: 12,
        };
        let info = frame.source_info();
        assert_eq!(info.function_name, "handler");
        assert_eq!(info.line_number, 12);
    }
}
