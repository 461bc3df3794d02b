//! # Symbol Resolution Bridge
//!
//! Converts frame identifiers `(file id, address)` into function names,
//! source files and line numbers, lazily and only for frames that actually
//! show up in a flushed profile.
//!
//! ## How resolution flows
//!
//! ```text
//! capture layer                                     registration path
//!   ├─ TraceReporter::executable_known(file id)?   ── yes → skip
//!   │     (executables cache, then SymbolResolver::executable_known)
//!   │
//! executable_metadata(file id, name, opener)
//!   ├─ already in the executables cache?           ── yes → skip
//!   ├─ SymbolResolver::prepare_file(name, hex id, opener)
//!   │     └─ Some(LineResolver) stored in the executables cache
//!   │
//! generate profile                                    flush path
//!   │
//!   ├─ frames cache hit?                           ── yes → real line
//!   ├─ executable's LineResolver::resolve(addr)    ── Some → cache + real line
//!   └─ synthetic line: symbol "0x<addr>"
//! ```
//!
//! Interpreter frames skip the resolver: the capture layer reports them
//! already symbolized through `frame_metadata`, which writes straight into
//! the frames cache.
//!
//! ## Module Structure
//!
//! - **`bridge`**: the `SymbolResolver` / `LineResolver` traits and the
//!   registration payloads
//! - **`symbolizer`**: DWARF-backed resolver built on `addr2line`, `gimli`
//!   and `object`, with an ELF symbol table fallback for binaries without
//!   debug info
//!
//! ## Limitations
//!
//! - **File-relative addresses only**: the capture layer is expected to
//!   have removed the load bias already
//! - **Innermost inlined frame**: one source line per address

pub mod bridge;
pub mod symbolizer;

pub use bridge::{
    file_opener, ExecutableInfo, ExecutableMetadata, FrameMetadata, LineResolver, NoopResolver,
    Opener, SourceInfo, SymbolResolver,
};
pub use symbolizer::{DwarfResolver, InlinedFrame, Symbolizer};
