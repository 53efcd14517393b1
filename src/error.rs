//! Error taxonomy for the tool.
//!
//! Grounded on `cranelift/codegen/src/isa/fde.rs`'s `RegisterMappingError`:
//! a flat `thiserror` enum, one `#[error("...")]` message per variant, no
//! nested source chains beyond `#[from]` for I/O.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MvError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed ELF: {0}")]
    ElfMalformed(String),

    #[error("multiverse metadata layout violation: {0}")]
    LayoutViolation(String),

    #[error("could not decode instruction bytes at 0x{addr:x}: {reason}")]
    Decode { addr: u64, reason: String },

    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("address 0x{addr:x} is outside section `{section}`")]
    Range { addr: u64, section: String },
}

impl MvError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MvError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn decode(addr: u64, reason: impl Into<String>) -> Self {
        MvError::Decode {
            addr,
            reason: reason.into(),
        }
    }

    pub fn range(addr: u64, section: impl Into<String>) -> Self {
        MvError::Range {
            addr,
            section: section.into(),
        }
    }

    /// Process exit code for this error class.
    ///
    /// `UnknownVariable` is intentionally absent: callers treat it as a
    /// warning and never convert it into a terminal `MvError`.
    pub fn exit_code(&self) -> i32 {
        match self {
            MvError::Io { .. } => 2,
            MvError::ElfMalformed(_) => 3,
            MvError::LayoutViolation(_) => 4,
            MvError::Decode { .. } => 5,
            MvError::UnknownVariable(_) => 0,
            MvError::Range { .. } => 6,
        }
    }
}

pub type Result<T> = std::result::Result<T, MvError>;
