use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::block::ChunkType;

/// Early return with a [`ArscError::Malformed`] built from a format string.
#[macro_export]
macro_rules! fail {
    ($msg:literal) => {
        return Err($crate::block::error::ArscError::Malformed($msg.to_string()))
    };
    ($fmtstr:literal, $($args:tt)*) => {
        return Err($crate::block::error::ArscError::Malformed(format!($fmtstr, $($args)*)))
    };
}

/// Errors raised while reading, editing, encoding or writing resource chunks.
#[derive(Error, Debug)]
pub enum ArscError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Unexpected chunk {actual} at offset 0x{offset:x}, expected {expected}")]
    UnexpectedChunk {
        expected: String,
        actual: ChunkType,
        offset: usize,
    },

    #[error("Unexpected end of data reading {what} at offset 0x{offset:x}")]
    Truncated { what: &'static str, offset: usize },

    #[error("Malformed chunk: {0}")]
    Malformed(String),

    #[error("Can not resolve reference '{0}'")]
    UnresolvedReference(String),

    #[error("Invalid {kind} value: '{value}'")]
    InvalidValue { kind: &'static str, value: String },

    #[error("Can not merge different id packages: 0x{0:02x} != 0x{1:02x}")]
    PackageIdMismatch(u32, u32),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Missing required source: {0}")]
    MissingSource(PathBuf),
}

impl ArscError {
    pub(crate) fn invalid(kind: &'static str, value: impl Into<String>) -> Self {
        ArscError::InvalidValue {
            kind,
            value: value.into(),
        }
    }

    /// True for the structural class of errors (bad framing, truncation, I/O).
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ArscError::Io(_)
                | ArscError::UnexpectedChunk { .. }
                | ArscError::Truncated { .. }
                | ArscError::Malformed(_)
        )
    }
}

impl From<quick_xml::Error> for ArscError {
    fn from(value: quick_xml::Error) -> Self {
        ArscError::Xml(value.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for ArscError {
    fn from(value: quick_xml::events::attributes::AttrError) -> Self {
        ArscError::Xml(value.to_string())
    }
}

/// Result alias used across the crate.
pub type ArscResult<T> = Result<T, ArscError>;
