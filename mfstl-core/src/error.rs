//! Error types for package reading and STL encoding.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that abort a conversion.
///
/// Missing references, empty geometry, degenerate triangles and cyclic
/// component graphs are not errors; they shrink the output instead.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The source file could not be opened or stat'ed.
    #[error("failed to read {path}: {source}")]
    Source {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Writing encoded output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The input is not a readable zip archive.
    #[error("invalid 3MF archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// The archive holds no model document.
    #[error("3MF archive does not contain a .model document")]
    NoModelDocument,

    /// A model document is not well-formed XML.
    #[error("malformed XML in {document}: {source}")]
    Xml {
        /// Normalized archive path of the document.
        document: String,
        /// Parser error.
        #[source]
        source: roxmltree::Error,
    },

    /// A model document is not valid UTF-8.
    #[error("model document {document} is not valid UTF-8: {source}")]
    Encoding {
        /// Normalized archive path of the document.
        document: String,
        /// Decoding error.
        #[source]
        source: std::string::FromUtf8Error,
    },

    /// A numeric attribute is present but unparsable.
    #[error("invalid {attribute}=\"{value}\" on <{element}> in {document}")]
    InvalidAttribute {
        /// Normalized archive path of the document.
        document: String,
        /// Element local name.
        element: &'static str,
        /// Attribute local name.
        attribute: &'static str,
        /// Raw attribute value.
        value: String,
    },

    /// Vertex or triangle counts do not fit the 32-bit fields of the output.
    #[error("flattened mesh is too large: {count} {what}")]
    MeshTooLarge {
        /// What overflowed ("vertices" or "triangles").
        what: &'static str,
        /// The offending count.
        count: usize,
    },

    /// Binary STL input could not be decoded.
    #[error("invalid binary STL: {message}")]
    InvalidStl {
        /// Description of what was invalid.
        message: String,
    },
}

impl CodecError {
    /// Create an `InvalidStl` error with the given message.
    #[must_use]
    pub fn invalid_stl(message: impl Into<String>) -> Self {
        Self::InvalidStl {
            message: message.into(),
        }
    }

    /// True for failures caused by the archive container rather than its documents.
    #[must_use]
    pub fn is_archive_error(&self) -> bool {
        matches!(self, Self::Archive(_) | Self::NoModelDocument)
    }
}
