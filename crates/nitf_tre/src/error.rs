//! Error types that can be emitted from this library

use std::path::PathBuf;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent wrapper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// A field declares more bytes than the record has left
    #[error("{tag}: field {field} needs {needed} bytes but only {available} remain")]
    #[diagnostic(code(nitf_tre::truncated_record))]
    TruncatedRecord {
        tag: String,
        field: String,
        needed: usize,
        available: usize,
    },

    /// A length, count or condition could not be evaluated against the data
    #[error("{tag}: {reason}")]
    #[diagnostic(code(nitf_tre::invalid_record))]
    InvalidRecord { tag: String, reason: String },

    /// A field the description requires is missing from the field table
    #[error("{tag}: required field {field} is not set")]
    #[diagnostic(code(nitf_tre::incomplete_record))]
    IncompleteRecord { tag: String, field: String },

    /// No description is registered for the tag at the observed length
    #[error("no handler registered for {tag} with length {length}")]
    #[diagnostic(code(nitf_tre::unknown_tre))]
    UnknownTre { tag: String, length: usize },

    /// A handler module could not be loaded
    #[error("unable to load handler module {}: {reason}", path.display())]
    #[diagnostic(code(nitf_tre::module_load))]
    ModuleLoad { path: PathBuf, reason: String },

    /// A description program is not well formed
    #[error("description {name} is malformed: {reason}")]
    #[diagnostic(code(nitf_tre::malformed_program))]
    MalformedProgram { name: String, reason: String },

    /// Catalog text could not be parsed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Catalog(#[from] CatalogError),

    /// A path names no field the description can produce
    #[error("{tag} has no field {field}")]
    UnknownField { tag: String, field: String },

    /// A value does not fit the field it is assigned to
    #[error("{tag}: cannot set {field}: {reason}")]
    InvalidField {
        tag: String,
        field: String,
        reason: String,
    },

    /// Two registrations compete for the same tag and length
    #[error("{tag} already has a description for length {length}")]
    DuplicateCandidate { tag: String, length: String },

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

/// Syntax or content error inside catalog text, pointing at the offending source
#[derive(Error, Diagnostic, Debug)]
#[error("invalid catalog: {message}")]
#[diagnostic(code(nitf_tre::catalog))]
pub struct CatalogError {
    pub message: String,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("here")]
    pub span: SourceSpan,
}

impl Error {
    pub(crate) fn invalid(tag: &str, reason: impl Into<String>) -> Self {
        Error::InvalidRecord {
            tag: tag.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(name: &str, reason: impl Into<String>) -> Self {
        Error::MalformedProgram {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
