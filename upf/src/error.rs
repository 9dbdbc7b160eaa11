//! Error and warning types for the UPF reader and writer.

use semver::Version;
use std::fmt;
use thiserror::Error;

/// Structural problems: markers, nesting, root element, XML syntax.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {
    #[error("no recognizable UPF root block (neither <UPF> nor any <PP_*> marker)")]
    NoRootBlock,

    #[error("invalid UPF version string {0:?}")]
    InvalidVersion(String),

    #[error("<UPF> root element is never closed")]
    UnterminatedRoot,

    #[error("block <{block}> opened at line {line} has no matching end marker")]
    UnmatchedStart { block: String, line: usize },

    #[error("end marker </{block}> at line {line} has no matching start marker")]
    UnexpectedEnd { block: String, line: usize },

    #[error("block <{block}> at line {line} is nested too deeply inside <{parent}>")]
    NestingTooDeep {
        block: String,
        parent: String,
        line: usize,
    },

    #[error("block <{block}> appears twice (second occurrence at line {line})")]
    DuplicateBlock { block: String, line: usize },

    #[error("malformed markup in <{block}>: {message}")]
    Markup { block: String, message: String },
}

/// A value does not fit the field it sits in, or something required is absent.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("cannot read {token:?} as {expected} for field '{field}' of block '{block}'")]
    InvalidValue {
        block: String,
        field: String,
        token: String,
        expected: &'static str,
    },

    #[error("required field '{field}' is missing from block '{block}'")]
    MissingField { block: String, field: String },

    #[error("required block '{0}' is missing")]
    MissingBlock(String),

    #[error("block '{0}' does not exist")]
    UnknownBlock(String),

    #[error("field '{field}' of block '{block}' must be {expected}")]
    WrongType {
        block: String,
        field: String,
        expected: &'static str,
    },

    #[error("block '{0}' is kept verbatim and has no editable fields")]
    NotEditable(String),
}

/// Cross-block invariants, mostly array lengths against the declared mesh.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsistencyError {
    #[error("'{block}.{field}' holds {found} values but {expected} are declared")]
    LengthMismatch {
        block: String,
        field: String,
        expected: usize,
        found: usize,
    },

    #[error("'{block}.{field}' holds {found} values, more than the {mesh_size}-point mesh")]
    ExceedsMesh {
        block: String,
        field: String,
        mesh_size: usize,
        found: usize,
    },

    #[error("index {index} in '{block}.{field}' is outside 1..={bound}")]
    IndexOutOfRange {
        block: String,
        field: String,
        index: i64,
        bound: usize,
    },
}

/// The primary error type for all operations in this crate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpfError {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("consistency error: {0}")]
    Consistency(#[from] ConsistencyError),
}

pub type Result<T> = std::result::Result<T, UpfError>;

/// Non-fatal conditions met while reading. They travel with the document so
/// that callers can report, assert on or ignore them.
#[derive(Debug, Clone, PartialEq)]
pub enum UpfWarning {
    /// The file carries no version attribute; the legacy layout was assumed.
    VersionInferred { assumed: Version },
    /// The input was not valid UTF-8 and was decoded as Latin-1.
    Latin1Decoded,
}

impl fmt::Display for UpfWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpfWarning::VersionInferred { assumed } => {
                write!(f, "could not determine the UPF version, assuming v{}", assumed)
            }
            UpfWarning::Latin1Decoded => write!(f, "input is not UTF-8, decoded as Latin-1"),
        }
    }
}
