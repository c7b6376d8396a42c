//! Error types for dsa operations.
//!
//! Fatal conditions (bad configuration, unreadable inputs, malformed template
//! databases, excessive trimming) surface through [`DsaError`]. Per-read
//! failures are never errors: they are counted in
//! [`ParseLog`](crate::pipeline::ParseLog) and the offending record is
//! dropped.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for dsa operations
pub type Result<T> = std::result::Result<T, DsaError>;

/// Error type for dsa operations
#[derive(Error, Debug)]
pub enum DsaError {
    /// Invalid parameter value or mutually exclusive options
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// A UMI reference pattern contained a character other than A, C, G, T, N, or n
    #[error("Invalid UMI reference '{pattern}': only A, C, G, T, N, and n are allowed")]
    InvalidUmiPattern {
        /// The offending pattern
        pattern: String,
    },

    /// A file could not be opened or mapped into memory
    #[error("Could not read '{path}': {source}")]
    Io {
        /// Path to the file
        path: PathBuf,
        /// The underlying I/O error
        source: std::io::Error,
    },

    /// A template database file could not be opened
    #[error("Template database '{path}' could not be opened: {source}")]
    TemplateDbOpen {
        /// Path to the file
        path: PathBuf,
        /// The underlying I/O error
        source: std::io::Error,
    },

    /// A FASTA header was missing its identifier field
    #[error("Bad header '{header}' on line {line}: {reason}")]
    TemplateDbBadHeader {
        /// The header line as read
        header: String,
        /// 1-based line number
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    /// Sequence data appeared before the first FASTA header
    #[error("Unexpected sequence data '{data}' on line {line}")]
    TemplateDbOrphanSequence {
        /// The sequence line as read
        data: String,
        /// 1-based line number
        line: usize,
    },

    /// A template database file contained no records
    #[error("No FASTA records found in '{path}'")]
    TemplateDbEmpty {
        /// Path to the file
        path: PathBuf,
    },

    /// A trim request exceeded the length of a template
    #[error(
        "Cannot trim {requested} amino acids from '{label}', a template of only {len} amino acids"
    )]
    ExcessiveTrim {
        /// Label of the offending template entry
        label: String,
        /// Total residues requested (left + right)
        requested: usize,
        /// Length of the template
        len: usize,
    },
}
