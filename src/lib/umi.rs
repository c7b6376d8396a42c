//! UMI barcode extraction from reference patterns.
//!
//! A reference pattern is ASCII over `{A, C, G, T, N, n}`. Uppercase bases
//! match literally, `N` matches any base without capturing, and each run of
//! lowercase `n` becomes one capture group of that many wildcard positions.
//! The extractor searches a read for the pattern and concatenates whatever
//! the capture groups matched into the UMI barcode.

use bstr::BString;
use regex::bytes::Regex;

use crate::errors::{DsaError, Result};

/// Sentinel match position when the reference was not found.
pub const NPOS: usize = usize::MAX;

/// The result of one extraction attempt.
#[derive(Clone, Debug)]
pub struct ExtractedUmi {
    /// Concatenated capture-group contents; empty when the pattern captures
    /// nothing or was not found.
    pub barcode: BString,
    /// Index of the first matched base, or [`NPOS`].
    pub from: usize,
    /// Length of the match; 0 when not found.
    pub length: usize,
}

impl Default for ExtractedUmi {
    fn default() -> Self {
        ExtractedUmi { barcode: BString::default(), from: NPOS, length: 0 }
    }
}

impl ExtractedUmi {
    /// True if the reference was found.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.length != 0
    }
}

/// Compiles a reference pattern and extracts UMI barcodes from reads.
#[derive(Clone, Debug)]
pub struct UmiExtractor {
    regex: Regex,
    pattern: String,
    sequence: String,
}

impl UmiExtractor {
    /// Compiles `sequence` into a case-insensitive search pattern.
    ///
    /// # Errors
    /// Returns [`DsaError::InvalidUmiPattern`] when `sequence` contains a
    /// character outside `{A, C, G, T, N, n}` (case-insensitive for the
    /// literal bases).
    pub fn new(sequence: &str) -> Result<UmiExtractor> {
        let mut normalized = String::with_capacity(sequence.len());
        for c in sequence.chars() {
            let c = if c == 'n' || c == 'N' { c } else { c.to_ascii_uppercase() };
            if !"ACGTNn".contains(c) {
                return Err(DsaError::InvalidUmiPattern { pattern: sequence.to_string() });
            }
            normalized.push(c);
        }

        let mut pattern = String::with_capacity(normalized.len() + 8);
        let mut capturing = false;
        for c in normalized.chars() {
            match (capturing, c) {
                (false, 'n') => {
                    pattern.push('(');
                    pattern.push('.');
                    capturing = true;
                }
                (true, 'n') => pattern.push('.'),
                (true, other) => {
                    pattern.push(')');
                    pattern.push(if other == 'N' { '.' } else { other });
                    capturing = false;
                }
                (false, other) => pattern.push(if other == 'N' { '.' } else { other }),
            }
        }
        if capturing {
            pattern.push(')');
        }

        let regex = Regex::new(&format!("(?i){pattern}"))
            .map_err(|_| DsaError::InvalidUmiPattern { pattern: sequence.to_string() })?;

        Ok(UmiExtractor { regex, pattern, sequence: normalized })
    }

    /// Searches `dna` for the reference (non-anchored) and returns the
    /// extraction result; invalid when the reference was not found.
    #[must_use]
    pub fn extract(&self, dna: &[u8]) -> ExtractedUmi {
        let Some(caps) = self.regex.captures(dna) else {
            return ExtractedUmi::default();
        };
        let whole = caps.get(0).expect("group 0 always participates");

        let mut barcode = BString::default();
        for i in 1..caps.len() {
            if let Some(group) = caps.get(i) {
                barcode.extend_from_slice(group.as_bytes());
            }
        }

        ExtractedUmi { barcode, from: whole.start(), length: whole.len() }
    }

    /// The reference sequence as supplied (normalized to uppercase literals).
    #[must_use]
    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    /// The regular expression text built from the reference.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}
