//! Alignment template databases.
//!
//! A template database is an ordered list of labeled template sequences that
//! translated reads are aligned against. Databases come from IMGT-style
//! FASTA files or from single user-supplied sequences. Entries are addressed
//! by 1-based index; 0 is reserved as [`TemplateDatabase::NOT_FOUND`].

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::align::{nw_align, Alignment, Matrix, BLOSUM62, CDNSUBS};
use crate::errors::{DsaError, Result};
use crate::polymer::{Aas, Cdns, Monomer, Nts, Polymer};

/// One template: a label plus the codon and residue renditions of its
/// sequence. `cdns` is empty for protein-only templates.
#[derive(Clone, Debug)]
pub struct TemplateDatabaseEntry {
    pub label: String,
    pub cdns: Cdns,
    pub aas: Aas,
}

/// IMGT allelic variants (`*02` through `*09`) are suppressed at load time.
static ALLELIC_VARIANT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*0[2-9]$").expect("fixed pattern compiles"));

/// An ordered, 1-indexed collection of alignment templates.
#[derive(Clone, Debug, Default)]
pub struct TemplateDatabase {
    entries: Vec<TemplateDatabaseEntry>,
    gap_penalty: i32,
}

impl TemplateDatabase {
    /// Returned by queries against an empty database.
    pub const NOT_FOUND: u64 = 0;

    /// Creates an empty database with the default gap penalty.
    #[must_use]
    pub fn new() -> TemplateDatabase {
        TemplateDatabase { entries: Vec::new(), gap_penalty: 4 }
    }

    /// Loads a database from an IMGT-style FASTA file.
    ///
    /// Headers are split on `|`; with two or more fields the second is the
    /// identifier, otherwise the whole header (minus the `>`) is. Records
    /// whose identifier ends in an allelic-variant suffix (`*02`..`*09`) are
    /// skipped. Sequence lines are ingested as DNA (non-ACGT bytes dropped),
    /// packed to codons, and translated.
    ///
    /// # Errors
    /// Fails when the file cannot be read, a header has no identifier,
    /// sequence data precedes the first header, or no records remain.
    pub fn from_imgt_fasta(path: &Path) -> Result<TemplateDatabase> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DsaError::TemplateDbOpen { path: path.to_path_buf(), source: e })?;

        let mut entries = Vec::new();
        let mut label = String::new();
        let mut nts = Nts::new();

        let flush = |label: &mut String, nts: &mut Nts, entries: &mut Vec<TemplateDatabaseEntry>| {
            if !label.is_empty() {
                if !ALLELIC_VARIANT.is_match(label) {
                    let cdns = Cdns::from(std::mem::take(nts));
                    let aas = Aas::from(cdns.clone());
                    entries.push(TemplateDatabaseEntry { label: std::mem::take(label), cdns, aas });
                } else {
                    label.clear();
                    nts.clear();
                }
            }
        };

        for (line_index, raw) in text.lines().enumerate() {
            let line_no = line_index + 1;
            let line = raw.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            if let Some(header) = line.strip_prefix('>') {
                flush(&mut label, &mut nts, &mut entries);

                let fields: Vec<&str> = header.split('|').collect();
                let identifier = if fields.len() == 1 { fields[0] } else { fields[1] };
                if identifier.is_empty() {
                    return Err(DsaError::TemplateDbBadHeader {
                        header: line.to_string(),
                        line: line_no,
                        reason: "identifier field is empty".to_string(),
                    });
                }
                label = identifier.to_string();
            } else if label.is_empty() {
                return Err(DsaError::TemplateDbOrphanSequence {
                    data: line.to_string(),
                    line: line_no,
                });
            } else {
                nts.push_ascii(line.as_bytes());
            }
        }
        flush(&mut label, &mut nts, &mut entries);

        if entries.is_empty() {
            return Err(DsaError::TemplateDbEmpty { path: path.to_path_buf() });
        }

        Ok(TemplateDatabase { entries, gap_penalty: 4 })
    }

    /// Appends an entry. No check that `aas` is the translation of `cdns`.
    pub fn add_entry(&mut self, label: &str, cdns: Cdns, aas: Aas) {
        self.entries.push(TemplateDatabaseEntry { label: label.to_string(), cdns, aas });
    }

    /// Trims `left` and `right` residues (and codons, where present) off
    /// every entry.
    ///
    /// # Errors
    /// Fails with [`DsaError::ExcessiveTrim`] if any entry would lose its
    /// whole sequence; the database must be discarded on failure.
    pub fn trim(&mut self, (left, right): (usize, usize)) -> Result<()> {
        let total = left + right;
        for entry in &mut self.entries {
            if total >= entry.aas.len() {
                return Err(DsaError::ExcessiveTrim {
                    label: entry.label.clone(),
                    requested: total,
                    len: entry.aas.len(),
                });
            }
            entry.aas.exo(left, right);
            if !entry.cdns.is_empty() {
                entry.cdns.exo(left, right);
            }
        }
        Ok(())
    }

    /// True when every query can run at codon resolution: the database is
    /// non-empty and its first entry carries codon data.
    #[must_use]
    pub fn codon_data_available(&self) -> bool {
        !self.entries.is_empty() && !self.entries[0].cdns.is_empty()
    }

    #[must_use]
    pub fn gap_penalty(&self) -> i32 {
        self.gap_penalty
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The label of entry `id` (1-based).
    ///
    /// # Panics
    /// Panics if `id` is 0 or out of range.
    #[must_use]
    pub fn label(&self, id: u64) -> &str {
        &self.entries[(id - 1) as usize].label
    }

    /// The codon sequence of entry `id` (1-based).
    #[must_use]
    pub fn cdns(&self, id: u64) -> &Cdns {
        &self.entries[(id - 1) as usize].cdns
    }

    /// The residue sequence of entry `id` (1-based).
    #[must_use]
    pub fn aas(&self, id: u64) -> &Aas {
        &self.entries[(id - 1) as usize].aas
    }

    pub fn entries(&self) -> impl Iterator<Item = &TemplateDatabaseEntry> {
        self.entries.iter()
    }

    fn query_generic<M, F>(
        &self,
        q: &Polymer<M>,
        entry_seq: F,
        matrix: &Matrix<i32>,
        result: &mut Alignment,
    ) -> u64
    where
        M: Monomer,
        F: Fn(&TemplateDatabaseEntry) -> &Polymer<M>,
    {
        let mut best = Self::NOT_FOUND;
        result.clear();
        result.score = i32::MIN;

        let mut current = Alignment::default();
        for (i, entry) in self.entries.iter().enumerate() {
            nw_align(q, entry_seq(entry), matrix, self.gap_penalty, &mut current, true);
            if current.score > result.score {
                best = (i + 1) as u64;
                std::mem::swap(result, &mut current);
            }
        }
        best
    }

    /// Aligns a codon query against every entry with `CDNSUBS` and returns
    /// the 1-based index of the best-scoring one (ties keep the first). The
    /// winning alignment lands in `result`. Returns
    /// [`TemplateDatabase::NOT_FOUND`] only for an empty database.
    pub fn query_and_align_cdns(&self, q: &Cdns, result: &mut Alignment) -> u64 {
        self.query_generic(q, |e| &e.cdns, &CDNSUBS, result)
    }

    /// Residue-level variant of [`TemplateDatabase::query_and_align_cdns`],
    /// scored with BLOSUM62.
    pub fn query_and_align_aas(&self, q: &Aas, result: &mut Alignment) -> u64 {
        self.query_generic(q, |e| &e.aas, &BLOSUM62, result)
    }
}

/// A composite template minted by the interning step of multi-template
/// alignment: one label (and sequence contribution) per split slot.
///
/// Identity is the label vector; two composite templates with equal labels
/// are the same template regardless of id.
#[derive(Clone, Debug, Default)]
pub struct AlignmentTemplate {
    /// 1-based mint order; 0 only for the default value.
    pub id: u64,
    /// Per-slot entry labels, `"none"` for pass-through slots.
    pub labels: Vec<String>,
    /// Concatenated residue sequences of the member entries.
    pub aas: Aas,
    /// Concatenated codon sequences of the member entries.
    pub cdns: Cdns,
}

impl AlignmentTemplate {
    /// The labels joined for display.
    #[must_use]
    pub fn label(&self) -> String {
        self.labels.join(" / ")
    }
}

impl PartialEq for AlignmentTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.labels == other.labels
    }
}

impl Eq for AlignmentTemplate {}
