//! Run configuration.
//!
//! The pipeline consumes a plain [`Config`] record; how it is populated
//! (clap in the `dsa` binary, literals in tests) is not its concern.

use std::path::PathBuf;

use regex::Regex;

use crate::errors::{DsaError, Result};
use crate::polymer::{Aas, Cdns};

/// Where a template database comes from.
#[derive(Clone, Debug)]
pub enum TemplateSource {
    /// An IMGT-style FASTA file of in-frame DNA templates.
    Fasta(PathBuf),
    /// A single user-supplied DNA template, packed to codons.
    Dna(Cdns),
    /// A single user-supplied protein template; empty means a pass-through
    /// slot with no alignment.
    Protein(Aas),
}

/// How codon-level data accompanies each alignment in the report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CodonOutput {
    /// No codon output.
    #[default]
    None,
    /// One packed ASCII byte per codon.
    Ascii,
    /// One DNA line per alignment.
    Horizontal,
    /// Three vertically aligned DNA rows per alignment.
    Vertical,
}

impl std::str::FromStr for CodonOutput {
    type Err = DsaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(CodonOutput::None),
            "ascii" => Ok(CodonOutput::Ascii),
            "horizontal" => Ok(CodonOutput::Horizontal),
            "vertical" => Ok(CodonOutput::Vertical),
            _ => Err(DsaError::InvalidParameter {
                parameter: "show_codons".to_string(),
                reason: format!("'{s}' is not one of none, ascii, horizontal, vertical"),
            }),
        }
    }
}

/// Analysis settings, populated from the command line.
#[derive(Clone, Debug)]
pub struct Config {
    /// Forward-read FASTQ path.
    pub fw_path: PathBuf,
    /// Reverse-read FASTQ path.
    pub rv_path: PathBuf,
    /// Forward reference patterns, tried in order.
    pub fw_refs: Vec<String>,
    /// Reverse reference patterns, tried in order.
    pub rv_refs: Vec<String>,
    /// The split pattern as given, for the report.
    pub split_pattern: String,
    /// The compiled split pattern, anchored at both ends.
    pub split_regex: Option<Regex>,
    /// Template sources, one per split slot, in command-line order.
    pub template_sources: Vec<TemplateSource>,
    /// (left, right) residue trims, one per template source (or empty).
    pub trims: Vec<(usize, usize)>,
    /// Acceptance threshold on score / template-self-score.
    pub min_alignment_score: f32,
    /// 3' bases below this FASTQ quality are trimmed.
    pub min_qual: u8,
    /// Minimum reads per UMI group.
    pub min_umi_group_size: usize,
    /// Minimum 3' overlap for pair assembly.
    pub min_overlap: usize,
    /// Maximum mismatches tolerated inside the assembly overlap.
    pub max_mismatches: usize,
    /// Offset added to template positions in report headers.
    pub number_from: usize,
    /// Codon rendition in the alignments table.
    pub codon_output: CodonOutput,
    /// Process the two read files without assembling pairs.
    pub skip_assembly: bool,
    /// Omit the Settings and Parse sections from the report.
    pub no_header: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            fw_path: PathBuf::new(),
            rv_path: PathBuf::new(),
            fw_refs: Vec::new(),
            rv_refs: Vec::new(),
            split_pattern: String::new(),
            split_regex: None,
            template_sources: Vec::new(),
            trims: Vec::new(),
            min_alignment_score: 0.8,
            min_qual: b'A',
            min_umi_group_size: 1,
            min_overlap: 9,
            max_mismatches: 0,
            number_from: 1,
            codon_output: CodonOutput::None,
            skip_assembly: false,
            no_header: false,
        }
    }
}

impl Config {
    /// Compiles and stores the split pattern, anchored to match whole
    /// residue strings.
    ///
    /// # Errors
    /// Fails when the pattern does not compile.
    pub fn set_split_pattern(&mut self, pattern: &str) -> Result<()> {
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
            DsaError::InvalidParameter {
                parameter: "split".to_string(),
                reason: e.to_string(),
            }
        })?;
        self.split_pattern = pattern.to_string();
        self.split_regex = Some(regex);
        Ok(())
    }

    /// Number of capture groups in the split pattern (0 when unset).
    #[must_use]
    pub fn split_capture_count(&self) -> usize {
        self.split_regex.as_ref().map_or(0, |r| r.captures_len() - 1)
    }

    /// Checks cross-parameter constraints. Fatal at startup.
    ///
    /// # Errors
    /// Returns [`DsaError::InvalidParameter`] for out-of-range values or
    /// mutually exclusive options.
    pub fn validate(&self) -> Result<()> {
        if self.min_overlap < self.max_mismatches {
            return Err(DsaError::InvalidParameter {
                parameter: "max_mismatch".to_string(),
                reason: "must not exceed min_overlap".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.min_alignment_score) {
            return Err(DsaError::InvalidParameter {
                parameter: "min_aln".to_string(),
                reason: format!("{} is not between 0 and 1", self.min_alignment_score),
            });
        }
        if self.min_umi_group_size == 0 {
            return Err(DsaError::InvalidParameter {
                parameter: "min_umi_grp".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.skip_assembly && self.template_sources.len() > 1 {
            return Err(DsaError::InvalidParameter {
                parameter: "skip_assembly".to_string(),
                reason: "incompatible with split templates and multiple template alignment"
                    .to_string(),
            });
        }
        let captures = self.split_capture_count();
        if captures != 0 && captures != self.template_sources.len() {
            return Err(DsaError::InvalidParameter {
                parameter: "split".to_string(),
                reason: format!(
                    "{} capture groups but {} template sources; one template source is \
                     required per capturing subgroup",
                    captures,
                    self.template_sources.len()
                ),
            });
        }
        if !self.trims.is_empty() && self.trims.len() != self.template_sources.len() {
            return Err(DsaError::InvalidParameter {
                parameter: "trim".to_string(),
                reason: format!(
                    "{} trims given for {} template sources",
                    self.trims.len(),
                    self.template_sources.len()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polymer::Nts;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.min_qual, b'A');
        assert_eq!(cfg.min_overlap, 9);
        assert_eq!(cfg.max_mismatches, 0);
        assert_eq!(cfg.min_umi_group_size, 1);
        assert!((cfg.min_alignment_score - 0.8).abs() < f32::EPSILON);
        assert_eq!(cfg.number_from, 1);
        assert_eq!(cfg.codon_output, CodonOutput::None);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_split_pattern_anchoring_and_count() {
        let mut cfg = Config::default();
        cfg.set_split_pattern("(M.*)(W.*)").unwrap();
        assert_eq!(cfg.split_capture_count(), 2);
        let regex = cfg.split_regex.as_ref().unwrap();
        assert!(regex.is_match("MAAWKK"));
        assert!(!regex.is_match("XMAAWK"));
    }

    #[test]
    fn test_validate_mismatch_overlap_relation() {
        let mut cfg = Config::default();
        cfg.max_mismatches = 10;
        cfg.min_overlap = 9;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_alignment_score_range() {
        let mut cfg = Config::default();
        cfg.min_alignment_score = 1.2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_skip_assembly_exclusions() {
        let mut cfg = Config::default();
        cfg.skip_assembly = true;
        cfg.template_sources =
            vec![TemplateSource::Protein(Aas::from("MK")), TemplateSource::Protein(Aas::from("WV"))];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_split_template_count() {
        let mut cfg = Config::default();
        cfg.set_split_pattern("(M.*)(W.*)").unwrap();
        cfg.template_sources = vec![TemplateSource::Dna(Cdns::from(Nts::from("ATGAAA")))];
        assert!(cfg.validate().is_err());

        cfg.template_sources.push(TemplateSource::Protein(Aas::from("WK")));
        cfg.validate().unwrap();
    }

    #[test]
    fn test_validate_trim_count() {
        let mut cfg = Config::default();
        cfg.template_sources = vec![TemplateSource::Protein(Aas::from("MK"))];
        cfg.trims = vec![(1, 1), (2, 2)];
        assert!(cfg.validate().is_err());

        cfg.trims.truncate(1);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_codon_output_from_str() {
        assert_eq!("none".parse::<CodonOutput>().unwrap(), CodonOutput::None);
        assert_eq!("ascii".parse::<CodonOutput>().unwrap(), CodonOutput::Ascii);
        assert_eq!("horizontal".parse::<CodonOutput>().unwrap(), CodonOutput::Horizontal);
        assert_eq!("vertical".parse::<CodonOutput>().unwrap(), CodonOutput::Vertical);
        assert!("sideways".parse::<CodonOutput>().is_err());
    }
}
