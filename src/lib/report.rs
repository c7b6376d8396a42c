//! Aggregation of alignments into report tables.
//!
//! Alignments sorted by template id are folded into position-wise residue
//! substitution frequencies, synonymous / non-synonymous mutation counts,
//! per-slot template usage, and unique-sequence tallies, then emitted as
//! tab-separated tables. The walk over a gapped alignment string follows one
//! rule everywhere: `'-'` advances the template position without consuming a
//! query position, a lowercase byte consumes a query position without
//! advancing the template, anything else consumes both.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use itertools::Itertools;

use crate::aa::Aa;
use crate::align::Matrix;
use crate::cdn::Cdn;
use crate::config::{CodonOutput, Config, TemplateSource};
use crate::logging::format_wall_clock;
use crate::parallel::{parallel_reduce, Accumulate};
use crate::pipeline::{GroupAlignment, ParseLog};
use crate::polymer::{Aas, Cdns};
use crate::template_db::AlignmentTemplate;

impl Accumulate for Matrix<f64> {
    fn accumulate(&mut self, other: Self) {
        if self.is_empty() {
            *self = other;
            return;
        }
        assert_eq!(self.rows(), other.rows());
        assert_eq!(self.cols(), other.cols());
        for r in 0..self.rows() {
            for c in 0..self.cols() {
                *self.elem_mut(r, c) += *other.elem(r, c);
            }
        }
    }
}

/// Per-template-position mutation tallies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MutationCount {
    /// Codon changes that preserve the residue.
    pub synonymous: Vec<u32>,
    /// Codon changes that alter the residue.
    pub nonsynonymous: Vec<u32>,
    /// Query positions observed at each template position.
    pub total: Vec<u32>,
}

impl MutationCount {
    /// Zeroed counts over `cols` template positions.
    #[must_use]
    pub fn new(cols: usize) -> Self {
        MutationCount {
            synonymous: vec![0; cols],
            nonsynonymous: vec![0; cols],
            total: vec![0; cols],
        }
    }
}

impl Accumulate for MutationCount {
    fn accumulate(&mut self, other: Self) {
        if self.total.is_empty() {
            *self = other;
            return;
        }
        assert_eq!(self.total.len(), other.total.len());
        for (a, b) in self.synonymous.iter_mut().zip(&other.synonymous) {
            *a += b;
        }
        for (a, b) in self.nonsynonymous.iter_mut().zip(&other.nonsynonymous) {
            *a += b;
        }
        for (a, b) in self.total.iter_mut().zip(&other.total) {
            *a += b;
        }
    }
}

/// Sorts alignments so untemplated ones lead and the rest group by
/// ascending template id.
pub fn sort_by_template(alignments: &mut [GroupAlignment]) {
    alignments.sort_by(|a, b| match (&a.template, &b.template) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(x), Some(y)) => x.id.cmp(&y.id),
    });
}

/// Counts residues observed at each template column, ignoring insertions.
///
/// Rows are the 21 residue codes in [`Aa::VALID_CHARS`] order, columns the
/// template positions.
#[must_use]
pub fn substitution_counts(alignments: &[GroupAlignment], template: &Aas) -> Matrix<f64> {
    let t_size = template.len();
    parallel_reduce(alignments, |slice| {
        let mut out = Matrix::filled(Aa::VALID_CHARS.len(), t_size, 0.0f64);
        for ga in slice {
            let query = ga.alignment.as_bytes();
            let mut t = 0;
            let mut q = 0;
            while t != t_size && q < query.len() {
                let c = query[q];
                q += 1;
                if c == b'-' {
                    t += 1;
                    continue;
                }
                if c.is_ascii_lowercase() {
                    continue;
                }
                if let Some(aa) = Aa::from_byte(c) {
                    *out.elem_mut(aa.index(), t) += 1.0;
                }
                t += 1;
            }
        }
        out
    })
}

/// Normalizes each column of `counts` to frequencies (columns with no
/// observations stay zero), then zeroes the wild-type cell of every column
/// so the stacked remainder is the mutant fraction.
pub fn normalize_and_blank_wildtype(counts: &mut Matrix<f64>, template: &Aas) {
    for c in 0..counts.cols() {
        let total: f64 = (0..counts.rows()).map(|r| *counts.elem(r, c)).sum();
        if total == 0.0 {
            continue;
        }
        for r in 0..counts.rows() {
            *counts.elem_mut(r, c) /= total;
        }
    }
    for c in 0..counts.cols() {
        *counts.elem_mut(template.get(c).index(), c) = 0.0;
    }
}

/// Walks each alignment's residue and codon strings against the template
/// and tallies codon mismatches as synonymous or non-synonymous.
#[must_use]
pub fn mutation_counts(
    alignments: &[GroupAlignment],
    aa_template: &Aas,
    cdn_template: &Cdns,
) -> MutationCount {
    assert_eq!(aa_template.len(), cdn_template.len());
    let ta = aa_template.as_bytes();
    let tc = cdn_template.as_bytes();
    let t_size = ta.len();

    parallel_reduce(alignments, |slice| {
        let mut out = MutationCount::new(t_size);
        for ga in slice {
            let qa = ga.alignment.as_bytes();
            let qc = ga.cdns.as_bytes();
            debug_assert_eq!(qa.len(), qc.len());
            let mut t = 0;
            let mut q = 0;
            while t != t_size && q < qa.len() {
                if qa[q] == b'-' {
                    t += 1;
                    q += 1;
                    continue;
                }
                if qa[q].is_ascii_lowercase() {
                    q += 1;
                    continue;
                }
                out.total[t] += 1;
                if qc[q] != tc[t] {
                    if qa[q] == ta[t] {
                        out.synonymous[t] += 1;
                    } else {
                        out.nonsynonymous[t] += 1;
                    }
                }
                t += 1;
                q += 1;
            }
        }
        out
    })
}

/// Occurrence counts for one unique sequence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UniqueCounts {
    /// Distinct alignments carrying the sequence.
    pub groups: u64,
    /// Raw reads behind those alignments.
    pub reads: u64,
}

/// Tallies unique residue sequences (gaps stripped) and unique codon
/// sequences (space gaps stripped), sorted by descending group count.
#[must_use]
pub fn unique_sequences(
    alignments: &[GroupAlignment],
) -> (Vec<(String, UniqueCounts)>, Vec<(String, UniqueCounts)>) {
    let mut unique_aas: AHashMap<String, UniqueCounts> = AHashMap::new();
    let mut unique_cdns: AHashMap<String, UniqueCounts> = AHashMap::new();

    for ga in alignments {
        let aas: String = ga.alignment.chars().filter(|&c| c != '-').collect();
        let cdns: String = ga.cdns.chars().filter(|&c| c != ' ').collect();

        let entry = unique_aas.entry(aas).or_default();
        entry.groups += 1;
        entry.reads += ga.umi_group_size;

        let entry = unique_cdns.entry(cdns).or_default();
        entry.groups += 1;
        entry.reads += ga.umi_group_size;
    }

    let order = |map: AHashMap<String, UniqueCounts>| {
        map.into_iter()
            .sorted_by(|a, b| b.1.groups.cmp(&a.1.groups).then_with(|| a.0.cmp(&b.0)))
            .collect::<Vec<_>>()
    };
    (order(unique_aas), order(unique_cdns))
}

/// Everything the report needs beyond the alignments themselves.
pub struct Report<'a> {
    pub version: &'a str,
    pub config: &'a Config,
    pub log: &'a ParseLog,
    /// Paired-end reads parsed from the input files.
    pub total_reads: u64,
    pub elapsed: Duration,
    /// Alignments sorted by template id (see [`sort_by_template`]).
    pub alignments: &'a [GroupAlignment],
}

/// Distinct templates in id order together with their alignment ranges.
fn template_ranges(alignments: &[GroupAlignment]) -> Vec<(Arc<AlignmentTemplate>, usize, usize)> {
    let mut ranges = Vec::new();
    let mut lo = 0;
    while lo < alignments.len() {
        let Some(template) = alignments[lo].template.as_ref() else {
            lo += 1;
            continue;
        };
        let mut hi = lo + 1;
        while hi < alignments.len()
            && alignments[hi].template.as_ref().is_some_and(|t| t.id == template.id)
        {
            hi += 1;
        }
        ranges.push((Arc::clone(template), lo, hi));
        lo = hi;
    }
    ranges
}

/// Emits the complete report as tab-separated tables.
///
/// # Errors
/// Propagates write failures.
pub fn emit<W: Write>(out: &mut W, report: &Report<'_>) -> io::Result<()> {
    let config = report.config;
    let log = report.log;
    let alignments = report.alignments;
    let has_templates = !config.template_sources.is_empty();

    if !config.no_header {
        writeln!(out, "#Settings#")?;
        writeln!(out, "#program version\t{}", report.version)?;
        writeln!(out, "#wall clock time\t{}", format_wall_clock(report.elapsed))?;
        writeln!(out, "#forward reads fastq file\t{}", config.fw_path.display())?;
        writeln!(out, "#reverse reads fastq file\t{}", config.rv_path.display())?;
        for fw_ref in &config.fw_refs {
            writeln!(out, "#forward nucleotide reference sequence (-f, --fw_ref)\t{fw_ref}")?;
        }
        for rv_ref in &config.rv_refs {
            writeln!(out, "#reverse nucleotide reference sequence (-r, --rv_ref)\t{rv_ref}")?;
        }
        if !config.split_pattern.is_empty() {
            writeln!(
                out,
                "#split template regular expression (--split)\t{}",
                config.split_pattern
            )?;
        }
        for source in &config.template_sources {
            match source {
                TemplateSource::Protein(aas) => {
                    writeln!(out, "#amino acid template sequence (-t, --template)\t{aas}")?;
                }
                TemplateSource::Dna(cdns) => {
                    writeln!(
                        out,
                        "#dna template sequence (-d, --template_dna)\t{}",
                        cdns.to_nts()
                    )?;
                }
                TemplateSource::Fasta(path) => {
                    writeln!(out, "#template database (--template_db)\t{}", path.display())?;
                }
            }
        }
        writeln!(out, "#minimum 3 prime quality (-q, --min_qual)\t{}", config.min_qual as char)?;
        writeln!(
            out,
            "#minimum umi group size (-g, --min_umi_grp)\t{}",
            config.min_umi_group_size
        )?;
        writeln!(
            out,
            "#reads aligned to template separately (-x, --skip_assembly)\t{}",
            u8::from(config.skip_assembly)
        )?;
        writeln!(
            out,
            "#minimum nucleotide alignment overlap (-v, --min_overlap)\t{}",
            config.min_overlap
        )?;
        writeln!(
            out,
            "#maximum nucleotide mismatches allowed (-m, --max_mismatch)\t{}",
            config.max_mismatches
        )?;
        writeln!(
            out,
            "#minimum template alignment score (-a, --min_aln)\t{}",
            config.min_alignment_score
        )?;
        writeln!(out, "#Parse#")?;
        writeln!(out, "#paired end reads parsed\t{}", report.total_reads)?;
        writeln!(
            out,
            "#reads filtered because of non-ATGC characters\t{}",
            log.filter_invalid_chars
        )?;
        writeln!(
            out,
            "#reads filtered because reference could not be identified in forward sequence\t{}",
            log.filter_no_fw_umi
        )?;
        writeln!(
            out,
            "#reads filtered because reference could not be identified in reverse sequence\t{}",
            log.filter_no_rv_umi
        )?;
        writeln!(
            out,
            "#reads filtered because they could not be assembled\t{}",
            log.filter_could_not_assemble
        )?;
        writeln!(
            out,
            "#reads filtered because of small umi group size\t{}",
            log.filter_umi_group_size_too_small
        )?;
        writeln!(out, "#reads merged during umi collapse\t{}", log.filter_duplicate_umi)?;
        writeln!(
            out,
            "#reads filtered because of premature stop codons\t{}",
            log.filter_premature_stop_codon
        )?;
        writeln!(
            out,
            "#reads filtered because they could not be split\t{}",
            log.filter_split_failed
        )?;
        writeln!(
            out,
            "#reads filtered because no matching template was identified\t{}",
            log.filter_no_matching_template
        )?;
        writeln!(
            out,
            "#reads filtered because of poor alignment to template\t{}",
            log.filter_bad_alignment
        )?;
        writeln!(out, "#alignments calculated after qc and umi collapse\t{}", alignments.len())?;
    }

    let ranges = template_ranges(alignments);

    if has_templates {
        writeln!(out, "#Templates#")?;
        writeln!(out, "Template Id\tTemplate Name\tSequence")?;
        for (template, _, _) in &ranges {
            writeln!(out, "{}\t{}\t{}", template.id, template.label(), template.aas)?;
        }

        // per-slot label usage across all templated alignments
        let slots = config.template_sources.len();
        let mut counters: Vec<AHashMap<&str, u64>> = vec![AHashMap::new(); slots];
        let mut totals = vec![0u64; slots];
        for ga in alignments {
            let Some(template) = ga.template.as_ref() else { continue };
            for (slot, label) in template.labels.iter().enumerate().take(slots) {
                *counters[slot].entry(label.as_str()).or_default() += 1;
                totals[slot] += 1;
            }
        }

        writeln!(out, "#Template Usage#")?;
        writeln!(out, "Split\tTemplate\tCount\tFrequency")?;
        for (slot, counter) in counters.iter().enumerate() {
            for (label, count) in counter.iter().sorted() {
                let frequency = *count as f64 / totals[slot] as f64;
                writeln!(out, "{}\t{}\t{}\t{}", slot + 1, label, count, frequency)?;
            }
        }
    }

    writeln!(out, "#Alignments#")?;
    writeln!(out, "Template\tUMI Group Size\tBarcode\tSequence")?;
    for ga in alignments {
        let id = ga.template.as_ref().map_or(String::new(), |t| t.id.to_string());
        writeln!(out, "{}\t{}\t{}\t{}", id, ga.umi_group_size, ga.barcode, ga.alignment)?;
        match config.codon_output {
            CodonOutput::None => {}
            CodonOutput::Ascii => writeln!(out, "\t\t\t{}", ga.cdns)?,
            CodonOutput::Horizontal => {
                write!(out, "\t\t\t")?;
                for c in ga.cdns.bytes() {
                    if let Some(cdn) = Cdn::from_byte(c) {
                        write!(out, "{}{}{}", cdn.p1(), cdn.p2(), cdn.p3())?;
                    }
                }
                writeln!(out)?;
            }
            CodonOutput::Vertical => {
                for position in 0..3 {
                    write!(out, "\t\t\t")?;
                    for c in ga.cdns.bytes() {
                        match Cdn::from_byte(c) {
                            Some(cdn) => write!(out, "{}", cdn.at(position))?,
                            None => write!(out, " ")?,
                        }
                    }
                    writeln!(out)?;
                }
            }
        }
    }

    if has_templates {
        for (template, lo, hi) in &ranges {
            let range = &alignments[*lo..*hi];

            let mut substitutions = substitution_counts(range, &template.aas);
            normalize_and_blank_wildtype(&mut substitutions, &template.aas);

            writeln!(out, "#Substitutions ({})#", template.label())?;
            for c in 0..substitutions.cols() {
                write!(out, "\t{}{}", template.aas.get(c), c + config.number_from)?;
            }
            writeln!(out)?;
            for r in 0..substitutions.rows() {
                write!(out, "{}", Aa::VALID_CHARS[r] as char)?;
                for c in 0..substitutions.cols() {
                    write!(out, "\t{}", substitutions.elem(r, c))?;
                }
                writeln!(out)?;
            }

            if !template.cdns.is_empty() {
                let counts = mutation_counts(range, &template.aas, &template.cdns);

                writeln!(out, "#Mutation Counts ({})#", template.label())?;
                for c in 0..template.aas.len() {
                    write!(out, "\t{}{}", template.aas.get(c), c + config.number_from)?;
                }
                writeln!(out)?;
                write!(out, "Total")?;
                for count in &counts.total {
                    write!(out, "\t{count}")?;
                }
                writeln!(out)?;
                write!(out, "Non-Coding")?;
                for count in &counts.synonymous {
                    write!(out, "\t{count}")?;
                }
                writeln!(out)?;
                write!(out, "Coding")?;
                for count in &counts.nonsynonymous {
                    write!(out, "\t{count}")?;
                }
                writeln!(out)?;
            }
        }
    }

    if !config.skip_assembly {
        let (unique_aas, unique_cdns) = unique_sequences(alignments);

        writeln!(out, "#Unique Amino Acids#")?;
        writeln!(out, "Num UMI Groups\tNum PCR Reads\tSequence")?;
        for (seq, counts) in &unique_aas {
            writeln!(out, "{}\t{}\t{}", counts.groups, counts.reads, seq)?;
        }

        writeln!(out, "#Unique Codons#")?;
        writeln!(out, "Num UMI Groups\tNum PCR Reads\tSequence")?;
        for (seq, counts) in &unique_cdns {
            writeln!(out, "{}\t{}\t{}", counts.groups, counts.reads, seq)?;
        }
    }

    Ok(())
}
