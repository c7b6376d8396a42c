//! The analysis pipeline: QC, pair assembly, UMI collapse, translation,
//! splitting, and multi-template alignment.
//!
//! Every stage takes its input batch by value, fans it out across workers
//! (see [`crate::parallel`]), and emits both the surviving records and
//! additive filter counters in a [`ParseLog`]. A dropped record is never an
//! error; it is a counter increment.

use std::cmp::Ordering;
use std::sync::Arc;

use ahash::AHashMap;
use bstr::BString;

use crate::align::{nw_self_align_score, Alignment, BLOSUM62, CDNSUBS};
use crate::config::Config;
use crate::nt::Nt;
use crate::parallel::{parallel_transform_filter, Accumulate};
use crate::read::{Orf, Read, ReadPair};
use crate::template_db::{AlignmentTemplate, TemplateDatabase};
use crate::umi::UmiExtractor;

/// Additive per-stage filter counters, accumulated across workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParseLog {
    /// Reads dropped for non-nucleotide characters (at QC) or no-call bases
    /// in a consensus (at UMI collapse).
    pub filter_invalid_chars: u64,
    /// Pairs dropped because no forward reference matched.
    pub filter_no_fw_umi: u64,
    /// Pairs dropped because no reverse reference matched.
    pub filter_no_rv_umi: u64,
    /// Pairs dropped because the 3' overlap was too short or too dirty.
    pub filter_could_not_assemble: u64,
    /// Raw reads dropped in undersized UMI groups.
    pub filter_umi_group_size_too_small: u64,
    /// Raw reads merged away into consensus sequences.
    pub filter_duplicate_umi: u64,
    /// ORFs dropped for an in-frame stop codon.
    pub filter_premature_stop_codon: u64,
    /// ORFs the split pattern failed to match.
    pub filter_split_failed: u64,
    /// ORFs dropped because a template database had no entry.
    pub filter_no_matching_template: u64,
    /// ORFs whose best alignment scored below the acceptance ratio.
    pub filter_bad_alignment: u64,
}

impl Accumulate for ParseLog {
    fn accumulate(&mut self, other: Self) {
        self.filter_invalid_chars += other.filter_invalid_chars;
        self.filter_no_fw_umi += other.filter_no_fw_umi;
        self.filter_no_rv_umi += other.filter_no_rv_umi;
        self.filter_could_not_assemble += other.filter_could_not_assemble;
        self.filter_umi_group_size_too_small += other.filter_umi_group_size_too_small;
        self.filter_duplicate_umi += other.filter_duplicate_umi;
        self.filter_premature_stop_codon += other.filter_premature_stop_codon;
        self.filter_split_failed += other.filter_split_failed;
        self.filter_no_matching_template += other.filter_no_matching_template;
        self.filter_bad_alignment += other.filter_bad_alignment;
    }
}

/// One aligned (possibly composite) consensus read.
#[derive(Clone, Debug, Default)]
pub struct GroupAlignment {
    /// Number of raw reads behind this alignment.
    pub umi_group_size: u64,
    /// The interned composite template, or `None` for pass-through
    /// alignments produced without any template database.
    pub template: Option<Arc<AlignmentTemplate>>,
    /// The UMI barcode of the consensus.
    pub barcode: BString,
    /// Gapped residue string against the template axis.
    pub alignment: String,
    /// Gapped codon string (gap byte `' '`), column-parallel to `alignment`.
    pub cdns: String,
}

/// Quality-controls raw read pairs.
///
/// Pairs with an empty (sentinel) side are dropped. Each side has
/// low-quality 3' bases popped, then the configured reference extractors are
/// tried in order; the first valid match wins. The reference span and
/// everything 5' of it are trimmed off, and the forward read carries the
/// concatenated forward+reverse barcode onward.
pub fn qc_reads(
    fw: Vec<Read>,
    rv: Vec<Read>,
    fwexs: &[UmiExtractor],
    rvexs: &[UmiExtractor],
    config: &Config,
    log: &mut ParseLog,
) -> Vec<ReadPair> {
    debug_assert_eq!(fw.len(), rv.len());
    let min_qual = config.min_qual;
    let pairs: Vec<(Read, Read)> = fw.into_iter().zip(rv).collect();

    parallel_transform_filter(pairs, log, move |(mut ff, mut rr), log| {
        if ff.is_empty() || rr.is_empty() {
            log.filter_invalid_chars += 1;
            return None;
        }

        while ff.qual.last().is_some_and(|&q| q < min_qual) {
            ff.pop_base();
        }
        while rr.qual.last().is_some_and(|&q| q < min_qual) {
            rr.pop_base();
        }

        let Some(fwumi) = fwexs.iter().map(|ex| ex.extract(ff.dna.as_bytes())).find(|u| u.valid())
        else {
            log.filter_no_fw_umi += 1;
            return None;
        };
        let Some(rvumi) = rvexs.iter().map(|ex| ex.extract(rr.dna.as_bytes())).find(|u| u.valid())
        else {
            log.filter_no_rv_umi += 1;
            return None;
        };

        let fw_cut = fwumi.from + fwumi.length;
        ff.dna.exo(fw_cut, 0);
        ff.qual.drain(..fw_cut);

        let rv_cut = rvumi.from + rvumi.length;
        rr.dna.exo(rv_cut, 0);
        rr.qual.drain(..rv_cut);

        let mut barcode = fwumi.barcode;
        barcode.extend_from_slice(&rvumi.barcode);
        ff.barcode = barcode;

        Some(ReadPair { fw: ff, rv: rr })
    })
}

/// Assembles QC'd pairs across their 3' overlap; failures are counted and
/// dropped.
pub fn assemble_reads(pairs: Vec<ReadPair>, config: &Config, log: &mut ParseLog) -> Vec<Read> {
    let min_overlap = config.min_overlap;
    let max_mismatches = config.max_mismatches;
    parallel_transform_filter(pairs, log, move |pair, log| {
        let rd = Read::assemble(pair.fw, pair.rv, min_overlap, max_mismatches);
        if rd.is_empty() {
            log.filter_could_not_assemble += 1;
            None
        } else {
            Some(rd)
        }
    })
}

/// Per-base consensus vote: occurrence count and best quality seen.
#[derive(Clone, Copy)]
struct Choice {
    nt: Nt,
    occurs: u32,
    max_qual: u8,
}

/// One choice slot per base, ordered by `Nt::index` (A, C, T, G, N). On a
/// tied vote the earlier slot wins.
fn default_choices() -> [Choice; 5] {
    [Nt::A, Nt::C, Nt::T, Nt::G, Nt::N]
        .map(|nt| Choice { nt, occurs: 0, max_qual: 0 })
}

/// The most frequent length among `reads`; ties prefer the greater length.
fn modal_length(reads: &[Read]) -> usize {
    let mut counts: AHashMap<usize, usize> = AHashMap::new();
    for rd in reads {
        *counts.entry(rd.len()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|&(len, count)| (count, len))
        .map_or(0, |(len, _)| len)
}

/// Collapses a UMI group (at least two reads) into a single consensus read
/// stored in `group[0]`.
///
/// Ragged mode left-justifies the members and sizes the consensus so every
/// position draws from at least `min_umi_group_size` reads. Equal mode only
/// lets reads of the modal length vote and records how many did in
/// `umi_group_size`. Each consensus position takes the base maximizing
/// (occurrences, best quality); its quality is that best quality.
fn build_consensus_sequence(group: &mut Vec<Read>, min_umi_group_size: usize, ragged_ends: bool) {
    debug_assert!(group.len() >= min_umi_group_size.max(1));

    let mut choices: Vec<[Choice; 5]>;
    let contributing;

    if ragged_ends {
        group.sort_by(|a, b| b.len().cmp(&a.len()));
        let target = group[min_umi_group_size.max(1) - 1].len();
        choices = vec![default_choices(); target];
        contributing = group.len() as u64;

        for rd in group.iter() {
            let limit = target.min(rd.len());
            for i in 0..limit {
                let choice = &mut choices[i][rd.dna.get(i).index()];
                choice.occurs += 1;
                if rd.qual[i] > choice.max_qual {
                    choice.max_qual = rd.qual[i];
                }
            }
        }
    } else {
        let target = modal_length(group);
        choices = vec![default_choices(); target];
        let mut voters = 0u64;

        for rd in group.iter() {
            if rd.len() != target {
                continue;
            }
            voters += 1;
            for i in 0..target {
                let choice = &mut choices[i][rd.dna.get(i).index()];
                choice.occurs += 1;
                if rd.qual[i] > choice.max_qual {
                    choice.max_qual = rd.qual[i];
                }
            }
        }
        contributing = voters;
    }

    let front = &mut group[0];
    front.umi_group_size = contributing;
    front.resize(choices.len());
    for (i, slots) in choices.iter().enumerate() {
        let mut best = &slots[0];
        for candidate in &slots[1..] {
            if (candidate.occurs, candidate.max_qual) > (best.occurs, best.max_qual) {
                best = candidate;
            }
        }
        front.dna.set(i, best.nt);
        front.qual[i] = best.max_qual;
    }

    group.truncate(1);
}

/// Groups reads by exact barcode and collapses each group to a consensus.
///
/// Groups smaller than `min_umi_group_size` are dropped with their raw reads
/// counted; consensus reads containing a no-call are dropped; merged raw
/// reads are credited to `filter_duplicate_umi`. Cross-group output order is
/// arbitrary.
pub fn umi_collapse(
    reads: Vec<Read>,
    config: &Config,
    log: &mut ParseLog,
    ragged_ends: bool,
) -> Vec<Read> {
    let mut by_barcode: AHashMap<BString, Vec<Read>> = AHashMap::new();
    for rd in reads {
        by_barcode.entry(rd.barcode.clone()).or_default().push(rd);
    }
    let groups: Vec<Vec<Read>> = by_barcode.into_values().collect();

    let min = config.min_umi_group_size;
    parallel_transform_filter(groups, log, move |mut group, log| {
        let pre_consensus_size = group.len() as u64;

        if group.len() < min {
            log.filter_umi_group_size_too_small += pre_consensus_size;
            return None;
        }

        if group.len() > 1 {
            build_consensus_sequence(&mut group, min, ragged_ends);
        }

        if group[0].umi_group_size < min as u64 {
            log.filter_umi_group_size_too_small += pre_consensus_size;
            return None;
        }

        if group[0].dna.iter().any(|n| n == Nt::N) {
            log.filter_invalid_chars += 1;
            return None;
        }

        log.filter_duplicate_umi += pre_consensus_size - 1;
        Some(group.swap_remove(0))
    })
}

/// Translates consensus reads into ORFs, dropping any with an in-frame stop.
///
/// With `reverse_complement` set (reverse reads on the unassembled branch)
/// the read is truncated to a whole number of codons from its 3' end and
/// reverse-complemented before translation.
pub fn translate_and_filter_ptcs(
    reads: Vec<Read>,
    log: &mut ParseLog,
    reverse_complement: bool,
) -> Vec<Orf> {
    parallel_transform_filter(reads, log, move |mut rd, log| {
        if reverse_complement {
            rd.reverse_complement();
        }
        let orf = Orf::from(rd);
        if orf.contains_ptc() {
            log.filter_premature_stop_codon += 1;
            None
        } else {
            Some(orf)
        }
    })
}

/// Splits each ORF into sub-ORFs by the configured pattern's capture groups.
///
/// With no capture groups this is a shape-lifting identity: every ORF
/// becomes a singleton list. Otherwise the pattern must match the whole
/// residue string; each capture group yields a sub-ORF carrying the same
/// group size and barcode and the matching slices of both sequences.
pub fn split_orfs(orfs: Vec<Orf>, config: &Config, log: &mut ParseLog) -> Vec<Vec<Orf>> {
    let captures = config.split_capture_count();
    let Some(regex) = config.split_regex.as_ref().filter(|_| captures > 0) else {
        return orfs.into_iter().map(|orf| vec![orf]).collect();
    };

    parallel_transform_filter(orfs, log, move |orf, log| {
        let Some(caps) = regex.captures(orf.aas.as_str()) else {
            log.filter_split_failed += 1;
            return None;
        };

        let mut splits = Vec::with_capacity(captures);
        for i in 1..=captures {
            let (start, len) = caps.get(i).map_or((0, 0), |g| (g.start(), g.len()));
            splits.push(Orf {
                umi_group_size: orf.umi_group_size,
                template_id: orf.template_id,
                barcode: orf.barcode.clone(),
                aas: orf.aas.subclone(start, len),
                cdns: orf.cdns.subclone(start, len),
            });
        }
        Some(splits)
    })
}

/// Aligns split ORFs against their per-slot template databases and interns
/// composite templates.
///
/// Each ORF list must be as long as `dbs`. A `None` slot passes its sub-ORF
/// through unaligned under the label `"none"`. Codon-level alignment is used
/// whenever a database carries codon data, residue-level otherwise. An ORF
/// list is dropped whole if any slot finds no template or scores below
/// `min_alignment_score` relative to the template self-score (length-
/// corrected in ragged mode). All surviving alignments with the same
/// per-slot template choice share one interned [`AlignmentTemplate`].
pub fn align_to_multiple_templates(
    orfs: Vec<Vec<Orf>>,
    dbs: &[Option<Arc<TemplateDatabase>>],
    config: &Config,
    log: &mut ParseLog,
    ragged_ends: bool,
) -> Vec<GroupAlignment> {
    assert!(!dbs.is_empty());

    struct Preliminary {
        alignment: GroupAlignment,
        template_ids: Vec<u64>,
    }

    let min_alignment_score = config.min_alignment_score;
    let prelims: Vec<Preliminary> = parallel_transform_filter(orfs, log, move |orf_list, log| {
        debug_assert_eq!(orf_list.len(), dbs.len());

        let mut template_ids = Vec::with_capacity(orf_list.len());
        let mut alignment_str = String::new();
        let mut cdns_str = String::new();
        let mut aln = Alignment::default();

        for (orf, db) in orf_list.iter().zip(dbs) {
            let Some(db) = db else {
                template_ids.push(0);
                alignment_str.push_str(orf.aas.as_str());
                cdns_str.push_str(orf.cdns.as_str());
                continue;
            };

            let id = if db.codon_data_available() {
                db.query_and_align_cdns(&orf.cdns, &mut aln)
            } else {
                db.query_and_align_aas(&orf.aas, &mut aln)
            };
            if id == TemplateDatabase::NOT_FOUND {
                log.filter_no_matching_template += 1;
                break;
            }

            let template_aas = db.aas(id);
            let mut max_score = if db.codon_data_available() {
                nw_self_align_score(db.cdns(id), &CDNSUBS)
            } else {
                nw_self_align_score(template_aas, &BLOSUM62)
            } as f32;
            if ragged_ends {
                let length_gap = (orf.aas.len() as i64 - template_aas.len() as i64).unsigned_abs();
                max_score -= (db.gap_penalty() as u64 * length_gap) as f32;
            }

            if (aln.score as f32) / max_score < min_alignment_score {
                log.filter_bad_alignment += 1;
                break;
            }

            template_ids.push(id);
            alignment_str.push_str(&aln.build_string(&orf.aas));
            cdns_str.push_str(&aln.build_string(&orf.cdns));
        }

        if template_ids.len() != orf_list.len() {
            return None;
        }
        Some(Preliminary {
            alignment: GroupAlignment {
                umi_group_size: orf_list[0].umi_group_size,
                template: None,
                barcode: orf_list[0].barcode.clone(),
                alignment: alignment_str,
                cdns: cdns_str,
            },
            template_ids,
        })
    });

    // Intern composite templates: one shared AlignmentTemplate per distinct
    // per-slot id vector, ids minted in order of first appearance.
    let mut lookup: AHashMap<Vec<u64>, Arc<AlignmentTemplate>> = AHashMap::new();
    let mut next_id = 0u64;

    let mut alignments = Vec::with_capacity(prelims.len());
    for prelim in prelims {
        let template = lookup
            .entry(prelim.template_ids)
            .or_insert_with_key(|ids| {
                next_id += 1;
                let mut tpl = AlignmentTemplate { id: next_id, ..Default::default() };
                for (slot, &id) in ids.iter().enumerate() {
                    match &dbs[slot] {
                        Some(db) => {
                            tpl.labels.push(db.label(id).to_string());
                            tpl.aas.append(db.aas(id));
                            tpl.cdns.append(db.cdns(id));
                        }
                        None => tpl.labels.push("none".to_string()),
                    }
                }
                Arc::new(tpl)
            })
            .clone();

        let mut alignment = prelim.alignment;
        alignment.template = Some(template);
        alignments.push(alignment);
    }

    alignments
}

/// Collates forward and reverse alignments from the unassembled branch.
///
/// Both sides are sorted by barcode descending; pairs with matching barcodes
/// come out adjacent, forward first, followed by all unmatched alignments.
#[must_use]
pub fn interleave_by_barcode(
    mut fwaln: Vec<GroupAlignment>,
    mut rvaln: Vec<GroupAlignment>,
) -> Vec<GroupAlignment> {
    fwaln.sort_by(|a, b| b.barcode.cmp(&a.barcode));
    rvaln.sort_by(|a, b| b.barcode.cmp(&a.barcode));

    let mut out = Vec::with_capacity(fwaln.len() + rvaln.len());
    let mut unpaired = Vec::new();

    while let (Some(ff), Some(rr)) = (fwaln.last(), rvaln.last()) {
        match ff.barcode.cmp(&rr.barcode) {
            Ordering::Equal => {
                out.push(fwaln.pop().expect("checked non-empty"));
                out.push(rvaln.pop().expect("checked non-empty"));
            }
            Ordering::Less => unpaired.push(fwaln.pop().expect("checked non-empty")),
            Ordering::Greater => unpaired.push(rvaln.pop().expect("checked non-empty")),
        }
    }

    out.extend(unpaired);
    out.extend(fwaln.into_iter().rev());
    out.extend(rvaln.into_iter().rev());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polymer::{Cdns, Nts};

    fn read_with_barcode(dna: &str, qual: &[u8], barcode: &str) -> Read {
        Read {
            barcode: BString::from(barcode),
            umi_group_size: 1,
            dna: Nts::from(dna),
            qual: qual.to_vec(),
        }
    }

    fn config() -> Config {
        Config::default()
    }

    // =====================================================================
    // qc_reads
    // =====================================================================

    #[test]
    fn test_qc_drops_sentinel_pairs() {
        let mut cfg = config();
        cfg.min_qual = b'!';
        let fwex = vec![UmiExtractor::new("ACGTnn").unwrap()];
        let rvex = vec![UmiExtractor::new("TTTTnn").unwrap()];

        let fw = vec![Read::default()];
        let rv = vec![read_with_barcode("TTTTGGAAAA", b"IIIIIIIIII", "")];
        let mut log = ParseLog::default();
        let pairs = qc_reads(fw, rv, &fwex, &rvex, &cfg, &mut log);
        assert!(pairs.is_empty());
        assert_eq!(log.filter_invalid_chars, 1);
    }

    #[test]
    fn test_qc_trims_low_quality_tail_and_reference() {
        let mut cfg = config();
        cfg.min_qual = b'5';
        let fwex = vec![UmiExtractor::new("ACGTnn").unwrap()];
        let rvex = vec![UmiExtractor::new("TTTTnn").unwrap()];

        // last two fw bases fall below quality '5'
        let fw = vec![read_with_barcode("GGACGTCAAAAACC", b"IIIIIIIIIIII!!", "")];
        let rv = vec![read_with_barcode("TTTTGGCCCC", b"IIIIIIIIII", "")];
        let mut log = ParseLog::default();
        let pairs = qc_reads(fw, rv, &fwex, &rvex, &cfg, &mut log);

        assert_eq!(pairs.len(), 1);
        let pair = &pairs[0];
        // fw: popped "CC", then reference "ACGTCA" ends at index 8 -> "AAAA" remains
        assert_eq!(pair.fw.dna.as_bytes(), b"AAAA");
        assert_eq!(pair.fw.qual.len(), 4);
        // barcode = fw captures ++ rv captures
        assert_eq!(pair.fw.barcode, BString::from("CAGG"));
        assert_eq!(pair.rv.dna.as_bytes(), b"CCCC");
        assert_eq!(log, ParseLog::default());
    }

    #[test]
    fn test_qc_counts_missing_references() {
        let mut cfg = config();
        cfg.min_qual = b'!';
        let fwex = vec![UmiExtractor::new("ACGTnn").unwrap()];
        let rvex = vec![UmiExtractor::new("TTTTnn").unwrap()];

        let fw = vec![
            read_with_barcode("GGGGGGGGGG", b"IIIIIIIIII", ""), // no fw reference
            read_with_barcode("ACGTGGCCCC", b"IIIIIIIIII", ""), // fw ok, rv missing
        ];
        let rv = vec![
            read_with_barcode("TTTTGGAAAA", b"IIIIIIIIII", ""),
            read_with_barcode("GGGGGGGGGG", b"IIIIIIIIII", ""),
        ];
        let mut log = ParseLog::default();
        let pairs = qc_reads(fw, rv, &fwex, &rvex, &cfg, &mut log);
        assert!(pairs.is_empty());
        assert_eq!(log.filter_no_fw_umi, 1);
        assert_eq!(log.filter_no_rv_umi, 1);
    }

    #[test]
    fn test_qc_tries_extractors_in_order() {
        let mut cfg = config();
        cfg.min_qual = b'!';
        let fwex =
            vec![UmiExtractor::new("CCCCCCCC").unwrap(), UmiExtractor::new("ACGTnn").unwrap()];
        let rvex = vec![UmiExtractor::new("TTTTnn").unwrap()];

        let fw = vec![read_with_barcode("ACGTGGAAAA", b"IIIIIIIIII", "")];
        let rv = vec![read_with_barcode("TTTTCCAAAA", b"IIIIIIIIII", "")];
        let mut log = ParseLog::default();
        let pairs = qc_reads(fw, rv, &fwex, &rvex, &cfg, &mut log);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].fw.barcode, BString::from("GGCC"));
    }

    // =====================================================================
    // umi_collapse
    // =====================================================================

    #[test]
    fn test_collapse_identical_members_equal_mode() {
        let mut cfg = config();
        cfg.min_umi_group_size = 2;
        let reads: Vec<Read> =
            (0..4).map(|_| read_with_barcode("ACGTACGT", b"IIIIIIII", "BC1")).collect();

        let mut log = ParseLog::default();
        let consensus = umi_collapse(reads, &cfg, &mut log, false);
        assert_eq!(consensus.len(), 1);
        assert_eq!(consensus[0].dna.as_bytes(), b"ACGTACGT");
        assert_eq!(consensus[0].umi_group_size, 4);
        assert_eq!(log.filter_duplicate_umi, 3);
    }

    #[test]
    fn test_collapse_majority_vote() {
        let cfg = config();
        let mut reads = vec![
            read_with_barcode("ACGT", b"IIII", "BC1"),
            read_with_barcode("ACGT", b"IIII", "BC1"),
            read_with_barcode("AGGT", b"IIII", "BC1"),
        ];
        reads[2].qual = b"IJII".to_vec(); // higher quality on the minority base

        let mut log = ParseLog::default();
        let consensus = umi_collapse(reads, &cfg, &mut log, false);
        assert_eq!(consensus.len(), 1);
        // occurrences beat quality
        assert_eq!(consensus[0].dna.as_bytes(), b"ACGT");
    }

    #[test]
    fn test_collapse_quality_breaks_ties() {
        let cfg = config();
        let reads = vec![
            read_with_barcode("ACGT", b"IIII", "BC1"),
            read_with_barcode("AGGT", b"IJII", "BC1"),
        ];

        let mut log = ParseLog::default();
        let consensus = umi_collapse(reads, &cfg, &mut log, false);
        // position 1 ties 1-1; 'G' carries quality 'J' > 'I'
        assert_eq!(consensus[0].dna.as_bytes(), b"AGGT");
    }

    #[test]
    fn test_collapse_tie_prefers_earlier_base_slot() {
        let cfg = config();
        let reads = vec![
            read_with_barcode("ACGT", b"IIII", "BC1"),
            read_with_barcode("AGGT", b"IIII", "BC1"),
        ];

        let mut log = ParseLog::default();
        let consensus = umi_collapse(reads, &cfg, &mut log, false);
        // full tie at position 1: C precedes G in slot order
        assert_eq!(consensus[0].dna.as_bytes(), b"ACGT");
    }

    #[test]
    fn test_collapse_equal_mode_modal_length_only() {
        let mut cfg = config();
        cfg.min_umi_group_size = 2;
        let reads = vec![
            read_with_barcode("ACGTACGT", b"IIIIIIII", "BC1"),
            read_with_barcode("ACGTACGT", b"IIIIIIII", "BC1"),
            read_with_barcode("ACGTAC", b"IIIIII", "BC1"), // indel artifact, outvoted
        ];

        let mut log = ParseLog::default();
        let consensus = umi_collapse(reads, &cfg, &mut log, false);
        assert_eq!(consensus.len(), 1);
        assert_eq!(consensus[0].dna.len(), 8);
        assert_eq!(consensus[0].umi_group_size, 2);
        assert_eq!(log.filter_duplicate_umi, 2);
    }

    #[test]
    fn test_collapse_ragged_mode_consensus_length() {
        let mut cfg = config();
        cfg.min_umi_group_size = 2;
        let reads = vec![
            read_with_barcode("ACGTACGTAC", b"IIIIIIIIII", "BC1"),
            read_with_barcode("ACGTACG", b"IIIIIII", "BC1"),
            read_with_barcode("ACGT", b"IIII", "BC1"),
        ];

        let mut log = ParseLog::default();
        let consensus = umi_collapse(reads, &cfg, &mut log, true);
        assert_eq!(consensus.len(), 1);
        // length of the 2nd-longest member: every kept position has >= 2 voters
        assert_eq!(consensus[0].dna.len(), 7);
        assert_eq!(consensus[0].umi_group_size, 3);
    }

    #[test]
    fn test_collapse_drops_small_groups() {
        let mut cfg = config();
        cfg.min_umi_group_size = 3;
        let reads = vec![
            read_with_barcode("ACGT", b"IIII", "BC1"),
            read_with_barcode("ACGT", b"IIII", "BC1"),
        ];

        let mut log = ParseLog::default();
        let consensus = umi_collapse(reads, &cfg, &mut log, false);
        assert!(consensus.is_empty());
        assert_eq!(log.filter_umi_group_size_too_small, 2);
    }

    #[test]
    fn test_collapse_drops_consensus_with_no_call() {
        let cfg = config();
        let reads = vec![
            read_with_barcode("ACNT", b"IIII", "BC1"),
            read_with_barcode("ACNT", b"IIII", "BC1"),
        ];

        let mut log = ParseLog::default();
        let consensus = umi_collapse(reads, &cfg, &mut log, false);
        assert!(consensus.is_empty());
        assert_eq!(log.filter_invalid_chars, 1);
    }

    #[test]
    fn test_collapse_separates_barcodes() {
        let cfg = config();
        let reads = vec![
            read_with_barcode("ACGT", b"IIII", "BC1"),
            read_with_barcode("TTTT", b"IIII", "BC2"),
        ];

        let mut log = ParseLog::default();
        let mut consensus = umi_collapse(reads, &cfg, &mut log, false);
        consensus.sort_by(|a, b| a.barcode.cmp(&b.barcode));
        assert_eq!(consensus.len(), 2);
        assert_eq!(consensus[0].umi_group_size, 1);
        assert_eq!(log.filter_duplicate_umi, 0);
    }

    // =====================================================================
    // translate / split
    // =====================================================================

    #[test]
    fn test_translate_filters_ptcs() {
        let reads = vec![
            read_with_barcode("ATGAAATGG", b"IIIIIIIII", "BC1"),
            read_with_barcode("ATGTAATGG", b"IIIIIIIII", "BC2"),
        ];
        let mut log = ParseLog::default();
        let orfs = translate_and_filter_ptcs(reads, &mut log, false);
        assert_eq!(orfs.len(), 1);
        assert_eq!(orfs[0].aas.as_bytes(), b"MKW");
        assert_eq!(log.filter_premature_stop_codon, 1);
    }

    #[test]
    fn test_translate_reverse_complement_path() {
        // reverse read: rc gives ATG AAA TGG in frame; length 10 truncates to 9
        let mut nts = Nts::from("ATGAAATGG");
        nts.reverse_complement();
        let mut seq = nts.as_str().to_string();
        seq.push('C'); // out-of-frame trailing base, dropped by the truncation
        let reads = vec![read_with_barcode(&seq, &vec![b'I'; 10], "BC1")];

        let mut log = ParseLog::default();
        let orfs = translate_and_filter_ptcs(reads, &mut log, true);
        assert_eq!(orfs.len(), 1);
        assert_eq!(orfs[0].aas.as_bytes(), b"MKW");
    }

    #[test]
    fn test_split_without_captures_is_identity_lift() {
        let cfg = config();
        let orfs = vec![
            Orf::from(read_with_barcode("ATGAAA", b"IIIIII", "BC1")),
            Orf::from(read_with_barcode("ATGGGG", b"IIIIII", "BC2")),
        ];
        let mut log = ParseLog::default();
        let split = split_orfs(orfs, &cfg, &mut log);
        assert_eq!(split.len(), 2);
        assert!(split.iter().all(|s| s.len() == 1));
        assert_eq!(split[0][0].aas.as_bytes(), b"MK");
    }

    #[test]
    fn test_split_by_capture_groups() {
        let mut cfg = config();
        cfg.set_split_pattern("(M[A-Z]*W)(K[A-Z]*)").unwrap();

        // MKW | KEG
        let orfs = vec![Orf::from(read_with_barcode("ATGAAATGGAAAGAAGGG", b"IIIIIIIIIIIIIIIIII", "BC1"))];
        let mut log = ParseLog::default();
        let split = split_orfs(orfs, &cfg, &mut log);
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].len(), 2);
        assert_eq!(split[0][0].aas.as_bytes(), b"MKW");
        assert_eq!(split[0][1].aas.as_bytes(), b"KEG");
        assert_eq!(split[0][0].cdns.len(), 3);
        assert_eq!(split[0][1].barcode, BString::from("BC1"));
    }

    #[test]
    fn test_split_requires_full_match() {
        let mut cfg = config();
        cfg.set_split_pattern("(MKW)").unwrap();

        // residues are MKWK: the pattern matches a prefix only
        let orfs = vec![Orf::from(read_with_barcode("ATGAAATGGAAA", b"IIIIIIIIIIII", "BC1"))];
        let mut log = ParseLog::default();
        let split = split_orfs(orfs, &cfg, &mut log);
        assert!(split.is_empty());
        assert_eq!(log.filter_split_failed, 1);
    }

    // =====================================================================
    // multi-template alignment
    // =====================================================================

    fn db_from_dna(entries: &[(&str, &str)]) -> Arc<TemplateDatabase> {
        let mut db = TemplateDatabase::new();
        for (label, dna) in entries {
            let cdns = Cdns::from(Nts::from(*dna));
            let aas = crate::polymer::Aas::from(cdns.clone());
            db.add_entry(label, cdns, aas);
        }
        Arc::new(db)
    }

    #[test]
    fn test_align_perfect_match_single_template() {
        let cfg = config();
        let db = db_from_dna(&[("t1", "ATGAAATGGGAA")]);
        let dbs = vec![Some(db)];

        let orfs =
            vec![vec![Orf::from(read_with_barcode("ATGAAATGGGAA", b"IIIIIIIIIIII", "BC1"))]];
        let mut log = ParseLog::default();
        let alignments = align_to_multiple_templates(orfs, &dbs, &cfg, &mut log, false);

        assert_eq!(alignments.len(), 1);
        let aln = &alignments[0];
        assert_eq!(aln.alignment, "MKWE");
        assert_eq!(aln.cdns.len(), 4);
        let tpl = aln.template.as_ref().unwrap();
        assert_eq!(tpl.id, 1);
        assert_eq!(tpl.labels, vec!["t1".to_string()]);
        assert_eq!(log, ParseLog::default());
    }

    #[test]
    fn test_align_selects_best_template() {
        let cfg = config();
        let db = db_from_dna(&[("t1", "ATGAAATGGGAA"), ("t2", "ATGCCCTGGGAA")]);
        let dbs = vec![Some(db)];

        let orfs =
            vec![vec![Orf::from(read_with_barcode("ATGCCCTGGGAA", b"IIIIIIIIIIII", "BC1"))]];
        let mut log = ParseLog::default();
        let alignments = align_to_multiple_templates(orfs, &dbs, &cfg, &mut log, false);
        assert_eq!(alignments.len(), 1);
        assert_eq!(alignments[0].template.as_ref().unwrap().labels, vec!["t2".to_string()]);
    }

    #[test]
    fn test_align_interns_composite_templates() {
        let cfg = config();
        let db = db_from_dna(&[("t1", "ATGAAATGGGAA")]);
        let dbs = vec![Some(db)];

        let mk_orfs = |bc: &str| {
            vec![Orf::from(read_with_barcode("ATGAAATGGGAA", b"IIIIIIIIIIII", bc))]
        };
        let mut log = ParseLog::default();
        let alignments = align_to_multiple_templates(
            vec![mk_orfs("BC1"), mk_orfs("BC2")],
            &dbs,
            &cfg,
            &mut log,
            false,
        );

        assert_eq!(alignments.len(), 2);
        let a = alignments[0].template.as_ref().unwrap();
        let b = alignments[1].template.as_ref().unwrap();
        assert!(Arc::ptr_eq(a, b));
    }

    #[test]
    fn test_align_null_slot_passes_through() {
        let cfg = config();
        let db = db_from_dna(&[("t1", "ATGAAATGG")]);
        let dbs = vec![Some(db), None];

        let main_orf = Orf::from(read_with_barcode("ATGAAATGG", b"IIIIIIIII", "BC1"));
        let pass_orf = Orf::from(read_with_barcode("GAAGGG", b"IIIIII", "BC1"));
        let mut log = ParseLog::default();
        let alignments =
            align_to_multiple_templates(vec![vec![main_orf, pass_orf]], &dbs, &cfg, &mut log, false);

        assert_eq!(alignments.len(), 1);
        let aln = &alignments[0];
        assert_eq!(aln.alignment, "MKWEG");
        let tpl = aln.template.as_ref().unwrap();
        assert_eq!(tpl.labels, vec!["t1".to_string(), "none".to_string()]);
        // only the templated slot contributes sequence
        assert_eq!(tpl.aas.as_bytes(), b"MKW");
    }

    #[test]
    fn test_align_rejects_poor_alignment() {
        let mut cfg = config();
        cfg.min_alignment_score = 0.9;
        let db = db_from_dna(&[("t1", "ATGAAATGGGAAATTCCCAAA")]);
        let dbs = vec![Some(db)];

        // same length, mostly mismatched codons
        let orfs =
            vec![vec![Orf::from(read_with_barcode("ATGGGGCATCATCATCGGCAT", b"IIIIIIIIIIIIIIIIIIIII", "BC1"))]];
        let mut log = ParseLog::default();
        let alignments = align_to_multiple_templates(orfs, &dbs, &cfg, &mut log, false);
        assert!(alignments.is_empty());
        assert_eq!(log.filter_bad_alignment, 1);
    }

    #[test]
    fn test_align_empty_database_counts_no_matching_template() {
        let cfg = config();
        let dbs = vec![Some(Arc::new(TemplateDatabase::new()))];

        let orfs = vec![vec![Orf::from(read_with_barcode("ATGAAA", b"IIIIII", "BC1"))]];
        let mut log = ParseLog::default();
        let alignments = align_to_multiple_templates(orfs, &dbs, &cfg, &mut log, false);
        assert!(alignments.is_empty());
        assert_eq!(log.filter_no_matching_template, 1);
    }

    // =====================================================================
    // unassembled-branch collation
    // =====================================================================

    fn aln_with_barcode(bc: &str) -> GroupAlignment {
        GroupAlignment { barcode: BString::from(bc), ..Default::default() }
    }

    #[test]
    fn test_interleave_matching_barcodes_adjacent() {
        let fw = vec![aln_with_barcode("AAA"), aln_with_barcode("CCC")];
        let rv = vec![aln_with_barcode("CCC"), aln_with_barcode("AAA")];
        let out = interleave_by_barcode(fw, rv);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].barcode, out[1].barcode);
        assert_eq!(out[2].barcode, out[3].barcode);
        assert_ne!(out[0].barcode, out[2].barcode);
    }

    #[test]
    fn test_interleave_unmatched_appended() {
        let fw = vec![aln_with_barcode("AAA"), aln_with_barcode("GGG")];
        let rv = vec![aln_with_barcode("AAA"), aln_with_barcode("TTT")];
        let out = interleave_by_barcode(fw, rv);
        assert_eq!(out.len(), 4);
        // the matched pair leads
        assert_eq!(out[0].barcode, BString::from("AAA"));
        assert_eq!(out[1].barcode, BString::from("AAA"));
        let tail: Vec<_> = out[2..].iter().map(|a| a.barcode.clone()).collect();
        assert!(tail.contains(&BString::from("GGG")));
        assert!(tail.contains(&BString::from("TTT")));
    }
}
