//! Read-level data model: raw reads, read pairs, translated ORFs, and
//! paired-end assembly.

use bstr::BString;

use crate::aa::{Aa, STANDARD_TRANSLATION_TABLE};
use crate::align::find_overlap;
use crate::nt::Nt;
use crate::polymer::{Aas, Cdns, Nts};

/// Deep sequencing read data.
///
/// A `Read` can be a forward read, a reverse read, an assembled read pair, or
/// the consensus of a UMI group. An empty `dna` marks a failure sentinel at
/// stage boundaries.
#[derive(Clone, Debug)]
pub struct Read {
    /// The extracted UMI barcode.
    pub barcode: BString,
    /// The number of raw reads this read represents (1 until UMI collapse).
    pub umi_group_size: u64,
    /// The nucleotide sequence.
    pub dna: Nts,
    /// FASTQ quality bytes, one per nucleotide.
    pub qual: Vec<u8>,
}

impl Default for Read {
    fn default() -> Self {
        Read { barcode: BString::default(), umi_group_size: 1, dna: Nts::new(), qual: Vec::new() }
    }
}

impl Read {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dna.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.dna.len()
    }

    /// Resizes sequence and qualities in lockstep.
    pub fn resize(&mut self, n: usize) {
        self.dna.resize(n, Nt::A);
        self.qual.resize(n, 0);
    }

    /// Drops the last base and its quality.
    pub fn pop_base(&mut self) {
        self.dna.pop();
        self.qual.pop();
    }

    /// Reverse-complements in place, first truncating to a whole number of
    /// codons so the 3' end stays in frame.
    pub fn reverse_complement(&mut self) {
        self.resize(self.len() / 3 * 3);
        self.dna.reverse_complement();
        self.qual.reverse();
    }

    /// Assembles a read pair across its 3' overlap.
    ///
    /// The reverse read is reverse-complemented, the overlap located, and in
    /// the overlapping window each position keeps the base with the higher
    /// quality (ties keep the forward base). The returned read carries the
    /// concatenated barcodes. On failure the returned read is empty.
    #[must_use]
    pub fn assemble(mut fw: Read, mut rv: Read, min_overlap: usize, max_mismatches: usize) -> Read {
        rv.dna.reverse_complement();

        let ol = find_overlap(fw.dna.as_bytes(), rv.dna.as_bytes(), max_mismatches);
        if ol.overlap < min_overlap || ol.mismatches > max_mismatches {
            return Read::default();
        }

        rv.qual.reverse();

        if !ol.in_order {
            std::mem::swap(&mut fw.dna, &mut rv.dna);
            std::mem::swap(&mut fw.qual, &mut rv.qual);
        }

        if ol.overlap > fw.len() || ol.overlap > rv.len() {
            return Read::default();
        }

        let start = fw.len() - ol.overlap;
        for j in 0..ol.overlap {
            let i = start + j;
            if fw.qual[i] < rv.qual[j] {
                fw.qual[i] = rv.qual[j];
                fw.dna.set(i, rv.dna.get(j));
            }
        }

        rv.dna.exo(ol.overlap, 0);
        fw.dna.append(&rv.dna);
        fw.qual.extend_from_slice(&rv.qual[ol.overlap..]);

        let mut barcode = fw.barcode;
        barcode.extend_from_slice(&rv.barcode);

        Read { barcode, umi_group_size: 1, dna: fw.dna, qual: fw.qual }
    }
}

/// A pair of unassembled forward and reverse reads.
#[derive(Clone, Debug, Default)]
pub struct ReadPair {
    pub fw: Read,
    pub rv: Read,
}

/// The translation of a read: packed codons plus their residues.
#[derive(Clone, Debug)]
pub struct Orf {
    /// Carried over from the source read.
    pub umi_group_size: u64,
    /// Index of the matched template, 0 until assigned.
    pub template_id: u64,
    /// Carried over from the source read.
    pub barcode: BString,
    /// The packed codon sequence.
    pub cdns: Cdns,
    /// The translated residues; always `translate(cdns)`.
    pub aas: Aas,
}

impl Default for Orf {
    fn default() -> Self {
        Orf {
            umi_group_size: 1,
            template_id: 0,
            barcode: BString::default(),
            cdns: Cdns::new(),
            aas: Aas::new(),
        }
    }
}

impl From<Read> for Orf {
    fn from(rd: Read) -> Orf {
        let cdns = Cdns::from(rd.dna);
        let aas = Aas::from_cdns(&cdns, &STANDARD_TRANSLATION_TABLE);
        Orf { umi_group_size: rd.umi_group_size, template_id: 0, barcode: rd.barcode, cdns, aas }
    }
}

impl Orf {
    /// True if the frame contains a premature termination codon.
    #[must_use]
    pub fn contains_ptc(&self) -> bool {
        self.aas.iter().any(|a| a == Aa::STOP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(dna: &str, qual: &[u8]) -> Read {
        Read { barcode: BString::default(), umi_group_size: 1, dna: Nts::from(dna), qual: qual.to_vec() }
    }

    fn rc(seq: &str) -> String {
        let mut nts = Nts::from(seq);
        nts.reverse_complement();
        nts.as_str().to_string()
    }

    #[test]
    fn test_assemble_in_order() {
        // fw suffix == rc(rv) prefix, ten bases
        let fw_seq = format!("{}{}", "TTGGCCAATT", "ACGTACGTCC");
        let rv_template = format!("{}{}", "ACGTACGTCC", "GGATC"); // rc(rv)
        let rv_seq = rc(&rv_template);

        let fw = read(&fw_seq, &vec![b'I'; fw_seq.len()]);
        let rv = read(&rv_seq, &vec![b'I'; rv_seq.len()]);

        let asm = Read::assemble(fw, rv, 9, 0);
        assert!(!asm.is_empty());
        assert_eq!(asm.dna.as_str(), format!("{}{}", "TTGGCCAATT", rv_template));
        assert_eq!(asm.qual.len(), asm.len());
    }

    #[test]
    fn test_assemble_reversed_overlap_swaps_roles() {
        // 5'-to-5' overlap: rc(rv) extends to the left of fw, so the overlap
        // is found along the column axis and the roles are swapped
        let fw_seq = "ACGTACGTCCGGGGG";
        let rv_rc = "TTTTTACGTACGTCC"; // suffix == fw prefix, ten bases
        let rv = read(&rc(rv_rc), &vec![b'I'; rv_rc.len()]);

        let asm = Read::assemble(read(fw_seq, &vec![b'I'; fw_seq.len()]), rv, 9, 0);
        assert!(!asm.is_empty());
        assert_eq!(asm.dna.as_str(), "TTTTTACGTACGTCCGGGGG");
    }

    #[test]
    fn test_assemble_rejects_short_overlap() {
        let fw = read("TTTTTTTTTTACGT", b"IIIIIIIIIIIIII");
        let rv_rc = "ACGTGGGGGGGGGG";
        let rv = read(&rc(rv_rc), b"IIIIIIIIIIIIII");
        let asm = Read::assemble(fw, rv, 9, 0);
        assert!(asm.is_empty());
    }

    #[test]
    fn test_assemble_quality_merge_prefers_higher_quality() {
        // disagreement inside the overlap: rv has the higher quality there
        let fw = read("AAAACCCCGGGG", b"IIIIIIIIIII#");
        // rc(rv) = CCCCGGGGTTTT with a disagreement at the last G of fw
        let rv_rc = "CCCCGGGATTTT";
        let mut rv = read(&rc(rv_rc), &[b'J'; 12]);
        rv.qual = vec![b'J'; 12];
        let asm = Read::assemble(fw, rv, 8, 1);
        assert!(!asm.is_empty());
        // fw position 11 (qual '#') lost to the rv base 'A' (qual 'J')
        assert_eq!(asm.dna.get(11), Nt::A);
    }

    #[test]
    fn test_assemble_quality_tie_keeps_forward_base() {
        let fw = read("AAAACCCCGGGG", b"IIIIIIIIIIII");
        let rv_rc = "CCCCGGGATTTT";
        let rv = read(&rc(rv_rc), &[b'I'; 12]);
        let asm = Read::assemble(fw, rv, 8, 1);
        assert!(!asm.is_empty());
        assert_eq!(asm.dna.get(11), Nt::G);
    }

    #[test]
    fn test_assemble_concatenates_barcodes() {
        let mut fw = read(&format!("{}{}", "TTGGCCAATT", "ACGTACGTCC"), &[b'I'; 20]);
        fw.barcode = BString::from("AAAA");
        let rv_template = format!("{}{}", "ACGTACGTCC", "GGATC");
        let mut rv = read(&rc(&rv_template), &[b'I'; 15]);
        rv.barcode = BString::from("TT");
        let asm = Read::assemble(fw, rv, 9, 0);
        assert_eq!(asm.barcode, BString::from("AAAATT"));
    }

    #[test]
    fn test_reverse_complement_truncates_to_frame() {
        let mut rd = read("ATGAAACCCGG", b"ABCDEFGHIJK");
        rd.reverse_complement();
        assert_eq!(rd.len(), 9);
        assert_eq!(rd.dna.as_str(), "GGGTTTCAT");
        assert_eq!(rd.qual, b"IHGFEDCBA".to_vec());
    }

    #[test]
    fn test_orf_from_read() {
        let rd = read("ATGAAATGG", b"IIIIIIIII");
        let orf = Orf::from(rd);
        assert_eq!(orf.cdns.len(), 3);
        assert_eq!(orf.aas.as_bytes(), b"MKW");
        assert!(!orf.contains_ptc());

        let stop = Orf::from(read("ATGTAATGG", b"IIIIIIIII"));
        assert!(stop.contains_ptc());
    }
}
