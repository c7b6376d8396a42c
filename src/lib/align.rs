//! Needleman-Wunsch alignment with free end-gaps, substitution matrices, and
//! the 3' overlap finder used for read-pair assembly.

use std::sync::LazyLock;

use crate::aa::STANDARD_TRANSLATION_TABLE;
use crate::cdn::Cdn;
use crate::polymer::{Monomer, Polymer};

/// Simple 2D array with a 1D backing buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    buf: Vec<T>,
}

impl<T: Clone + Default> Matrix<T> {
    /// Creates a `rows` x `cols` matrix filled with `t`.
    #[must_use]
    pub fn filled(rows: usize, cols: usize, t: T) -> Self {
        Matrix { rows, cols, buf: vec![t; rows * cols] }
    }

    /// Creates a matrix from a row-major buffer.
    ///
    /// # Panics
    /// Panics if `init.len() != rows * cols`.
    #[must_use]
    pub fn from_vec(rows: usize, cols: usize, init: Vec<T>) -> Self {
        assert_eq!(init.len(), rows * cols);
        Matrix { rows, cols, buf: init }
    }

    /// Resizes to `rows` x `cols` and clears every element to the default.
    /// The backing allocation is retained.
    pub fn resize(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.buf.clear();
        self.buf.resize(rows * cols, T::default());
    }

    #[inline]
    #[must_use]
    pub fn elem(&self, row: usize, col: usize) -> &T {
        &self.buf[row * self.cols + col]
    }

    #[inline]
    pub fn elem_mut(&mut self, row: usize, col: usize) -> &mut T {
        &mut self.buf[row * self.cols + col]
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[rustfmt::skip]
const BLOSUM62_DATA: [i32; 441] = [
     0,-4,-4,-4,-4,-4,-4,-4,-4,-4,-4,-4,-4,-4,-4,-4,-4,-4,-4,-4,-4,
    -4, 4, 0,-2,-1,-2, 0,-2,-1,-1,-1,-1,-2,-1,-1,-1, 1, 0, 0,-3,-2,
    -4, 0, 9,-3,-4,-2,-3,-3,-1,-3,-1,-1,-3,-3,-3,-3,-1,-1,-1,-2,-2,
    -4,-2,-3, 6, 2,-3,-1,-1,-3,-1,-4,-3, 1,-1, 0,-2, 0,-1,-3,-4,-3,
    -4,-1,-4, 2, 5,-3,-2, 0,-3, 1,-3,-2, 0,-1, 2, 0, 0,-1,-2,-3,-2,
    -4,-2,-2,-3,-3, 6,-3,-1, 0,-3, 0, 0,-3,-4,-3,-3,-2,-2,-1, 1, 3,
    -4, 0,-3,-1,-2,-3, 6,-2,-4,-2,-4,-3, 0,-2,-2,-2, 0,-2,-3,-2,-3,
    -4,-2,-3,-1, 0,-1,-2, 8,-3,-1,-3,-2, 1,-2, 0, 0,-1,-2,-3,-2, 2,
    -4,-1,-1,-3,-3, 0,-4,-3, 4,-3, 2, 1,-3,-3,-3,-3,-2,-1, 3,-3,-1,
    -4,-1,-3,-1, 1,-3,-2,-1,-3, 5,-2,-1, 0,-1, 1, 2, 0,-1,-2,-3,-2,
    -4,-1,-1,-4,-3, 0,-4,-3, 2,-2, 4, 2,-3,-3,-2,-2,-2,-1, 1,-2,-1,
    -4,-1,-1,-3,-2, 0,-3,-2, 1,-1, 2, 5,-2,-2, 0,-1,-1,-1, 1,-1,-1,
    -4,-2,-3, 1, 0,-3, 0, 1,-3, 0,-3,-2, 6,-2, 0, 0, 1, 0,-3,-4,-2,
    -4,-1,-3,-1,-1,-4,-2,-2,-3,-1,-3,-2,-2, 7,-1,-2,-1,-1,-2,-4,-3,
    -4,-1,-3, 0, 2,-3,-2, 0,-3, 1,-2, 0, 0,-1, 5, 1, 0,-1,-2,-2,-1,
    -4,-1,-3,-2, 0,-3,-2, 0,-3, 2,-2,-1, 0,-2, 1, 5,-1,-1,-3,-3,-2,
    -4, 1,-1, 0, 0,-2, 0,-1,-2, 0,-2,-1, 1,-1, 0,-1, 4, 1,-2,-3,-2,
    -4, 0,-1,-1,-1,-2,-2,-2,-1,-1,-1,-1, 0,-1,-1,-1, 1, 5, 0,-2,-2,
    -4, 0,-1,-3,-2,-1,-3,-3, 3,-2, 1, 1,-3,-2,-2,-3,-2, 0, 4,-3,-1,
    -4,-3,-2,-4,-3, 1,-2,-2,-3,-3,-2,-1,-4,-4,-2,-3,-3,-2,-3,11, 2,
    -4,-2,-2,-3,-2, 3,-3, 2,-1,-2,-1,-1,-2,-3,-1,-2,-2,-2,-1, 2, 7,
];

/// The BLOSUM62 matrix for residue alignments, indexed by `Aa::index` on
/// both axes (stop first).
pub static BLOSUM62: LazyLock<Matrix<i32>> =
    LazyLock::new(|| Matrix::from_vec(21, 21, BLOSUM62_DATA.to_vec()));

/// Nucleotide substitution matrix: +1 on the diagonal, -1 off it, indexed by
/// `Nt::index` (N excluded).
pub static NTSUBS: LazyLock<Matrix<i32>> = LazyLock::new(|| {
    let mut m = Matrix::filled(4, 4, -1);
    for i in 0..4 {
        *m.elem_mut(i, i) = 1;
    }
    m
});

/// Codon substitution matrix, indexed by `Cdn::index`:
/// `BLOSUM62[translate(i)][translate(j)]` plus one for identical codons.
pub static CDNSUBS: LazyLock<Matrix<i32>> = LazyLock::new(|| {
    let mut m = Matrix::filled(64, 64, 0);
    for (i, &ci) in Cdn::VALID_CHARS.iter().enumerate() {
        let ai = STANDARD_TRANSLATION_TABLE.translate(Cdn::from_byte(ci).expect("valid codon"));
        for (j, &cj) in Cdn::VALID_CHARS.iter().enumerate() {
            let aj = STANDARD_TRANSLATION_TABLE.translate(Cdn::from_byte(cj).expect("valid codon"));
            *m.elem_mut(i, j) = BLOSUM62.elem(ai.index(), aj.index()) + i32::from(i == j);
        }
    }
    m
});

/// The path taken to reach a traceback cell.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Move {
    /// The query and template symbols were paired.
    #[default]
    Match,
    /// A gap was introduced in the query.
    GapQ,
    /// A gap was introduced in the template.
    GapT,
}

/// Element of the Needleman-Wunsch traceback matrix.
#[derive(Clone, Copy, Debug, Default)]
pub struct Cell {
    /// The best alignment score at this location.
    pub score: i32,
    /// The move from the previous cell.
    pub mv: Move,
}

/// The result of a Needleman-Wunsch alignment.
///
/// The traceback matrix is retained so that gapped strings can be built for
/// more than one view of the same query (residues and codons share one
/// traceback since `|aas| == |cdns|`). Reusing an `Alignment` across calls
/// reuses its allocations.
#[derive(Clone, Debug, Default)]
pub struct Alignment {
    /// The global alignment score.
    pub score: i32,
    /// The gapped query string, when a full traceback was requested.
    pub aligned_query: String,
    traceback: Matrix<Cell>,
}

impl Alignment {
    /// Resets for another alignment, keeping allocations.
    pub fn clear(&mut self) {
        self.score = 0;
        self.aligned_query.clear();
        self.traceback.resize(0, 0);
    }

    /// Builds the gapped string for query `q` from the stored traceback.
    ///
    /// Walks from the bottom-right cell: a gap in the query emits
    /// `M::gap_byte()`, an insertion emits `M::ins_byte` (lowercase for
    /// letters, the raw byte for codons), a match emits `M::reg_byte`. The
    /// result is reversed into left-to-right order. The number of non-gap
    /// bytes equals `q.len()`.
    ///
    /// # Panics
    /// Panics if `q.len() + 1` does not match the traceback height.
    #[must_use]
    pub fn build_string<M: Monomer>(&self, q: &Polymer<M>) -> String {
        let q_size = q.len();
        let t_size = self.traceback.cols() - 1;
        assert_eq!(q_size + 1, self.traceback.rows());

        let mut out = Vec::with_capacity(q_size + t_size);
        let (mut i, mut j) = (q_size, t_size);
        while i + j != 0 {
            match self.traceback.elem(i, j).mv {
                Move::GapQ => {
                    out.push(M::gap_byte());
                    j -= 1;
                }
                Move::GapT => {
                    out.push(q.get(i - 1).ins_byte());
                    i -= 1;
                }
                Move::Match => {
                    out.push(q.get(i - 1).reg_byte());
                    i -= 1;
                    j -= 1;
                }
            }
        }
        out.reverse();
        String::from_utf8(out).expect("alignment bytes are ASCII")
    }
}

/// Needleman-Wunsch with free end-gaps on both sequences.
///
/// Gaps adjacent to either boundary carry no penalty; interior gaps cost
/// `gap_penalty` per position, charged to the outgoing cell. On score ties
/// a match is preferred over a query gap over a template gap. The score and
/// traceback land in `result`; the gapped query string is built unless
/// `score_only` is set.
pub fn nw_align<M: Monomer>(
    q: &Polymer<M>,
    t: &Polymer<M>,
    matrix: &Matrix<i32>,
    gap_penalty: i32,
    result: &mut Alignment,
    score_only: bool,
) {
    result.clear();

    let q_size = q.len();
    let t_size = t.len();
    result.traceback.resize(q_size + 1, t_size + 1);

    for i in 1..=q_size {
        result.traceback.elem_mut(i, 0).mv = Move::GapT;
    }
    for j in 1..=t_size {
        result.traceback.elem_mut(0, j).mv = Move::GapQ;
    }

    for i in 0..q_size {
        let n = q.get(i).index();
        let gap_q = i32::from(i != q_size - 1) * gap_penalty;
        for j in 0..t_size {
            let m = t.get(j).index();
            let gap_t = i32::from(j != t_size - 1) * gap_penalty;

            let mut cell = Cell {
                score: result.traceback.elem(i, j).score + matrix.elem(m, n),
                mv: Move::Match,
            };

            let gap_q_score = result.traceback.elem(i + 1, j).score - gap_q;
            if gap_q_score > cell.score {
                cell = Cell { score: gap_q_score, mv: Move::GapQ };
            }

            let gap_t_score = result.traceback.elem(i, j + 1).score - gap_t;
            if gap_t_score > cell.score {
                cell = Cell { score: gap_t_score, mv: Move::GapT };
            }

            *result.traceback.elem_mut(i + 1, j + 1) = cell;
        }
    }
    result.score = result.traceback.elem(q_size, t_size).score;

    if !score_only {
        let aligned = result.build_string(q);
        result.aligned_query = aligned;
    }
}

/// The score of aligning a sequence against itself: the sum of the diagonal
/// entries for its symbols.
#[must_use]
pub fn nw_self_align_score<M: Monomer>(q: &Polymer<M>, matrix: &Matrix<i32>) -> i32 {
    q.iter().map(|m| *matrix.elem(m.index(), m.index())).sum()
}

/// The result of a 3' overlap search between two sequences.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Overlap {
    /// Length of the overlapping region.
    pub overlap: usize,
    /// Number of mismatches inside the overlapping region.
    pub mismatches: usize,
    /// True when the overlap pairs a suffix of `a` with a prefix of `b`;
    /// false when the roles are reversed.
    pub in_order: bool,
}

/// Finds the longest suffix of `a` matching a prefix of `b` (or vice versa,
/// reported through `in_order`), permitting up to `max_mismatches`
/// mismatches in the overlapping region.
///
/// One row of saturating 16-bit match counters is updated per base of `b`;
/// suffix-of-`a` candidates are read off the row end after each row, and
/// suffix-of-`b` candidates off the final row.
#[must_use]
pub fn find_overlap(a: &[u8], b: &[u8], max_mismatches: usize) -> Overlap {
    let a_size = a.len();
    let b_size = b.len();

    let mut upper = vec![0u16; a_size + 1];
    let mut lower = vec![0u16; a_size + 1];

    let mut in_order = true;
    let mut max_overlap = 0usize;
    let mut max_row = 0usize;

    for r in 0..b_size {
        std::mem::swap(&mut upper, &mut lower);
        for c in 0..a_size {
            upper[c + 1] = lower[c].saturating_add(u16::from(a[c] == b[r]));
        }
        let matches = upper[a_size] as usize;
        if max_overlap < matches && r + 1 <= matches + max_mismatches {
            max_overlap = matches;
            max_row = r;
        }
    }

    for c in 0..a_size {
        let matches = upper[c + 1] as usize;
        if max_overlap < matches && c + 1 <= matches + max_mismatches {
            max_overlap = matches;
            max_row = c;
            in_order = false;
        }
    }

    Overlap { overlap: max_row + 1, mismatches: max_row + 1 - max_overlap, in_order }
}
