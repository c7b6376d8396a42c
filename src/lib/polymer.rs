//! Typed byte buffers for biological sequences.
//!
//! A [`Polymer`] is a growable buffer of single-byte symbols ([`Nt`],
//! [`Cdn`], or [`Aa`]). All three symbol types are newtypes over their ASCII
//! representation, so a polymer's storage is directly printable and the bulk
//! conversions in [`crate::kernels`] can run over the raw bytes.
//!
//! The conversions `Nts` → `Cdns` → `Aas` reuse the underlying buffer:
//! packing rewrites the window in place and shrinks the logical size to a
//! third, translation rewrites it byte for byte. Left-trimming with
//! [`Polymer::exo`] moves the logical window instead of shifting bytes.

use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::aa::{Aa, TranslationTable, STANDARD_TRANSLATION_TABLE};
use crate::cdn::Cdn;
use crate::kernels;
use crate::nt::Nt;

/// A single-byte sequence symbol.
///
/// Implementors are newtypes over one ASCII byte with a narrow validity
/// domain. `normalize` is the gatekeeper: every byte stored in a [`Polymer`]
/// has passed through it.
pub trait Monomer: Copy + Eq + Ord + Hash + std::fmt::Debug {
    /// Normalized representation of `c`, or 0 when `c` is not a valid symbol.
    fn normalize(c: u8) -> u8;

    /// Wraps a byte that has already been validated by [`Monomer::normalize`].
    fn from_byte_unchecked(c: u8) -> Self;

    /// The underlying ASCII byte.
    fn byte(self) -> u8;

    /// Dense index into this symbol's substitution matrices.
    fn index(self) -> usize;

    /// Byte emitted into an aligned-query string for a gap in the query.
    fn gap_byte() -> u8 {
        b'-'
    }

    /// Byte emitted for a query symbol inserted relative to the template.
    fn ins_byte(self) -> u8 {
        self.byte().to_ascii_lowercase()
    }

    /// Byte emitted for a query symbol matched against a template position.
    fn reg_byte(self) -> u8 {
        self.byte().to_ascii_uppercase()
    }
}

/// A growable, trimmable buffer of monomers.
#[derive(Clone)]
pub struct Polymer<M: Monomer> {
    buf: Vec<u8>,
    lo: usize,
    _marker: PhantomData<M>,
}

/// A nucleotide sequence.
pub type Nts = Polymer<Nt>;
/// A packed codon sequence.
pub type Cdns = Polymer<Cdn>;
/// An amino acid sequence.
pub type Aas = Polymer<Aa>;

impl<M: Monomer> Polymer<M> {
    /// Creates an empty polymer.
    #[must_use]
    pub fn new() -> Self {
        Polymer { buf: Vec::new(), lo: 0, _marker: PhantomData }
    }

    /// Creates an empty polymer with room for `capacity` monomers.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Polymer { buf: Vec::with_capacity(capacity), lo: 0, _marker: PhantomData }
    }

    /// Builds a polymer from ASCII input, silently skipping characters that
    /// do not normalize to a valid symbol.
    #[must_use]
    pub fn from_ascii(bytes: &[u8]) -> Self {
        let mut p = Self::with_capacity(bytes.len());
        p.push_ascii(bytes);
        p
    }

    /// Wraps bytes that are already normalized symbols.
    pub(crate) fn from_bytes_unchecked(bytes: &[u8]) -> Self {
        Polymer { buf: bytes.to_vec(), lo: 0, _marker: PhantomData }
    }

    pub(crate) fn from_vec_unchecked(buf: Vec<u8>, lo: usize) -> Self {
        Polymer { buf, lo, _marker: PhantomData }
    }

    pub(crate) fn into_parts(self) -> (Vec<u8>, usize) {
        (self.buf, self.lo)
    }

    /// Appends normalized symbols from ASCII input, returning how many bytes
    /// were skipped as invalid.
    pub fn push_ascii(&mut self, bytes: &[u8]) -> usize {
        let mut stripped = 0;
        self.buf.reserve(bytes.len());
        for &c in bytes {
            match M::normalize(c) {
                0 => stripped += 1,
                n => self.buf.push(n),
            }
        }
        stripped
    }

    /// Number of monomers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len() - self.lo
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.len() == self.lo
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// The raw ASCII view of the sequence.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[self.lo..]
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.lo..]
    }

    /// The sequence as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(self.as_bytes()).expect("polymer bytes are normalized ASCII")
    }

    /// The monomer at position `i`.
    ///
    /// # Panics
    /// Panics if `i` is out of bounds.
    #[inline]
    #[must_use]
    pub fn get(&self, i: usize) -> M {
        M::from_byte_unchecked(self.buf[self.lo + i])
    }

    /// Overwrites the monomer at position `i`.
    #[inline]
    pub fn set(&mut self, i: usize, m: M) {
        self.buf[self.lo + i] = m.byte();
    }

    #[must_use]
    pub fn first(&self) -> Option<M> {
        self.as_bytes().first().map(|&b| M::from_byte_unchecked(b))
    }

    #[must_use]
    pub fn last(&self) -> Option<M> {
        self.as_bytes().last().map(|&b| M::from_byte_unchecked(b))
    }

    /// Iterates over the monomers.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = M> + '_ {
        self.as_bytes().iter().map(|&b| M::from_byte_unchecked(b))
    }

    /// Appends `c` if it normalizes to a valid symbol.
    ///
    /// Returns true if `c` was accepted.
    pub fn push_byte(&mut self, c: u8) -> bool {
        match M::normalize(c) {
            0 => false,
            n => {
                self.buf.push(n);
                true
            }
        }
    }

    /// Appends a monomer.
    pub fn push(&mut self, m: M) {
        self.buf.push(m.byte());
    }

    /// Removes and returns the last monomer.
    pub fn pop(&mut self) -> Option<M> {
        if self.is_empty() {
            None
        } else {
            self.buf.pop().map(M::from_byte_unchecked)
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.lo = 0;
    }

    /// Exonuclease/exoprotease: trims `left` monomers from the left and
    /// `right` from the right without reallocating or shifting the retained
    /// window.
    pub fn exo(&mut self, left: usize, right: usize) {
        let left = left.min(self.len());
        self.lo += left;
        let right = right.min(self.len());
        self.buf.truncate(self.buf.len() - right);
    }

    /// Copies `len` monomers starting at `pos` into a fresh polymer. `len`
    /// is clamped to the end of the sequence.
    ///
    /// # Panics
    /// Panics if `pos > len()`.
    #[must_use]
    pub fn subclone(&self, pos: usize, len: usize) -> Self {
        assert!(pos <= self.len());
        let len = len.min(self.len() - pos);
        Self::from_bytes_unchecked(&self.as_bytes()[pos..pos + len])
    }

    /// Appends all monomers of `other`.
    pub fn append(&mut self, other: &Self) {
        self.buf.extend_from_slice(other.as_bytes());
    }

    /// Resizes to `n` monomers, filling any growth with `m`.
    pub fn resize(&mut self, n: usize, m: M) {
        self.buf.resize(self.lo + n, m.byte());
    }
}

impl<M: Monomer> Default for Polymer<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Monomer> PartialEq for Polymer<M> {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl<M: Monomer> Eq for Polymer<M> {}

impl<M: Monomer> Hash for Polymer<M> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl<M: Monomer> From<&str> for Polymer<M> {
    fn from(s: &str) -> Self {
        Self::from_ascii(s.as_bytes())
    }
}

impl<M: Monomer> std::fmt::Display for Polymer<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<M: Monomer> std::fmt::Debug for Polymer<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Polymer(\"{}\")", self.as_str())
    }
}

impl Nts {
    /// Complements the sequence in place.
    pub fn complement(&mut self) {
        kernels::complement_dna(self.bytes_mut());
    }

    /// Reverse-complements the sequence in place.
    pub fn reverse_complement(&mut self) {
        kernels::reverse_complement_dna(self.bytes_mut());
    }
}

impl From<Nts> for Cdns {
    /// Packs nucleotides into codons, reusing the buffer. Any trailing
    /// partial codon is dropped.
    fn from(mut dna: Nts) -> Cdns {
        let packed = kernels::pack_codons_in_place(dna.bytes_mut());
        let (mut buf, lo) = dna.into_parts();
        buf.truncate(lo + packed);
        Cdns::from_vec_unchecked(buf, lo)
    }
}

impl From<&Nts> for Cdns {
    fn from(dna: &Nts) -> Cdns {
        Cdns::from(dna.clone())
    }
}

impl Cdns {
    /// Unpacks the codons back into nucleotides.
    #[must_use]
    pub fn to_nts(&self) -> Nts {
        let mut nts = Nts::with_capacity(3 * self.len());
        for cdn in self.iter() {
            nts.push(cdn.p1());
            nts.push(cdn.p2());
            nts.push(cdn.p3());
        }
        nts
    }
}

impl Aas {
    /// Translates codons into residues with the given table.
    #[must_use]
    pub fn from_cdns(cdns: &Cdns, table: &TranslationTable) -> Aas {
        let mut bytes = cdns.as_bytes().to_vec();
        kernels::translate_codons(&mut bytes, table.bytes());
        Aas::from_vec_unchecked(bytes, 0)
    }
}

impl From<Cdns> for Aas {
    /// Translates with the standard genetic code, reusing the buffer.
    fn from(mut cdns: Cdns) -> Aas {
        kernels::translate_codons(cdns.bytes_mut(), STANDARD_TRANSLATION_TABLE.bytes());
        let (buf, lo) = cdns.into_parts();
        Aas::from_vec_unchecked(buf, lo)
    }
}
