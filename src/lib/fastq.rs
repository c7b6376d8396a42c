//! Memory-mapped FASTQ parsing.
//!
//! A FASTQ file is mapped read-only and carved into one contiguous byte
//! slice per worker; [`seek_record_start`] moves each interior breakpoint
//! forward to the next record boundary so no record straddles two workers.
//! Each worker then walks its slice four lines at a time. A record whose
//! sequence contains bytes that do not normalize to a nucleotide, or whose
//! quality length disagrees with its sequence length, is emitted as an
//! empty sentinel `Read` and counted by the QC stage. `N` bases are
//! accepted here; no-calls are dealt with after UMI consensus.

use std::fs::File;
use std::path::Path;

use bstr::ByteSlice;
use memmap2::Mmap;

use crate::errors::{DsaError, Result};
use crate::parallel::{parallel_transform, worker_count};
use crate::polymer::Nts;
use crate::read::Read;

/// A read-only memory mapping of a FASTQ file.
pub struct FastqMapping {
    map: Mmap,
}

impl FastqMapping {
    /// Maps `path` read-only.
    ///
    /// # Errors
    /// Fails when the file cannot be opened or mapped.
    #[allow(unsafe_code)]
    pub fn open(path: &Path) -> Result<FastqMapping> {
        let file =
            File::open(path).map_err(|e| DsaError::Io { path: path.to_path_buf(), source: e })?;
        // SAFETY: the mapping is read-only and the pipeline reads the file
        // exactly once at startup; concurrent truncation of an input FASTQ
        // is outside the supported execution model.
        let map = unsafe { Mmap::map(&file) }
            .map_err(|e| DsaError::Io { path: path.to_path_buf(), source: e })?;
        Ok(FastqMapping { map })
    }

    /// The mapped file contents.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.map
    }
}

/// Advances `from` to the start of the next FASTQ record.
///
/// Locates a `+` byte whose neighbors are both newlines (the separator line
/// of a record), then skips the quality line that follows it.
#[must_use]
pub fn seek_record_start(buf: &[u8], from: usize) -> usize {
    let mut pos = from;
    while pos < buf.len() {
        let Some(offset) = buf[pos..].find_byte(b'+') else {
            return buf.len();
        };
        let i = pos + offset;
        if i > 0 && buf[i - 1] == b'\n' && i + 1 < buf.len() && buf[i + 1] == b'\n' {
            let qual_start = i + 2;
            return match buf[qual_start..].find_byte(b'\n') {
                Some(k) => qual_start + k + 1,
                None => buf.len(),
            };
        }
        pos = i + 1;
    }
    buf.len()
}

/// Returns the rest of `buf` after the next newline.
fn skip_line(buf: &[u8]) -> &[u8] {
    match buf.find_byte(b'\n') {
        Some(i) => &buf[i + 1..],
        None => &[],
    }
}

/// Splits off one line; the line excludes its terminating newline.
fn take_line(buf: &[u8]) -> (&[u8], &[u8]) {
    match buf.find_byte(b'\n') {
        Some(i) => (&buf[..i], &buf[i + 1..]),
        None => (buf, &[]),
    }
}

/// Parses one worker's slice of FASTQ records.
fn parse_slice(mut buf: &[u8]) -> Vec<Read> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        buf = skip_line(buf); // header
        let (seq_line, rest) = take_line(buf);
        buf = rest;
        buf = skip_line(buf); // separator
        let (qual_line, rest) = take_line(buf);
        buf = rest;

        let mut dna = Nts::with_capacity(seq_line.len());
        let stripped = dna.push_ascii(seq_line);

        if stripped != 0 || dna.len() != qual_line.len() {
            out.push(Read::default());
        } else {
            out.push(Read {
                barcode: bstr::BString::default(),
                umi_group_size: 1,
                dna,
                qual: qual_line.to_vec(),
            });
        }
    }
    out
}

/// Parses an entire mapped FASTQ file into reads, in file order, using all
/// workers. Invalid records become empty sentinel reads.
#[must_use]
pub fn extract_read_data(bytes: &[u8]) -> Vec<Read> {
    let workers = worker_count();
    let chunk = bytes.len() / workers;

    let mut breakpoints = Vec::with_capacity(workers + 1);
    breakpoints.push(0);
    if chunk > 0 {
        for i in 1..workers {
            let adjusted = seek_record_start(bytes, i * chunk);
            let prev = *breakpoints.last().expect("non-empty");
            breakpoints.push(adjusted.max(prev));
        }
    }
    breakpoints.push(bytes.len());

    let slices: Vec<&[u8]> =
        breakpoints.windows(2).map(|w| &bytes[w[0]..w[1]]).collect();

    let partials = parallel_transform(slices, parse_slice);
    let total: usize = partials.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total);
    for partial in partials {
        out.extend(partial);
    }
    out
}
