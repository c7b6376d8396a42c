#![deny(unsafe_code)]

//! Deep sequencing analysis of paired-end amplicon reads encoding protein
//! regions: UMI-collapsed consensus building, templated alignment, and
//! substitution statistics, emitted as tab-separated tables on stdout.

use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;

use dsa_lib::aa::STANDARD_TRANSLATION_TABLE;
use dsa_lib::config::{Config, TemplateSource};
use dsa_lib::fastq::{extract_read_data, FastqMapping};
use dsa_lib::logging::StageTimer;
use dsa_lib::pipeline::{
    align_to_multiple_templates, assemble_reads, interleave_by_barcode, qc_reads, split_orfs,
    translate_and_filter_ptcs, umi_collapse, GroupAlignment, ParseLog,
};
use dsa_lib::polymer::{Aas, Cdns, Nts};
use dsa_lib::read::Read;
use dsa_lib::report::{emit, sort_by_template, Report};
use dsa_lib::template_db::TemplateDatabase;
use dsa_lib::umi::UmiExtractor;
use dsa_lib::validation::validate_file_exists;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(
    name = "dsa",
    version,
    about = "Deep sequencing analysis of paired-end amplicon reads encoding protein regions"
)]
struct Args {
    /// Forward reads FASTQ file
    fw_fastq: PathBuf,

    /// Reverse reads FASTQ file
    rv_fastq: PathBuf,

    /// Forward nucleotide reference sequence: ATGC literal, N wildcard,
    /// lowercase n runs capture the UMI (repeatable, tried in order)
    #[arg(short = 'f', long = "fw_ref")]
    fw_ref: Vec<String>,

    /// Reverse nucleotide reference sequence (repeatable, tried in order)
    #[arg(short = 'r', long = "rv_ref")]
    rv_ref: Vec<String>,

    /// Amino acid template sequence; an empty value makes a pass-through slot
    #[arg(short = 't', long = "template")]
    template: Vec<String>,

    /// In-frame DNA template sequence
    #[arg(short = 'd', long = "template_dna")]
    template_dna: Vec<String>,

    /// IMGT-style FASTA template database
    #[arg(long = "template_db")]
    template_db: Vec<PathBuf>,

    /// Amino acids to trim from each template as L,R (one per template source)
    #[arg(long = "trim", value_name = "L,R", value_parser = parse_trim)]
    trim: Vec<(usize, usize)>,

    /// Pattern splitting translated reads; one capture group per template source
    #[arg(long = "split", value_name = "REGEX")]
    split: Option<String>,

    /// Minimum FASTQ quality character kept at 3' read ends
    #[arg(short = 'q', long = "min_qual", default_value = "A", value_parser = parse_qual_char)]
    min_qual: u8,

    /// Minimum reads per UMI group
    #[arg(short = 'g', long = "min_umi_grp", default_value_t = 1)]
    min_umi_grp: usize,

    /// Minimum 3' overlap for read-pair assembly
    #[arg(short = 'v', long = "min_overlap", default_value_t = 9)]
    min_overlap: usize,

    /// Maximum mismatches tolerated in the assembly overlap
    #[arg(short = 'm', long = "max_mismatch", default_value_t = 0)]
    max_mismatch: usize,

    /// Minimum template alignment score as a fraction of the self-score
    #[arg(short = 'a', long = "min_aln", default_value_t = 0.8)]
    min_aln: f32,

    /// Number template positions from this value in report headers
    #[arg(long = "number_from", default_value_t = 1)]
    number_from: usize,

    /// Codon rendition in the alignments table
    #[arg(long = "show_codons", value_name = "MODE", default_value = "none")]
    show_codons: String,

    /// Align forward and reverse reads separately instead of assembling
    #[arg(short = 'x', long = "skip_assembly")]
    skip_assembly: bool,

    /// Omit the Settings and Parse sections from the report
    #[arg(long = "no_header")]
    no_header: bool,
}

fn parse_trim(s: &str) -> std::result::Result<(usize, usize), String> {
    let (left, right) = s
        .split_once(',')
        .ok_or_else(|| format!("'{s}' is not of the form L,R"))?;
    let left = left.trim().parse::<usize>().map_err(|e| format!("bad left trim '{left}': {e}"))?;
    let right =
        right.trim().parse::<usize>().map_err(|e| format!("bad right trim '{right}': {e}"))?;
    Ok((left, right))
}

fn parse_qual_char(s: &str) -> std::result::Result<u8, String> {
    match s.as_bytes() {
        [c] if c.is_ascii_graphic() => Ok(*c),
        _ => Err(format!("'{s}' is not a single printable ASCII character")),
    }
}

/// Which template flag produced a source; used to recover the command-line
/// order of the three repeatable template options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TemplateFlag {
    Protein,
    Dna,
    Db,
}

/// Scans raw arguments for template flags in order of appearance.
fn template_flag_order<I: IntoIterator<Item = String>>(raw_args: I) -> Vec<TemplateFlag> {
    let mut order = Vec::new();
    for arg in raw_args {
        if arg == "-t" || arg == "--template" || arg.starts_with("--template=") {
            order.push(TemplateFlag::Protein);
        } else if arg == "-d" || arg == "--template_dna" || arg.starts_with("--template_dna=") {
            order.push(TemplateFlag::Dna);
        } else if arg == "--template_db" || arg.starts_with("--template_db=") {
            order.push(TemplateFlag::Db);
        }
    }
    order
}

/// Builds the template source list in command-line order. Falls back to
/// proteins, then DNA templates, then databases when the raw scan disagrees
/// with the parsed counts (e.g. exotic quoting).
fn ordered_template_sources(args: &Args, order: &[TemplateFlag]) -> Vec<TemplateSource> {
    let counts_match = order.iter().filter(|f| **f == TemplateFlag::Protein).count()
        == args.template.len()
        && order.iter().filter(|f| **f == TemplateFlag::Dna).count() == args.template_dna.len()
        && order.iter().filter(|f| **f == TemplateFlag::Db).count() == args.template_db.len();

    let order: Vec<TemplateFlag> = if counts_match {
        order.to_vec()
    } else {
        std::iter::repeat(TemplateFlag::Protein)
            .take(args.template.len())
            .chain(std::iter::repeat(TemplateFlag::Dna).take(args.template_dna.len()))
            .chain(std::iter::repeat(TemplateFlag::Db).take(args.template_db.len()))
            .collect()
    };

    let mut proteins = args.template.iter();
    let mut dnas = args.template_dna.iter();
    let mut dbs = args.template_db.iter();

    order
        .into_iter()
        .filter_map(|flag| match flag {
            TemplateFlag::Protein => {
                proteins.next().map(|s| TemplateSource::Protein(Aas::from(s.as_str())))
            }
            TemplateFlag::Dna => {
                dnas.next().map(|s| TemplateSource::Dna(Cdns::from(Nts::from(s.as_str()))))
            }
            TemplateFlag::Db => dbs.next().map(|p| TemplateSource::Fasta(p.clone())),
        })
        .collect()
}

fn build_config(args: &Args, sources: Vec<TemplateSource>) -> Result<Config> {
    let mut config = Config {
        fw_path: args.fw_fastq.clone(),
        rv_path: args.rv_fastq.clone(),
        fw_refs: args.fw_ref.clone(),
        rv_refs: args.rv_ref.clone(),
        template_sources: sources,
        trims: args.trim.clone(),
        min_alignment_score: args.min_aln,
        min_qual: args.min_qual,
        min_umi_group_size: args.min_umi_grp,
        min_overlap: args.min_overlap,
        max_mismatches: args.max_mismatch,
        number_from: args.number_from,
        codon_output: args.show_codons.parse()?,
        skip_assembly: args.skip_assembly,
        no_header: args.no_header,
        ..Config::default()
    };
    if let Some(pattern) = &args.split {
        config.set_split_pattern(pattern)?;
    }
    config.validate()?;
    Ok(config)
}

/// Instantiates one database per template source, trimmed as configured.
/// An empty protein source yields a `None` (pass-through) slot; no sources
/// at all yield a single pass-through slot.
fn build_databases(config: &Config) -> Result<Vec<Option<Arc<TemplateDatabase>>>> {
    if config.template_sources.is_empty() {
        return Ok(vec![None]);
    }

    let mut dbs = Vec::with_capacity(config.template_sources.len());
    for (i, source) in config.template_sources.iter().enumerate() {
        let db = match source {
            TemplateSource::Fasta(path) => {
                let db = TemplateDatabase::from_imgt_fasta(path).with_context(|| {
                    format!(
                        "could not parse '{}' as a template database; databases should be \
                         .fasta files of in-frame nucleotides with IMGT-style headers",
                        path.display()
                    )
                })?;
                Some(db)
            }
            TemplateSource::Dna(cdns) => {
                let mut db = TemplateDatabase::new();
                let aas = Aas::from_cdns(cdns, &STANDARD_TRANSLATION_TABLE);
                db.add_entry("user_defined_cdns", cdns.clone(), aas);
                Some(db)
            }
            TemplateSource::Protein(aas) if aas.is_empty() => None,
            TemplateSource::Protein(aas) => {
                let mut db = TemplateDatabase::new();
                db.add_entry("user_defined_aas", Cdns::new(), aas.clone());
                Some(db)
            }
        };

        dbs.push(match db {
            Some(mut db) => {
                if let Some(&trim) = config.trims.get(i) {
                    db.trim(trim)?;
                }
                Some(Arc::new(db))
            }
            None => None,
        });
    }
    Ok(dbs)
}

fn load_reads(path: &std::path::Path) -> Result<Vec<Read>> {
    let mapping = FastqMapping::open(path)?;
    Ok(extract_read_data(mapping.bytes()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let raw_args: Vec<String> = std::env::args().collect();
    let args = Args::parse();

    let sources = ordered_template_sources(&args, &template_flag_order(raw_args));
    let config = build_config(&args, sources)?;

    validate_file_exists(&config.fw_path, "Forward reads FASTQ")?;
    validate_file_exists(&config.rv_path, "Reverse reads FASTQ")?;

    let fwexs: Vec<UmiExtractor> = config
        .fw_refs
        .iter()
        .map(|r| {
            UmiExtractor::new(r)
                .with_context(|| format!("fw_ref '{r}' is not a valid reference sequence"))
        })
        .collect::<Result<_>>()?;
    let rvexs: Vec<UmiExtractor> = config
        .rv_refs
        .iter()
        .map(|r| {
            UmiExtractor::new(r)
                .with_context(|| format!("rv_ref '{r}' is not a valid reference sequence"))
        })
        .collect::<Result<_>>()?;

    let dbs = build_databases(&config)?;
    if config.skip_assembly
        && (dbs.len() > 1 || dbs[0].as_ref().is_some_and(|db| db.len() > 1))
    {
        bail!(
            "skipping assembly (-x, --skip_assembly) is incompatible with split templates \
             and multiple template alignment"
        );
    }

    let clock_start = Instant::now();
    info!("Running dsa version {VERSION}");

    let timer = StageTimer::new("Parsing FASTQ input");
    let fwreads = load_reads(&config.fw_path)
        .with_context(|| format!("error parsing '{}'", config.fw_path.display()))?;
    let rvreads = load_reads(&config.rv_path)
        .with_context(|| format!("error parsing '{}'", config.rv_path.display()))?;
    timer.finish((fwreads.len() + rvreads.len()) as u64);

    if fwreads.len() != rvreads.len() {
        bail!(
            "read count disagreement between {} and {}",
            config.fw_path.display(),
            config.rv_path.display()
        );
    }
    let total_reads = fwreads.len() as u64;

    let mut log = ParseLog::default();

    let timer = StageTimer::new("Quality control");
    let qcd_pairs = qc_reads(fwreads, rvreads, &fwexs, &rvexs, &config, &mut log);
    timer.finish(qcd_pairs.len() as u64);

    let mut alignments: Vec<GroupAlignment> = if config.skip_assembly {
        // Low-quality 3' ends or over-long PCR templates can make assembly
        // impossible; each side then runs the pipeline on its own and the
        // two alignment streams are collated by barcode at the end.
        let mut fwreads = Vec::with_capacity(qcd_pairs.len());
        let mut rvreads = Vec::with_capacity(qcd_pairs.len());
        for mut pair in qcd_pairs {
            pair.rv.barcode = pair.fw.barcode.clone();
            fwreads.push(pair.fw);
            rvreads.push(pair.rv);
        }

        let timer = StageTimer::new("UMI collapse");
        let fwreads = umi_collapse(fwreads, &config, &mut log, true);
        let rvreads = umi_collapse(rvreads, &config, &mut log, true);
        timer.finish((fwreads.len() + rvreads.len()) as u64);

        let timer = StageTimer::new("Translation and alignment");
        let nterm = translate_and_filter_ptcs(fwreads, &mut log, false);
        let nsplits = split_orfs(nterm, &config, &mut log);
        let fwaln = align_to_multiple_templates(nsplits, &dbs, &config, &mut log, true);

        let cterm = translate_and_filter_ptcs(rvreads, &mut log, true);
        let csplits = split_orfs(cterm, &config, &mut log);
        let rvaln = align_to_multiple_templates(csplits, &dbs, &config, &mut log, true);
        timer.finish((fwaln.len() + rvaln.len()) as u64);

        interleave_by_barcode(fwaln, rvaln)
    } else {
        let timer = StageTimer::new("Assembling read pairs");
        let reads = assemble_reads(qcd_pairs, &config, &mut log);
        timer.finish(reads.len() as u64);

        let timer = StageTimer::new("UMI collapse");
        let reads = umi_collapse(reads, &config, &mut log, false);
        timer.finish(reads.len() as u64);

        let timer = StageTimer::new("Translation and alignment");
        let orfs = translate_and_filter_ptcs(reads, &mut log, false);
        let splits = split_orfs(orfs, &config, &mut log);
        let alignments = align_to_multiple_templates(splits, &dbs, &config, &mut log, false);
        timer.finish(alignments.len() as u64);

        alignments
    };

    sort_by_template(&mut alignments);

    let report = Report {
        version: VERSION,
        config: &config,
        log: &log,
        total_reads,
        elapsed: clock_start.elapsed(),
        alignments: &alignments,
    };

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    emit(&mut out, &report)?;
    out.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trim() {
        assert_eq!(parse_trim("3,4").unwrap(), (3, 4));
        assert_eq!(parse_trim("0,0").unwrap(), (0, 0));
        assert!(parse_trim("3").is_err());
        assert!(parse_trim("a,b").is_err());
    }

    #[test]
    fn test_parse_qual_char() {
        assert_eq!(parse_qual_char("A").unwrap(), b'A');
        assert_eq!(parse_qual_char("!").unwrap(), b'!');
        assert!(parse_qual_char("").is_err());
        assert!(parse_qual_char("AB").is_err());
    }

    #[test]
    fn test_template_flag_order() {
        let raw = ["dsa", "fw.fq", "rv.fq", "--template_db=v.fasta", "-t", "MKV", "--template_dna", "ATG"]
            .map(String::from);
        assert_eq!(
            template_flag_order(raw),
            vec![TemplateFlag::Db, TemplateFlag::Protein, TemplateFlag::Dna]
        );
    }

    #[test]
    fn test_ordered_template_sources_follows_flag_order() {
        let args = Args::parse_from([
            "dsa", "fw.fq", "rv.fq", "--template_dna", "ATGAAA", "-t", "MKV",
        ]);
        let order = vec![TemplateFlag::Dna, TemplateFlag::Protein];
        let sources = ordered_template_sources(&args, &order);
        assert_eq!(sources.len(), 2);
        assert!(matches!(sources[0], TemplateSource::Dna(_)));
        assert!(matches!(sources[1], TemplateSource::Protein(_)));
    }

    #[test]
    fn test_ordered_template_sources_fallback_on_mismatch() {
        let args = Args::parse_from(["dsa", "fw.fq", "rv.fq", "-t", "MKV", "-d", "ATGAAA"]);
        // raw scan missed everything; fall back to declaration order
        let sources = ordered_template_sources(&args, &[]);
        assert_eq!(sources.len(), 2);
        assert!(matches!(sources[0], TemplateSource::Protein(_)));
        assert!(matches!(sources[1], TemplateSource::Dna(_)));
    }

    #[test]
    fn test_build_config_wires_arguments() {
        let args = Args::parse_from([
            "dsa",
            "fw.fq",
            "rv.fq",
            "-f",
            "GAAnnCGnn",
            "-r",
            "CCnnTT",
            "-q",
            "5",
            "-g",
            "3",
            "--show_codons",
            "ascii",
        ]);
        let config = build_config(&args, Vec::new()).unwrap();
        assert_eq!(config.fw_refs, vec!["GAAnnCGnn".to_string()]);
        assert_eq!(config.min_qual, b'5');
        assert_eq!(config.min_umi_group_size, 3);
        assert_eq!(config.codon_output, dsa_lib::config::CodonOutput::Ascii);
    }

    #[test]
    fn test_build_config_rejects_bad_show_codons() {
        let args = Args::parse_from(["dsa", "fw.fq", "rv.fq", "--show_codons", "diagonal"]);
        assert!(build_config(&args, Vec::new()).is_err());
    }

    #[test]
    fn test_build_databases_empty_protein_is_pass_through() {
        let mut config = Config::default();
        config.template_sources = vec![
            TemplateSource::Protein(Aas::from("")),
            TemplateSource::Protein(Aas::from("MKV")),
        ];
        let dbs = build_databases(&config).unwrap();
        assert_eq!(dbs.len(), 2);
        assert!(dbs[0].is_none());
        assert!(dbs[1].is_some());
        assert!(!dbs[1].as_ref().unwrap().codon_data_available());
    }

    #[test]
    fn test_build_databases_no_sources_single_slot() {
        let config = Config::default();
        let dbs = build_databases(&config).unwrap();
        assert_eq!(dbs.len(), 1);
        assert!(dbs[0].is_none());
    }

    #[test]
    fn test_build_databases_applies_trim() {
        let mut config = Config::default();
        config.template_sources =
            vec![TemplateSource::Dna(Cdns::from(Nts::from("ATGGAAGTTAAA")))];
        config.trims = vec![(1, 1)];
        let dbs = build_databases(&config).unwrap();
        let db = dbs[0].as_ref().unwrap();
        assert_eq!(db.aas(1).as_bytes(), b"EV");
    }
}
