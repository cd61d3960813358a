use crate::error::{CallerError, Result};
use crate::numeric::WideDouble;
use crate::pileup::base_char;
use crate::stats::SiteStats;
use chrono::Local;
use itertools::Itertools;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Phred-scaled likelihoods are clamped here before rounding; a zero
/// likelihood would otherwise render as an infinite PL.
const MAX_PL: f64 = 99_999.0;

/// One sample's genotype call within a record.
#[derive(Debug)]
pub struct CellCall {
    pub genotype: u8, // 0 hom-ref, 1 het, 2 hom-alt
    pub ref_depth: usize,
    pub alt_depth: usize,
    pub likelihoods: [WideDouble; 3],
}

/// One called-variant site, ready for serialization. `calls` is aligned with
/// the sample columns; `None` renders as a `./.` no-call.
#[derive(Debug)]
pub struct VcfRecord {
    pub seq_id: String,
    pub pos: u64,
    pub ref_code: u8,
    pub alt_code: u8,
    pub quality: f64,
    pub depth: usize,
    pub stats: SiteStats,
    pub calls: Vec<Option<CellCall>>,
}

pub fn header_lines(samples: &[String]) -> String {
    let mut out = String::new();
    out.push_str("##fileformat=VCFv4.1\n");
    let _ = writeln!(out, "##fileDate={}", Local::now().format("%Y-%m-%d"));
    out.push_str("##source=cellsnv\n");
    out.push_str("##FILTER=<ID=LowQual,Description=\"Low quality\">\n");
    out.push_str("##INFO=<ID=AC,Number=A,Type=Integer,Description=\"Allele count in genotypes, for each ALT allele, in the same order as listed\">\n");
    out.push_str("##INFO=<ID=AF,Number=A,Type=Float,Description=\"Allele Frequency, for each ALT allele, in the same order as listed\">\n");
    out.push_str("##INFO=<ID=AN,Number=1,Type=Integer,Description=\"Total number of alleles in called genotypes\">\n");
    out.push_str("##INFO=<ID=BaseQRankSum,Number=1,Type=Float,Description=\"Z-score from Wilcoxon rank sum test of Alt Vs. Ref base qualities\">\n");
    out.push_str("##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Approximate read depth; some reads may have been filtered\">\n");
    out.push_str("##INFO=<ID=QD,Number=1,Type=Float,Description=\"Variant Confidence/Quality by Depth\">\n");
    out.push_str("##INFO=<ID=SOR,Number=1,Type=Float,Description=\"Symmetric Odds Ratio of 2x2 contingency table to detect strand bias\">\n");
    out.push_str("##INFO=<ID=PSARR,Number=1,Type=Float,Description=\"Ratio of per-sample Alt allele supporting reads to Ref allele supporting reads\">\n");
    out.push_str("##FORMAT=<ID=AD,Number=.,Type=Integer,Description=\"Allelic depths for the ref and alt alleles in the order listed\">\n");
    out.push_str("##FORMAT=<ID=DP,Number=1,Type=Integer,Description=\"Approximate read depth\">\n");
    out.push_str("##FORMAT=<ID=GQ,Number=1,Type=Integer,Description=\"Genotype Quality\">\n");
    out.push_str("##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n");
    out.push_str("##FORMAT=<ID=PL,Number=G,Type=Integer,Description=\"Normalized, Phred-scaled likelihoods for genotypes as defined in the VCF specification\">\n");
    let _ = writeln!(
        out,
        "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\t{}",
        samples.iter().join("\t")
    );
    out
}

impl VcfRecord {
    pub fn to_line(&self) -> String {
        let mut alt_alleles = 0u32;
        let mut total_alleles = 0u32;
        for call in self.calls.iter().flatten() {
            alt_alleles += u32::from(call.genotype);
            total_alleles += 2;
        }
        let alt_freq = if total_alleles == 0 {
            0.0
        } else {
            f64::from(alt_alleles) / f64::from(total_alleles)
        };

        let mut line = String::new();
        let _ = write!(
            line,
            "{}\t{}\t.\t{}\t{}\t{:.2}\t.\t",
            self.seq_id,
            self.pos,
            base_char(self.ref_code),
            base_char(self.alt_code),
            self.quality,
        );
        let _ = write!(
            line,
            "AC={};AF={:.3};AN={};BaseQRankSum={:.3};DP={};QD={:.2};SOR={:.3};PSARR={:.3}",
            alt_alleles,
            alt_freq,
            total_alleles,
            self.stats.base_q_rank_sum,
            self.depth,
            self.stats.quality_by_depth,
            self.stats.strand_bias,
            self.stats.allele_ratio,
        );
        line.push_str("\tGT:AD:DP:GQ:PL");
        for call in &self.calls {
            match call {
                None => line.push_str("\t./."),
                Some(call) => {
                    let gt = match call.genotype {
                        0 => "0/0",
                        1 => "0/1",
                        _ => "1/1",
                    };
                    let (pl, gq) = scaled_likelihoods(&call.likelihoods);
                    let _ = write!(
                        line,
                        "\t{gt}:{},{}:{}:{gq}:{}",
                        call.ref_depth,
                        call.alt_depth,
                        call.ref_depth + call.alt_depth,
                        pl.iter().join(","),
                    );
                }
            }
        }
        line.push('\n');
        line
    }
}

/// Rebases the three Phred-scaled likelihoods so the best genotype gets PL 0;
/// the genotype quality is the smallest nonzero rebased PL.
fn scaled_likelihoods(likelihoods: &[WideDouble; 3]) -> ([i64; 3], i64) {
    let phreds = likelihoods.map(|l| l.phred().min(MAX_PL));
    let lowest = phreds.iter().copied().fold(f64::INFINITY, f64::min);
    let pl = phreds.map(|q| (q - lowest).round() as i64);
    let gq = pl.iter().copied().filter(|&p| p != 0).min().unwrap_or(0);
    (pl, gq)
}

/// Serializes called-variant records to a VCF file. The writer is the only
/// shared mutable resource between workers; the caller wraps it in a mutex.
pub struct VcfWriter {
    out: BufWriter<File>,
    path: PathBuf,
}

impl VcfWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|source| CallerError::Write {
            source,
            path: path.to_path_buf(),
        })?;
        Ok(Self {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    fn write_str(&mut self, s: &str) -> Result<()> {
        self.out
            .write_all(s.as_bytes())
            .map_err(|source| CallerError::Write {
                source,
                path: self.path.clone(),
            })
    }

    pub fn write_header(&mut self, samples: &[String]) -> Result<()> {
        self.write_str(&header_lines(samples))
    }

    pub fn write_record(&mut self, record: &VcfRecord) -> Result<()> {
        self.write_str(&record.to_line())
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush().map_err(|source| CallerError::Write {
            source,
            path: self.path.clone(),
        })
    }
}
