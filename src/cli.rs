use crate::binomial::BinomialTable;
use crate::error::{CallerError, Result};
use crate::model::{self, GenotypePriors};
use crate::numeric::WideDouble;
use crate::phred::PhredTable;
use crate::pileup::Site;
use crate::posterior::PopulationDp;
use crate::stats::{self, SiteStats};
use crate::vcf::{CellCall, VcfRecord, VcfWriter};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Zero-variant posterior below which a site is emitted.
    pub threshold: f64,
    /// Baseline per-read false-positive rate.
    pub fp_rate: f64,
    /// Allelic dropout rate.
    pub dropout: f64,
    /// Mutation-rate prior for the population model.
    pub theta: f64,
    pub threads: Option<usize>,
}

/// Reads sample names, one per line, in pileup column order.
pub fn load_samples(path: &Path) -> Result<Vec<String>> {
    let f = File::open(path).map_err(|source| CallerError::ReadWithPath {
        source,
        path: path.to_path_buf(),
    })?;
    let mut samples = Vec::new();
    for line in BufReader::new(f).lines() {
        let line = line.map_err(|source| CallerError::ReadWithPath {
            source,
            path: path.to_path_buf(),
        })?;
        let name = line.trim();
        if !name.is_empty() {
            samples.push(name.to_string());
        }
    }
    if samples.is_empty() {
        return Err(CallerError::SamplesEmpty {
            path: path.to_path_buf(),
        });
    }
    Ok(samples)
}

/// Reads the pileup stream up front, skipping blank lines but keeping
/// original line numbers for diagnostics.
pub fn load_pileup_lines(path: &Path) -> Result<Vec<(usize, String)>> {
    let f = File::open(path).map_err(|source| CallerError::ReadWithPath {
        source,
        path: path.to_path_buf(),
    })?;
    let mut lines = Vec::new();
    for (idx, line) in BufReader::new(f).lines().enumerate() {
        let line = line.map_err(|source| CallerError::ReadWithPath {
            source,
            path: path.to_path_buf(),
        })?;
        if !line.trim().is_empty() {
            lines.push((idx + 1, line));
        }
    }
    Ok(lines)
}

/// Processes every position, fanning out across worker threads. Each position
/// is independent; the VCF writer is the only shared mutable state and is
/// locked per record, so records may appear out of submission order.
pub fn run(
    config: Config,
    samples: &[String],
    lines: Vec<(usize, String)>,
    mut writer: VcfWriter,
) -> Result<()> {
    let phred = PhredTable::new();
    let binom = BinomialTable::new(2 * samples.len());
    writer.write_header(samples)?;
    let writer = Mutex::new(writer);

    let pb = ProgressBar::new(lines.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:30} {pos}/{len} positions").unwrap(),
    );

    let process = |(line_num, line): &(usize, String)| -> Result<()> {
        match call_site(line, *line_num, samples.len(), &config, &phred, &binom) {
            Ok(Some(record)) => {
                let mut w = writer.lock().unwrap();
                w.write_record(&record)?;
            }
            Ok(None) => {}
            // One bad record must never abort its siblings.
            Err(e) if e.is_site_local() => {
                log::warn!("skipping pileup line {line_num}: {e}");
            }
            Err(e) => return Err(e),
        }
        pb.inc(1);
        Ok(())
    };

    if config.threads == Some(1) {
        lines.iter().try_for_each(process)?;
    } else if let Some(n) = config.threads {
        let pool = ThreadPoolBuilder::new().num_threads(n).build()?;
        pool.install(|| lines.par_iter().try_for_each(process))?;
    } else {
        lines.par_iter().try_for_each(process)?;
    }
    pb.abandon();

    writer
        .into_inner()
        .unwrap()
        .finish()
}

/// Full per-position flow: parse, prefilter, sanitize, likelihoods,
/// population DP, genotyping and summary statistics. `Ok(None)` means the
/// site produced no output; errors are site-local unless IO-related.
fn call_site(
    line: &str,
    line_num: usize,
    num_cells: usize,
    config: &Config,
    phred: &PhredTable,
    binom: &BinomialTable,
) -> Result<Option<VcfRecord>> {
    let mut site = Site::parse(line, line_num, num_cells)?;
    if site.prefilter().is_some() {
        return Ok(None);
    }
    site.sanitize(phred)?;
    if !site.choose_alt_base() {
        return Ok(None);
    }
    let (Some(ref_code), Some(alt_code)) = (site.ref_code, site.alt_code) else {
        return Ok(None);
    };

    let error_rate = model::adaptive_error_rate(&site, config.fp_rate);
    let priors = GenotypePriors::new(error_rate);
    let likelihoods: Vec<[WideDouble; 3]> = site
        .with_reads
        .iter()
        .map(|&i| {
            model::cell_likelihoods(&site.cells[i], ref_code, alt_code, &priors, config.dropout)
        })
        .collect();
    if likelihoods.is_empty() {
        return Ok(None);
    }

    let dp = PopulationDp::new(binom, config.theta);
    let posterior = dp.evaluate(&likelihoods);
    if posterior.zero_variant >= config.threshold {
        return Ok(None);
    }
    let genotypes = dp.genotype_cells(&likelihoods, &posterior);

    let mut calls: Vec<Option<CellCall>> = (0..num_cells).map(|_| None).collect();
    for (k, &i) in site.with_reads.iter().enumerate() {
        if let Some(genotype) = genotypes[k] {
            calls[i] = Some(CellCall {
                genotype,
                ref_depth: site.cells[i].count_code(ref_code),
                alt_depth: site.cells[i].count_code(alt_code),
                likelihoods: likelihoods[k],
            });
        }
    }

    let variant_depth: usize = site
        .with_reads
        .iter()
        .filter(|&&i| matches!(&calls[i], Some(c) if c.genotype > 0))
        .map(|&i| site.cells[i].num_reads)
        .sum();

    let mut ref_quals = Vec::new();
    let mut alt_quals = Vec::new();
    for &i in &site.with_reads {
        let cell = &site.cells[i];
        for (&code, &score) in cell.coded.iter().zip(&cell.scores) {
            if code == ref_code {
                ref_quals.push(f64::from(score));
            } else if code == alt_code {
                alt_quals.push(f64::from(score));
            }
        }
    }

    let site_stats = SiteStats {
        strand_bias: stats::strand_bias(&site.strand_counts, ref_code, alt_code),
        quality_by_depth: stats::quality_by_depth(posterior.quality, variant_depth),
        allele_ratio: stats::allele_ratio(
            site.depth_of(alt_code),
            site.cells_supporting(alt_code),
            site.depth_of(ref_code),
            site.cells_supporting(ref_code),
        ),
        base_q_rank_sum: stats::rank_sum_z(&ref_quals, &alt_quals),
    };

    Ok(Some(VcfRecord {
        seq_id: site.seq_id.clone(),
        pos: site.pos,
        ref_code,
        alt_code,
        quality: posterior.quality,
        depth: site.total_depth(),
        stats: site_stats,
        calls,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            threshold: 0.05,
            fp_rate: 0.002,
            dropout: 0.02,
            theta: 0.001,
            threads: None,
        }
    }

    fn call(line: &str, num_cells: usize) -> Result<Option<VcfRecord>> {
        let phred = PhredTable::new();
        let binom = BinomialTable::new(2 * num_cells);
        call_site(line, 1, num_cells, &test_config(), &phred, &binom)
    }

    #[test]
    fn clean_reference_site_yields_no_record() {
        let dots = ".".repeat(10);
        let quals = "I".repeat(10);
        let line = format!("chr1\t100\tA\t10\t{dots}\t{quals}");
        assert!(call(&line, 1).unwrap().is_none());
    }

    #[test]
    fn alt_heavy_cell_among_reference_cells_is_called() {
        let alt = "C".repeat(20);
        let dots = ".".repeat(20);
        let quals = "I".repeat(20);
        let line = format!(
            "chr1\t500\tA\t20\t{alt}\t{quals}\t20\t{dots}\t{quals}\t20\t{dots}\t{quals}\t20\t{dots}\t{quals}"
        );
        let record = call(&line, 4).unwrap().expect("site should be called");
        assert_eq!(record.pos, 500);
        assert_eq!(record.depth, 80);
        let genotypes: Vec<Option<u8>> = record
            .calls
            .iter()
            .map(|c| c.as_ref().map(|c| c.genotype))
            .collect();
        assert_eq!(genotypes, vec![Some(2), Some(0), Some(0), Some(0)]);
        assert_eq!(record.calls[0].as_ref().unwrap().alt_depth, 20);
        assert_eq!(record.calls[1].as_ref().unwrap().ref_depth, 20);
        assert!(record.quality > 10.0);
    }

    #[test]
    fn malformed_record_is_a_site_local_error() {
        let err = call("chr1\tnot-much-here", 2).unwrap_err();
        assert!(err.is_site_local());
    }

    #[test]
    fn zero_read_cells_render_as_no_calls() {
        let alt = "C".repeat(20);
        let dots = ".".repeat(20);
        let quals = "I".repeat(20);
        let line = format!(
            "chr1\t500\tA\t20\t{alt}\t{quals}\t20\t{dots}\t{quals}\t0\t*\t*\t20\t{dots}\t{quals}"
        );
        let record = call(&line, 4).unwrap().expect("site should be called");
        assert!(record.calls[2].is_none());
        assert!(record.calls[0].is_some());
    }

    #[test]
    fn load_samples_rejects_empty_files() {
        let dir = std::env::temp_dir().join("cellsnv_samples_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("empty.txt");
        std::fs::write(&path, "\n  \n").unwrap();
        let err = load_samples(&path).unwrap_err();
        assert!(matches!(err, CallerError::SamplesEmpty { .. }));
    }
}
