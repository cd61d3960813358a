mod binomial;
mod cli;
mod error;
mod model;
mod numeric;
mod phred;
mod pileup;
mod posterior;
mod stats;
mod vcf;

use crate::error::Result;
use clap::Parser;
use miette::IntoDiagnostic;
use std::path::Path;

/// Call single-nucleotide variants across pooled single-cell pileups.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Pileup input file (samtools mpileup text, one record per position).
    #[arg(short, long)]
    pileup: String,

    /// File listing sample names, one per line, in pileup column order.
    #[arg(short, long)]
    samples: String,

    /// Output VCF path.
    #[arg(short, long)]
    output: String,

    /// Zero-variant posterior threshold below which a site is called.
    #[arg(long, default_value_t = 0.05, value_parser = unit_rate, allow_negative_numbers = true)]
    threshold: f64,

    /// Baseline per-read false-positive rate.
    #[arg(long, default_value_t = 0.002, value_parser = fp_rate)]
    fp_rate: f64,

    /// Allelic dropout rate.
    #[arg(long, default_value_t = 0.02, value_parser = unit_rate)]
    dropout: f64,

    /// Mutation-rate prior for the population model.
    #[arg(long, default_value_t = 0.001, value_parser = unit_rate)]
    mutation_rate: f64,

    /// Number of worker threads (defaults to all cores).
    #[arg(short, long)]
    threads: Option<usize>,
}

fn unit_rate(s: &str) -> std::result::Result<f64, String> {
    let rate: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("{rate} is outside 0..=1"))
    }
}

/// The prior entry 1 - 3p must stay positive, so the rate is capped below
/// one third rather than one.
fn fp_rate(s: &str) -> std::result::Result<f64, String> {
    let rate: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if rate >= 0.0 && 3.0 * rate < 1.0 {
        Ok(rate)
    } else {
        Err(format!("{rate} is outside 0..1/3"))
    }
}

fn try_main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let samples = cli::load_samples(Path::new(&args.samples))?;
    let lines = cli::load_pileup_lines(Path::new(&args.pileup))?;
    let writer = vcf::VcfWriter::create(Path::new(&args.output))?;

    let config = cli::Config {
        threshold: args.threshold,
        fp_rate: args.fp_rate,
        dropout: args.dropout,
        theta: args.mutation_rate,
        threads: args.threads,
    };
    cli::run(config, &samples, lines, writer)
}

fn main() -> miette::Result<()> {
    try_main().into_diagnostic()
}
