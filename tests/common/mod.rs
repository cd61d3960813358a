use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

pub struct Dataset {
    pub pileup: PathBuf,
    pub samples: PathBuf,
    pub output: PathBuf,
}

/// Writes a pileup file and a matching sample-name file into a fresh
/// temporary directory.
pub fn create_dataset(name: &str, sample_names: &[&str], pileup_lines: &[String]) -> Dataset {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "cellsnv_test_{name}_{id}_{pid}",
        pid = std::process::id()
    ));
    fs::create_dir_all(&dir).unwrap();

    let pileup = dir.join("input.pileup");
    fs::write(&pileup, pileup_lines.join("\n") + "\n").unwrap();
    let samples = dir.join("samples.txt");
    fs::write(&samples, sample_names.join("\n") + "\n").unwrap();

    Dataset {
        pileup,
        samples,
        output: dir.join("calls.vcf"),
    }
}

/// One pileup record where the first sample carries only alternate reads and
/// the remaining samples only reference-matching reads, all at quality 40.
pub fn alt_heavy_line(pos: u64, n_ref_samples: usize) -> String {
    let quals = "I".repeat(20);
    let mut line = format!("chr1\t{pos}\tA\t20\t{}\t{quals}", "C".repeat(20));
    for _ in 0..n_ref_samples {
        line.push_str(&format!("\t20\t{}\t{quals}", ".".repeat(20)));
    }
    line
}

/// One pileup record with every sample matching the reference.
pub fn all_ref_line(pos: u64, n_samples: usize) -> String {
    let quals = "I".repeat(20);
    let mut line = format!("chr1\t{pos}\tA");
    for _ in 0..n_samples {
        line.push_str(&format!("\t20\t{}\t{quals}", ".".repeat(20)));
    }
    line
}

pub fn run_cellsnv(dataset: &Dataset, threads: Option<usize>) -> Output {
    let n_threads = threads.map(|n| n.to_string());
    let mut extra = Vec::new();
    if let Some(n) = &n_threads {
        extra.extend(["--threads", n.as_str()]);
    }
    run_cellsnv_args(dataset, &extra)
}

pub fn run_cellsnv_args(dataset: &Dataset, extra: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_cellsnv"));
    command
        .arg("--pileup")
        .arg(dataset.pileup.as_os_str())
        .arg("--samples")
        .arg(dataset.samples.as_os_str())
        .arg("--output")
        .arg(dataset.output.as_os_str())
        .args(extra);
    command.output().expect("failed to run cellsnv")
}

/// Non-header lines of the produced VCF.
pub fn data_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.starts_with('#') && !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}
