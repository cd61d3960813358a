/// Derived per-site summaries consumed only for output formatting.
#[derive(Debug, Clone, Copy)]
pub struct SiteStats {
    pub strand_bias: f64,
    pub quality_by_depth: f64,
    pub allele_ratio: f64,
    pub base_q_rank_sum: f64,
}

/// Odds ratio of the 2x2 reference/alternate by forward/reverse table.
/// Every cell gets +1 before the ratio so empty strata cannot divide by zero.
pub fn strand_bias(strand_counts: &[[u32; 2]; 4], ref_code: u8, alt_code: u8) -> f64 {
    let [ref_fwd, ref_rev] = strand_counts[ref_code as usize];
    let [alt_fwd, alt_rev] = strand_counts[alt_code as usize];
    f64::from((ref_fwd + 1) * (alt_rev + 1)) / f64::from((ref_rev + 1) * (alt_fwd + 1))
}

/// Site quality divided by the read depth of cells called het or hom-alt;
/// falls back to the unmodified quality when that depth is zero.
pub fn quality_by_depth(quality: f64, variant_depth: usize) -> f64 {
    if variant_depth == 0 {
        quality
    } else {
        quality / variant_depth as f64
    }
}

/// Per-sample alternate/reference read ratio:
/// (alt reads / cells with alt support) over (ref reads / cells with ref
/// support). Empty denominators are substituted with one.
pub fn allele_ratio(
    alt_reads: usize,
    cells_with_alt: usize,
    ref_reads: usize,
    cells_with_ref: usize,
) -> f64 {
    let alt_rate = alt_reads as f64 / cells_with_alt.max(1) as f64;
    let mut ref_rate = ref_reads as f64 / cells_with_ref.max(1) as f64;
    if ref_rate == 0.0 {
        ref_rate = 1.0;
    }
    alt_rate / ref_rate
}

/// Minimum observations per side before the rank-sum statistic is computed.
const RANK_SUM_MIN: usize = 5;

/// Wilcoxon rank-sum z-score of alternate-supporting versus
/// reference-supporting base qualities (normal approximation with tie
/// correction). Defined as 0 when either sample is too small or the variance
/// vanishes.
pub fn rank_sum_z(ref_values: &[f64], alt_values: &[f64]) -> f64 {
    let n1 = ref_values.len();
    let n2 = alt_values.len();
    if n1 < RANK_SUM_MIN || n2 < RANK_SUM_MIN {
        return 0.0;
    }

    // Pool, sort, assign midranks.
    let mut pooled: Vec<(f64, bool)> = ref_values
        .iter()
        .map(|&v| (v, false))
        .chain(alt_values.iter().map(|&v| (v, true)))
        .collect();
    pooled.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let n = pooled.len();
    let mut rank_sum_alt = 0.0;
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j < n && pooled[j].0 == pooled[i].0 {
            j += 1;
        }
        let midrank = (i + 1 + j) as f64 / 2.0;
        let ties = (j - i) as f64;
        tie_term += ties * ties * ties - ties;
        for entry in &pooled[i..j] {
            if entry.1 {
                rank_sum_alt += midrank;
            }
        }
        i = j;
    }

    let n1 = n1 as f64;
    let n2 = n2 as f64;
    let nf = n as f64;
    let u = rank_sum_alt - n2 * (n2 + 1.0) / 2.0;
    let mean = n1 * n2 / 2.0;
    let variance = n1 * n2 / 12.0 * ((nf + 1.0) - tie_term / (nf * (nf - 1.0)));
    if variance <= 0.0 {
        return 0.0;
    }
    (u - mean) / variance.sqrt()
}
