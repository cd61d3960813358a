use crate::numeric::WideDouble;
use crate::pileup::{CellPileup, Site};

/// Reads folded into one f64 partial product before the partial is pushed
/// into the wide-range accumulator. A single f64 product across hundreds of
/// reads underflows; tens of reads cannot.
const PRODUCT_CHUNK: usize = 50;

/// `prior[g1][g2][observed]`: probability of observing a base given the true
/// diploid genotype {g1, g2}, under a fixed per-read error rate.
pub struct GenotypePriors {
    matrix: [[[f64; 4]; 4]; 4],
}

impl GenotypePriors {
    pub fn new(error_rate: f64) -> Self {
        let mut matrix = [[[0.0; 4]; 4]; 4];
        for g1 in 0..4 {
            for g2 in 0..4 {
                for obs in 0..4 {
                    matrix[g1][g2][obs] = if g1 == g2 {
                        if obs == g1 {
                            1.0 - 3.0 * error_rate
                        } else {
                            error_rate
                        }
                    } else if obs == g1 || obs == g2 {
                        (1.0 - 2.0 * error_rate) / 2.0
                    } else {
                        error_rate
                    };
                }
            }
        }
        Self { matrix }
    }

    pub fn get(&self, g1: u8, g2: u8, observed: u8) -> f64 {
        self.matrix[g1 as usize][g2 as usize][observed as usize]
    }
}

/// Picks the per-site error rate. This is a heuristic guard against spurious
/// single-cell noise, not a statistical estimate: a lone cell carrying all
/// the alternate reads gets a strict rate, two supporting cells under high
/// depth and low frequency an intermediate one, everything else the
/// configured baseline.
pub fn adaptive_error_rate(site: &Site, baseline: f64) -> f64 {
    let Some(alt) = site.alt_code else {
        return baseline;
    };
    let read_cells = site.with_reads.len();
    let alt_cells = site.cells_supporting(alt);
    let depth = site.total_depth();
    let alt_freq = if depth == 0 {
        0.0
    } else {
        site.depth_of(alt) as f64 / depth as f64
    };
    if read_cells > 1 && alt_cells == 1 {
        0.2
    } else if alt_cells == 2 && depth > 30 && alt_freq < 0.1 {
        0.1
    } else {
        baseline
    }
}

/// Likelihood of one cell's reads under hom-ref, het and hom-alt genotypes.
///
/// Each genotype's likelihood is the product over reads of
/// `e*(1-p)/3 + (1-e)*p` with `p` looked up from the prior matrix; the het
/// likelihood additionally mixes in the allelic-dropout term.
pub fn cell_likelihoods(
    cell: &CellPileup,
    ref_code: u8,
    alt_code: u8,
    priors: &GenotypePriors,
    dropout: f64,
) -> [WideDouble; 3] {
    let mut acc = [WideDouble::ONE; 3];
    let mut partial = [1.0f64; 3];
    let mut in_chunk = 0;
    for (&obs, &e) in cell.coded.iter().zip(&cell.error_probs) {
        let p = [
            priors.get(ref_code, ref_code, obs),
            priors.get(ref_code, alt_code, obs),
            priors.get(alt_code, alt_code, obs),
        ];
        for g in 0..3 {
            partial[g] *= e * (1.0 - p[g]) / 3.0 + (1.0 - e) * p[g];
        }
        in_chunk += 1;
        if in_chunk == PRODUCT_CHUNK {
            for g in 0..3 {
                acc[g] *= partial[g];
            }
            partial = [1.0; 3];
            in_chunk = 0;
        }
    }
    if in_chunk > 0 {
        for g in 0..3 {
            acc[g] *= partial[g];
        }
    }

    let het = (acc[0] + acc[2]) * (dropout * 0.5) + acc[1] * (1.0 - dropout);
    [acc[0], het, acc[2]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phred::PhredTable;
    use crate::pileup::Site;

    fn assert_close(a: f64, b: f64) {
        let scale = a.abs().max(b.abs()).max(1e-300);
        assert!((a - b).abs() / scale < 1e-9, "{a} != {b}");
    }

    #[test]
    fn prior_rows_sum_to_one() {
        let priors = GenotypePriors::new(0.002);
        for g1 in 0..4u8 {
            for g2 in 0..4u8 {
                let sum: f64 = (0..4u8).map(|obs| priors.get(g1, g2, obs)).sum();
                assert_close(sum, 1.0);
            }
        }
    }

    #[test]
    fn prior_entries_match_definition() {
        let e = 0.1;
        let priors = GenotypePriors::new(e);
        assert_close(priors.get(0, 0, 0), 1.0 - 3.0 * e);
        assert_close(priors.get(0, 0, 2), e);
        assert_close(priors.get(0, 1, 0), (1.0 - 2.0 * e) / 2.0);
        assert_close(priors.get(0, 1, 1), (1.0 - 2.0 * e) / 2.0);
        assert_close(priors.get(0, 1, 3), e);
    }

    fn sanitized_site(line: &str, num_cells: usize) -> Site {
        let mut site = Site::parse(line, 1, num_cells).unwrap();
        site.sanitize(&PhredTable::new()).unwrap();
        assert!(site.choose_alt_base());
        site
    }

    #[test]
    fn single_read_likelihood_matches_closed_form() {
        let site = sanitized_site("chr1\t1\tA\t1\tC\tI", 1);
        let priors = GenotypePriors::new(0.002);
        let lik = cell_likelihoods(&site.cells[0], 0, 1, &priors, 0.0);
        let e = 1e-4; // quality I = 40
        let expect = |p: f64| e * (1.0 - p) / 3.0 + (1.0 - e) * p;
        assert_close(lik[0].to_f64(), expect(0.002));
        assert_close(lik[1].to_f64(), expect((1.0 - 2.0 * 0.002) / 2.0));
        assert_close(lik[2].to_f64(), expect(1.0 - 3.0 * 0.002));
    }

    #[test]
    fn chunked_product_matches_log_domain_reference() {
        // 230 reads forces multiple chunk folds.
        let bases = ".".repeat(230);
        let quals = "I".repeat(230);
        let site = sanitized_site(&format!("chr1\t1\tA\t231\t{bases}C\t{quals}I"), 1);
        let priors = GenotypePriors::new(0.002);
        let lik = cell_likelihoods(&site.cells[0], 0, 1, &priors, 0.0);
        let e = 1e-4;
        let term = |p: f64| e * (1.0 - p) / 3.0 + (1.0 - e) * p;
        // log-domain reference for the hom-ref likelihood
        let log_expected = 230.0 * term(1.0 - 3.0 * 0.002).log10() + term(0.002).log10();
        assert!((lik[0].phred() - -10.0 * log_expected).abs() < 1e-6);
    }

    #[test]
    fn full_dropout_reduces_het_to_homozygous_mixture() {
        let site = sanitized_site("chr1\t1\tA\t4\t..CC\tIIII", 1);
        let priors = GenotypePriors::new(0.002);
        let lik = cell_likelihoods(&site.cells[0], 0, 1, &priors, 1.0);
        let expected = (lik[0] + lik[2]) * 0.5;
        assert!((lik[1].to_f64() - expected.to_f64()).abs() < 1e-18);
    }

    #[test]
    fn lone_alt_cell_gets_strict_error_rate() {
        let line = "chr1\t1\tA\t8\t...CCCCC\tIIIIIIII\t8\t........\tIIIIIIII";
        let site = sanitized_site(line, 2);
        assert_close(adaptive_error_rate(&site, 0.002), 0.2);
    }

    #[test]
    fn two_alt_cells_under_high_depth_get_intermediate_rate() {
        let dots = ".".repeat(19);
        let quals = "I".repeat(20);
        let line = format!(
            "chr1\t1\tA\t20\t{dots}C\t{quals}\t20\t{dots}C\t{quals}\t20\t{d20}\t{quals}",
            d20 = ".".repeat(20)
        );
        let site = sanitized_site(&line, 3);
        // depth 60, two supporting cells, frequency 2/60
        assert_close(adaptive_error_rate(&site, 0.002), 0.1);
    }

    #[test]
    fn broad_alt_support_keeps_baseline_rate() {
        let line = "chr1\t1\tA\t6\t...CCC\tIIIIII\t6\t..CCCC\tIIIIII";
        let site = sanitized_site(line, 2);
        assert_close(adaptive_error_rate(&site, 0.002), 0.002);
    }
}
