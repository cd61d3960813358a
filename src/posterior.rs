use crate::binomial::BinomialTable;
use crate::numeric::WideDouble;

/// Population-level aggregation of per-cell genotype likelihoods into a
/// distribution over the total alternate-allele count, plus the posterior
/// steps derived from it.
pub struct PopulationDp<'a> {
    binom: &'a BinomialTable,
    /// Mutation-rate prior for the population model.
    theta: f64,
}

/// Posterior state for one site over N cells with reads.
pub struct SitePosterior {
    /// P(zero alternate alleles in the population | data).
    pub zero_variant: f64,
    /// Phred-scaled zero-variant posterior; the site quality.
    pub quality: f64,
    /// Shared normalization constant: sum over l of likelihood(l) * prior(l).
    denominator: WideDouble,
    /// Prior over the total alternate-allele count, length 2N+1.
    alt_count_prior: Vec<f64>,
}

impl<'a> PopulationDp<'a> {
    pub fn new(binom: &'a BinomialTable, theta: f64) -> Self {
        Self { binom, theta }
    }

    /// Runs the convolution recurrence over the given cells and returns the
    /// final row: entry l is the pooled likelihood of the data given exactly
    /// l alternate alleles among the 2N chromosome copies. Rows live in two
    /// fixed-width buffers sized up front; no per-row reallocation.
    fn final_row(&self, cells: &[&[WideDouble; 3]]) -> Vec<WideDouble> {
        let width = 2 * cells.len() + 1;
        let mut prev = vec![WideDouble::ZERO; width];
        let mut cur = vec![WideDouble::ZERO; width];

        // Base case: the factor 2 on the het entry counts both phasings.
        prev[0] = cells[0][0];
        prev[1] = cells[0][1] * 2.0;
        prev[2] = cells[0][2];

        for (j, likelihood) in cells.iter().enumerate().skip(1) {
            let hom_ref = likelihood[0];
            let het2 = likelihood[1] * 2.0;
            let hom_alt = likelihood[2];
            for (l, slot) in cur.iter_mut().enumerate().take(2 * (j + 1) + 1) {
                let mut v = prev[l] * hom_ref;
                if l >= 1 {
                    v += prev[l - 1] * het2;
                }
                if l >= 2 {
                    v += prev[l - 2] * hom_alt;
                }
                *slot = v;
            }
            std::mem::swap(&mut prev, &mut cur);
            cur.fill(WideDouble::ZERO);
        }
        prev
    }

    /// Final row divided by C(2N, l): alt-count likelihoods independent of
    /// combinatorial multiplicity.
    fn normalized_row(&self, cells: &[&[WideDouble; 3]]) -> Vec<WideDouble> {
        let two_n = 2 * cells.len();
        let mut row = self.final_row(cells);
        for (l, v) in row.iter_mut().enumerate() {
            *v = *v / self.binom.value(two_n, l);
        }
        row
    }

    /// Simplified coalescent-style prior over the alternate-allele count:
    /// theta/l in the interior, (1 - theta*H)/2 at both boundaries, with H
    /// the harmonic sum over 1..2N-1.
    fn alt_count_prior(&self, n_cells: usize) -> Vec<f64> {
        let two_n = 2 * n_cells;
        let harmonic: f64 = (1..two_n).map(|i| 1.0 / i as f64).sum();
        let boundary = (1.0 - self.theta * harmonic) / 2.0;
        (0..=two_n)
            .map(|l| {
                if l == 0 || l == two_n {
                    boundary
                } else {
                    self.theta / l as f64
                }
            })
            .collect()
    }

    /// Aggregates all cells' likelihood triples into the zero-variant
    /// posterior and the shared normalization state.
    pub fn evaluate(&self, likelihoods: &[[WideDouble; 3]]) -> SitePosterior {
        let cells: Vec<&[WideDouble; 3]> = likelihoods.iter().collect();
        let alt_likelihoods = self.normalized_row(&cells);
        let alt_count_prior = self.alt_count_prior(likelihoods.len());

        let mut denominator = WideDouble::ZERO;
        for (lik, &prior) in alt_likelihoods.iter().zip(&alt_count_prior) {
            denominator += *lik * prior;
        }
        let zero = alt_likelihoods[0] * alt_count_prior[0] / denominator;

        SitePosterior {
            zero_variant: zero.to_f64(),
            quality: zero.phred(),
            denominator,
            alt_count_prior,
        }
    }

    /// Per-cell genotype posteriors via leave-one-out, computed only for
    /// called-variant sites. Each cell's DP is rebuilt without that cell and
    /// its three candidate genotypes weighted by the hypergeometric factor
    /// C(l,g)*C(2N-l,2-g)/C(2N,2) under the population prior. The result is
    /// divided by the same denominator as the zero-variant posterior, without
    /// renormalizing for the removed cell.
    pub fn genotype_cells(
        &self,
        likelihoods: &[[WideDouble; 3]],
        posterior: &SitePosterior,
    ) -> Vec<Option<u8>> {
        let n = likelihoods.len();
        if n == 1 {
            // No population to condition on; the prior itself weights the
            // three genotypes.
            let post: Vec<WideDouble> = (0..3)
                .map(|g| {
                    likelihoods[0][g] * posterior.alt_count_prior[g] / posterior.denominator
                })
                .collect();
            return vec![pick_genotype(&post)];
        }

        let two_n = 2 * n;
        let pair_choices = self.binom.value(two_n, 2);
        let mut calls = Vec::with_capacity(n);
        for excluded in 0..n {
            let rest: Vec<&[WideDouble; 3]> = likelihoods
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != excluded)
                .map(|(_, l)| l)
                .collect();
            let rest_row = self.normalized_row(&rest); // length 2N-1

            let mut post = Vec::with_capacity(3);
            for g in 0..3usize {
                let mut sum = WideDouble::ZERO;
                for (l, &prior) in posterior.alt_count_prior.iter().enumerate().skip(g) {
                    let rest_l = l - g;
                    if rest_l > two_n - 2 {
                        continue;
                    }
                    let weight =
                        self.binom.value(l, g) * self.binom.value(two_n - l, 2 - g) / pair_choices;
                    sum += rest_row[rest_l] * weight * prior;
                }
                post.push(likelihoods[excluded][g] * sum / posterior.denominator);
            }
            calls.push(pick_genotype(&post));
        }
        calls
    }
}

/// Highest-posterior genotype; ties keep the lowest index. No call only when
/// all three posteriors are exactly zero.
fn pick_genotype(post: &[WideDouble]) -> Option<u8> {
    if post.iter().all(|p| p.is_zero()) {
        return None;
    }
    let mut best = 0;
    for g in 1..post.len() {
        if post[g] > post[best] {
            best = g;
        }
    }
    Some(best as u8)
}
