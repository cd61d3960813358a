use crate::numeric::WideDouble;

/// Pascal's-triangle table of binomial coefficients, built once per run and
/// shared read-only across workers. Coefficients for hundreds of diploid
/// samples overflow f64, so entries are stored as [`WideDouble`].
pub struct BinomialTable {
    rows: Vec<Vec<WideDouble>>,
}

impl BinomialTable {
    /// Builds rows 0..=width. `width` must cover the largest possible total
    /// allele count for the run (2 x sample count).
    pub fn new(width: usize) -> Self {
        let mut rows: Vec<Vec<WideDouble>> = Vec::with_capacity(width + 1);
        rows.push(vec![WideDouble::ONE]);
        for n in 1..=width {
            let prev = &rows[n - 1];
            let mut row = Vec::with_capacity(n + 1);
            row.push(WideDouble::ONE);
            for k in 1..n {
                row.push(prev[k] + prev[k - 1]);
            }
            row.push(WideDouble::ONE);
            rows.push(row);
        }
        Self { rows }
    }

    /// Row n of the table: C(n, 0)..=C(n, n).
    pub fn row(&self, n: usize) -> &[WideDouble] {
        &self.rows[n]
    }

    /// C(n, k); zero when k > n.
    pub fn value(&self, n: usize, k: usize) -> WideDouble {
        if k > n {
            WideDouble::ZERO
        } else {
            self.rows[n][k]
        }
    }
}
