/// Highest encoded base-quality score the caller accepts.
pub const MAX_SCORE: usize = 250;

/// Precomputed error probabilities per encoded quality score, shared
/// read-only across workers.
pub struct PhredTable {
    probs: [f64; MAX_SCORE + 1],
}

impl PhredTable {
    pub fn new() -> Self {
        let mut probs = [0.0; MAX_SCORE + 1];
        for (score, p) in probs.iter_mut().enumerate() {
            *p = 10f64.powf(-(score as f64) / 10.0);
        }
        Self { probs }
    }

    /// Error probability for one quality character (score = byte - 33).
    /// `None` when the byte falls outside the supported range.
    pub fn error_prob(&self, byte: u8) -> Option<f64> {
        let score = byte.checked_sub(33)? as usize;
        self.probs.get(score).copied()
    }
}

impl Default for PhredTable {
    fn default() -> Self {
        Self::new()
    }
}
