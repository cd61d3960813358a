use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallerError {
    #[error("could not read {path}")]
    ReadWithPath {
        #[source]
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[error("could not write to {path}")]
    Write {
        #[source]
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[error("no sample names found in {path}")]
    SamplesEmpty { path: std::path::PathBuf },

    #[error("expected {expected} fields (got {n_fields}) in pileup line {line_num}")]
    PileupFields {
        line_num: usize,
        n_fields: usize,
        expected: usize,
    },

    #[error("could not parse coordinate in pileup line {line_num}")]
    PileupCoord {
        line_num: usize,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("missing reference base in pileup line {line_num}")]
    PileupRefBase { line_num: usize },

    #[error("could not parse read count in pileup line {line_num}")]
    PileupReadCount {
        line_num: usize,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("quality character {byte:#04x} outside Phred range in pileup line {line_num}")]
    QualityRange { line_num: usize, byte: u8 },

    #[error("could not build thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, CallerError>;

impl CallerError {
    /// Whether the error is local to one pileup record. Site-local errors are
    /// logged and skipped; everything else aborts the run.
    pub fn is_site_local(&self) -> bool {
        matches!(
            self,
            CallerError::PileupFields { .. }
                | CallerError::PileupCoord { .. }
                | CallerError::PileupRefBase { .. }
                | CallerError::PileupReadCount { .. }
                | CallerError::QualityRange { .. }
        )
    }
}
