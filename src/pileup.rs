use crate::error::{CallerError, Result};
use crate::phred::PhredTable;

/// Base symbols in tie-break priority order; integer codes index this array.
pub const BASE_CHARS: [char; 4] = ['A', 'C', 'T', 'G'];

pub fn base_code(c: char) -> Option<u8> {
    match c.to_ascii_uppercase() {
        'A' => Some(0),
        'C' => Some(1),
        'T' => Some(2),
        'G' => Some(3),
        _ => None,
    }
}

pub fn base_char(code: u8) -> char {
    BASE_CHARS[code as usize]
}

/// One cell's raw reads at one position, sanitized in place into a coded
/// base/strand/error-probability triple.
#[derive(Debug, Clone)]
pub struct CellPileup {
    pub num_reads: usize,
    bases: String,
    quals: Vec<u8>,
    pub coded: Vec<u8>,
    strands: Vec<usize>, // 0 forward, 1 reverse, aligned with coded
    pub error_probs: Vec<f64>,
    pub scores: Vec<u8>, // decoded Phred scores, aligned with coded
}

impl CellPileup {
    fn new(num_reads: usize, bases: &str, quals: &str) -> Self {
        Self {
            num_reads,
            bases: bases.to_string(),
            quals: quals.as_bytes().to_vec(),
            coded: Vec::new(),
            strands: Vec::new(),
            error_probs: Vec::new(),
            scores: Vec::new(),
        }
    }

    pub fn has_reads(&self) -> bool {
        self.num_reads > 0
    }

    /// Number of raw symbols matching the reference base. Only meaningful
    /// before sanitization; the prefilter runs on raw counts.
    fn raw_ref_count(&self) -> usize {
        self.bases.chars().filter(|&c| c == '.' || c == ',').count()
    }

    pub fn count_code(&self, code: u8) -> usize {
        self.coded.iter().filter(|&&c| c == code).count()
    }

    /// Strips `+N`/`-N` indel annotations together with the N inserted or
    /// deleted base characters that follow the length.
    fn strip_indels(&mut self) {
        let mut out = String::with_capacity(self.bases.len());
        let mut reading_length = false;
        let mut remaining = 0usize;
        for c in self.bases.chars() {
            if reading_length {
                if let Some(d) = c.to_digit(10) {
                    remaining = remaining * 10 + d as usize;
                } else {
                    reading_length = false;
                    if remaining == 0 {
                        // `+` or `-` without a length; keep the character
                        out.push(c);
                    } else {
                        remaining -= 1;
                    }
                }
            } else if remaining > 0 {
                remaining -= 1;
            } else if c == '+' || c == '-' {
                reading_length = true;
                remaining = 0;
            } else {
                out.push(c);
            }
        }
        self.bases = out;
    }

    /// Strips `^` read-start markers (plus the mapping-quality character that
    /// follows) and `$` read-end markers.
    fn strip_read_markers(&mut self) {
        let mut out = String::with_capacity(self.bases.len());
        let mut skip_next = false;
        for c in self.bases.chars() {
            if skip_next {
                skip_next = false;
            } else if c == '^' {
                skip_next = true;
            } else if c != '$' {
                out.push(c);
            }
        }
        self.bases = out;
    }

    /// Folds the remaining symbols into the 4-base alphabet. `.`/`,`/`*`
    /// become the reference base; case picks the strand; anything else is
    /// discarded.
    fn fold_alphabet(&mut self, ref_code: u8) {
        self.coded = Vec::with_capacity(self.bases.len());
        self.strands = Vec::with_capacity(self.bases.len());
        for c in self.bases.chars() {
            let code = match c {
                '.' | ',' | '*' => ref_code,
                _ => match base_code(c) {
                    Some(code) => code,
                    None => continue,
                },
            };
            let strand = usize::from(c == ',' || c.is_ascii_lowercase());
            self.coded.push(code);
            self.strands.push(strand);
        }
        self.bases.clear();
    }

    /// Truncates the declared count, coded bases and quality string to their
    /// shortest common length. Never fails; malformed upstream data yields a
    /// shorter consistent triple.
    fn truncate(&mut self) {
        let len = self.num_reads.min(self.coded.len()).min(self.quals.len());
        self.num_reads = len;
        self.coded.truncate(len);
        self.strands.truncate(len);
        self.quals.truncate(len);
    }

    fn sanitize(&mut self, ref_code: u8, strand_counts: &mut [[u32; 2]; 4]) {
        self.strip_indels();
        self.strip_read_markers();
        self.fold_alphabet(ref_code);
        self.truncate();
        for (&code, &strand) in self.coded.iter().zip(&self.strands) {
            strand_counts[code as usize][strand] += 1;
        }
    }

    fn compute_error_probs(&mut self, phred: &PhredTable, line_num: usize) -> Result<()> {
        self.error_probs = Vec::with_capacity(self.quals.len());
        self.scores = Vec::with_capacity(self.quals.len());
        for &byte in &self.quals {
            let p = phred
                .error_prob(byte)
                .ok_or(CallerError::QualityRange { line_num, byte })?;
            self.error_probs.push(p);
            self.scores.push(byte - 33);
        }
        Ok(())
    }
}

/// Why a site was dropped before any likelihood work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoAltSupport,
    UnlikelyMutation,
    BadReference,
    LowDepth,
}

/// One genomic position across all cells: the parsed pileup record, the
/// sanitized per-cell reads, and the per-base strand table.
#[derive(Debug)]
pub struct Site {
    pub line_num: usize,
    pub seq_id: String,
    pub pos: u64,
    pub ref_char: char,
    pub ref_code: Option<u8>,
    pub alt_code: Option<u8>,
    pub cells: Vec<CellPileup>,
    /// Indices of cells with nonzero reads after sanitization; only these
    /// enter the likelihood model.
    pub with_reads: Vec<usize>,
    /// Per base (ACTG order) forward/reverse read counts.
    pub strand_counts: [[u32; 2]; 4],
}

impl Site {
    /// Parses one tab-delimited pileup record:
    /// `seqID  pos  refBase  [count  bases  quals] x numCells`.
    pub fn parse(line: &str, line_num: usize, num_cells: usize) -> Result<Self> {
        let fields: Vec<&str> = line.trim().split('\t').collect();
        let expected = 3 + 3 * num_cells;
        if fields.len() != expected {
            return Err(CallerError::PileupFields {
                line_num,
                n_fields: fields.len(),
                expected,
            });
        }

        let pos = fields[1]
            .parse()
            .map_err(|source| CallerError::PileupCoord { line_num, source })?;
        let ref_char = fields[2]
            .trim()
            .chars()
            .next()
            .ok_or(CallerError::PileupRefBase { line_num })?
            .to_ascii_uppercase();

        let mut cells = Vec::with_capacity(num_cells);
        for i in 0..num_cells {
            let count = fields[3 * i + 3]
                .parse()
                .map_err(|source| CallerError::PileupReadCount { line_num, source })?;
            cells.push(CellPileup::new(count, fields[3 * i + 4], fields[3 * i + 5]));
        }

        Ok(Self {
            line_num,
            seq_id: fields[0].to_string(),
            pos,
            ref_char,
            ref_code: base_code(ref_char),
            alt_code: None,
            cells,
            with_reads: Vec::new(),
            strand_counts: [[0; 2]; 4],
        })
    }

    /// Total read count over all cells (declared counts before sanitization,
    /// truncated counts after).
    pub fn total_depth(&self) -> usize {
        self.cells.iter().map(|c| c.num_reads).sum()
    }

    fn raw_ref_depth(&self) -> usize {
        self.cells.iter().map(|c| c.raw_ref_count()).sum()
    }

    /// Depth/frequency prefilter on the raw record. Skipped sites produce no
    /// output and never reach the likelihood model.
    pub fn prefilter(&self) -> Option<SkipReason> {
        let total = self.total_depth();
        let alt = total.saturating_sub(self.raw_ref_depth());
        let alt_freq = if total == 0 {
            0.0
        } else {
            alt as f64 / total as f64
        };
        if alt == 0 {
            Some(SkipReason::NoAltSupport)
        } else if total > 30 && (alt <= 2 || alt_freq <= 0.001) {
            Some(SkipReason::UnlikelyMutation)
        } else if self.ref_code.is_none() {
            Some(SkipReason::BadReference)
        } else if total <= 10 {
            Some(SkipReason::LowDepth)
        } else {
            None
        }
    }

    /// Runs the per-cell sanitization pipeline, accumulates the strand table,
    /// converts qualities to error probabilities and archives zero-read cells.
    pub fn sanitize(&mut self, phred: &PhredTable) -> Result<()> {
        let Some(ref_code) = self.ref_code else {
            return Ok(()); // unreachable past the prefilter
        };
        for cell in &mut self.cells {
            cell.sanitize(ref_code, &mut self.strand_counts);
            cell.compute_error_probs(phred, self.line_num)?;
        }
        self.with_reads = self
            .cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.has_reads())
            .map(|(i, _)| i)
            .collect();
        Ok(())
    }

    /// Picks the non-reference base with the highest pooled count, ties broken
    /// by A, C, T, G priority. Returns false when no alternate base has
    /// support; such sites are discarded.
    pub fn choose_alt_base(&mut self) -> bool {
        let Some(ref_code) = self.ref_code else {
            return false;
        };
        let mut freq = [0usize; 4];
        for cell in &self.cells {
            for &code in &cell.coded {
                freq[code as usize] += 1;
            }
        }
        let mut best = None;
        let mut best_count = 0;
        for code in 0..4u8 {
            if code == ref_code {
                continue;
            }
            if freq[code as usize] > best_count {
                best_count = freq[code as usize];
                best = Some(code);
            }
        }
        self.alt_code = best;
        best.is_some()
    }

    /// Pooled count of sanitized reads carrying `code`.
    pub fn depth_of(&self, code: u8) -> usize {
        self.cells.iter().map(|c| c.count_code(code)).sum()
    }

    /// Cells (among those with reads) carrying at least one read of `code`.
    pub fn cells_supporting(&self, code: u8) -> usize {
        self.with_reads
            .iter()
            .filter(|&&i| self.cells[i].count_code(code) > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(count: usize, bases: &str, quals: &str) -> CellPileup {
        CellPileup::new(count, bases, quals)
    }

    #[test]
    fn sanitizes_markers_indels_and_folds_to_reference() {
        // From a real malformed-ish record: 2-base insertion, read end,
        // read start with mapping quality, reference-matching symbols.
        let mut c = cell(5, "+2AAC..$,^!.", "IIIII");
        let mut strands = [[0; 2]; 4];
        c.sanitize(3, &mut strands); // reference G
        assert_eq!(c.coded, vec![1, 3, 3, 3, 3]); // C G G G G
        assert_eq!(c.num_reads, 5);
        assert_eq!(strands[1][0], 1); // C forward
        assert_eq!(strands[3][0], 3); // G forward from . . .
        assert_eq!(strands[3][1], 1); // G reverse from ,
    }

    #[test]
    fn strips_multidigit_indel_runs() {
        let mut c = cell(2, ".+12AAAAAAAAAAAA.", "II");
        let mut strands = [[0; 2]; 4];
        c.sanitize(0, &mut strands);
        assert_eq!(c.coded, vec![0, 0]);
    }

    #[test]
    fn truncates_to_shortest_of_count_bases_quals() {
        let mut c = cell(10, "..A", "IIII");
        let mut strands = [[0; 2]; 4];
        c.sanitize(2, &mut strands);
        assert_eq!(c.num_reads, 3);
        assert_eq!(c.coded.len(), 3);
        let phred = PhredTable::new();
        c.compute_error_probs(&phred, 1).unwrap();
        assert_eq!(c.error_probs.len(), 3);
    }

    #[test]
    fn quality_below_encoding_offset_is_a_range_error() {
        let mut c = cell(2, "..", "I ");
        let mut strands = [[0; 2]; 4];
        c.sanitize(0, &mut strands);
        let phred = PhredTable::new();
        let err = c.compute_error_probs(&phred, 7).unwrap_err();
        match err {
            CallerError::QualityRange { line_num, byte } => {
                assert_eq!(line_num, 7);
                assert_eq!(byte, b' ');
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_wrong_field_count() {
        let err = Site::parse("chr1\t5\tA\t3\t...\tIII\textra", 4, 1).unwrap_err();
        match err {
            CallerError::PileupFields {
                line_num,
                n_fields,
                expected,
            } => {
                assert_eq!(line_num, 4);
                assert_eq!(n_fields, 7);
                assert_eq!(expected, 6);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_reads_coordinate_reference_and_cells() {
        let site = Site::parse("chr2\t1234\tg\t2\t.,\tII\t0\t*\t*", 1, 2).unwrap();
        assert_eq!(site.seq_id, "chr2");
        assert_eq!(site.pos, 1234);
        assert_eq!(site.ref_char, 'G');
        assert_eq!(site.ref_code, Some(3));
        assert_eq!(site.cells.len(), 2);
        assert_eq!(site.cells[0].num_reads, 2);
    }

    fn one_cell_site(count: usize, bases: &str, quals: &str) -> Site {
        let line = format!("chr1\t10\tA\t{count}\t{bases}\t{quals}");
        Site::parse(&line, 1, 1).unwrap()
    }

    #[test]
    fn prefilter_drops_all_reference_sites() {
        let site = one_cell_site(12, "............", "IIIIIIIIIIII");
        assert_eq!(site.prefilter(), Some(SkipReason::NoAltSupport));
    }

    #[test]
    fn prefilter_drops_low_frequency_high_depth_sites() {
        let bases = format!("{}CC", ".".repeat(38));
        let site = one_cell_site(40, &bases, &"I".repeat(40));
        assert_eq!(site.prefilter(), Some(SkipReason::UnlikelyMutation));
        // three alternate reads over the same depth survive
        let bases = format!("{}CCC", ".".repeat(37));
        let site = one_cell_site(40, &bases, &"I".repeat(40));
        assert_eq!(site.prefilter(), None);
    }

    #[test]
    fn prefilter_drops_non_acgt_reference() {
        let bases = format!("{}CCC", ".".repeat(17));
        let site = one_cell_site(20, &bases, &"I".repeat(20));
        assert_eq!(site.prefilter(), None);
        let mut site = one_cell_site(20, &bases, &"I".repeat(20));
        site.ref_char = 'N';
        site.ref_code = None;
        assert_eq!(site.prefilter(), Some(SkipReason::BadReference));
    }

    #[test]
    fn prefilter_drops_insufficient_depth() {
        let site = one_cell_site(10, ".........C", "IIIIIIIIII");
        assert_eq!(site.prefilter(), Some(SkipReason::LowDepth));
        let site = one_cell_site(11, "..........C", "IIIIIIIIIII");
        assert_eq!(site.prefilter(), None);
    }

    #[test]
    fn alt_base_ties_break_by_priority_order() {
        let mut site = one_cell_site(15, "....CCCTTT.....", &"I".repeat(15));
        site.sanitize(&PhredTable::new()).unwrap();
        assert!(site.choose_alt_base());
        assert_eq!(site.alt_code, Some(1)); // C wins the 3-3 tie with T
    }

    #[test]
    fn alt_base_absent_when_only_reference_support() {
        let mut site = one_cell_site(12, "............", &"I".repeat(12));
        site.sanitize(&PhredTable::new()).unwrap();
        assert!(!site.choose_alt_base());
        assert_eq!(site.alt_code, None);
    }

    #[test]
    fn zero_read_cells_are_archived_not_modeled() {
        let line = "chr1\t10\tA\t3\t..C\tIII\t0\t*\t*";
        let mut site = Site::parse(line, 1, 2).unwrap();
        site.sanitize(&PhredTable::new()).unwrap();
        assert_eq!(site.with_reads, vec![0]);
        assert_eq!(site.cells.len(), 2);
    }
}
