//! Run configuration. The defaults reproduce the sequencing layout of the screen:
//! guide A in the first 19 bases of R1, the UMI in the first 8 bases of R2 and guide B
//! in the first 19 bases of R3.

/// Which of the three read files a window is taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSlot {
    R1,
    R2,
    R3,
}

/// A fixed window `[offset, offset + len)` of one read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub read: ReadSlot,
    pub offset: usize,
    pub len: usize,
}

impl Window {
    pub fn new(read: ReadSlot, offset: usize, len: usize) -> Self {
        Window { read, offset, len }
    }

    /// Pick this window's read out of a triple and slice it
    pub fn extract<'a>(&self, r1: &'a [u8], r2: &'a [u8], r3: &'a [u8]) -> &'a [u8] {
        let seq = match self.read {
            ReadSlot::R1 => r1,
            ReadSlot::R2 => r2,
            ReadSlot::R3 => r3,
        };
        crate::seq::window(seq, self.offset, self.len)
    }
}

/// Where the three barcodes sit in a read triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadLayout {
    pub guide_a: Window,
    pub guide_b: Window,
    pub umi: Window,
}

impl Default for ReadLayout {
    fn default() -> Self {
        ReadLayout {
            guide_a: Window::new(ReadSlot::R1, 0, 19),
            guide_b: Window::new(ReadSlot::R3, 0, 19),
            umi: Window::new(ReadSlot::R2, 0, 8),
        }
    }
}

/// How library protospacers are cut down to what the reads actually cover
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceLayout {
    /// First protospacer base covered by the read
    pub trim_start: usize,
    /// Number of protospacer bases covered by the read
    pub guide_len: usize,
}

impl Default for ReferenceLayout {
    fn default() -> Self {
        ReferenceLayout { trim_start: 1, guide_len: 19 }
    }
}

/// Options that apply to every per-sample worker
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub layout: ReadLayout,
    /// Stop after `test_lines` input lines and refuse to overwrite existing outputs
    pub test_mode: bool,
    pub test_lines: u64,
    /// Upper bound on concurrently running samples; `None` runs every sample at once
    pub threads: Option<usize>,
    /// Log progress every this many records
    pub progress_interval: u64,
    /// Require R1/R2/R3 records to carry the same read name
    pub verify_read_names: bool,
}

pub const DEFAULT_TEST_LINES: u64 = 100_000;

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            layout: ReadLayout::default(),
            test_mode: false,
            test_lines: DEFAULT_TEST_LINES,
            threads: None,
            progress_interval: 10_000_000,
            verify_read_names: false,
        }
    }
}

impl RunConfig {
    /// Maximum number of records to classify, if limited.
    ///
    /// A FASTQ record spans four lines. A record is kept when the 0-based line number
    /// of its sequence line is at most `test_lines`.
    pub fn record_limit(&self) -> Option<u64> {
        if self.test_mode {
            Some((self.test_lines + 3) / 4)
        } else {
            None
        }
    }
}
