//! Error types for the counting pipeline.
//!
//! Per-read misses and ambiguities are not errors; they are tallied by the classifier.
//! Everything here aborts a sample (or the whole run, for configuration problems).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CountError {
    /// A sample group is missing one of its R1/R2/R3 files
    #[error("Missing files for sample {sample}. Files found: {found}")]
    MissingReads { sample: String, found: String },

    /// The same read number was supplied twice for one sample
    #[error("Sample {sample} has more than one R{read} file: {first:?} and {second:?}")]
    DuplicateRead { sample: String, read: u8, first: PathBuf, second: PathBuf },

    /// The three read streams did not end on the same record
    #[error(
        "Read files for sample {sample} are out of sync: {ended} ended after {records} records \
         while other files still had reads"
    )]
    StreamLengthMismatch { sample: String, ended: String, records: u64 },

    /// Read names disagree between R1/R2/R3 at the same record
    #[error("Read names differ for sample {sample} at record {record}: {r1} / {r2} / {r3}")]
    ReadNameMismatch { sample: String, record: u64, r1: String, r2: String, r3: String },

    /// Refusing to overwrite an existing output file
    #[error("Output file {path:?} already exists; move or delete it before a test run")]
    OutputExists { path: PathBuf },

    /// Another worker failed and this one stopped early
    #[error("Sample {sample} was cancelled after another sample failed")]
    Cancelled { sample: String },

    #[error("Invalid reference table {path:?}: {reason}")]
    InvalidReference { path: PathBuf, reason: String },

    /// Two count files map to the same sample column
    #[error("Sample {sample} appears in more than one count file ({first:?}, {second:?})")]
    DuplicateSample { sample: String, first: PathBuf, second: PathBuf },

    #[error("Malformed count file {path:?} at line {line}: {reason}")]
    MalformedCounts { path: PathBuf, line: u64, reason: String },
}

impl CountError {
    /// True for the error a worker reports after being told to stop.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CountError::Cancelled { .. })
    }
}
