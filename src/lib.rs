//! Guide-pair and UMI counting for dual-guide CRISPR screens.
//!
//! Reads come in triples (R1: guide A, R2: UMI, R3: guide B). Each sample's triples are
//! classified against lookups built from the guide library and the UMI whitelist, and the
//! resulting counts are written per sample and can be merged into a single matrix.

pub mod classify;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod fastq;
pub mod index;
pub mod matcher;
pub mod merge;
pub mod reference;
pub mod sample;
pub mod seq;
