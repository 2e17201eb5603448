//! Classification of read triples and accumulation of guide-pair counts.

use crate::config::ReadLayout;
use crate::index::{BarcodeIndexes, LabelId};
use crate::matcher::{match_barcode, BarcodeMatch};
use ahash::AHashMap;
use itertools::Itertools;
use std::fmt;

/// Separator placed between labels in pair ids
pub const PAIR_SEPARATOR: &str = "++";

/// What happened to a single read triple. When several barcodes fail, the first
/// failing one in the order guide A, guide B, UMI names the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    GuideAUnmapped,
    GuideBUnmapped,
    GuideAAmbiguous,
    GuideBAmbiguous,
    UmiUnmapped,
    UmiAmbiguous,
    MismatchedPair,
    MatchedPair,
}

/// Running counters for one sample. A failing read may bump several of the
/// first six counters at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tallies {
    pub reads: u64,
    pub a_unmapped: u64,
    pub b_unmapped: u64,
    pub a_ambiguous: u64,
    pub b_ambiguous: u64,
    pub umi_unmapped: u64,
    pub umi_ambiguous: u64,
    pub all_unique: u64,
    pub pair_mismatch: u64,
    pub pair_match: u64,
}

fn percent(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 * 100.0 / denominator as f64
    }
}

/// Read count and mapping percentages reported per sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleSummary {
    pub a_mapping: f64,
    pub b_mapping: f64,
    pub umi_mapping: f64,
    pub all_mapping: f64,
    pub pair_mismatch: f64,
    pub pair_match: f64,
    pub matched_and_mapped: f64,
    pub reads: u64,
}

impl SampleSummary {
    pub fn from_tallies(t: &Tallies) -> Self {
        let mapped = |failed: u64| if t.reads == 0 { 0.0 } else { 100.0 - percent(failed, t.reads) };
        SampleSummary {
            a_mapping: mapped(t.a_unmapped),
            b_mapping: mapped(t.b_unmapped),
            umi_mapping: mapped(t.umi_unmapped),
            all_mapping: percent(t.all_unique, t.reads),
            pair_mismatch: percent(t.pair_mismatch, t.all_unique),
            pair_match: percent(t.pair_match, t.all_unique),
            matched_and_mapped: percent(t.pair_match, t.reads),
            reads: t.reads,
        }
    }

    /// (metric name, value) in report order
    pub fn rows(&self) -> [(&'static str, f64); 7] {
        [
            ("Percent A sgRNAs mapping", self.a_mapping),
            ("Percent B sgRNAs mapping", self.b_mapping),
            ("Percent UMIs mapping", self.umi_mapping),
            ("Percent all sgRNAs mapping", self.all_mapping),
            ("Percent A sgRNA and B sgRNA mismatch", self.pair_mismatch),
            ("Percent both A and B match", self.pair_match),
            ("Total percent matching and mapping reads", self.matched_and_mapped),
        ]
    }
}

impl fmt::Display for SampleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} reads", self.reads)?;
        for (name, value) in self.rows() {
            write!(f, "; {} {:.4}", name, value)?;
        }
        Ok(())
    }
}

/// Sorted `(key, count)` lines ready to be written out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleCounts {
    pub pairs: Vec<(String, u64)>,
    pub umi_pairs: Vec<(String, u64)>,
    pub tallies: Tallies,
}

/// Streams read triples for one sample and keeps the counts.
///
/// Accumulators are keyed by label ids; pair id strings are only built when the
/// sample is finished.
pub struct Classifier<'a> {
    indexes: &'a BarcodeIndexes,
    layout: ReadLayout,
    tallies: Tallies,
    pairs: AHashMap<(LabelId, LabelId), u64>,
    umi_pairs: AHashMap<(LabelId, LabelId, LabelId), u64>,
}

impl<'a> Classifier<'a> {
    pub fn new(indexes: &'a BarcodeIndexes, layout: ReadLayout) -> Self {
        Classifier {
            indexes,
            layout,
            tallies: Tallies::default(),
            pairs: AHashMap::new(),
            umi_pairs: AHashMap::new(),
        }
    }

    pub fn tallies(&self) -> &Tallies {
        &self.tallies
    }

    /// Classify one read triple given the sequence lines of R1, R2 and R3
    pub fn classify(&mut self, r1: &[u8], r2: &[u8], r3: &[u8]) -> Outcome {
        let a_window = self.layout.guide_a.extract(r1, r2, r3);
        let b_window = self.layout.guide_b.extract(r1, r2, r3);
        let umi_window = self.layout.umi.extract(r1, r2, r3);

        let guide_a = match_barcode(&self.indexes.guide_a, a_window, false);
        let guide_b = match_barcode(&self.indexes.guide_b, b_window, false);
        let umi = match_barcode(&self.indexes.umi, umi_window, true);

        self.tallies.reads += 1;
        self.record(guide_a, guide_b, umi)
    }

    fn record(&mut self, guide_a: BarcodeMatch, guide_b: BarcodeMatch, umi: BarcodeMatch) -> Outcome {
        let (a, b, u) = match (guide_a, guide_b, umi) {
            (BarcodeMatch::Found(a), BarcodeMatch::Found(b), BarcodeMatch::Found(u)) => (a, b, u),
            _ => {
                let t = &mut self.tallies;
                t.a_unmapped += (guide_a == BarcodeMatch::NotFound) as u64;
                t.b_unmapped += (guide_b == BarcodeMatch::NotFound) as u64;
                t.a_ambiguous += (guide_a == BarcodeMatch::Ambiguous) as u64;
                t.b_ambiguous += (guide_b == BarcodeMatch::Ambiguous) as u64;
                t.umi_unmapped += (umi == BarcodeMatch::NotFound) as u64;
                t.umi_ambiguous += (umi == BarcodeMatch::Ambiguous) as u64;

                return match (guide_a, guide_b, umi) {
                    (BarcodeMatch::NotFound, _, _) => Outcome::GuideAUnmapped,
                    (BarcodeMatch::Ambiguous, _, _) => Outcome::GuideAAmbiguous,
                    (_, BarcodeMatch::NotFound, _) => Outcome::GuideBUnmapped,
                    (_, BarcodeMatch::Ambiguous, _) => Outcome::GuideBAmbiguous,
                    (_, _, BarcodeMatch::NotFound) => Outcome::UmiUnmapped,
                    _ => Outcome::UmiAmbiguous,
                };
            }
        };

        self.tallies.all_unique += 1;
        // every uniquely mapped pair is counted, matched or not
        *self.pairs.entry((a, b)).or_insert(0) += 1;

        if self.indexes.guide_a.label(a) != self.indexes.guide_b.label(b) {
            self.tallies.pair_mismatch += 1;
            Outcome::MismatchedPair
        } else {
            self.tallies.pair_match += 1;
            *self.umi_pairs.entry((a, b, u)).or_insert(0) += 1;
            Outcome::MatchedPair
        }
    }

    /// Render the accumulators into sorted `A++B` and `A++B++umi` keyed lines
    pub fn finish(self) -> SampleCounts {
        let idx = self.indexes;
        let pairs = self
            .pairs
            .into_iter()
            .map(|((a, b), n)| (pair_id(&[idx.guide_a.label(a), idx.guide_b.label(b)]), n))
            .sorted_unstable()
            .collect();
        let umi_pairs = self
            .umi_pairs
            .into_iter()
            .map(|((a, b, u), n)| {
                (pair_id(&[idx.guide_a.label(a), idx.guide_b.label(b), idx.umi.label(u)]), n)
            })
            .sorted_unstable()
            .collect();

        SampleCounts { pairs, umi_pairs, tallies: self.tallies }
    }
}

pub fn pair_id(labels: &[&str]) -> String {
    labels.join(PAIR_SEPARATOR)
}
