//! Mismatch-tolerant barcode lookup.
//!
//! An index has two layers: exact sequences, and (optionally) every single-position
//! wildcard variant of those sequences. Keys claimed by more than one label resolve to
//! `Slot::Ambiguous` instead of failing the build.

use crate::reference::{GuideLibrary, ReferenceTable};
use ahash::AHashMap;
use log::{debug, info, warn};

/// Index of a label inside a `MismatchIndex`
pub type LabelId = u32;

/// Symbol substituted into a sequence to form a one-mismatch variant
pub const WILDCARD: u8 = b'N';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Unique(LabelId),
    Ambiguous,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub references: usize,
    pub exact_keys: usize,
    pub variant_keys: usize,
    /// Reference sequences that were already claimed by another label
    pub exact_clashes: usize,
    /// Wildcard variants claimed by more than one label
    pub variant_clashes: usize,
    /// Exact keys that ended up ambiguous
    pub ambiguous_exact: usize,
}

#[derive(Debug, Clone)]
pub struct MismatchIndex {
    name: String,
    labels: Vec<String>,
    exact: AHashMap<Vec<u8>, Slot>,
    one_mismatch: Option<AHashMap<Vec<u8>, Slot>>,
    stats: IndexStats,
}

/// Record a claim on `key` by `label`. Returns true on a clash with a different label.
fn claim(slot: &mut Slot, label: LabelId) -> bool {
    match *slot {
        Slot::Unique(owner) if owner == label => false,
        _ => {
            *slot = Slot::Ambiguous;
            true
        }
    }
}

impl MismatchIndex {
    /// Build an index over `table`. With `allow_one_mismatch` every sequence also
    /// contributes its wildcard variants, one per position.
    ///
    /// When two labels share a variant they are within one substitution of each other, so
    /// the exact sequences of both are marked ambiguous too. A read equal to either of
    /// them is then ambiguous no matter which reference came first.
    pub fn build(name: &str, table: &ReferenceTable, allow_one_mismatch: bool) -> Self {
        let mut labels: Vec<String> = Vec::new();
        let mut label_ids: AHashMap<&str, LabelId> = AHashMap::new();
        let mut exact: AHashMap<Vec<u8>, Slot> = AHashMap::with_capacity(table.len());
        // variant -> (slot, entry that first produced it)
        let mut variants: AHashMap<Vec<u8>, (Slot, usize)> = AHashMap::new();
        let mut stats = IndexStats { references: table.len(), ..IndexStats::default() };

        if allow_one_mismatch {
            let width = table.entries.first().map_or(0, |e| e.sequence.len());
            variants.reserve(table.len() * width);
        }

        for (entry_idx, entry) in table.entries.iter().enumerate() {
            let label = *label_ids.entry(entry.label.as_str()).or_insert_with(|| {
                labels.push(entry.label.clone());
                (labels.len() - 1) as LabelId
            });

            let slot = exact.entry(entry.sequence.clone()).or_insert(Slot::Unique(label));
            if claim(slot, label) {
                stats.exact_clashes += 1;
                warn!(
                    "{}: clash with 0 mismatches {} {}",
                    name,
                    entry.label,
                    String::from_utf8_lossy(&entry.sequence)
                );
            }

            if !allow_one_mismatch {
                continue;
            }

            let mut variant = entry.sequence.clone();
            for pos in 0..variant.len() {
                let original = variant[pos];
                variant[pos] = WILDCARD;

                let (slot, first) = variants.entry(variant.clone()).or_insert((Slot::Unique(label), entry_idx));
                let previous = *slot;
                if claim(slot, label) {
                    stats.variant_clashes += 1;
                    debug!(
                        "{}: clash with 1 mismatch {} {}",
                        name,
                        entry.label,
                        String::from_utf8_lossy(&variant)
                    );
                    if let Slot::Unique(_) = previous {
                        let owner_seq = &table.entries[*first].sequence;
                        if let Some(owner) = exact.get_mut(owner_seq) {
                            *owner = Slot::Ambiguous;
                        }
                    }
                    if let Some(own) = exact.get_mut(&entry.sequence) {
                        *own = Slot::Ambiguous;
                    }
                }

                variant[pos] = original;
            }
        }

        let one_mismatch = if allow_one_mismatch {
            Some(variants.into_iter().map(|(k, (slot, _))| (k, slot)).collect::<AHashMap<_, _>>())
        } else {
            None
        };

        stats.exact_keys = exact.len();
        stats.variant_keys = one_mismatch.as_ref().map_or(0, |m| m.len());
        stats.ambiguous_exact = exact.values().filter(|s| **s == Slot::Ambiguous).count();

        info!(
            "Built {} index: {} references, {} exact keys, {} one-mismatch keys, {} exact clashes, {} one-mismatch clashes",
            name,
            stats.references,
            stats.exact_keys,
            stats.variant_keys,
            stats.exact_clashes,
            stats.variant_clashes
        );
        if stats.ambiguous_exact > 0 {
            warn!("{}: {} reference sequences can only resolve as ambiguous", name, stats.ambiguous_exact);
        }

        MismatchIndex { name: name.to_string(), labels, exact, one_mismatch, stats }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self, id: LabelId) -> &str {
        &self.labels[id as usize]
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    pub fn exact(&self, key: &[u8]) -> Option<Slot> {
        self.exact.get(key).copied()
    }

    /// Lookup in the wildcard layer. Always `None` for an exact-only index.
    pub fn variant(&self, key: &[u8]) -> Option<Slot> {
        self.one_mismatch.as_ref().and_then(|m| m.get(key).copied())
    }

    pub fn has_variant_layer(&self) -> bool {
        self.one_mismatch.is_some()
    }
}

/// The three indexes a read triple is resolved against. Built once, then shared
/// read-only by every sample worker.
#[derive(Debug, Clone)]
pub struct BarcodeIndexes {
    pub guide_a: MismatchIndex,
    pub guide_b: MismatchIndex,
    pub umi: MismatchIndex,
}

impl BarcodeIndexes {
    /// Guides must match exactly, UMIs tolerate a single substitution
    pub fn build(library: &GuideLibrary, umis: &ReferenceTable) -> Self {
        BarcodeIndexes {
            guide_a: MismatchIndex::build("guide A", &library.guide_a, false),
            guide_b: MismatchIndex::build("guide B", &library.guide_b, false),
            umi: MismatchIndex::build("UMI", umis, true),
        }
    }
}
