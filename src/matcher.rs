use crate::index::{LabelId, MismatchIndex, Slot, WILDCARD};

/// Result of resolving one observed barcode against an index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarcodeMatch {
    Found(LabelId),
    NotFound,
    Ambiguous,
}

impl BarcodeMatch {
    pub fn label(&self) -> Option<LabelId> {
        match self {
            BarcodeMatch::Found(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, BarcodeMatch::Found(_))
    }
}

impl From<Slot> for BarcodeMatch {
    fn from(slot: Slot) -> Self {
        match slot {
            Slot::Unique(id) => BarcodeMatch::Found(id),
            Slot::Ambiguous => BarcodeMatch::Ambiguous,
        }
    }
}

/// Resolve `query` against `index`.
///
/// Exact hits win outright. On a miss, and only when both the caller allows it and the
/// index carries a wildcard layer, every single-position wildcard of the query is looked
/// up: one distinct label is a match, two labels or an ambiguous variant is ambiguous.
pub fn match_barcode(index: &MismatchIndex, query: &[u8], allow_one_mismatch: bool) -> BarcodeMatch {
    if let Some(slot) = index.exact(query) {
        return slot.into();
    }
    if !allow_one_mismatch || !index.has_variant_layer() {
        return BarcodeMatch::NotFound;
    }

    let mut probe = query.to_vec();
    let mut found: Option<LabelId> = None;
    for pos in 0..probe.len() {
        let original = probe[pos];
        probe[pos] = WILDCARD;
        let hit = index.variant(&probe);
        probe[pos] = original;

        match hit {
            None => {}
            Some(Slot::Ambiguous) => return BarcodeMatch::Ambiguous,
            Some(Slot::Unique(id)) => match found {
                None => found = Some(id),
                Some(prev) if prev == id => {}
                Some(_) => return BarcodeMatch::Ambiguous,
            },
        }
    }

    found.map_or(BarcodeMatch::NotFound, BarcodeMatch::Found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceTable;
    use rand::{rngs::SmallRng, RngCore, SeedableRng};

    fn index(entries: &[(&str, &str)], mismatch: bool) -> MismatchIndex {
        let table: ReferenceTable = entries.iter().map(|(l, s)| (*l, s.as_bytes())).collect();
        MismatchIndex::build("test", &table, mismatch)
    }

    fn random_seq(rng: &mut SmallRng, length: usize) -> Vec<u8> {
        let bases = b"ACGT";
        (0..length).map(|_| bases[rng.next_u32() as usize % 4]).collect()
    }

    #[test]
    fn test_exact_reference_resolves_to_its_label() {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut table = ReferenceTable::new();
        let mut seen = std::collections::HashSet::new();
        while table.len() < 200 {
            let seq = random_seq(&mut rng, 19);
            if seen.insert(seq.clone()) {
                table.push(format!("guide{}", table.len()), seq);
            }
        }
        let idx = MismatchIndex::build("guides", &table, false);
        for entry in &table.entries {
            let hit = match_barcode(&idx, &entry.sequence, false);
            assert_eq!(hit.label().map(|id| idx.label(id)), Some(entry.label.as_str()));
        }
    }

    #[test]
    fn test_umi_single_substitution_resolves() {
        let idx = index(&[("u1", "AAAAAAAA")], true);
        assert_eq!(match_barcode(&idx, b"AAAAAAAA", true), BarcodeMatch::Found(0));
        assert_eq!(match_barcode(&idx, b"AAAAAAAT", true), BarcodeMatch::Found(0));
        assert_eq!(match_barcode(&idx, b"AAANAAAA", true), BarcodeMatch::Found(0));
        assert_eq!(match_barcode(&idx, b"AAAAAATT", true), BarcodeMatch::NotFound);
    }

    #[test]
    fn test_mismatch_disabled_never_uses_variants() {
        let idx = index(&[("u1", "AAAAAAAA")], true);
        assert_eq!(match_barcode(&idx, b"AAAAAAAT", false), BarcodeMatch::NotFound);

        let guides = index(&[("g1", "ACGTACGTACGTACGTACG")], false);
        assert_eq!(match_barcode(&guides, b"ACGTACGTACGTACGTACC", true), BarcodeMatch::NotFound);
        assert_eq!(match_barcode(&guides, b"ACGTACGTACGTACGTACG", false), BarcodeMatch::Found(0));
    }

    #[test]
    fn test_neighbours_are_ambiguous_either_way() {
        let idx = index(&[("u1", "AAAAAAAA"), ("u2", "AAAAAAAT")], true);
        assert_eq!(match_barcode(&idx, b"AAAAAAAA", true), BarcodeMatch::Ambiguous);
        assert_eq!(match_barcode(&idx, b"AAAAAAAT", true), BarcodeMatch::Ambiguous);
        assert_eq!(match_barcode(&idx, b"AAAAAAAG", true), BarcodeMatch::Ambiguous);
        // one substitution away from u1 only
        assert_eq!(match_barcode(&idx, b"CAAAAAAA", true), BarcodeMatch::Found(0));
    }

    #[test]
    fn test_query_between_two_references_is_ambiguous() {
        // AACA is one substitution from both AAAA (pos 2) and AACC (pos 3)
        let idx = index(&[("u1", "AAAA"), ("u2", "AACC")], true);
        assert_eq!(match_barcode(&idx, b"AACA", true), BarcodeMatch::Ambiguous);
        assert_eq!(match_barcode(&idx, b"AAAA", true), BarcodeMatch::Found(0));
        assert_eq!(match_barcode(&idx, b"AACC", true), BarcodeMatch::Found(1));
    }

    #[test]
    fn test_duplicate_guides_are_ambiguous() {
        let idx = index(&[("g1", "ACGT"), ("g2", "ACGT")], false);
        assert_eq!(match_barcode(&idx, b"ACGT", false), BarcodeMatch::Ambiguous);
    }
}
