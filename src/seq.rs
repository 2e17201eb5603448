/// Reverse complement of a sequence. Only A/C/G/T are swapped, anything else
/// (N, IUPAC codes) is carried over unchanged.
pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| match b {
        b'A' => b'T',
        b'T' => b'A',
        b'G' => b'C',
        b'C' => b'G',
        other => other,
    }).collect()
}

/// Upper-case copy of a sequence
pub fn to_upper(seq: &[u8]) -> Vec<u8> {
    seq.to_ascii_uppercase()
}

/// Slice out `[offset, offset + len)` from a read, truncated to what the read actually has.
/// Trailing whitespace is stripped so short reads behave like a shorter barcode.
pub fn window(seq: &[u8], offset: usize, len: usize) -> &[u8] {
    let start = offset.min(seq.len());
    let end = offset.saturating_add(len).min(seq.len());
    seq[start..end].trim_ascii_end()
}
