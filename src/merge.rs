//! Merging per-sample count files into one zero-filled counts matrix.

use crate::errors::CountError;
use anyhow::{Context, Result};
use log::info;
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Sample name of a count file: its file name up to the first '.'
pub fn sample_name(path: &Path) -> String {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    name.split('.').next().unwrap_or_default().to_string()
}

/// Part of a pair id before the first `separator`, i.e. the targeted gene
pub fn target_of(pair_id: &str, separator: &str) -> String {
    pair_id.split(separator).next().unwrap_or(pair_id).to_string()
}

/// Count files in `dir` whose names end with `suffix`, sorted by path
pub fn find_count_files(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))? {
        let path = entry?.path();
        let matches = path.file_name().and_then(|n| n.to_str()).map_or(false, |n| n.ends_with(suffix));
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Read a `key<TAB>count` file
pub fn read_counts(path: &Path) -> Result<Vec<(String, u64)>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {:?}", path))?;

    let mut counts = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("Failed to read {:?}", path))?;
        let line = record.position().map_or(0, |p| p.line());
        let malformed = |reason: String| CountError::MalformedCounts { path: path.to_path_buf(), line, reason };

        if record.len() != 2 {
            return Err(malformed(format!("expected 2 fields, found {}", record.len())).into());
        }
        let count: u64 = record[1]
            .trim()
            .parse()
            .map_err(|_| malformed(format!("invalid count '{}'", &record[1])))?;
        counts.push((record[0].to_string(), count));
    }
    Ok(counts)
}

/// Pair ids by samples; cells never observed in a sample are zero
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountMatrix {
    pub samples: Vec<String>,
    /// (pair id, one count per sample), sorted by pair id
    pub rows: Vec<(String, Vec<u64>)>,
}

impl CountMatrix {
    pub fn column_total(&self, sample: usize) -> u64 {
        self.rows.iter().map(|(_, counts)| counts[sample]).sum()
    }

    pub fn get(&self, pair_id: &str, sample: &str) -> Option<u64> {
        let col = self.samples.iter().position(|s| s == sample)?;
        let row = self.rows.binary_search_by(|(id, _)| id.as_str().cmp(pair_id)).ok()?;
        Some(self.rows[row].1[col])
    }

    /// Write as a tab separated table with a leading `target` column derived from each pair id.
    /// The first header cell is left empty; it labels the pair id column.
    pub fn write_tsv(&self, path: &Path, target_separator: &str) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        let mut out = BufWriter::new(file);

        writeln!(out, "\ttarget\t{}", self.samples.join("\t"))?;
        for (pair_id, counts) in &self.rows {
            writeln!(
                out,
                "{}\t{}\t{}",
                pair_id,
                target_of(pair_id, target_separator),
                counts.iter().join("\t")
            )?;
        }
        out.flush().with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }
}

/// Union the count files into one matrix, one column per file
pub fn merge_count_files<P: AsRef<Path>>(files: &[P]) -> Result<CountMatrix> {
    let mut samples: Vec<String> = Vec::with_capacity(files.len());
    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    let mut cells: BTreeMap<String, Vec<u64>> = BTreeMap::new();

    for (col, file) in files.iter().enumerate() {
        let path = file.as_ref();
        let sample = sample_name(path);
        if let Some(first) = seen.insert(sample.clone(), path.to_path_buf()) {
            return Err(CountError::DuplicateSample { sample, first, second: path.to_path_buf() }.into());
        }

        let counts = read_counts(path)?;
        info!("Read {} pair counts for sample {} from {:?}", counts.len(), sample, path);
        let mut keys: HashSet<&str> = HashSet::with_capacity(counts.len());
        for (line, (pair_id, _)) in counts.iter().enumerate() {
            if !keys.insert(pair_id.as_str()) {
                return Err(CountError::MalformedCounts {
                    path: path.to_path_buf(),
                    line: line as u64 + 1,
                    reason: format!("pair id {} listed more than once", pair_id),
                }
                .into());
            }
        }
        for (pair_id, n) in counts.iter() {
            cells.entry(pair_id.clone()).or_insert_with(|| vec![0; files.len()])[col] = *n;
        }
        samples.push(sample);
    }

    Ok(CountMatrix { samples, rows: cells.into_iter().collect() })
}
