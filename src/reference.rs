//! Loading of the guide library and UMI whitelist into per-category reference tables.

use crate::config::ReferenceLayout;
use crate::errors::CountError;
use crate::seq::{reverse_complement, to_upper};
use anyhow::{Context, Result};
use log::{info, warn};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// One barcode of a category, already transformed into read orientation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceEntry {
    pub label: String,
    pub sequence: Vec<u8>,
}

/// Ordered barcodes of a single category (guide A, guide B or UMI)
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    pub entries: Vec<ReferenceEntry>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        ReferenceTable { entries: Vec::new() }
    }

    pub fn push<L: Into<String>, S: AsRef<[u8]>>(&mut self, label: L, sequence: S) {
        self.entries.push(ReferenceEntry {
            label: label.into(),
            sequence: sequence.as_ref().to_vec(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<L: Into<String>, S: AsRef<[u8]>> FromIterator<(L, S)> for ReferenceTable {
    fn from_iter<I: IntoIterator<Item = (L, S)>>(iter: I) -> Self {
        let mut table = ReferenceTable::new();
        for (label, seq) in iter {
            table.push(label, seq);
        }
        table
    }
}

/// Row of the guide library CSV. Columns beyond these are ignored.
#[derive(Debug, Deserialize)]
struct GuideRow {
    #[serde(rename = "sgID_AB")]
    sg_id_ab: Option<String>,
    #[serde(rename = "sgID_A")]
    sg_id_a: Option<String>,
    #[serde(rename = "protospacer_A")]
    protospacer_a: Option<String>,
    #[serde(rename = "sgID_B")]
    sg_id_b: Option<String>,
    #[serde(rename = "protospacer_B")]
    protospacer_b: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UmiRow {
    #[serde(rename = "UMI")]
    umi: Option<String>,
    #[serde(rename = "UMI_ID", default)]
    umi_id: Option<String>,
}

const GUIDE_COLUMNS: [&str; 5] = ["sgID_AB", "sgID_A", "protospacer_A", "sgID_B", "protospacer_B"];

/// Null markers as written by spreadsheet and dataframe tools
fn present(field: &Option<String>) -> Option<&str> {
    match field.as_deref().map(str::trim) {
        None | Some("") | Some("NA") | Some("NaN") | Some("nan") | Some("null") => None,
        Some(v) => Some(v),
    }
}

/// Cut a protospacer down to the bases covered by the read, the way a string slice would
fn trim_protospacer(seq: &str, layout: &ReferenceLayout) -> Vec<u8> {
    let bytes = seq.as_bytes();
    let start = layout.trim_start.min(bytes.len());
    let end = layout.trim_start.saturating_add(layout.guide_len).min(bytes.len());
    to_upper(&bytes[start..end])
}

/// The guide library split into the two categories the reads are matched against.
///
/// Both categories are labelled with the construct id (`sgID_AB`), so a read pair whose
/// A and B reads resolve to the same label carries an intact construct.
#[derive(Debug, Clone)]
pub struct GuideLibrary {
    pub guide_a: ReferenceTable,
    pub guide_b: ReferenceTable,
}

impl GuideLibrary {
    pub fn len(&self) -> usize {
        self.guide_a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guide_a.is_empty()
    }

    pub fn from_path<P: AsRef<Path>>(path: P, layout: &ReferenceLayout) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open guide table {:?}", path))?;
        Self::from_reader(file, path, layout)
    }

    /// Parse a comma separated guide table. Rows with a missing required value are dropped.
    /// Protospacer A is trimmed and upper-cased; protospacer B is additionally
    /// reverse-complemented to match the strand R3 is sequenced from.
    pub fn from_reader<R: Read>(reader: R, path: &Path, layout: &ReferenceLayout) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

        let headers = csv.headers().with_context(|| format!("Failed to read header of {:?}", path))?;
        let missing: Vec<&str> =
            GUIDE_COLUMNS.iter().copied().filter(|c| !headers.iter().any(|h| h == *c)).collect();
        if !missing.is_empty() {
            return Err(CountError::InvalidReference {
                path: path.to_path_buf(),
                reason: format!("missing column(s) {}", missing.join(", ")),
            }
            .into());
        }

        let mut guide_a = ReferenceTable::new();
        let mut guide_b = ReferenceTable::new();
        let mut dropped = 0usize;

        for (idx, row) in csv.deserialize::<GuideRow>().enumerate() {
            let row = row.with_context(|| format!("Failed to parse row {} of {:?}", idx + 2, path))?;
            let fields = (
                present(&row.sg_id_ab),
                present(&row.sg_id_a),
                present(&row.protospacer_a),
                present(&row.sg_id_b),
                present(&row.protospacer_b),
            );
            match fields {
                (Some(id), Some(_), Some(proto_a), Some(_), Some(proto_b)) => {
                    guide_a.push(id, trim_protospacer(proto_a, layout));
                    guide_b.push(id, reverse_complement(&trim_protospacer(proto_b, layout)));
                }
                _ => dropped += 1,
            }
        }

        if dropped > 0 {
            warn!("Dropped {} guide rows with missing values from {:?}", dropped, path);
        }
        info!("sgRNAs in library: {}", guide_a.len());

        Ok(GuideLibrary { guide_a, guide_b })
    }
}

/// Load the UMI whitelist. Labels come from the optional `UMI_ID` column, otherwise
/// from the 0-based row number.
pub fn load_umi_table<P: AsRef<Path>>(path: P) -> Result<ReferenceTable> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open UMI table {:?}", path))?;
    umi_table_from_reader(file, path)
}

pub fn umi_table_from_reader<R: Read>(reader: R, path: &Path) -> Result<ReferenceTable> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let headers = csv.headers().with_context(|| format!("Failed to read header of {:?}", path))?;
    if !headers.iter().any(|h| h == "UMI") {
        return Err(CountError::InvalidReference {
            path: path.to_path_buf(),
            reason: "missing column UMI".to_string(),
        }
        .into());
    }

    let mut table = ReferenceTable::new();
    let mut dropped = 0usize;
    for (idx, row) in csv.deserialize::<UmiRow>().enumerate() {
        let row = row.with_context(|| format!("Failed to parse row {} of {:?}", idx + 2, path))?;
        match present(&row.umi) {
            Some(umi) => {
                let label = present(&row.umi_id).map(str::to_string).unwrap_or_else(|| idx.to_string());
                table.push(label, to_upper(umi.as_bytes()));
            }
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        warn!("Dropped {} empty UMI rows from {:?}", dropped, path);
    }
    info!("UMIs in whitelist: {}", table.len());
    Ok(table)
}
