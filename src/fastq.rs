use crate::errors::CountError;
use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use seq_io::fastq::{Reader as FastqReader, Record as FastqRecord};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Open a possibly gzipped file for buffered reading
pub fn open_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let reader: Box<dyn BufRead> = if path.extension().map_or(false, |ext| ext == "gz") {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(reader)
}

/// Reads R1, R2 and R3 of one sample in lock step, one record at a time.
///
/// The three files must hold the same number of records; running out of one file
/// before the others is an error rather than a silently shortened sample. Records with
/// an empty sequence line are valid and come back as empty sequences.
pub struct TripleReader {
    sample: String,
    paths: [PathBuf; 3],
    readers: [FastqReader<Box<dyn BufRead>>; 3],
    heads: [Vec<u8>; 3],
    seqs: [Vec<u8>; 3],
    count: u64,
    verify_names: bool,
}

/// Read name: the header up to the first whitespace
fn read_name(head: &[u8]) -> &[u8] {
    head.split(|b| b.is_ascii_whitespace()).next().unwrap_or(head)
}

impl TripleReader {
    pub fn open(sample: &str, paths: [&Path; 3], verify_names: bool) -> Result<Self> {
        let [p1, p2, p3] = paths;
        Ok(TripleReader {
            sample: sample.to_string(),
            paths: [p1.to_path_buf(), p2.to_path_buf(), p3.to_path_buf()],
            readers: [
                FastqReader::new(open_reader(p1)?),
                FastqReader::new(open_reader(p2)?),
                FastqReader::new(open_reader(p3)?),
            ],
            heads: Default::default(),
            seqs: Default::default(),
            count: 0,
            verify_names,
        })
    }

    /// Advance all three files by one record. Returns false once every file is exhausted.
    pub fn advance(&mut self) -> Result<bool> {
        let mut ended: Vec<&PathBuf> = Vec::new();
        for i in 0..3 {
            match self.readers[i].next() {
                None => ended.push(&self.paths[i]),
                Some(record) => {
                    let record = record.with_context(|| {
                        format!("Failed to read record {} of {:?}", self.count + 1, self.paths[i])
                    })?;
                    self.heads[i].clear();
                    self.heads[i].extend_from_slice(record.head());
                    self.seqs[i].clear();
                    self.seqs[i].extend_from_slice(record.seq());
                }
            }
        }

        if ended.len() == 3 {
            return Ok(false);
        }
        if !ended.is_empty() {
            return Err(CountError::StreamLengthMismatch {
                sample: self.sample.clone(),
                ended: ended.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "),
                records: self.count,
            }
            .into());
        }

        self.count += 1;

        if self.verify_names {
            let [r1, r2, r3] = [0, 1, 2].map(|i| read_name(&self.heads[i]));
            if r1 != r2 || r1 != r3 {
                return Err(CountError::ReadNameMismatch {
                    sample: self.sample.clone(),
                    record: self.count,
                    r1: String::from_utf8_lossy(r1).into_owned(),
                    r2: String::from_utf8_lossy(r2).into_owned(),
                    r3: String::from_utf8_lossy(r3).into_owned(),
                }
                .into());
            }
        }

        Ok(true)
    }

    /// Sequence lines of the current R1, R2 and R3 records
    pub fn sequences(&self) -> (&[u8], &[u8], &[u8]) {
        (&self.seqs[0], &self.seqs[1], &self.seqs[2])
    }

    /// Number of complete triples read so far
    pub fn records_read(&self) -> u64 {
        self.count
    }
}
