//! Discovery of per-sample read triples and the per-sample counting pass.

use crate::classify::{Classifier, SampleCounts, SampleSummary, Tallies};
use crate::config::RunConfig;
use crate::errors::CountError;
use crate::fastq::TripleReader;
use crate::index::BarcodeIndexes;
use anyhow::{Context, Result};
use itertools::Itertools;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

pub const PAIR_COUNTS_SUFFIX: &str = ".all.aligned.counts.txt";
pub const UMI_PAIR_COUNTS_SUFFIX: &str = ".AB.match.counts.txt";
pub const STATS_SUFFIX: &str = ".stats.txt";

/// How often a worker checks whether it has been cancelled
const CANCEL_CHECK_INTERVAL: u64 = 1 << 16;

/// R1/R2/R3 files of one sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleGroup {
    /// `{sample}_S{n}`
    pub name: String,
    pub r1: PathBuf,
    pub r2: PathBuf,
    pub r3: PathBuf,
}

lazy_static! {
    /// `{sample}_S{n}_R{1,2,3}_combined.fastq[.gz]`
    static ref READ_FILE_NAME: Regex =
        Regex::new(r"^(.+)_S(\d+)_R([123])_combined\.fastq(?:\.gz)?$").unwrap();
}

/// Group read files by sample using the `{sample}_S{n}_R{1,2,3}_combined.fastq[.gz]` naming.
///
/// Files that don't follow the naming are skipped with a warning. Every sample that is
/// found must have all three reads, otherwise nothing is run.
pub fn group_files_by_sample<P: AsRef<Path>>(files: &[P]) -> Result<Vec<SampleGroup>> {
    let mut groups: BTreeMap<String, [Option<PathBuf>; 3]> = BTreeMap::new();
    let mut skipped = 0usize;

    for path in files.iter().map(|p| p.as_ref()).sorted() {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let Some(caps) = READ_FILE_NAME.captures(file_name) else {
            warn!("Skipping file: {:?}", path);
            skipped += 1;
            continue;
        };

        let name = format!("{}_S{}", &caps[1], &caps[2]);
        let read: u8 = caps[3].parse()?;
        let slot = &mut groups.entry(name.clone()).or_default()[(read - 1) as usize];
        if let Some(first) = slot {
            return Err(CountError::DuplicateRead {
                sample: name,
                read,
                first: first.clone(),
                second: path.to_path_buf(),
            }
            .into());
        }
        *slot = Some(path.to_path_buf());
    }

    if skipped > 0 {
        warn!(
            "{} input files did not match {{sample}}_S{{n}}_R{{1,2,3}}_combined.fastq[.gz] and were skipped; \
             only the samples listed below will be counted",
            skipped
        );
    }

    let mut samples = Vec::with_capacity(groups.len());
    for (name, reads) in groups {
        match reads {
            [Some(r1), Some(r2), Some(r3)] => {
                info!("Sample {}: R1={:?}, R2={:?}, R3={:?}", name, r1, r2, r3);
                samples.push(SampleGroup { name, r1, r2, r3 });
            }
            reads => {
                let found = reads
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.is_some())
                    .map(|(i, _)| format!("R{}", i + 1))
                    .join(", ");
                return Err(CountError::MissingReads { sample: name, found }.into());
            }
        }
    }

    Ok(samples)
}

/// Everything a finished sample reports back
#[derive(Debug, Clone)]
pub struct SampleReport {
    pub sample: String,
    pub pair_counts: PathBuf,
    pub umi_pair_counts: PathBuf,
    pub stats: PathBuf,
    pub tallies: Tallies,
    pub summary: SampleSummary,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

pub fn output_paths(prefix: &Path) -> [PathBuf; 3] {
    [PAIR_COUNTS_SUFFIX, UMI_PAIR_COUNTS_SUFFIX, STATS_SUFFIX].map(|suffix| with_suffix(prefix, suffix))
}

/// Removes the temp files it tracks unless they were committed
struct PendingOutputs {
    temps: Vec<PathBuf>,
}

impl PendingOutputs {
    fn new(finals: &[PathBuf]) -> Self {
        PendingOutputs { temps: finals.iter().map(|p| with_suffix(p, ".tmp")).collect() }
    }

    /// Move every temp file onto its final path. Outputs from an earlier run are set aside
    /// first and put back if any move fails, so the finals are never a mix of two runs.
    fn commit(mut self, finals: &[PathBuf]) -> Result<()> {
        let mut backups: Vec<(PathBuf, PathBuf)> = Vec::new();
        let mut placed: Vec<PathBuf> = Vec::new();

        match self.swap_in(finals, &mut backups, &mut placed) {
            Ok(()) => {
                for (_, backup) in &backups {
                    let _ = fs::remove_file(backup);
                }
                self.temps.clear();
                Ok(())
            }
            Err(e) => {
                for dest in &placed {
                    let _ = fs::remove_file(dest);
                }
                for (dest, backup) in &backups {
                    if let Err(restore) = fs::rename(backup, dest) {
                        warn!("Failed to restore {:?} from {:?}: {}", dest, backup, restore);
                    }
                }
                Err(e)
            }
        }
    }

    fn swap_in(
        &self,
        finals: &[PathBuf],
        backups: &mut Vec<(PathBuf, PathBuf)>,
        placed: &mut Vec<PathBuf>,
    ) -> Result<()> {
        for dest in finals.iter().filter(|p| p.exists()) {
            let backup = with_suffix(dest, ".bak");
            fs::rename(dest, &backup).with_context(|| format!("Failed to move {:?} aside", dest))?;
            backups.push((dest.clone(), backup));
        }
        for (tmp, dest) in self.temps.iter().zip(finals) {
            fs::rename(tmp, dest).with_context(|| format!("Failed to move {:?} to {:?}", tmp, dest))?;
            placed.push(dest.clone());
        }
        Ok(())
    }
}

impl Drop for PendingOutputs {
    fn drop(&mut self) {
        for tmp in &self.temps {
            let _ = fs::remove_file(tmp);
        }
    }
}

fn write_counts(path: &Path, counts: &[(String, u64)]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path).with_context(|| format!("Failed to create {:?}", path))?);
    for (key, n) in counts {
        writeln!(out, "{}\t{}", key, n)?;
    }
    out.flush().with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}

fn write_stats(path: &Path, tallies: &Tallies, summary: &SampleSummary) -> Result<()> {
    let mut out = BufWriter::new(File::create(path).with_context(|| format!("Failed to create {:?}", path))?);
    let raw = [
        ("reads", tallies.reads),
        ("A sgRNA not mapped", tallies.a_unmapped),
        ("B sgRNA not mapped", tallies.b_unmapped),
        ("A sgRNA multiple mappings", tallies.a_ambiguous),
        ("B sgRNA multiple mappings", tallies.b_ambiguous),
        ("UMI not mapped", tallies.umi_unmapped),
        ("UMI multiple mappings", tallies.umi_ambiguous),
        ("All sgRNAs uniquely map", tallies.all_unique),
        ("A sgRNA and B sgRNA do not match", tallies.pair_mismatch),
        ("A sgRNA and B sgRNA match", tallies.pair_match),
    ];
    for (name, n) in raw {
        writeln!(out, "{}\t{}", name, n)?;
    }
    for (name, value) in summary.rows() {
        writeln!(out, "{}\t{:.4}", name, value)?;
    }
    out.flush().with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}

/// Count one sample: stream its three read files through a `Classifier` and write the
/// pair counts, UMI-pair counts and stats next to `prefix`.
///
/// Outputs are written to temp files and renamed at the end, so a failed or cancelled
/// sample leaves no partial files behind. Setting `cancel` stops the pass early.
pub fn count_sample(
    group: &SampleGroup,
    prefix: &Path,
    indexes: &BarcodeIndexes,
    config: &RunConfig,
    cancel: &AtomicBool,
) -> Result<SampleReport> {
    let finals = output_paths(prefix);
    for path in finals.iter().filter(|p| p.exists()) {
        if config.test_mode {
            return Err(CountError::OutputExists { path: path.clone() }.into());
        }
        warn!("Overwriting existing output {:?}", path);
    }

    info!("Processing files: R1={:?}, R2={:?}, R3={:?}", group.r1, group.r2, group.r3);
    let mut reader = TripleReader::open(
        &group.name,
        [group.r1.as_path(), group.r2.as_path(), group.r3.as_path()],
        config.verify_read_names,
    )?;
    let mut classifier = Classifier::new(indexes, config.layout);
    let limit = config.record_limit();

    while limit.map_or(true, |max| reader.records_read() < max) && reader.advance()? {
        let (r1, r2, r3) = reader.sequences();
        classifier.classify(r1, r2, r3);

        let n = reader.records_read();
        if n % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            return Err(CountError::Cancelled { sample: group.name.clone() }.into());
        }
        if config.progress_interval > 0 && n % config.progress_interval == 0 {
            info!("{}: processed {} reads", group.name, n);
        }
    }
    if let Some(max) = limit {
        debug!("{}: test run limited to {} reads", group.name, max);
    }

    let SampleCounts { pairs, umi_pairs, tallies } = classifier.finish();
    let summary = SampleSummary::from_tallies(&tallies);

    let pending = PendingOutputs::new(&finals);
    write_counts(&pending.temps[0], &pairs)?;
    write_counts(&pending.temps[1], &umi_pairs)?;
    write_stats(&pending.temps[2], &tallies, &summary)?;
    if cancel.load(Ordering::Relaxed) {
        return Err(CountError::Cancelled { sample: group.name.clone() }.into());
    }
    pending.commit(&finals)?;

    info!("{} {} reads", prefix.display(), tallies.reads);
    for (name, value) in summary.rows() {
        info!("{}: {} {:.4}", group.name, name, value);
    }
    debug!(
        "{}: A ambiguous {}, B ambiguous {}, UMI ambiguous {}",
        group.name, tallies.a_ambiguous, tallies.b_ambiguous, tallies.umi_ambiguous
    );

    let [pair_counts, umi_pair_counts, stats] = finals;
    Ok(SampleReport { sample: group.name.clone(), pair_counts, umi_pair_counts, stats, tallies, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{GuideLibrary, ReferenceTable};
    use tempfile::TempDir;

    const GUIDE_A: &str = "ACGTACGTACGTACGTACG";
    const GUIDE_B: &str = "TTGCATGCATGCATGCATG";
    const UMI: &str = "AAAAAAAA";

    fn indexes() -> BarcodeIndexes {
        let guide_a: ReferenceTable = [("g1", GUIDE_A)].into_iter().collect();
        let guide_b: ReferenceTable = [("g1", GUIDE_B)].into_iter().collect();
        let umis: ReferenceTable = [("0", UMI)].into_iter().collect();
        BarcodeIndexes::build(&GuideLibrary { guide_a, guide_b }, &umis)
    }

    fn write_fastq(path: &Path, seqs: &[&str]) {
        let mut out = BufWriter::new(File::create(path).unwrap());
        for (i, seq) in seqs.iter().enumerate() {
            write!(out, "@r{}\n{}\n+\n{}\n", i, seq, "F".repeat(seq.len())).unwrap();
        }
        out.flush().unwrap();
    }

    /// Plain FASTQ triple for sample `s_S1` in `dir`
    fn sample_group(dir: &Path, r1: &[&str], r2: &[&str], r3: &[&str]) -> SampleGroup {
        let group = SampleGroup {
            name: "s_S1".to_string(),
            r1: dir.join("s_S1_R1_combined.fastq"),
            r2: dir.join("s_S1_R2_combined.fastq"),
            r3: dir.join("s_S1_R3_combined.fastq"),
        };
        write_fastq(&group.r1, r1);
        write_fastq(&group.r2, r2);
        write_fastq(&group.r3, r3);
        group
    }

    fn leftover_temps(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().map_or(false, |e| e == "tmp" || e == "bak"))
            .collect()
    }

    #[test]
    fn test_empty_umi_read_is_tallied_not_fatal() {
        let dir = TempDir::new().unwrap();
        let group = sample_group(dir.path(), &[GUIDE_A, GUIDE_A], &["", UMI], &[GUIDE_B, GUIDE_B]);
        let cancel = AtomicBool::new(false);

        let report =
            count_sample(&group, &dir.path().join("s_S1"), &indexes(), &RunConfig::default(), &cancel).unwrap();
        assert_eq!(report.tallies.reads, 2);
        assert_eq!(report.tallies.umi_unmapped, 1);
        assert_eq!(report.tallies.pair_match, 1);
        assert_eq!(fs::read_to_string(&report.umi_pair_counts).unwrap(), "g1++g1++0\t1\n");
    }

    #[test]
    fn test_cancelled_worker_stops_and_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let n = CANCEL_CHECK_INTERVAL as usize + 100;
        let group = sample_group(dir.path(), &vec![GUIDE_A; n], &vec![UMI; n], &vec![GUIDE_B; n]);
        let prefix = dir.path().join("s_S1");
        let cancel = AtomicBool::new(true);

        let err = count_sample(&group, &prefix, &indexes(), &RunConfig::default(), &cancel).unwrap_err();
        let count_err = err.downcast_ref::<CountError>().unwrap();
        assert!(count_err.is_cancellation());
        for path in output_paths(&prefix) {
            assert!(!path.exists(), "{:?} should not exist", path);
        }
        assert!(leftover_temps(dir.path()).is_empty());
    }

    #[test]
    fn test_failed_commit_restores_previous_outputs() {
        let dir = TempDir::new().unwrap();
        let finals = output_paths(&dir.path().join("s_S1"));
        for path in &finals {
            fs::write(path, "old").unwrap();
        }

        let pending = PendingOutputs::new(&finals);
        // the second temp file is missing, so its move fails after the first succeeded
        fs::write(&pending.temps[0], "new").unwrap();
        fs::write(&pending.temps[2], "new").unwrap();

        assert!(pending.commit(&finals).is_err());
        for path in &finals {
            assert_eq!(fs::read_to_string(path).unwrap(), "old");
        }
        assert!(leftover_temps(dir.path()).is_empty());
    }

    #[test]
    fn test_commit_replaces_previous_outputs() {
        let dir = TempDir::new().unwrap();
        let finals = output_paths(&dir.path().join("s_S1"));
        fs::write(&finals[0], "old").unwrap();

        let pending = PendingOutputs::new(&finals);
        for tmp in &pending.temps {
            fs::write(tmp, "new").unwrap();
        }
        pending.commit(&finals).unwrap();
        for path in &finals {
            assert_eq!(fs::read_to_string(path).unwrap(), "new");
        }
        assert!(leftover_temps(dir.path()).is_empty());
    }

    #[test]
    fn test_grouping_by_name_and_number() {
        let files = vec![
            "/data/screenB_S2_R2_combined.fastq.gz",
            "/data/screenA_S1_R3_combined.fastq.gz",
            "/data/screenA_S1_R1_combined.fastq.gz",
            "/data/screenB_S2_R1_combined.fastq.gz",
            "/data/screenA_S1_R2_combined.fastq.gz",
            "/data/screenB_S2_R3_combined.fastq",
            "/data/notes.txt",
        ];
        let groups = group_files_by_sample(&files).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "screenA_S1");
        assert_eq!(groups[0].r1, PathBuf::from("/data/screenA_S1_R1_combined.fastq.gz"));
        assert_eq!(groups[0].r3, PathBuf::from("/data/screenA_S1_R3_combined.fastq.gz"));
        assert_eq!(groups[1].name, "screenB_S2");
        assert_eq!(groups[1].r3, PathBuf::from("/data/screenB_S2_R3_combined.fastq"));
    }

    #[test]
    fn test_same_sample_name_different_numbers_are_separate() {
        let files: Vec<String> = ["S1", "S7"]
            .iter()
            .flat_map(|n| (1..=3).map(move |r| format!("arm_{}_R{}_combined.fastq.gz", n, r)))
            .collect();
        let groups = group_files_by_sample(&files).unwrap();
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["arm_S1", "arm_S7"]);
    }

    #[test]
    fn test_missing_read_fails() {
        let files = ["x_S1_R1_combined.fastq.gz", "x_S1_R3_combined.fastq.gz"];
        let err = group_files_by_sample(&files).unwrap_err();
        match err.downcast_ref::<CountError>() {
            Some(CountError::MissingReads { sample, found }) => {
                assert_eq!(sample, "x_S1");
                assert_eq!(found, "R1, R3");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_read_fails() {
        let files = [
            "x_S1_R1_combined.fastq.gz",
            "x_S1_R1_combined.fastq",
            "x_S1_R2_combined.fastq.gz",
            "x_S1_R3_combined.fastq.gz",
        ];
        let err = group_files_by_sample(&files).unwrap_err();
        assert!(matches!(err.downcast_ref::<CountError>(), Some(CountError::DuplicateRead { read: 1, .. })));
    }

    #[test]
    fn test_unmatched_names_only() {
        let files = ["reads_R1.fastq.gz", "sample_S1_R4_combined.fastq.gz"];
        assert!(group_files_by_sample(&files).unwrap().is_empty());
    }

    #[test]
    fn test_output_paths() {
        let [pairs, umis, stats] = output_paths(Path::new("/out/screenA_S1"));
        assert_eq!(pairs, PathBuf::from("/out/screenA_S1.all.aligned.counts.txt"));
        assert_eq!(umis, PathBuf::from("/out/screenA_S1.AB.match.counts.txt"));
        assert_eq!(stats, PathBuf::from("/out/screenA_S1.stats.txt"));
    }
}
