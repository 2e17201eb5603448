use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::info;

use dualguide::config::{ReadLayout, ReadSlot, ReferenceLayout, RunConfig, Window, DEFAULT_TEST_LINES};
use dualguide::dispatch::run_samples;
use dualguide::index::BarcodeIndexes;
use dualguide::merge::{find_count_files, merge_count_files};
use dualguide::reference::{load_umi_table, GuideLibrary};
use dualguide::sample::{group_files_by_sample, UMI_PAIR_COUNTS_SUFFIX};

#[derive(Parser)]
#[command(author, version, about = "Dual-guide CRISPR screen read counting")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Count guide pairs and UMI-tagged guide pairs per sample from R1/R2/R3 FASTQs
    Count(CountArgs),
    /// Merge per-sample `.AB.match.counts.txt` files into one counts matrix
    Merge(MergeArgs),
}

#[derive(Args)]
struct CountArgs {
    /// Guide library CSV (sgID_AB, sgID_A, protospacer_A, sgID_B, protospacer_B)
    guide_table: PathBuf,

    /// UMI whitelist CSV with a `UMI` column
    umi_table: PathBuf,

    /// Directory where output files are written
    out_dir: PathBuf,

    /// Read files named {sample}_S{n}_R{1,2,3}_combined.fastq[.gz]
    #[arg(required = true)]
    fastqs: Vec<PathBuf>,

    /// Only process the first --test-lines lines of each file. Existing outputs are never
    /// overwritten in a test run
    #[arg(long)]
    test: bool,

    /// Number of input lines processed per file with --test
    #[arg(long, default_value_t = DEFAULT_TEST_LINES)]
    test_lines: u64,

    /// Maximum number of samples counted at once (default: all samples at once)
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Length of the guide window in R1 and R3
    #[arg(long, default_value = "19")]
    guide_len: usize,

    /// Offset of guide A in R1
    #[arg(long, default_value = "0")]
    guide_a_offset: usize,

    /// Offset of guide B in R3
    #[arg(long, default_value = "0")]
    guide_b_offset: usize,

    /// Length of the UMI window in R2
    #[arg(long, default_value = "8")]
    umi_len: usize,

    /// Offset of the UMI in R2
    #[arg(long, default_value = "0")]
    umi_offset: usize,

    /// First protospacer base covered by the reads
    #[arg(long, default_value = "1")]
    protospacer_trim_start: usize,

    /// Fail if R1/R2/R3 records carry different read names
    #[arg(long)]
    verify_read_names: bool,

    /// Log progress every N reads per sample
    #[arg(long, default_value = "10000000")]
    progress_interval: u64,
}

#[derive(Args)]
struct MergeArgs {
    /// Directory holding the per-sample count files
    counts_dir: PathBuf,

    /// Directory where counts.txt is written
    out_dir: PathBuf,

    /// Suffix of the count files to merge
    #[arg(long, default_value = UMI_PAIR_COUNTS_SUFFIX)]
    suffix: String,

    /// The target column is the pair id up to this separator
    #[arg(long, default_value = "_")]
    target_separator: String,
}

impl CountArgs {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            layout: ReadLayout {
                guide_a: Window::new(ReadSlot::R1, self.guide_a_offset, self.guide_len),
                guide_b: Window::new(ReadSlot::R3, self.guide_b_offset, self.guide_len),
                umi: Window::new(ReadSlot::R2, self.umi_offset, self.umi_len),
            },
            test_mode: self.test,
            test_lines: self.test_lines,
            threads: self.threads,
            progress_interval: self.progress_interval,
            verify_read_names: self.verify_read_names,
        }
    }

    fn reference_layout(&self) -> ReferenceLayout {
        ReferenceLayout { trim_start: self.protospacer_trim_start, guide_len: self.guide_len }
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create output directory {:?}", dir))?;
        info!("Created output directory {:?}", dir);
    }
    Ok(())
}

fn count(args: CountArgs) -> Result<()> {
    let start = Instant::now();
    let config = args.run_config();

    // group first so a broken file set fails before any expensive work
    let groups = group_files_by_sample(&args.fastqs)?;
    if groups.is_empty() {
        bail!("None of the {} input files follow the {{sample}}_S{{n}}_R{{1,2,3}}_combined naming", args.fastqs.len());
    }

    let library = GuideLibrary::from_path(&args.guide_table, &args.reference_layout())?;
    let umis = load_umi_table(&args.umi_table)?;
    let indexes = BarcodeIndexes::build(&library, &umis);

    ensure_dir(&args.out_dir)?;
    let reports = run_samples(&groups, &args.out_dir, &indexes, &config)?;

    for report in &reports {
        info!("{}: {}", report.sample, report.summary);
    }
    info!("Counted {} samples in {:.1}s", reports.len(), start.elapsed().as_secs_f64());
    Ok(())
}

fn merge(args: MergeArgs) -> Result<()> {
    let files = find_count_files(&args.counts_dir, &args.suffix)?;
    if files.is_empty() {
        bail!("No *{} files found in {:?}", args.suffix, args.counts_dir);
    }

    let matrix = merge_count_files(&files)?;
    ensure_dir(&args.out_dir)?;
    let out = args.out_dir.join("counts.txt");
    matrix.write_tsv(&out, &args.target_separator)?;
    info!("Wrote {} pair ids x {} samples to {:?}", matrix.rows.len(), matrix.samples.len(), out);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Count(args) => count(args),
        Command::Merge(args) => merge(args),
    }
}
