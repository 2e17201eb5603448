use crate::config::RunConfig;
use crate::errors::CountError;
use crate::index::BarcodeIndexes;
use crate::sample::{count_sample, output_paths, SampleGroup, SampleReport};
use anyhow::Result;
use crossbeam_channel::unbounded;
use log::{error, info, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Number of samples counted at once: one per sample unless capped by `threads`
pub fn pool_size(config: &RunConfig, samples: usize) -> usize {
    config.threads.unwrap_or(samples).clamp(1, samples.max(1))
}

fn is_cancellation(e: &anyhow::Error) -> bool {
    e.downcast_ref::<CountError>().map_or(false, |c| c.is_cancellation())
}

/// Keep the error the run reports: the first real failure, or a cancellation if that
/// is all there is
fn record_failure(failure: &mut Option<anyhow::Error>, sample: &str, e: anyhow::Error) {
    let replace = match failure {
        None => true,
        Some(prev) => !is_cancellation(&e) && is_cancellation(prev),
    };
    if replace {
        *failure = Some(e.context(format!("Sample {} failed", sample)));
    }
}

/// Count every sample group in parallel, writing outputs under `output_dir`.
///
/// Results are collected over a channel as samples finish. The first failure cancels the
/// samples still running and is returned once they have stopped; a run only succeeds if
/// every sample does.
pub fn run_samples(
    groups: &[SampleGroup],
    output_dir: &Path,
    indexes: &BarcodeIndexes,
    config: &RunConfig,
) -> Result<Vec<SampleReport>> {
    if groups.is_empty() {
        warn!("No complete sample groups to count");
        return Ok(Vec::new());
    }

    // test runs must not clobber earlier outputs; check before any sample starts
    if config.test_mode {
        for group in groups {
            if let Some(path) = output_paths(&output_dir.join(&group.name)).into_iter().find(|p| p.exists()) {
                return Err(CountError::OutputExists { path }.into());
            }
        }
    }

    let threads = pool_size(config, groups.len());
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("sample-worker-{}", i))
        .build()?;
    info!("Counting {} samples with {} worker threads", groups.len(), threads);

    let cancel = AtomicBool::new(false);
    let (tx, rx) = unbounded::<(String, Result<SampleReport>)>();
    let mut reports = Vec::with_capacity(groups.len());
    let mut failure: Option<anyhow::Error> = None;

    thread::scope(|scope| {
        let cancel = &cancel;
        let pool = &pool;
        scope.spawn(move || {
            pool.scope(|s| {
                for group in groups {
                    let tx = tx.clone();
                    s.spawn(move |_| {
                        let prefix = output_dir.join(&group.name);
                        let result = count_sample(group, &prefix, indexes, config, cancel);
                        if result.is_err() {
                            cancel.store(true, Ordering::Relaxed);
                        }
                        let _ = tx.send((group.name.clone(), result));
                    });
                }
            });
            // the last sender goes away here and ends the receive loop
            drop(tx);
        });

        for (sample, result) in rx.iter() {
            match result {
                Ok(report) => {
                    info!("Sample {} finished: {} reads", sample, report.tallies.reads);
                    reports.push(report);
                }
                Err(e) => {
                    if is_cancellation(&e) {
                        warn!("Sample {} stopped early", sample);
                    } else {
                        error!("Sample {} failed: {:#}", sample, e);
                    }
                    record_failure(&mut failure, &sample, e);
                }
            }
        }
    });

    if let Some(e) = failure {
        return Err(e);
    }
    reports.sort_by(|a, b| a.sample.cmp(&b.sample));
    Ok(reports)
}
