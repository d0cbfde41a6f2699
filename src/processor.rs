//! Per-file processing and the batch driver behind `walk`.

use std::path::Path;

use anyhow::{Context, Result};
use chapterforge_av::{ChapterizeReport, Chapterizer};
use filetime::FileTime;
use futures::stream::{self, StreamExt};

use crate::scanner::ScanEntry;

/// Result of handling one scanned file.
#[derive(Debug)]
pub enum FileOutcome {
    Processed(ChapterizeReport),
    /// The destination already existed.
    Skipped,
    Failed(anyhow::Error),
}

/// Counts reported at the end of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Processed(_) => self.processed += 1,
            FileOutcome::Skipped => self.skipped += 1,
            FileOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.processed + self.skipped + self.failed
    }
}

/// Chapterize one file, creating the destination's parent directories and
/// optionally copying the source's timestamps onto the result.
pub async fn chapterize_file(
    chapterizer: &Chapterizer,
    source: &Path,
    destination: &Path,
    preserve_timestamps: bool,
) -> Result<ChapterizeReport> {
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let report = chapterizer
        .chapterize(source, destination)
        .await
        .with_context(|| format!("Failed to chapterize {:?}", source))?;

    if preserve_timestamps {
        keep_timestamps(source, &report.destination);
    }

    Ok(report)
}

/// Copy timestamps onto a finished output. The output is already in place,
/// so a failure here is only logged.
fn keep_timestamps(source: &Path, destination: &Path) {
    if let Err(e) = copy_timestamps(source, destination) {
        tracing::warn!("Failed to copy timestamps onto {:?}: {}", destination, e);
    }
}

/// Give `destination` the access and modification times of `source`.
pub fn copy_timestamps(source: &Path, destination: &Path) -> std::io::Result<()> {
    let metadata = std::fs::metadata(source)?;
    filetime::set_file_times(
        destination,
        FileTime::from_last_access_time(&metadata),
        FileTime::from_last_modification_time(&metadata),
    )
}

/// Runs the pipeline over a list of scanned files.
pub struct BatchProcessor {
    chapterizer: Chapterizer,
    preserve_timestamps: bool,
    jobs: usize,
}

impl BatchProcessor {
    pub fn new(chapterizer: Chapterizer, preserve_timestamps: bool, jobs: usize) -> Self {
        Self {
            chapterizer,
            preserve_timestamps,
            jobs: jobs.max(1),
        }
    }

    /// Handle one file. Existing destinations are left alone.
    pub async fn process(&self, entry: &ScanEntry) -> FileOutcome {
        if entry.destination.exists() {
            tracing::info!("{:?} exists, skipping", entry.destination);
            return FileOutcome::Skipped;
        }

        tracing::info!("{:?} -> {:?}", entry.source, entry.destination);
        match chapterize_file(
            &self.chapterizer,
            &entry.source,
            &entry.destination,
            self.preserve_timestamps,
        )
        .await
        {
            Ok(report) => FileOutcome::Processed(report),
            Err(e) => {
                tracing::warn!("{:#}", e);
                FileOutcome::Failed(e)
            }
        }
    }

    /// Process every entry, at most `jobs` at a time. A failing file never
    /// stops the batch.
    pub async fn run(&self, entries: &[ScanEntry]) -> BatchSummary {
        let summary = stream::iter(entries)
            .map(|entry| self.process(entry))
            .buffer_unordered(self.jobs)
            .fold(BatchSummary::default(), |mut summary, outcome| async move {
                summary.record(&outcome);
                summary
            })
            .await;

        tracing::info!(
            "Batch complete: {} processed, {} skipped, {} failed",
            summary.processed,
            summary.skipped,
            summary.failed
        );
        summary
    }
}
