//! Chapter definitions and the FFMETADATA document builder.

use std::fmt;

use crate::boundary::BoundaryFrame;
use crate::stage::Stage;
use crate::{Error, Result};

/// First line of every FFMETADATA document.
pub const FFMETADATA_HEADER: &str = ";FFMETADATA1\n";

/// Timebase of the `START`/`END` values: whole seconds.
pub const TIMEBASE: &str = "1/1";

/// One chapter of the output document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterDefinition {
    pub start: u64,
    pub end: u64,
    pub title: String,
}

impl ChapterDefinition {
    /// Chapter number `index` (1-based) spanning `start..end`.
    pub fn numbered(index: usize, start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            title: format!("Chapter {index}"),
        }
    }

    pub fn duration(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

impl fmt::Display for ChapterDefinition {
    /// Formats the five-line `[CHAPTER]` block.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[CHAPTER]")?;
        writeln!(f, "TIMEBASE={TIMEBASE}")?;
        writeln!(f, "START={}", self.start)?;
        writeln!(f, "END={}", self.end)?;
        writeln!(f, "title={}", self.title)
    }
}

/// A complete chapter document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterDocument {
    pub chapters: Vec<ChapterDefinition>,
}

impl ChapterDocument {
    /// Build the document for an ordered list of boundary timestamps.
    pub fn from_boundaries(timestamps: &[u64], drop_zero_length: bool) -> Result<Self> {
        let mut builder = ChapterBuilder::new(drop_zero_length);
        let mut sink = Vec::new();
        for &timestamp in timestamps {
            builder.push(timestamp, &mut sink);
        }
        builder.check_complete()?;
        Ok(Self {
            chapters: builder.into_chapters(),
        })
    }
}

impl fmt::Display for ChapterDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(FFMETADATA_HEADER)?;
        for chapter in &self.chapters {
            write!(f, "{chapter}")?;
        }
        Ok(())
    }
}

/// Folds boundary frames into chapters, emitting each chapter block as soon
/// as the boundary that ends it arrives.
///
/// The first boundary only anchors chapter 1 at time zero. Every later
/// boundary closes one chapter, so `n` boundaries yield `n - 1` chapters.
#[derive(Debug)]
pub struct ChapterBuilder {
    drop_zero_length: bool,
    anchored: bool,
    previous: Option<u64>,
    boundaries: u64,
    chapters: Vec<ChapterDefinition>,
}

impl ChapterBuilder {
    /// With `drop_zero_length` unset, a boundary equal to the previous one
    /// still closes a chapter with `start == end`. That is an explicit
    /// opt-out of the `start < end` rule; a boundary earlier than the
    /// previous one is always dropped.
    pub fn new(drop_zero_length: bool) -> Self {
        Self {
            drop_zero_length,
            anchored: false,
            previous: None,
            boundaries: 0,
            chapters: Vec::new(),
        }
    }

    /// Boundaries received so far.
    pub fn boundaries(&self) -> u64 {
        self.boundaries
    }

    /// Chapters closed so far.
    pub fn chapters(&self) -> &[ChapterDefinition] {
        &self.chapters
    }

    pub fn into_chapters(self) -> Vec<ChapterDefinition> {
        self.chapters
    }

    /// Take one boundary timestamp, appending a rendered chapter block to
    /// `out` when it closes a chapter.
    pub fn push(&mut self, timestamp: u64, out: &mut Vec<String>) {
        self.boundaries += 1;

        if !self.anchored {
            self.anchored = true;
            return;
        }

        let start = self.previous.unwrap_or(0);
        if timestamp <= start && (self.drop_zero_length || timestamp < start) {
            tracing::debug!(start, end = timestamp, "dropping empty chapter");
            return;
        }

        let chapter = ChapterDefinition::numbered(self.chapters.len() + 1, start, timestamp);
        tracing::debug!(
            start = chapter.start,
            end = chapter.end,
            title = %chapter.title,
            "chapter"
        );
        out.push(chapter.to_string());
        self.chapters.push(chapter);
        self.previous = Some(timestamp);
    }

    /// Verify that at least one chapter was produced.
    pub fn check_complete(&self) -> Result<()> {
        match self.boundaries {
            0 => Err(Error::EmptyKeyframeStream),
            found if self.chapters.is_empty() => Err(Error::InsufficientBoundaries { found }),
            _ => Ok(()),
        }
    }
}

impl Stage for ChapterBuilder {
    type Input = BoundaryFrame;
    type Output = String;

    fn name(&self) -> &'static str {
        "chapter-builder"
    }

    fn start(&mut self, out: &mut Vec<String>) -> Result<()> {
        out.push(FFMETADATA_HEADER.to_string());
        Ok(())
    }

    fn process(&mut self, input: BoundaryFrame, out: &mut Vec<String>) -> Result<()> {
        self.push(input.timestamp(), out);
        Ok(())
    }

    fn finish(&mut self, _out: &mut Vec<String>) -> Result<()> {
        self.check_complete()
    }
}
