//! Selection of chapter-start keyframes under a minimum spacing.

use crate::frames::KeyframeRecord;
use crate::stage::Stage;
use crate::Result;

/// Default minimum spacing between chapter starts, in seconds.
pub const DEFAULT_MIN_SPACING: u64 = 180;

/// A keyframe chosen to start a chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryFrame(pub KeyframeRecord);

impl BoundaryFrame {
    pub fn timestamp(&self) -> u64 {
        self.0.timestamp
    }
}

/// Thins the keyframe stream down to chapter boundaries.
///
/// The first keyframe is always a boundary. After that a keyframe becomes a
/// boundary when it lies strictly more than `min_spacing` after the previous
/// boundary. At end of input the last keyframe seen is emitted as well if it
/// was not already a boundary, so the tail of the file is always covered.
#[derive(Debug)]
pub struct BoundaryFilter {
    min_spacing: u64,
    reference: Option<KeyframeRecord>,
    last_seen: Option<KeyframeRecord>,
    last_seen_emitted: bool,
    emitted: u64,
}

impl BoundaryFilter {
    pub fn new(min_spacing: u64) -> Self {
        Self {
            min_spacing,
            reference: None,
            last_seen: None,
            last_seen_emitted: false,
            emitted: 0,
        }
    }

    pub fn min_spacing(&self) -> u64 {
        self.min_spacing
    }

    /// Number of boundaries emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Consider one keyframe, returning it if it starts a chapter.
    pub fn observe(&mut self, record: KeyframeRecord) -> Option<BoundaryFrame> {
        self.last_seen = Some(record);

        let is_boundary = match self.reference {
            None => true,
            Some(reference) => {
                record.timestamp.saturating_sub(reference.timestamp) > self.min_spacing
            }
        };

        self.last_seen_emitted = is_boundary;
        if is_boundary {
            self.reference = Some(record);
            self.emitted += 1;
            tracing::debug!(timestamp = record.timestamp, "chapter boundary");
            Some(BoundaryFrame(record))
        } else {
            None
        }
    }

    /// End of input: return the trailing keyframe if it was held back.
    pub fn flush(&mut self) -> Option<BoundaryFrame> {
        if self.last_seen_emitted {
            return None;
        }
        let record = self.last_seen.take()?;
        self.last_seen_emitted = true;
        self.emitted += 1;
        tracing::debug!(timestamp = record.timestamp, "trailing chapter boundary");
        Some(BoundaryFrame(record))
    }
}

impl Default for BoundaryFilter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SPACING)
    }
}

impl Stage for BoundaryFilter {
    type Input = KeyframeRecord;
    type Output = BoundaryFrame;

    fn name(&self) -> &'static str {
        "boundary-filter"
    }

    fn process(&mut self, input: KeyframeRecord, out: &mut Vec<BoundaryFrame>) -> Result<()> {
        out.extend(self.observe(input));
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<BoundaryFrame>) -> Result<()> {
        out.extend(self.flush());
        Ok(())
    }
}
