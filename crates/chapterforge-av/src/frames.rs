//! Incremental parser for ffprobe `-show_frames` output.
//!
//! ffprobe's default writer prints one block per frame:
//!
//! ```text
//! [FRAME]
//! key_frame=1
//! pts_time=12.345000
//! pkt_pos=48213
//! ...
//! [/FRAME]
//! ```
//!
//! [`FrameParser`] accepts that text in chunks of any size and yields a
//! [`KeyframeRecord`] for every complete block whose `key_frame` flag is set.
//! Only the current unterminated line is buffered; everything before the last
//! newline is consumed as soon as it arrives.

use bytes::Bytes;

use crate::stage::Stage;
use crate::{Error, Result};

/// Line that opens a frame block.
pub const BLOCK_OPEN: &str = "[FRAME]";
/// Line that closes a frame block.
pub const BLOCK_CLOSE: &str = "[/FRAME]";
/// Field carrying the keyframe flag.
pub const FLAG_FIELD: &str = "key_frame";
/// Field carrying the presentation time in seconds.
pub const TIMESTAMP_FIELD: &str = "pts_time";
/// Field carrying the packet byte offset.
pub const POSITION_FIELD: &str = "pkt_pos";

/// Longest unterminated line the parser will hold.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// A keyframe parsed from the prober output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyframeRecord {
    /// Presentation time in whole seconds.
    pub timestamp: u64,
    /// Byte offset of the frame's packet in the source container.
    pub byte_position: u64,
}

/// Fields collected while inside a `[FRAME]` block.
#[derive(Debug, Default)]
struct PendingBlock {
    key_frame: Option<bool>,
    timestamp: Option<String>,
    byte_position: Option<String>,
}

/// Streaming frame-block parser.
#[derive(Debug)]
pub struct FrameParser {
    line: Vec<u8>,
    block: Option<PendingBlock>,
    max_line_len: usize,
    keyframes: u64,
    skipped: u64,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self::with_max_line_len(MAX_LINE_LEN)
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            line: Vec::new(),
            block: None,
            max_line_len,
            keyframes: 0,
            skipped: 0,
        }
    }

    /// Number of keyframe records emitted so far.
    pub fn keyframes(&self) -> u64 {
        self.keyframes
    }

    /// Number of complete non-keyframe blocks discarded so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Feed one chunk, appending any completed keyframes to `out`.
    pub fn push(&mut self, chunk: &[u8], out: &mut Vec<KeyframeRecord>) -> Result<()> {
        let mut rest = chunk;
        while let Some(newline) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(newline);
            rest = &tail[1..];

            if self.line.is_empty() {
                self.handle_line(head, out)?;
            } else {
                self.line.extend_from_slice(head);
                let line = std::mem::take(&mut self.line);
                self.handle_line(&line, out)?;
            }
        }

        self.line.extend_from_slice(rest);
        if self.line.len() > self.max_line_len {
            return Err(Error::malformed(format!(
                "unterminated line exceeds {} bytes",
                self.max_line_len
            )));
        }

        Ok(())
    }

    /// Signal end of input. A trailing partial line or unclosed block is
    /// dropped without error.
    pub fn finish(&mut self) {
        if !self.line.is_empty() || self.block.is_some() {
            tracing::warn!(
                pending_bytes = self.line.len(),
                open_block = self.block.is_some(),
                "discarding incomplete trailing frame data"
            );
        }
        self.line.clear();
        self.block = None;
    }

    fn handle_line(&mut self, raw: &[u8], out: &mut Vec<KeyframeRecord>) -> Result<()> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();

        if line == BLOCK_OPEN {
            if self.block.is_some() {
                return Err(Error::malformed(format!(
                    "{BLOCK_OPEN} opened before the previous block was closed"
                )));
            }
            self.block = Some(PendingBlock::default());
            return Ok(());
        }

        if line == BLOCK_CLOSE {
            if let Some(block) = self.block.take() {
                match complete_block(block)? {
                    Some(record) => {
                        self.keyframes += 1;
                        out.push(record);
                    }
                    None => self.skipped += 1,
                }
            }
            return Ok(());
        }

        // Lines outside a block, nested section headers and unknown fields
        // are all ignorable.
        let Some(block) = self.block.as_mut() else {
            return Ok(());
        };
        let Some((key, value)) = line.split_once('=') else {
            return Ok(());
        };

        let slot = match key {
            FLAG_FIELD => {
                if block.key_frame.is_none() {
                    block.key_frame = Some(parse_flag(value)?);
                }
                return Ok(());
            }
            TIMESTAMP_FIELD => &mut block.timestamp,
            POSITION_FIELD => &mut block.byte_position,
            _ => return Ok(()),
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }

        Ok(())
    }
}

fn complete_block(block: PendingBlock) -> Result<Option<KeyframeRecord>> {
    match block.key_frame {
        None => Err(Error::malformed(format!("frame block without {FLAG_FIELD}"))),
        Some(false) => Ok(None),
        Some(true) => {
            let timestamp = required(TIMESTAMP_FIELD, block.timestamp.as_deref())?;
            let byte_position = required(POSITION_FIELD, block.byte_position.as_deref())?;
            Ok(Some(KeyframeRecord {
                timestamp,
                byte_position,
            }))
        }
    }
}

fn required(field: &str, value: Option<&str>) -> Result<u64> {
    let value = value.ok_or_else(|| Error::malformed(format!("keyframe without {field}")))?;
    parse_whole(value).ok_or_else(|| Error::malformed(format!("{field}={value}")))
}

fn parse_flag(value: &str) -> Result<bool> {
    match value {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(Error::malformed(format!("{FLAG_FIELD}={other}"))),
    }
}

/// Parse `digits[.digits]`, truncating the fraction. A leading minus sign is
/// accepted and saturates to zero (ffprobe reports small negative start
/// times for streams with B-frame delay).
fn parse_whole(value: &str) -> Option<u64> {
    let (negative, unsigned) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || frac_part.is_some_and(|f| !all_digits(f)) {
        return None;
    }

    if negative {
        return Some(0);
    }
    int_part.parse().ok()
}

impl Stage for FrameParser {
    type Input = Bytes;
    type Output = KeyframeRecord;

    fn name(&self) -> &'static str {
        "parser"
    }

    fn process(&mut self, input: Bytes, out: &mut Vec<KeyframeRecord>) -> Result<()> {
        self.push(&input, out)
    }

    fn finish(&mut self, _out: &mut Vec<KeyframeRecord>) -> Result<()> {
        FrameParser::finish(self);
        tracing::debug!(
            keyframes = self.keyframes,
            skipped = self.skipped,
            "frame parser drained"
        );
        Ok(())
    }
}
