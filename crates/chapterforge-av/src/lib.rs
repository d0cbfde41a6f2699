//! # chapterforge-av
//!
//! Streaming chapter generation between ffprobe and ffmpeg.
//!
//! The prober's frame listing flows through three in-process stages before
//! reaching the muxer's stdin as an FFMETADATA document:
//!
//! - **Parsing** ([`FrameParser`]) -- recognise `[FRAME]` blocks and keep the
//!   keyframes.
//! - **Boundary selection** ([`BoundaryFilter`]) -- thin keyframes so that
//!   chapter starts are more than the minimum spacing apart.
//! - **Document building** ([`ChapterBuilder`]) -- turn boundaries into
//!   numbered chapters and render them.
//!
//! [`Chapterizer`] wires the stages together with bounded channels,
//! supervises both external processes, and stages the muxer output in a
//! [`Workspace`] that only reaches the destination on success.

mod error;

pub mod boundary;
pub mod chapters;
pub mod command;
pub mod frames;
pub mod pipeline;
pub mod stage;
pub mod tools;
pub mod workspace;

pub use error::{Error, Result};

// ---- Re-exports for convenience ----

pub use boundary::{BoundaryFilter, BoundaryFrame};
pub use chapters::{ChapterBuilder, ChapterDefinition, ChapterDocument};
pub use command::ToolCommand;
pub use frames::{FrameParser, KeyframeRecord};
pub use pipeline::{chapterize, ChapterizeReport, Chapterizer, PipelineOptions};
pub use stage::Stage;
pub use tools::{ToolInfo, ToolOverrides, ToolRegistry};
pub use workspace::Workspace;
