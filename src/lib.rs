//! Chapterforge - adds keyframe-aligned chapters to video files
//!
//! This library crate exposes configuration, scanning and batch processing
//! for the binary and for integration testing. The streaming pipeline itself
//! lives in `chapterforge-av`.

pub mod config;
pub mod processor;
pub mod scanner;
