use chapterforge_av::boundary::DEFAULT_MIN_SPACING;
use chapterforge_av::{PipelineOptions, ToolOverrides};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub chapters: ChaptersConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Pipeline tunables for a single file.
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            min_spacing: self.chapters.min_spacing,
            drop_zero_length_tail: self.chapters.drop_zero_length_tail,
            timeout: self.tools.timeout(),
            ..PipelineOptions::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChaptersConfig {
    /// Minimum distance between chapter starts, in seconds
    #[serde(default = "default_min_spacing")]
    pub min_spacing: u64,

    /// Drop a final chapter that would have zero length. Set to false to
    /// keep it; the document then contains a chapter with START equal to END.
    #[serde(default = "default_true")]
    pub drop_zero_length_tail: bool,
}

impl Default for ChaptersConfig {
    fn default() -> Self {
        Self {
            min_spacing: default_min_spacing(),
            drop_zero_length_tail: true,
        }
    }
}

fn default_min_spacing() -> u64 {
    DEFAULT_MIN_SPACING
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanConfig {
    /// File extensions picked up by `walk` (case-insensitive, no dot)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Copy access and modification times from source to destination
    #[serde(default = "default_true")]
    pub preserve_timestamps: bool,

    /// Files processed concurrently by `walk`
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            preserve_timestamps: true,
            jobs: default_jobs(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec!["mkv".to_string(), "mp4".to_string()]
}

fn default_jobs() -> usize {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    /// Custom path to ffprobe binary
    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    /// Custom path to ffmpeg binary
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Upper bound for processing one file, in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ToolsConfig {
    pub fn overrides(&self) -> ToolOverrides {
        ToolOverrides {
            ffprobe_path: self.ffprobe_path.clone(),
            ffmpeg_path: self.ffmpeg_path.clone(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
