//! Error types for chapterforge-av.

use std::path::PathBuf;
use std::process::ExitStatus;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can end a chapterize run.
///
/// Every variant except [`Error::Cancelled`] is a root cause. `Cancelled` is
/// what the remaining stages report after a sibling failed, and is never
/// surfaced when a root cause is known.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A frame block matched the grammar but a required field was unusable.
    #[error("malformed frame record: {0}")]
    MalformedRecord(String),

    /// The prober produced no keyframes at all.
    #[error("no keyframes found in prober output")]
    EmptyKeyframeStream,

    /// Fewer than two usable boundaries, so not even one chapter exists.
    #[error("need at least 2 chapter boundaries, found {found}")]
    InsufficientBoundaries { found: u64 },

    /// The prober exited unsuccessfully.
    #[error("{tool} exited with {status}: {stderr}")]
    UpstreamProcessFailed {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },

    /// The muxer exited unsuccessfully or stopped reading its input.
    #[error("{tool} failed ({reason}): {stderr}")]
    DownstreamProcessFailed {
        tool: String,
        reason: String,
        stderr: String,
    },

    /// A required external tool is not available.
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// An external tool could not be started.
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The source file does not exist.
    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Staging directory error.
    #[error("workspace error: {0}")]
    Workspace(String),

    /// The run exceeded its configured time bound.
    #[error("timed out after {0:?}")]
    TimedOut(std::time::Duration),

    /// The stage stopped because another part of the pipeline failed.
    #[error("cancelled")]
    Cancelled,

    /// A pipeline task panicked or was aborted.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a malformed record error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRecord(message.into())
    }

    /// Create a tool not found error.
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Create a downstream failure error.
    pub fn downstream(
        tool: impl Into<String>,
        reason: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::DownstreamProcessFailed {
            tool: tool.into(),
            reason: reason.into(),
            stderr: stderr.into(),
        }
    }

    /// Whether this error explains a failure on its own, as opposed to
    /// [`Error::Cancelled`] which only echoes a failure elsewhere.
    pub fn is_root_cause(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}
