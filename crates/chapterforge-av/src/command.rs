//! Builders for the prober and muxer processes.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;

use crate::{Error, Result};

/// How much of a tool's stderr is kept for error reports.
pub const MAX_STDERR_BYTES: usize = 16 * 1024;

/// A builder for an external tool invocation whose standard streams are
/// handed to the pipeline instead of being buffered.
///
/// # Example
///
/// ```no_run
/// use chapterforge_av::command::prober_command;
/// use std::path::Path;
///
/// # async fn example() -> chapterforge_av::Result<()> {
/// let mut child = prober_command(Path::new("ffprobe"), Path::new("/media/movie.mkv"))
///     .spawn()?;
/// let stdout = child.stdout.take();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    pipe_stdin: bool,
    pipe_stdout: bool,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            pipe_stdin: false,
            pipe_stdout: false,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<OsString>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<OsString>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Give the child a writable stdin pipe.
    pub fn stdin_piped(&mut self) -> &mut Self {
        self.pipe_stdin = true;
        self
    }

    /// Give the child a readable stdout pipe.
    pub fn stdout_piped(&mut self) -> &mut Self {
        self.pipe_stdout = true;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// File name of the program, for messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Start the process. Stderr is always piped; the child is killed if its
    /// handle is dropped.
    pub fn spawn(&self) -> Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(if self.pipe_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(if self.pipe_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!("spawning {:?} {:?}", self.program, self.args);

        cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::tool_not_found(self.program_name())
            } else {
                Error::Spawn {
                    tool: self.program_name(),
                    source: e,
                }
            }
        })
    }
}

/// ffprobe invocation listing every keyframe of the video stream.
pub fn prober_command(ffprobe: &Path, source: &Path) -> ToolCommand {
    let mut cmd = ToolCommand::new(ffprobe);
    cmd.args(["-v", "error"])
        .args(["-select_streams", "v:0"])
        .arg("-show_frames")
        .args(["-skip_frame", "nokey"])
        .args(["-show_entries", "frame=key_frame,pts_time,pkt_pos"])
        .arg(source)
        .stdout_piped();
    cmd
}

/// ffmpeg invocation that copies every stream of `source` into `output`
/// and takes its chapters from an FFMETADATA document on stdin.
pub fn muxer_command(ffmpeg: &Path, source: &Path, output: &Path) -> ToolCommand {
    let mut cmd = ToolCommand::new(ffmpeg);
    cmd.args(["-hide_banner", "-loglevel", "error", "-y"])
        .arg("-i")
        .arg(source)
        .args(["-f", "ffmetadata", "-i", "pipe:0"])
        .args(["-map", "0", "-map_metadata", "0", "-map_chapters", "1"])
        .args(["-codec", "copy"])
        .arg(output)
        .stdin_piped();
    cmd
}

/// Drain a child's stderr in the background, keeping only the last
/// [`MAX_STDERR_BYTES`].
///
/// Draining is required even when the text is never shown: a tool that
/// fills its stderr pipe blocks forever.
pub fn collect_stderr(stderr: Option<ChildStderr>) -> JoinHandle<String> {
    tokio::spawn(async move {
        let Some(mut stderr) = stderr else {
            return String::new();
        };
        let mut tail: Vec<u8> = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    tail.extend_from_slice(&buf[..n]);
                    if tail.len() > MAX_STDERR_BYTES {
                        let excess = tail.len() - MAX_STDERR_BYTES;
                        tail.drain(..excess);
                    }
                }
            }
        }
        String::from_utf8_lossy(&tail).trim().to_string()
    })
}

/// Await a stderr collector started by [`collect_stderr`].
pub async fn stderr_text(handle: JoinHandle<String>) -> String {
    handle.await.unwrap_or_default()
}
