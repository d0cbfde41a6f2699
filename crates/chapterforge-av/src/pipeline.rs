//! Pipeline coordinator: ffprobe → parser → boundary filter → chapter
//! builder → ffmpeg.
//!
//! [`Chapterizer::chapterize`] supervises both external processes and the
//! four in-process stages. Every task shares one cancellation token; the
//! first failure anywhere cancels it, the prober and muxer are killed and
//! reaped, and the root cause is reported. Nothing is moved to the
//! destination unless the whole run succeeded.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::boundary::{BoundaryFilter, DEFAULT_MIN_SPACING};
use crate::chapters::{ChapterBuilder, ChapterDefinition, ChapterDocument};
use crate::command::{collect_stderr, muxer_command, prober_command, stderr_text};
use crate::frames::FrameParser;
use crate::stage::{join_stage, spawn_stage, DEFAULT_CHANNEL_CAPACITY};
use crate::tools::{ToolOverrides, ToolRegistry, FFMPEG, FFPROBE};
use crate::workspace::Workspace;
use crate::{Error, Result};

/// Bytes requested per read from the prober's stdout.
const READ_CHUNK: usize = 16 * 1024;

/// How long a muxer that stopped reading its input gets to exit on its own
/// before it is killed.
const MUXER_GRACE: Duration = Duration::from_secs(5);

/// Tunables for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Minimum spacing between chapter starts, in seconds.
    pub min_spacing: u64,
    /// Drop chapters whose end equals their start. Turning this off keeps
    /// such chapters, so emitted chapters may have `start == end`.
    pub drop_zero_length_tail: bool,
    /// Upper bound for a whole run. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Items buffered between adjacent stages.
    pub channel_capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            min_spacing: DEFAULT_MIN_SPACING,
            drop_zero_length_tail: true,
            timeout: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct ChapterizeReport {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Keyframes parsed from the prober output.
    pub keyframes: u64,
    /// Boundaries selected by the filter.
    pub boundaries: u64,
    pub chapters: Vec<ChapterDefinition>,
    /// Size of the chapter document written to the muxer.
    pub document_bytes: u64,
}

/// Runs the keyframe-to-chapter pipeline for single files.
#[derive(Debug, Clone)]
pub struct Chapterizer {
    tools: ToolRegistry,
    options: PipelineOptions,
}

/// What the upstream half of the pipeline produced.
struct UpstreamOutcome {
    keyframes: u64,
    boundaries: u64,
    chapters: Vec<ChapterDefinition>,
}

struct StageHandles {
    source: JoinHandle<Result<u64>>,
    parser: JoinHandle<Result<FrameParser>>,
    filter: JoinHandle<Result<BoundaryFilter>>,
    builder: JoinHandle<Result<ChapterBuilder>>,
}

struct JoinedStages {
    source: Result<u64>,
    parser: Result<FrameParser>,
    filter: Result<BoundaryFilter>,
    builder: Result<ChapterBuilder>,
}

impl StageHandles {
    async fn join(self) -> JoinedStages {
        let (source, parser, filter, builder) = tokio::join!(
            join_stage("source", self.source),
            join_stage("parser", self.parser),
            join_stage("filter", self.filter),
            join_stage("builder", self.builder),
        );
        JoinedStages {
            source,
            parser,
            filter,
            builder,
        }
    }
}

impl JoinedStages {
    /// The upstream result, or the earliest root-cause error in pipeline
    /// order.
    fn outcome(self) -> Result<UpstreamOutcome> {
        match (self.source, self.parser, self.filter, self.builder) {
            (Ok(bytes_read), Ok(parser), Ok(filter), Ok(builder)) => {
                tracing::debug!(bytes_read, "prober output consumed");
                Ok(UpstreamOutcome {
                    keyframes: parser.keyframes(),
                    boundaries: filter.emitted(),
                    chapters: builder.into_chapters(),
                })
            }
            (source, parser, filter, builder) => {
                let errors = [source.err(), parser.err(), filter.err(), builder.err()];
                Err(errors
                    .into_iter()
                    .flatten()
                    .find(|e| e.is_root_cause())
                    .unwrap_or(Error::Cancelled))
            }
        }
    }
}

impl Chapterizer {
    pub fn new(tools: ToolRegistry, options: PipelineOptions) -> Self {
        Self { tools, options }
    }

    /// Discover ffprobe/ffmpeg on `PATH` and use default options.
    pub fn discover() -> Self {
        Self::new(
            ToolRegistry::discover(&ToolOverrides::default()),
            PipelineOptions::default(),
        )
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Write a copy of `source` with generated chapters to `destination`.
    ///
    /// An existing destination is replaced. On error the destination is
    /// left untouched.
    pub async fn chapterize(&self, source: &Path, destination: &Path) -> Result<ChapterizeReport> {
        let ffmpeg = self.tools.require(FFMPEG)?.to_path_buf();
        let workspace = Workspace::for_destination(destination)?;

        tracing::info!("Calculating chapters for {:?}", source);

        let cancel = CancellationToken::new();
        let (handles, document) = self.launch(source, &cancel)?;

        let muxer_cmd = muxer_command(&ffmpeg, source, workspace.output());
        let muxer_name = muxer_cmd.program_name();
        let spawned = muxer_cmd
            .spawn()
            .and_then(|mut child| match child.stdin.take() {
                Some(stdin) => Ok((child, stdin)),
                None => Err(Error::Internal("muxer stdin is not piped".into())),
            });
        let (mut muxer, stdin) = match spawned {
            Ok(pair) => pair,
            Err(e) => {
                cancel.cancel();
                drop(document);
                let _ = handles.join().await;
                return Err(e);
            }
        };
        let muxer_stderr = collect_stderr(muxer.stderr.take());
        let sink = spawn_sink(stdin, document, cancel.clone());

        let run = supervise(handles, sink, &mut muxer, &muxer_name, muxer_stderr, &cancel);
        let (outcome, document_bytes) = self.bounded(run, &cancel).await?;

        let destination = workspace.finalize()?;
        tracing::info!(
            "Wrote {} chapters from {} keyframes to {:?}",
            outcome.chapters.len(),
            outcome.keyframes,
            destination
        );

        Ok(ChapterizeReport {
            source: source.to_path_buf(),
            destination,
            keyframes: outcome.keyframes,
            boundaries: outcome.boundaries,
            chapters: outcome.chapters,
            document_bytes,
        })
    }

    /// Compute the chapter document for `source` without running the muxer.
    pub async fn plan(&self, source: &Path) -> Result<ChapterDocument> {
        let cancel = CancellationToken::new();
        let (handles, mut document) = self.launch(source, &cancel)?;

        // The builder keeps the chapters it emits; the rendered text is not
        // needed here.
        let drain = tokio::spawn(async move { while document.recv().await.is_some() {} });

        let run = async move {
            let (joined, _) = tokio::join!(handles.join(), drain);
            joined.outcome()
        };
        let outcome = self.bounded(run, &cancel).await?;

        Ok(ChapterDocument {
            chapters: outcome.chapters,
        })
    }

    /// Start the prober and the three in-process stages.
    fn launch(
        &self,
        source: &Path,
        cancel: &CancellationToken,
    ) -> Result<(StageHandles, mpsc::Receiver<String>)> {
        if !source.exists() {
            return Err(Error::FileNotFound {
                path: source.to_path_buf(),
            });
        }

        let ffprobe = self.tools.require(FFPROBE)?;
        let prober_cmd = prober_command(ffprobe, source);
        let prober = prober_cmd.spawn()?;

        let capacity = self.options.channel_capacity.max(1);
        let (chunk_tx, chunk_rx) = mpsc::channel(capacity);
        let (record_tx, record_rx) = mpsc::channel(capacity);
        let (boundary_tx, boundary_rx) = mpsc::channel(capacity);
        let (document_tx, document_rx) = mpsc::channel(capacity);

        let handles = StageHandles {
            source: spawn_source(prober, prober_cmd.program_name(), chunk_tx, cancel.clone()),
            parser: spawn_stage(FrameParser::new(), chunk_rx, record_tx, cancel.clone()),
            filter: spawn_stage(
                BoundaryFilter::new(self.options.min_spacing),
                record_rx,
                boundary_tx,
                cancel.clone(),
            ),
            builder: spawn_stage(
                ChapterBuilder::new(self.options.drop_zero_length_tail),
                boundary_rx,
                document_tx,
                cancel.clone(),
            ),
        };

        Ok((handles, document_rx))
    }

    /// Apply the configured timeout. On expiry everything is cancelled and
    /// awaited before returning, so no process outlives the call.
    async fn bounded<T, F>(&self, run: F, cancel: &CancellationToken) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let Some(limit) = self.options.timeout else {
            return run.await;
        };

        tokio::pin!(run);
        tokio::select! {
            result = &mut run => result,
            _ = tokio::time::sleep(limit) => {
                tracing::warn!("pipeline exceeded {limit:?}; cancelling");
                cancel.cancel();
                let _ = run.await;
                Err(Error::TimedOut(limit))
            }
        }
    }
}

/// Wait for all stages and the muxer, deciding which failure to report.
async fn supervise(
    handles: StageHandles,
    sink: JoinHandle<SinkOutcome<ChildStdin>>,
    muxer: &mut Child,
    muxer_name: &str,
    muxer_stderr: JoinHandle<String>,
    cancel: &CancellationToken,
) -> Result<(UpstreamOutcome, u64)> {
    let stages = async move { tokio::join!(handles.join(), join_sink(sink)) };
    tokio::pin!(stages);

    // Watch the muxer while the stages run. A muxer that exits before its
    // input is complete can no longer take the rest of the document.
    let mut exited: Option<ExitStatus> = None;
    let (joined, sink) = tokio::select! {
        joined = &mut stages => joined,
        status = muxer.wait() => {
            match status {
                Ok(status) => {
                    tracing::debug!("{muxer_name} exited early with {status}");
                    exited = Some(status);
                }
                Err(e) => tracing::warn!("failed to wait for {muxer_name}: {e}"),
            }
            cancel.cancel();
            stages.await
        }
    };
    let SinkOutcome {
        written: sink_result,
        held: held_stdin,
    } = sink;

    // An upstream failure explains everything else, including a muxer that
    // saw its input end early.
    let upstream = match joined.outcome() {
        Ok(outcome) => Some(outcome),
        Err(e) if e.is_root_cause() => {
            terminate(muxer, exited).await;
            drop(held_stdin);
            muxer_stderr.abort();
            return Err(e);
        }
        Err(_) => None,
    };

    let status = match (&sink_result, exited) {
        (_, Some(status)) => status,
        (Ok(_), None) => {
            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                status = muxer.wait() => Some(status?),
            };
            match status {
                Some(status) => status,
                None => {
                    terminate(muxer, None).await;
                    drop(held_stdin);
                    return Err(Error::Cancelled);
                }
            }
        }
        (Err(Error::Cancelled), None) => {
            // Cancelled from outside (timeout) while the muxer was healthy.
            terminate(muxer, None).await;
            drop(held_stdin);
            return Err(Error::Cancelled);
        }
        (Err(_), None) => match tokio::time::timeout(MUXER_GRACE, muxer.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                terminate(muxer, None).await;
                drop(held_stdin);
                return Err(Error::downstream(
                    muxer_name,
                    "stopped reading chapter metadata",
                    stderr_text(muxer_stderr).await,
                ));
            }
        },
    };

    let stderr = stderr_text(muxer_stderr).await;
    if !status.success() {
        return Err(Error::downstream(
            muxer_name,
            format!("exited with {status}"),
            stderr,
        ));
    }

    match (upstream, sink_result) {
        (Some(outcome), Ok(bytes)) => Ok((outcome, bytes)),
        _ => Err(Error::downstream(
            muxer_name,
            "exited before reading all chapter metadata",
            stderr,
        )),
    }
}

/// Kill a child unless it already exited, then reap it.
async fn terminate(child: &mut Child, exited: Option<ExitStatus>) {
    if exited.is_some() {
        return;
    }
    if let Err(e) = child.start_kill() {
        tracing::debug!("kill failed (process already gone?): {e}");
    }
    let _ = child.wait().await;
}

/// Read the prober's stdout into the pipeline, then check its exit status.
fn spawn_source(
    mut child: Child,
    tool: String,
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
) -> JoinHandle<Result<u64>> {
    tokio::spawn(async move {
        let stderr = collect_stderr(child.stderr.take());
        let result = pump_prober(&mut child, &tool, &tx, &cancel).await;

        let result = match result {
            Ok((_, status)) if !status.success() => Err(Error::UpstreamProcessFailed {
                tool,
                status,
                stderr: stderr_text(stderr).await,
            }),
            Ok((bytes_read, _)) => {
                stderr.abort();
                Ok(bytes_read)
            }
            Err(e) => {
                terminate(&mut child, None).await;
                stderr.abort();
                Err(e)
            }
        };

        if result.is_err() {
            cancel.cancel();
        }
        // Dropping the sender only now means the parser sees end of input
        // after the prober's exit status was checked.
        drop(tx);
        result
    })
}

/// Forward stdout chunks until EOF and wait for the process to exit.
async fn pump_prober(
    child: &mut Child,
    tool: &str,
    tx: &mpsc::Sender<Bytes>,
    cancel: &CancellationToken,
) -> Result<(u64, ExitStatus)> {
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Internal(format!("{tool} stdout is not piped")))?;
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut total = 0u64;

    loop {
        buf.reserve(READ_CHUNK);
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            read = stdout.read_buf(&mut buf) => read?,
        };
        if read == 0 {
            break;
        }
        total += read as u64;

        let chunk = buf.split().freeze();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            sent = tx.send(chunk) => sent.map_err(|_| Error::Cancelled)?,
        }
    }
    drop(stdout);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        status = child.wait() => Ok((total, status?)),
    }
}

/// What the sink task hands back to the coordinator.
struct SinkOutcome<W> {
    /// Bytes delivered to the writer.
    written: Result<u64>,
    /// The writer, still open, when the document was not delivered. The
    /// coordinator closes it only after the muxer is gone, so the muxer never
    /// sees a clean end of input on a failed run.
    held: Option<W>,
}

/// Collect the document and deliver it to `writer` once the builder closed
/// its output cleanly, then close the writer.
fn spawn_sink<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) -> JoinHandle<SinkOutcome<W>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        match write_document(&mut writer, &mut rx, &cancel).await {
            Ok(written) => SinkOutcome {
                written: Ok(written),
                held: None,
            },
            Err(e) => {
                if e.is_root_cause() {
                    tracing::debug!("chapter metadata write failed: {e}");
                }
                cancel.cancel();
                SinkOutcome {
                    written: Err(e),
                    held: Some(writer),
                }
            }
        }
    })
}

async fn write_document<W>(
    writer: &mut W,
    rx: &mut mpsc::Receiver<String>,
    cancel: &CancellationToken,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut document = BytesMut::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            chunk = rx.recv() => chunk,
        };
        let Some(chunk) = next else { break };
        document.extend_from_slice(chunk.as_bytes());
    }

    // A failing stage cancels before closing its output.
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        res = writer.write_all(&document) => res?,
    }
    writer.shutdown().await?;
    Ok(document.len() as u64)
}

async fn join_sink<W>(handle: JoinHandle<SinkOutcome<W>>) -> SinkOutcome<W> {
    handle.await.unwrap_or_else(|e| SinkOutcome {
        written: Err(Error::Internal(format!("sink task failed: {e}"))),
        held: None,
    })
}

/// Chapterize one file with tools found on `PATH` and default options.
pub async fn chapterize(source: &Path, destination: &Path) -> Result<ChapterizeReport> {
    Chapterizer::discover().chapterize(source, destination).await
}
