//! Integration tests for the chapterize pipeline.
//!
//! ffprobe and ffmpeg are replaced by small shell scripts so that every
//! failure mode can be provoked deterministically.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chapterforge_av::{ChapterDefinition, Chapterizer, Error, PipelineOptions, ToolRegistry};
use serial_test::serial;
use tempfile::TempDir;

/// Generous upper bound for runs that must not hang.
const DEADLINE: Duration = Duration::from_secs(20);

/// Muxer that copies its stdin to the output path (its last argument).
const COPYING_MUXER: &str = r#"for last; do :; done
cat > "$last""#;

struct Fixture {
    dir: TempDir,
    source: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        std::fs::write(&source, b"not really a video").unwrap();
        Self { dir, source }
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn destination(&self) -> PathBuf {
        self.dir.path().join("out").join("movie.mkv")
    }

    fn chapterizer(&self, prober: &str, muxer: &str, options: PipelineOptions) -> Chapterizer {
        std::fs::create_dir_all(self.dir.path().join("out")).unwrap();
        let ffprobe = self.script("fake-ffprobe", prober);
        let ffmpeg = self.script("fake-ffmpeg", muxer);
        Chapterizer::new(ToolRegistry::with_paths(ffprobe, ffmpeg), options)
    }

    /// Staging directories left beside the destination.
    fn leftovers(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("out"))
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(".chapterforge-")
            })
            .count()
    }
}

/// A prober script printing one keyframe block per timestamp.
fn prober_printing(timestamps: &[&str]) -> String {
    let mut body = String::from("cat <<'EOF'\n");
    for (i, ts) in timestamps.iter().enumerate() {
        body.push_str(&format!(
            "[FRAME]\nkey_frame=1\npts_time={ts}\npkt_pos={}\n[/FRAME]\n",
            i * 4096
        ));
    }
    body.push_str("EOF");
    body
}

async fn within_deadline<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(DEADLINE, fut)
        .await
        .expect("pipeline did not finish in time")
}

fn assert_missing(path: &Path) {
    assert!(!path.exists(), "{path:?} should not exist");
}

#[tokio::test]
#[serial]
async fn writes_chapters_to_destination() {
    let fx = Fixture::new();
    let prober = prober_printing(&["0.000000", "50.5", "200.2", "260.0", "500.9"]);
    let chapterizer = fx.chapterizer(&prober, COPYING_MUXER, PipelineOptions::default());

    let report = within_deadline(chapterizer.chapterize(&fx.source, &fx.destination()))
        .await
        .unwrap();

    assert_eq!(report.keyframes, 5);
    assert_eq!(report.boundaries, 3);
    assert_eq!(
        report.chapters,
        vec![
            ChapterDefinition::numbered(1, 0, 200),
            ChapterDefinition::numbered(2, 200, 500),
        ]
    );

    let written = std::fs::read_to_string(fx.destination()).unwrap();
    assert_eq!(
        written,
        ";FFMETADATA1\n\
         [CHAPTER]\nTIMEBASE=1/1\nSTART=0\nEND=200\ntitle=Chapter 1\n\
         [CHAPTER]\nTIMEBASE=1/1\nSTART=200\nEND=500\ntitle=Chapter 2\n"
    );
    assert_eq!(report.document_bytes, written.len() as u64);
    assert_eq!(fx.leftovers(), 0);
}

#[tokio::test]
#[serial]
async fn replaces_existing_destination() {
    let fx = Fixture::new();
    let prober = prober_printing(&["0", "181", "362"]);
    let chapterizer = fx.chapterizer(&prober, COPYING_MUXER, PipelineOptions::default());
    std::fs::write(fx.destination(), b"stale").unwrap();

    within_deadline(chapterizer.chapterize(&fx.source, &fx.destination()))
        .await
        .unwrap();

    let written = std::fs::read_to_string(fx.destination()).unwrap();
    assert!(written.starts_with(";FFMETADATA1\n"));
    assert!(written.contains("title=Chapter 2\n"));
}

#[tokio::test]
#[serial]
async fn malformed_record_stops_a_waiting_muxer() {
    let fx = Fixture::new();
    let prober = "printf '[FRAME]\\nkey_frame=1\\npts_time=abc\\npkt_pos=0\\n[/FRAME]\\n'\nexec sleep 30";
    let chapterizer = fx.chapterizer(prober, "exec sleep 30", PipelineOptions::default());

    let err = within_deadline(chapterizer.chapterize(&fx.source, &fx.destination()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MalformedRecord(_)), "got {err:?}");
    assert_missing(&fx.destination());
    assert_eq!(fx.leftovers(), 0);
}

#[tokio::test]
#[serial]
async fn muxer_never_sees_a_partial_document() {
    let fx = Fixture::new();
    let mut prober = prober_printing(&["0", "200"]);
    prober.push_str("\nprintf '[FRAME]\\nkey_frame=1\\npts_time=abc\\npkt_pos=0\\n[/FRAME]\\n'\nexec sleep 30");
    let seen = fx.dir.path().join("seen.txt");
    let muxer = format!(
        "cat > '{0}'\necho EOF_SEEN >> '{0}'",
        seen.display()
    );
    let chapterizer = fx.chapterizer(&prober, &muxer, PipelineOptions::default());

    let err = within_deadline(chapterizer.chapterize(&fx.source, &fx.destination()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedRecord(_)), "got {err:?}");

    // Give an orphaned `cat` a moment to notice its closed input.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let received = std::fs::read_to_string(&seen).unwrap_or_default();
    assert_eq!(received, "", "muxer received {received:?}");
    assert_missing(&fx.destination());
}

#[tokio::test]
#[serial]
async fn failing_prober_is_upstream_failure() {
    let fx = Fixture::new();
    let chapterizer = fx.chapterizer(
        "echo 'moov atom not found' >&2\nexit 1",
        COPYING_MUXER,
        PipelineOptions::default(),
    );

    let err = within_deadline(chapterizer.chapterize(&fx.source, &fx.destination()))
        .await
        .unwrap_err();

    match err {
        Error::UpstreamProcessFailed { status, stderr, .. } => {
            assert_eq!(status.code(), Some(1));
            assert!(stderr.contains("moov atom not found"));
        }
        other => panic!("expected UpstreamProcessFailed, got {other:?}"),
    }
    assert_missing(&fx.destination());
}

#[tokio::test]
#[serial]
async fn failing_muxer_is_downstream_failure() {
    let fx = Fixture::new();
    let prober = prober_printing(&["0", "200", "400"]);
    let muxer = "cat > /dev/null\necho 'Invalid data found' >&2\nexit 3";
    let chapterizer = fx.chapterizer(&prober, muxer, PipelineOptions::default());

    let err = within_deadline(chapterizer.chapterize(&fx.source, &fx.destination()))
        .await
        .unwrap_err();

    match err {
        Error::DownstreamProcessFailed { reason, stderr, .. } => {
            assert!(reason.contains('3'), "reason: {reason}");
            assert!(stderr.contains("Invalid data found"));
        }
        other => panic!("expected DownstreamProcessFailed, got {other:?}"),
    }
    assert_missing(&fx.destination());
}

#[tokio::test]
#[serial]
async fn early_muxer_exit_does_not_wait_for_prober() {
    let fx = Fixture::new();
    let prober = "printf '[FRAME]\\nkey_frame=1\\npts_time=0\\npkt_pos=0\\n[/FRAME]\\n'\nexec sleep 30";
    let muxer = "echo 'broken' >&2\nexit 1";
    let chapterizer = fx.chapterizer(prober, muxer, PipelineOptions::default());

    let err = within_deadline(chapterizer.chapterize(&fx.source, &fx.destination()))
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::DownstreamProcessFailed { .. }),
        "got {err:?}"
    );
    assert_missing(&fx.destination());
}

#[tokio::test]
#[serial]
async fn single_keyframe_is_insufficient() {
    let fx = Fixture::new();
    let prober = prober_printing(&["0"]);
    let chapterizer = fx.chapterizer(&prober, COPYING_MUXER, PipelineOptions::default());

    let err = within_deadline(chapterizer.chapterize(&fx.source, &fx.destination()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InsufficientBoundaries { found: 1 }), "got {err:?}");
    assert_missing(&fx.destination());
}

#[tokio::test]
#[serial]
async fn no_keyframes_is_empty_stream() {
    let fx = Fixture::new();
    let chapterizer = fx.chapterizer("exit 0", COPYING_MUXER, PipelineOptions::default());

    let err = within_deadline(chapterizer.chapterize(&fx.source, &fx.destination()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::EmptyKeyframeStream), "got {err:?}");
    assert_missing(&fx.destination());
}

#[tokio::test]
#[serial]
async fn timeout_cancels_the_run() {
    let fx = Fixture::new();
    let options = PipelineOptions {
        timeout: Some(Duration::from_millis(300)),
        ..PipelineOptions::default()
    };
    let chapterizer = fx.chapterizer("exec sleep 30", COPYING_MUXER, options);

    let err = within_deadline(chapterizer.chapterize(&fx.source, &fx.destination()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TimedOut(_)), "got {err:?}");
    assert_missing(&fx.destination());
}

#[tokio::test]
#[serial]
async fn plan_returns_document_without_muxing() {
    let fx = Fixture::new();
    let prober = prober_printing(&["0", "200", "250"]);
    let chapterizer = fx.chapterizer(&prober, "exit 99", PipelineOptions::default());

    let doc = within_deadline(chapterizer.plan(&fx.source)).await.unwrap();

    // The last keyframe closes a short final chapter.
    assert_eq!(
        doc.chapters,
        vec![
            ChapterDefinition::numbered(1, 0, 200),
            ChapterDefinition::numbered(2, 200, 250),
        ]
    );
    assert_missing(&fx.destination());
}

#[tokio::test]
#[serial]
async fn plan_honours_min_spacing() {
    let fx = Fixture::new();
    let prober = prober_printing(&["0", "20", "40", "60"]);
    let options = PipelineOptions {
        min_spacing: 10,
        ..PipelineOptions::default()
    };
    let chapterizer = fx.chapterizer(&prober, "exit 0", options);

    let doc = within_deadline(chapterizer.plan(&fx.source)).await.unwrap();
    assert_eq!(doc.chapters.len(), 3);
    assert_eq!(doc.chapters[2].end, 60);
}

#[tokio::test]
#[serial]
async fn missing_source_file() {
    let fx = Fixture::new();
    let chapterizer = fx.chapterizer("exit 0", COPYING_MUXER, PipelineOptions::default());

    let err = chapterizer
        .chapterize(Path::new("/nonexistent/movie.mkv"), &fx.destination())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FileNotFound { .. }));
}
