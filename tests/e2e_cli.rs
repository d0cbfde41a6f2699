//! CLI end-to-end tests
//!
//! Tests for the chapterforge command-line interface. Commands that need
//! ffprobe/ffmpeg get shell-script stand-ins through a config file.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the chapterforge binary
#[allow(deprecated)]
fn chapterforge_cmd() -> Command {
    let mut cmd = Command::cargo_bin("chapterforge").unwrap();
    cmd.env_remove("CHAPTER_LENGTH").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_no_args_shows_help() {
    chapterforge_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    chapterforge_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("chapterforge"))
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_flag() {
    chapterforge_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("chapterforge"));
}

#[test]
fn test_cli_version_command() {
    chapterforge_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_check_tools_command() {
    chapterforge_cmd()
        .arg("check-tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("ffprobe"))
        .stdout(predicate::str::contains("ffmpeg"));
}

#[test]
fn test_cli_check_tools_json() {
    chapterforge_cmd()
        .args(["check-tools", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\": \"ffprobe\""))
        .stdout(predicate::str::contains("\"available\""));
}

#[test]
fn test_cli_walk_help() {
    chapterforge_cmd()
        .args(["walk", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--jobs"))
        .stdout(predicate::str::contains("--min-spacing"));
}

#[test]
fn test_cli_run_requires_destination() {
    chapterforge_cmd()
        .args(["run", "movie.mkv"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("DESTINATION"));
}

#[test]
fn test_cli_run_missing_input() {
    let dir = tempdir().unwrap();
    chapterforge_cmd()
        .args(["run", "/nonexistent/movie.mkv"])
        .arg(dir.path().join("out.mkv"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_cli_validate_valid_config() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    fs::write(&config_path, "[chapters]\nmin_spacing = 240\n").unwrap();

    chapterforge_cmd()
        .arg("validate")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"))
        .stdout(predicate::str::contains("240s"));
}

#[test]
fn test_cli_validate_rejects_zero_jobs() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    fs::write(&config_path, "[scan]\njobs = 0\n").unwrap();

    chapterforge_cmd()
        .arg("validate")
        .arg(&config_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("jobs"));
}

#[test]
fn test_cli_walk_rejects_zero_jobs_flag() {
    let dir = tempdir().unwrap();
    chapterforge_cmd()
        .arg("walk")
        .arg(dir.path())
        .arg(dir.path().join("out"))
        .args(["--jobs", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("jobs"));
}

#[cfg(unix)]
mod with_fake_tools {
    use super::*;
    use filetime::FileTime;
    use std::os::unix::fs::PermissionsExt;

    const FRAMES: &str = "\
[FRAME]
key_frame=1
pts_time=0.000000
pkt_pos=48
[/FRAME]
[FRAME]
key_frame=1
pts_time=100.100000
pkt_pos=1000
[/FRAME]
[FRAME]
key_frame=1
pts_time=200.200000
pkt_pos=2000
[/FRAME]
[FRAME]
key_frame=1
pts_time=400.400000
pkt_pos=4000
[/FRAME]
";

    /// Config file pointing at fake tools inside `dir`.
    fn setup(dir: &Path) -> PathBuf {
        let frames = dir.join("frames.txt");
        fs::write(&frames, FRAMES).unwrap();

        let ffprobe = script(dir, "ffprobe", &format!("cat '{}'", frames.display()));
        let ffmpeg = script(dir, "ffmpeg", "for last; do :; done\ncat > \"$last\"");

        let config = dir.join("chapterforge.toml");
        fs::write(
            &config,
            format!(
                "[tools]\nffprobe_path = \"{}\"\nffmpeg_path = \"{}\"\n",
                ffprobe.display(),
                ffmpeg.display()
            ),
        )
        .unwrap();
        config
    }

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_cli_plan_prints_document() {
        let dir = tempdir().unwrap();
        let config = setup(dir.path());
        let source = dir.path().join("movie.mkv");
        fs::write(&source, b"").unwrap();

        chapterforge_cmd()
            .arg("--config")
            .arg(&config)
            .arg("plan")
            .arg(&source)
            .assert()
            .success()
            .stdout(predicate::str::starts_with(";FFMETADATA1\n"))
            .stdout(predicate::str::contains("START=0\nEND=200\ntitle=Chapter 1\n"))
            .stdout(predicate::str::contains("START=200\nEND=400\ntitle=Chapter 2\n"));
    }

    #[test]
    fn test_cli_plan_min_spacing_flag() {
        let dir = tempdir().unwrap();
        let config = setup(dir.path());
        let source = dir.path().join("movie.mkv");
        fs::write(&source, b"").unwrap();

        chapterforge_cmd()
            .arg("--config")
            .arg(&config)
            .args(["plan", "--min-spacing", "50"])
            .arg(&source)
            .assert()
            .success()
            .stdout(predicate::str::contains("title=Chapter 3\n"));
    }

    #[test]
    fn test_cli_plan_chapter_length_env() {
        let dir = tempdir().unwrap();
        let config = setup(dir.path());
        let source = dir.path().join("movie.mkv");
        fs::write(&source, b"").unwrap();

        chapterforge_cmd()
            .env("CHAPTER_LENGTH", "50")
            .arg("--config")
            .arg(&config)
            .arg("plan")
            .arg(&source)
            .assert()
            .success()
            .stdout(predicate::str::contains("title=Chapter 3\n"));
    }

    #[test]
    fn test_cli_run_writes_destination() {
        let dir = tempdir().unwrap();
        let config = setup(dir.path());
        let source = dir.path().join("movie.mkv");
        fs::write(&source, b"").unwrap();
        let destination = dir.path().join("out/nested/movie.mkv");

        chapterforge_cmd()
            .arg("--config")
            .arg(&config)
            .arg("run")
            .arg(&source)
            .arg(&destination)
            .assert()
            .success()
            .stdout(predicate::str::contains("Wrote 2 chapters"));

        let written = fs::read_to_string(&destination).unwrap();
        assert!(written.starts_with(";FFMETADATA1\n"));
    }

    #[test]
    fn test_cli_walk_mirrors_tree_and_skips_existing() {
        let dir = tempdir().unwrap();
        let config = setup(dir.path());
        let source_dir = dir.path().join("library");
        let dest_dir = dir.path().join("chaptered");
        fs::create_dir_all(source_dir.join("show/season1")).unwrap();
        fs::create_dir_all(dest_dir.join("show/season1")).unwrap();

        let episode = source_dir.join("show/season1/e01.MKV");
        fs::write(&episode, b"").unwrap();
        fs::write(source_dir.join("show/season1/e02.mp4"), b"").unwrap();
        fs::write(source_dir.join("show/notes.txt"), b"").unwrap();
        fs::write(dest_dir.join("show/season1/e02.mp4"), b"already done").unwrap();

        let old = FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_times(&episode, old, old).unwrap();

        chapterforge_cmd()
            .arg("--config")
            .arg(&config)
            .arg("walk")
            .arg(&source_dir)
            .arg(&dest_dir)
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "Processed: 1, skipped: 1, failed: 0",
            ));

        let output = dest_dir.join("show/season1/e01.MKV");
        assert!(fs::read_to_string(&output).unwrap().contains("[CHAPTER]"));
        let meta = fs::metadata(&output).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), old);
        assert_eq!(
            fs::read(dest_dir.join("show/season1/e02.mp4")).unwrap(),
            b"already done"
        );
        assert!(!dest_dir.join("show/notes.txt").exists());
    }

    #[test]
    fn test_cli_walk_reports_failures_and_continues() {
        let dir = tempdir().unwrap();
        let config = setup(dir.path());
        // Make the muxer fail for every file.
        script(dir.path(), "ffmpeg", "cat > /dev/null\necho 'muxing failed' >&2\nexit 1");

        let source_dir = dir.path().join("library");
        fs::create_dir_all(&source_dir).unwrap();
        fs::write(source_dir.join("a.mkv"), b"").unwrap();
        fs::write(source_dir.join("b.mkv"), b"").unwrap();
        let dest_dir = dir.path().join("chaptered");

        chapterforge_cmd()
            .arg("--config")
            .arg(&config)
            .arg("walk")
            .arg(&source_dir)
            .arg(&dest_dir)
            .assert()
            .failure()
            .stdout(predicate::str::contains(
                "Processed: 0, skipped: 0, failed: 2",
            ))
            .stderr(predicate::str::contains("muxing failed"));

        assert!(!dest_dir.join("a.mkv").exists());
        assert!(!dest_dir.join("b.mkv").exists());
    }
}
