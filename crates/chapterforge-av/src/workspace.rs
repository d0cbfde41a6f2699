//! Staging area for muxer output.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::{Error, Result};

/// Temporary directory next to the destination into which the muxer writes.
///
/// Only [`finalize`](Workspace::finalize) moves the staged file to the
/// destination. Dropping the workspace discards whatever the muxer wrote, so
/// a failed run never leaves a destination file behind.
///
/// # Example
///
/// ```no_run
/// use chapterforge_av::Workspace;
///
/// let workspace = Workspace::for_destination("/library/out/movie.mkv")?;
/// // ... let the muxer write to workspace.output() ...
/// workspace.finalize()?;
/// # Ok::<(), chapterforge_av::Error>(())
/// ```
#[derive(Debug)]
pub struct Workspace {
    temp_dir: TempDir,
    output_path: PathBuf,
    destination: PathBuf,
}

impl Workspace {
    /// Create a staging directory in the destination's parent directory, so
    /// the final rename never crosses a filesystem.
    pub fn for_destination<P: AsRef<Path>>(destination: P) -> Result<Self> {
        let destination = destination.as_ref().to_path_buf();

        let file_name = destination
            .file_name()
            .ok_or_else(|| Error::InvalidInput(format!("invalid destination path: {destination:?}")))?;
        let parent = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let temp_dir = tempfile::Builder::new()
            .prefix(".chapterforge-")
            .tempdir_in(&parent)
            .map_err(|e| Error::Workspace(format!("cannot create staging dir in {parent:?}: {e}")))?;

        // Same file name so the muxer infers the container from it.
        let output_path = temp_dir.path().join(file_name);

        Ok(Self {
            temp_dir,
            output_path,
            destination,
        })
    }

    /// Where the muxer should write.
    pub fn output(&self) -> &Path {
        &self.output_path
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Move the staged output to the destination.
    pub fn finalize(self) -> Result<PathBuf> {
        if !self.output_path.exists() {
            return Err(Error::Workspace(format!(
                "output file does not exist: {:?}",
                self.output_path
            )));
        }

        std::fs::rename(&self.output_path, &self.destination).map_err(|e| {
            Error::Workspace(format!("failed to move output to destination: {e}"))
        })?;

        Ok(self.destination)
    }
}
