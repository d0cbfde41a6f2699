use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chapterforge")]
#[command(author, version, about = "Add keyframe-aligned chapters to video files")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a copy of one file with chapters added
    Run {
        /// Source video file
        #[arg(required = true)]
        source: PathBuf,

        /// Output file (replaced if it exists)
        #[arg(required = true)]
        destination: PathBuf,

        /// Minimum seconds between chapter starts
        #[arg(long)]
        min_spacing: Option<u64>,
    },

    /// Chapterize every matching file below a directory
    Walk {
        /// Directory to search for source files
        #[arg(required = true)]
        source_dir: PathBuf,

        /// Directory receiving the outputs, mirroring the source layout
        #[arg(required = true)]
        destination_dir: PathBuf,

        /// Minimum seconds between chapter starts
        #[arg(long)]
        min_spacing: Option<u64>,

        /// Number of files processed concurrently
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Print the chapter document for a file without writing anything
    Plan {
        /// Source video file
        #[arg(required = true)]
        source: PathBuf,

        /// Minimum seconds between chapter starts
        #[arg(long)]
        min_spacing: Option<u64>,
    },

    /// Check that required external tools are available
    CheckTools {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
