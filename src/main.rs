mod cli;

use chapterforge::config::{self, Config};
use chapterforge::processor::{chapterize_file, BatchProcessor};
use chapterforge::scanner;
use chapterforge_av::{Chapterizer, ToolRegistry};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag.
    // Logs go to stderr so `plan` output stays clean.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "chapterforge=debug,chapterforge_av=trace".to_string()
        } else {
            "chapterforge=info,chapterforge_av=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            source,
            destination,
            min_spacing,
        } => {
            let config = load(cli.config.as_deref(), min_spacing)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_file(&config, &source, &destination))
        }
        Commands::Walk {
            source_dir,
            destination_dir,
            min_spacing,
            jobs,
        } => {
            let mut config = load(cli.config.as_deref(), min_spacing)?;
            if let Some(jobs) = jobs {
                config.scan.jobs = jobs;
            }
            config::validate_config(&config)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(walk(&config, &source_dir, &destination_dir))
        }
        Commands::Plan {
            source,
            min_spacing,
        } => {
            let config = load(cli.config.as_deref(), min_spacing)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(plan(&config, &source))
        }
        Commands::CheckTools { json } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            check_tools(&config, json)
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("chapterforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Load config and apply the command-line spacing override.
fn load(config_path: Option<&Path>, min_spacing: Option<u64>) -> Result<Config> {
    let mut config = config::load_config_or_default(config_path)?;
    if let Some(spacing) = min_spacing {
        config.chapters.min_spacing = spacing;
    }
    Ok(config)
}

fn chapterizer(config: &Config) -> Chapterizer {
    let tools = ToolRegistry::discover(&config.tools.overrides());
    Chapterizer::new(tools, config.pipeline_options())
}

async fn run_file(config: &Config, source: &Path, destination: &Path) -> Result<()> {
    if !source.exists() {
        anyhow::bail!("Input file does not exist: {:?}", source);
    }

    let report = chapterize_file(
        &chapterizer(config),
        source,
        destination,
        config.scan.preserve_timestamps,
    )
    .await?;

    println!(
        "Wrote {} chapters ({} keyframes) to {}",
        report.chapters.len(),
        report.keyframes,
        report.destination.display()
    );
    Ok(())
}

async fn walk(config: &Config, source_dir: &Path, destination_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(destination_dir)
        .with_context(|| format!("Failed to create destination {:?}", destination_dir))?;

    tracing::info!("source: {:?} destination: {:?}", source_dir, destination_dir);
    let entries = scanner::scan(source_dir, destination_dir, &config.scan.extensions)?;

    let processor = BatchProcessor::new(
        chapterizer(config),
        config.scan.preserve_timestamps,
        config.scan.jobs,
    );
    let summary = processor.run(&entries).await;

    println!(
        "Processed: {}, skipped: {}, failed: {}",
        summary.processed, summary.skipped, summary.failed
    );

    if summary.failed > 0 {
        anyhow::bail!("{} of {} files failed", summary.failed, summary.total());
    }
    Ok(())
}

async fn plan(config: &Config, source: &Path) -> Result<()> {
    let document = chapterizer(config)
        .plan(source)
        .await
        .with_context(|| format!("Failed to plan chapters for {:?}", source))?;
    print!("{document}");
    Ok(())
}

fn check_tools(config: &Config, json: bool) -> Result<()> {
    let tools = ToolRegistry::discover(&config.tools.overrides()).check_all();

    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    println!("Checking external tools...\n");
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install ffmpeg to use chapterforge.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, checking default locations");
            config::load_config_or_default(None)?
        }
    };

    println!("  Minimum chapter spacing: {}s", config.chapters.min_spacing);
    println!(
        "  Drop zero-length tail: {}",
        config.chapters.drop_zero_length_tail
    );
    println!("  Extensions: {}", config.scan.extensions.join(", "));
    println!("  Jobs: {}", config.scan.jobs);
    match config.tools.timeout_secs {
        Some(secs) => println!("  Timeout: {}s", secs),
        None => println!("  Timeout: none"),
    }

    Ok(())
}
