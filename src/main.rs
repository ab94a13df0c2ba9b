use anyhow::Context;
use clap::Parser;
use recast::config::{Direction, Job, Overrides};
use recast::Registry;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "recast", about = "Convert record files between binary, text and packed formats")]
struct Cli {
    /// Structure file describing both sides and the record schema
    file: PathBuf,

    /// Override the packed (input) file path
    #[arg(short = 'i', long)]
    game_file: Option<PathBuf>,
    /// Override the packed side's string-pool sidecar
    #[arg(long)]
    game_text: Option<PathBuf>,
    /// Byte offset of the first entry on the packed side
    #[arg(long)]
    game_offset: Option<u64>,
    /// Maximum entries read from the packed side (0 = all)
    #[arg(long)]
    game_count: Option<u64>,

    /// Override the user (output) file path
    #[arg(short = 'o', long)]
    user_file: Option<PathBuf>,
    #[arg(long)]
    user_text: Option<PathBuf>,
    #[arg(long)]
    user_offset: Option<u64>,
    #[arg(long)]
    user_count: Option<u64>,

    /// Pack: read the user file and write the packed file
    #[arg(short, long)]
    pack: bool,
    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let mut job = Job::load(&cli.file)
        .with_context(|| format!("loading structure file {}", cli.file.display()))?;

    job.input.apply(Overrides {
        path:        cli.game_file,
        text_path:   cli.game_text,
        offset:      cli.game_offset,
        entry_count: cli.game_count,
    });
    job.output.apply(Overrides {
        path:        cli.user_file,
        text_path:   cli.user_text,
        offset:      cli.user_offset,
        entry_count: cli.user_count,
    });

    let direction = if cli.pack { Direction::Pack } else { Direction::Unpack };
    let registry  = Registry::new();
    let entries   = recast::run(&job, &registry, direction)
        .with_context(|| format!("{direction:?} failed"))?;

    let (_, destination) = job.endpoints(direction);
    println!("Converted {entries} entries -> {}", destination.path.display());
    Ok(())
}
