mod aggregate;
mod config;
mod error;
mod extract;
mod filter;
mod geocode;
mod gutenberg;
mod output;
mod parser;
mod pipeline;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::{DEFAULT_GUTENBERG_URL, DEFAULT_MODEL, DEFAULT_USER_AGENT, RunConfig};
use error::{Error, Result};
use extract::JsonFileExtractor;
use geocode::NominatimClient;
use pipeline::{RunMeta, RunReport};

#[derive(Parser)]
#[command(
    name = "play_geo",
    about = "Map the real-world settlements named in a Shakespeare play"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Full pipeline: text → mentions → geocode → outputs/<play-id>_*.csv
    Run(RunArgs),
    /// Print the per-line structural index of a play file as JSON
    Index {
        /// Plain-text play
        play: PathBuf,
    },
    /// Strip Project Gutenberg header, footer and front matter
    Strip {
        /// Raw Gutenberg ebook text
        input: PathBuf,
        /// Write here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, default_value = "romeo_juliet")]
    play_id: String,
    #[arg(long, default_value = "Romeo and Juliet")]
    title: String,
    #[arg(long, default_value = DEFAULT_GUTENBERG_URL)]
    gutenberg_url: String,
    /// Use this local text instead of downloading
    #[arg(long)]
    play_file: Option<PathBuf>,
    /// Extraction model output (JSON array or {"extractions": [...]})
    #[arg(long)]
    extractions: PathBuf,
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    user_agent: String,
    #[arg(long, env = "NOMINATIM_EMAIL")]
    nominatim_email: Option<String>,
    #[arg(long, default_value = "outputs")]
    output_dir: PathBuf,
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
    /// Delay after each Nominatim request
    #[arg(long, default_value_t = 1000)]
    pause_ms: u64,
}

impl From<RunArgs> for RunConfig {
    fn from(args: RunArgs) -> Self {
        Self {
            play_id: args.play_id,
            title: args.title,
            gutenberg_url: args.gutenberg_url,
            play_file: args.play_file,
            extractions: args.extractions,
            model: args.model,
            user_agent: args.user_agent,
            nominatim_email: args.nominatim_email,
            output_dir: args.output_dir,
            data_dir: args.data_dir,
            pause: Duration::from_millis(args.pause_ms),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("play_geo=info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(args) => run_play(args.into()),
        Command::Index { play } => run_index(&play),
        Command::Strip { input, output } => run_strip(&input, output.as_deref()),
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  RUN MODE
// ═══════════════════════════════════════════════════════════════════════

fn run_play(config: RunConfig) -> Result<()> {
    config.validate()?;

    let run_id = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    let meta = RunMeta::from_config(&config, &run_id);
    info!(play = %config.play_id, run_id = %run_id, "starting run");

    let text = pipeline::load_play_text(&config)?;
    let extractor = JsonFileExtractor::new(&config.extractions);
    let geocoder = NominatimClient::new(&config.user_agent, config.nominatim_email.clone())?;

    let report = pipeline::run_on_text(&config, &meta, &text, &extractor, &geocoder)?;
    print_summary(&report);
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!("Mentions:   {}", report.mentions_csv.display());
    println!("Rejections: {}", report.rejections_csv.display());
    println!("Places:     {}", report.places_csv.display());
    println!("Map:        {}", report.map_json.display());
    println!(
        "{} mentions: {} kept, {} rejected, {} mappable, {} distinct places",
        report.mentions.len(),
        report.kept(),
        report.rejected(),
        report.spatial(),
        report.places.len()
    );
    println!(
        "Center of gravity: {:.4}, {:.4}",
        report.center.0, report.center.1
    );
}

// ═══════════════════════════════════════════════════════════════════════
//  INDEX / STRIP MODES
// ═══════════════════════════════════════════════════════════════════════

fn run_index(play: &Path) -> Result<()> {
    let text = fs::read_to_string(play).map_err(|e| Error::io(play, e))?;
    let contexts = parser::index_text_lines(&text);
    let json = serde_json::to_string_pretty(&contexts).map_err(|e| Error::json(play, e))?;
    println!("{json}");

    let dialogue = contexts.iter().filter(|c| c.is_dialogue).count();
    info!(lines = contexts.len(), dialogue, "indexed");
    Ok(())
}

fn run_strip(input: &Path, output: Option<&Path>) -> Result<()> {
    let raw = fs::read_to_string(input).map_err(|e| Error::io(input, e))?;
    let text = gutenberg::strip_gutenberg_header_footer(&raw);
    match output {
        Some(path) => {
            fs::write(path, &text).map_err(|e| Error::io(path, e))?;
            info!(path = %path.display(), bytes = text.len(), "wrote stripped text");
        }
        None => println!("{text}"),
    }
    Ok(())
}
