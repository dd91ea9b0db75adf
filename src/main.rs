//! Command-line front end: match transcripts against a dictionary export and
//! print the decision as JSON.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use cmdmatch::{EngineConfig, MatchEngine, Transcript};

#[derive(Parser)]
#[command(name = "cmdmatch", about = "Fuzzy-match spoken transcripts against user commands")]
struct Cli {
    /// Dictionary export (JSON).
    #[arg(long)]
    dictionary: PathBuf,

    /// Engine config (JSON). Defaults apply when the file is absent.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Comma-separated algorithm ids, e.g. `exact_suffix,levenshtein`.
    #[arg(long, value_delimiter = ',')]
    algorithms: Option<Vec<String>>,

    /// Recognizer confidence applied to every transcript.
    #[arg(long, default_value_t = 1.0)]
    confidence: f32,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    /// Recognizer alternatives, best first.
    #[arg(required = true)]
    transcripts: Vec<String>,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cmdmatch=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = EngineConfig::load(&cli.config)?;
    let engine = Arc::new(MatchEngine::new(config)?);
    if let Some(ids) = &cli.algorithms {
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        engine.configure_algorithms(Some(ids.as_slice()))?;
    }
    info!(algorithms = ?engine.active_algorithms(), "algorithms active");

    let dictionary = engine.load_dictionary_file(&cli.dictionary)?;
    let transcripts: Vec<Transcript> = cli
        .transcripts
        .iter()
        .map(|text| Transcript::new(text.as_str(), cli.confidence))
        .collect();

    let result = engine.match_transcripts(transcripts, &dictionary).await;
    engine.shutdown_async().await;
    let decision = result?;

    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}
