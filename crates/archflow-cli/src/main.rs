use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use archflow_contracts::classify::{classify_html, classify_message};
use archflow_contracts::credentials::KeyPool;
use archflow_contracts::events::EventWriter;
use archflow_contracts::media::{AspectRatio, ResolutionTier, UpscaleJob};
use archflow_contracts::runs::jobs::FileJobTable;
use archflow_contracts::runs::ledger::{CreditLedger, FileCreditLedger};
use archflow_contracts::JobError;
use archflow_engine::{
    GenerationSession, ImageOrder, InputImage, LocalObjectStore, MediaJobClient, SessionOutcome,
    VideoOrder, MAX_BATCH_SIZE,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "archflow", version, about = "Archflow media job client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Upscale(UpscaleArgs),
    Video(VideoArgs),
    Classify(ClassifyArgs),
    Credits(CreditsArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    prompt: String,
    #[arg(long = "image")]
    images: Vec<PathBuf>,
    #[arg(long, default_value = "square")]
    ratio: String,
    #[arg(long, default_value = "standard")]
    tier: String,
    #[arg(long, default_value_t = 1, value_parser = parse_count)]
    count: u32,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, default_value = "local")]
    user: String,
    #[arg(long, default_value = "archflow-out")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct UpscaleArgs {
    #[arg(long)]
    media_id: String,
    #[arg(long)]
    project_id: Option<String>,
    #[arg(long, default_value = "4k")]
    tier: String,
    #[arg(long, default_value = "archflow-out")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct VideoArgs {
    prompt: String,
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long, default_value = "landscape")]
    ratio: String,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, default_value = "local")]
    user: String,
    #[arg(long, default_value = "archflow-out")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ClassifyArgs {
    text: String,
    #[arg(long)]
    status: Option<u16>,
}

#[derive(Debug, Parser)]
struct CreditsArgs {
    #[command(subcommand)]
    action: CreditsAction,
    #[arg(long, default_value = "archflow-out", global = true)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum CreditsAction {
    Show {
        #[arg(long, default_value = "local")]
        user: String,
    },
    Grant {
        amount: u64,
        #[arg(long, default_value = "local")]
        user: String,
    },
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("archflow error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Upscale(args) => run_upscale(args),
        Command::Video(args) => run_video(args),
        Command::Classify(args) => run_classify(args),
        Command::Credits(args) => run_credits(args),
    }
}

fn build_client(out: &Path, events: Option<PathBuf>) -> Result<MediaJobClient> {
    let events_path = events.unwrap_or_else(|| out.join("events.jsonl"));
    let writer = EventWriter::new(events_path, Uuid::new_v4().to_string());
    let client = MediaJobClient::from_env(Arc::new(KeyPool::from_env()))?.with_events(writer);
    Ok(client)
}

fn ledger_at(out: &Path) -> FileCreditLedger {
    FileCreditLedger::new(out.join("ledger.json"))
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let aspect_ratio = parse_ratio(&args.ratio)?;
    let tier = ResolutionTier::parse(&args.tier)
        .ok_or_else(|| anyhow!("unknown tier '{}' (standard, 1k, 2k, 4k)", args.tier))?;
    let client = build_client(&args.out, args.events.clone())?;
    let ledger = ledger_at(&args.out);
    let jobs = FileJobTable::new(args.out.join("jobs.json"));
    let store = LocalObjectStore::new(args.out.join("media"))?;
    let session = GenerationSession::new(&client, &ledger, &jobs, &store)
        .with_receipts_dir(args.out.join("receipts"));

    let order = ImageOrder {
        user: args.user,
        prompt: args.prompt,
        images: args.images.into_iter().map(InputImage::Path).collect(),
        aspect_ratio,
        tier,
        count: args.count,
        model: args.model,
    };
    let outcome = session.run_images(&order, |url| println!("stored {url}"))?;
    Ok(report(&outcome))
}

fn run_upscale(args: UpscaleArgs) -> Result<i32> {
    let target = ResolutionTier::parse(&args.tier)
        .filter(|tier| tier.requires_upscale())
        .ok_or_else(|| anyhow!("upscale tier must be 2k or 4k, got '{}'", args.tier))?;
    let client = build_client(&args.out, args.events.clone())?;
    let job = UpscaleJob {
        media_id: args.media_id,
        project_id: args.project_id,
        target,
    };
    match client.upscale(&job) {
        Ok(url) => {
            println!("{url}");
            Ok(0)
        }
        Err(err) => {
            let err = JobError::upscale(err);
            eprintln!("{}: {err}", err.code());
            Ok(1)
        }
    }
}

fn run_video(args: VideoArgs) -> Result<i32> {
    let aspect_ratio = parse_ratio(&args.ratio)?;
    let client = build_client(&args.out, args.events.clone())?;
    let ledger = ledger_at(&args.out);
    let jobs = FileJobTable::new(args.out.join("jobs.json"));
    let store = LocalObjectStore::new(args.out.join("media"))?;
    let session = GenerationSession::new(&client, &ledger, &jobs, &store)
        .with_receipts_dir(args.out.join("receipts"));

    let outcome = session.run_video(&VideoOrder {
        user: args.user,
        prompt: args.prompt,
        start_image: args.image.map(InputImage::Path),
        aspect_ratio,
        model: args.model,
    })?;
    for url in &outcome.stored_urls {
        println!("stored {url}");
    }
    Ok(report(&outcome))
}

fn run_classify(args: ClassifyArgs) -> Result<i32> {
    let error = match args.status {
        Some(status) => match classify_html(status, &args.text) {
            Some(category) => JobError::categorized(category, args.text.clone()),
            None => JobError::from_http_failure(status, &args.text),
        },
        None => JobError::from_remote_text(&args.text),
    };
    let payload = json!({
        "code": error.code(),
        "category": classify_message(&args.text).map(|category| category.code()),
        "message": error.to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(0)
}

fn run_credits(args: CreditsArgs) -> Result<i32> {
    let ledger = ledger_at(&args.out);
    match args.action {
        CreditsAction::Show { user } => {
            let balance = ledger
                .balance(&user)
                .with_context(|| format!("failed reading balance for {user}"))?;
            println!("{user}: {balance}");
        }
        CreditsAction::Grant { amount, user } => {
            let balance = ledger.grant(&user, amount)?;
            println!("{user}: {balance}");
        }
    }
    Ok(0)
}

fn parse_count(raw: &str) -> Result<u32, String> {
    let count: u32 = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{raw}' is not a whole number"))?;
    if (1..=MAX_BATCH_SIZE).contains(&count) {
        Ok(count)
    } else {
        Err(format!("count must be between 1 and {MAX_BATCH_SIZE}"))
    }
}

fn parse_ratio(raw: &str) -> Result<AspectRatio> {
    AspectRatio::parse(raw)
        .ok_or_else(|| anyhow!("unknown aspect ratio '{raw}' (square, landscape, portrait)"))
}

fn report(outcome: &SessionOutcome) -> i32 {
    println!(
        "job {} model {} charged {}",
        outcome.job_id, outcome.model, outcome.charged
    );
    if let Some(reason) = &outcome.fallback_reason {
        println!("model fallback: {reason}");
    }
    for failure in &outcome.failures {
        eprintln!("failed {failure}");
    }
    if let Some(path) = &outcome.receipt_path {
        println!("receipt {}", path.display());
    }
    match &outcome.error {
        Some(message) => {
            eprintln!("{message}");
            if outcome.refunded {
                eprintln!("Đã hoàn lại {} tín dụng.", outcome.charged);
            }
            1
        }
        None => 0,
    }
}
