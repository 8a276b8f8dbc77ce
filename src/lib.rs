pub mod aggregate;
pub mod audio;
pub mod cache;
pub mod config;
mod console;
pub mod evaluation;
pub mod orchestrator;
pub mod recording;
pub mod scoring;
pub mod session;
pub mod stt;
pub mod submission;
pub mod timer;

use audio::{MicrophoneSource, SourceError};
use cache::ClipCache;
use config::{AppConfig, ConfigError};
use evaluation::EvaluationPipeline;
use orchestrator::FailoverOrchestrator;
use scoring::{LanguageScorer, ScorerChain};
use session::paper::PaperError;
use session::{SessionController, SessionDeps, SessionError, TestPaper};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stt::SpeechAssessor;
use submission::SubmissionGateway;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage:
  speaking-test <paper.json> [--resume <session-id>]
  speaking-test devices";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Usage(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not load test paper: {0}")]
    Paper(#[from] PaperError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Audio devices unavailable: {0}")]
    Devices(#[from] SourceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Devices,
    Run {
        paper: PathBuf,
        resume: Option<String>,
    },
}

fn parse_args<I: Iterator<Item = String>>(mut args: I) -> Result<Command, AppError> {
    let first = args.next().ok_or_else(|| AppError::Usage(USAGE.to_string()))?;
    if first == "devices" {
        if let Some(extra) = args.next() {
            return Err(AppError::Usage(format!("Unexpected argument '{}' after 'devices'", extra)));
        }
        return Ok(Command::Devices);
    }
    if first.starts_with('-') {
        return Err(AppError::Usage(USAGE.to_string()));
    }

    let mut resume = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--resume" | "-r" => {
                let id = args
                    .next()
                    .ok_or_else(|| AppError::Usage("--resume requires a session id".to_string()))?;
                resume = Some(id);
            }
            other => return Err(AppError::Usage(format!("Unknown option '{}'\n{}", other, USAGE))),
        }
    }

    Ok(Command::Run {
        paper: PathBuf::from(first),
        resume,
    })
}

/// Wires the configured providers and stores into a controller.
fn session_deps(config: &AppConfig, home: &Path) -> SessionDeps {
    let assessor: Arc<dyn SpeechAssessor> = Arc::new(FailoverOrchestrator::from_config(config));
    let scorer: Arc<dyn LanguageScorer> = Arc::new(ScorerChain::from_config(config));
    let pipeline = EvaluationPipeline::new(assessor, scorer, config.proficiency_level.clone());

    SessionDeps {
        source: Box::new(MicrophoneSource::new(config.input_device_name.clone())),
        pipeline: Arc::new(pipeline),
        gateway: Arc::new(SubmissionGateway::new(submission::store_from_config(config, home))),
        cache: Arc::new(ClipCache::new(config.cache_root(home))),
        timing: config.timing.clone(),
    }
}

async fn run_session(paper_path: &Path, resume: Option<String>) -> Result<(), AppError> {
    let home = config::home_dir();
    let mut config = config::load_or_create(&config::config_path(&home))?;
    config.apply_env_overrides();
    tracing::info!("Config: {}", config.summary());

    let paper = TestPaper::load(paper_path)?;
    let deps = session_deps(&config, &home);

    let controller = match resume {
        Some(session_id) => SessionController::open(&paper, deps, &session_id).await?,
        None => {
            let mut controller = SessionController::new(&paper, deps)?;
            controller.start().await?;
            controller
        }
    };

    console::drive(controller, &paper).await
}

fn list_devices() -> Result<(), AppError> {
    let devices = audio::list_input_devices()?;
    if devices.is_empty() {
        println!("No input devices found");
    }
    for device in devices {
        println!("{}", device);
    }
    Ok(())
}

pub fn run() {
    // Load environment variables from .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let outcome = parse_args(std::env::args().skip(1)).and_then(|command| match command {
        Command::Devices => list_devices(),
        Command::Run { paper, resume } => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(AppError::from)
            .and_then(|runtime| runtime.block_on(run_session(&paper, resume))),
    });

    if let Err(e) = outcome {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
