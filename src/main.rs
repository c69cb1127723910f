mod ai;
mod attachments;
mod auth;
mod config;
mod documents;
mod error;
mod export;
mod extract;
mod mail;
mod materialize;
mod models;
mod normalize;
mod paths;
mod pipeline;
mod planner;
mod prompt;
mod remote;
mod state;
mod store;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ai::{create_provider, resolve_model};
use attachments::{DriveLinkFetcher, LinkedDocumentFetcher};
use auth::{ClientCredentials, GRAPH_SCOPE};
use config::{Config, Destination};
use documents::CommandDocumentReader;
use mail::GraphMailBackend;
use pipeline::{Collaborators, Pipeline};
use prompt::ConsoleOperator;
use remote::{RemoteStore, SharePointStore};

#[derive(Parser)]
#[command(name = "intake")]
#[command(about = "Turn applicant email threads into a deduplicated applicant folder tree and sync it")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "INTAKE_CONFIG")]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Process and store locally without uploading
    #[arg(long)]
    no_sync: bool,

    /// Process at most this many threads
    #[arg(long)]
    max_threads: Option<usize>,
}

fn main() {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref());
    let configured_level = config.as_ref().ok().and_then(|c| c.log_level.clone());
    init_tracing(cli.verbose, configured_level.as_deref());

    let result = config
        .map_err(anyhow::Error::from)
        .and_then(|config| run(&cli, config));
    if let Err(err) = result {
        error!(error = %err, "intake failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8, configured: Option<&str>) {
    let level = match verbose {
        0 => configured.unwrap_or("info"),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli, mut config: Config) -> Result<()> {
    if let Some(max) = cli.max_threads {
        config.mail.max_threads = Some(max);
    }
    if cli.no_sync {
        info!("upload disabled for this run");
        config.sync.destinations.clear();
    }

    let auth = ClientCredentials::new(config.credentials.clone())?;
    let token = auth
        .token(GRAPH_SCOPE)
        .context("Failed to authenticate to the mail backend")?;
    let mail = GraphMailBackend::new(config.mail.group_id.clone(), token)?;

    let spec = resolve_model(&config.model.name)?;
    let model = create_provider(&spec, config.model.temperature)?;
    info!(model = %spec.short_name, "using model");

    let reader = CommandDocumentReader::new(
        config.documents.pdf_command.clone(),
        config.documents.docx_command.clone(),
    );
    for command in reader.missing_commands() {
        warn!(command, "document converter not found, resume text from these documents will be unavailable");
    }
    let drive = DriveLinkFetcher::new();
    let links: Option<&dyn LinkedDocumentFetcher> = if config.documents.follow_drive_links {
        Some(&drive)
    } else {
        None
    };

    let credentials = config.credentials.clone();
    let remotes = move |destination: &Destination| -> Result<Box<dyn RemoteStore>> {
        let store = SharePointStore::new(&destination.site_url, credentials.clone())?;
        Ok(Box::new(store))
    };

    let mut operator = ConsoleOperator::new(Duration::from_secs(config.prompt.timeout_secs))?;
    let base = std::env::current_dir().context("Failed to read the working directory")?;

    let pipeline = Pipeline::new(
        &config,
        base,
        Collaborators {
            mail: &mail,
            model: model.as_ref(),
            reader: &reader,
            links,
            remotes: &remotes,
        },
    );
    let summary = pipeline.run(&mut operator)?;

    match summary.synced {
        Some(true) => info!("all destinations synced"),
        Some(false) => warn!("sync incomplete, modified folders will be retried next run"),
        None if !summary.stopped => info!("sync skipped"),
        None => {}
    }
    Ok(())
}
