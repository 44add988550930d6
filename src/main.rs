use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt};

use seloger_watcher::config::{AppConfig, LoggingConfig};
use seloger_watcher::images::ImageStore;
use seloger_watcher::models::ProcessingStatus;
use seloger_watcher::plugins::classifiers::OpenAiClassifier;
use seloger_watcher::plugins::notifiers::TelegramNotifier;
use seloger_watcher::plugins::sources::{ScrapflyClient, SeLogerSource, seloger};
use seloger_watcher::{ListingStore, Pipeline, PipelineContext};

#[derive(Parser)]
#[command(name = "seloger-watcher")]
#[command(about = "Watch SeLoger for new listings and send the interesting ones to Telegram")]
struct Cli {
    /// Base configuration file, without extension
    #[arg(long, default_value = "config/default")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once (default)
    Run,

    /// Print how many listings are in each processing status
    Status,

    /// Print the search URL built from the configuration
    SearchUrl,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            let _guard = init_logging(&LoggingConfig::default());
            error!(error = %e, config = %cli.config, "Could not load configuration");
            return ExitCode::FAILURE;
        }
    };

    // Dropping the guard flushes buffered log lines
    let _guard = init_logging(&config.logging);

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config).await,
        Commands::Status => status(&config),
        Commands::SearchUrl => search_url(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = || {
        let filter = EnvFilter::from_default_env();
        match format!("seloger_watcher={}", logging.level).parse() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter.add_directive(LevelFilter::INFO.into()),
        }
    };

    let (file_layer, guard) = match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &logging.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(filter()))
        .with(file_layer)
        .init();
    guard
}

async fn run(config: &AppConfig) -> Result<()> {
    config.validate_credentials()?;
    info!("Starting SeLoger watcher run");

    let scrapfly = ScrapflyClient::new(&config.scraper)?;
    let source = SeLogerSource::new(scrapfly, &config.scraper.site_url, config.scraper.listings_per_page)?;
    let classifier = OpenAiClassifier::new(&config.classifier)?;
    let notifier = TelegramNotifier::new(&config.notifier)?;
    let images = if config.storage.max_images > 0 {
        Some(Arc::new(
            ImageStore::open(&config.storage).context("Failed to open the image index")?,
        ))
    } else {
        None
    };

    let store = ListingStore::open(&config.storage.state_file).context("Failed to open the listing store")?;
    info!(path = %store.path().display(), records = store.len(), "Listing store opened");

    let ctx = PipelineContext {
        source: Arc::new(source),
        classifier: Arc::new(classifier),
        notifier: Arc::new(notifier),
        images,
    };
    let pipeline = Pipeline::new(
        ctx,
        store,
        config.search.criteria(),
        config.search.params(),
        config.pipeline.max_concurrent_listings,
    );

    let summary = pipeline.run().await.context("Run aborted")?;
    info!(
        indexed = summary.indexed,
        new = summary.new,
        skipped = summary.skipped,
        details_failed = summary.details_failed,
        rejected = summary.rejected,
        irrelevant = summary.irrelevant,
        classify_failed = summary.classify_failed,
        notified = summary.notified,
        notify_failed = summary.notify_failed,
        "Run summary"
    );
    Ok(())
}

fn status(config: &AppConfig) -> Result<()> {
    let store = ListingStore::open(&config.storage.state_file).context("Failed to open the listing store")?;
    let counts = store.summary();

    println!("{}", store.path().display());
    for status in ProcessingStatus::ALL {
        println!("  {:<20} {}", status, counts.get(&status).copied().unwrap_or(0));
    }
    println!("  {:<20} {}", "total", store.len());
    Ok(())
}

fn search_url(config: &AppConfig) -> Result<()> {
    let url = seloger::search_url(&config.scraper.site_url, &config.search.params())?;
    println!("{}", url);
    Ok(())
}
