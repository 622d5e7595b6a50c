//! sidestage - acquire, unpack and catalog sideloaded application archives.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use sidestage::broadcast::{JobProgressBroadcaster, JobStatus};
use sidestage::config::{default_config, load_config, Config};
use sidestage::pipeline::{AcquireError, BroadcastProgress};
use sidestage::worker::SourceDescriptor;
use sidestage::{
    AcquisitionJob, CatalogRecord, HotFolderWatcher, JsonCatalog, Pipeline, PipelineConfig,
    SynchronousOrchestrator, Transport,
};

#[derive(Parser, Debug)]
#[command(name = "sidestage")]
#[command(about = "Acquire and prepare sideloaded application archives")]
#[command(version)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(short, long, env = "SIDESTAGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install a local archive or an https URL and wait for the result
    Install { source: String },

    /// Download an archive with live progress
    Fetch {
        url: String,
        /// Catalog id for the new entry (defaults to the job id)
        #[arg(long)]
        owner: Option<String>,
    },

    /// Import archives dropped into the hot folder until interrupted
    Watch,

    /// List catalog entries
    List,
}

struct App {
    config: Config,
    catalog: Arc<JsonCatalog>,
    pipeline: Arc<Pipeline>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    sidestage::logging::init(level, cli.json_logs).context("Failed to initialize logging")?;

    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => default_config().context("Failed to build default configuration")?,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let app = build_app(config, runtime.handle().clone())?;

    match cli.command {
        Command::Install { source } => install(&app, &source),
        Command::Fetch { url, owner } => runtime.block_on(fetch(&app, &url, owner)),
        Command::Watch => watch(&app),
        Command::List => list(&app),
    }
}

fn build_app(config: Config, runtime: tokio::runtime::Handle) -> Result<App> {
    let catalog_path = config
        .catalog_path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(&config.staging_root).with_file_name("catalog.json"));
    let catalog = Arc::new(JsonCatalog::new(catalog_path));

    let transport =
        Transport::new(&config.transfer, runtime).context("Failed to create HTTP transport")?;
    let pipeline = Pipeline::from_config(
        Arc::new(PipelineConfig::from_config(&config)),
        catalog.clone(),
    )
    .with_transport(Arc::new(transport));

    Ok(App {
        config,
        catalog,
        pipeline: Arc::new(pipeline),
    })
}

fn orchestrator(app: &App) -> SynchronousOrchestrator {
    SynchronousOrchestrator::new(app.pipeline.clone(), app.config.blocking_timeout())
}

fn is_remote(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    lower.starts_with("https://") || lower.starts_with("http://")
}

fn install(app: &App, source: &str) -> Result<()> {
    let job_id = uuid::Uuid::new_v4().to_string();
    let orchestrator = orchestrator(app);

    let result = if is_remote(source) {
        orchestrator.run_blocking_remote(source, &job_id)
    } else {
        let path = Path::new(source);
        if !path.is_file() {
            bail!("{} is not a file", path.display());
        }
        orchestrator.run_blocking(path, &job_id)
    };

    let record = result.map_err(explain)?;
    print_record(&record);
    Ok(())
}

async fn fetch(app: &App, url: &str, owner: Option<String>) -> Result<()> {
    let job_id = uuid::Uuid::new_v4().to_string();
    let owner = owner.unwrap_or_else(|| job_id.clone());
    let job = AcquisitionJob::with_id(job_id, owner, SourceDescriptor::Remote(url.to_string()));

    let cancel = job.cancel_token().clone();
    ctrlc::set_handler(move || cancel.cancel()).context("Failed to set Ctrl-C handler")?;

    let broadcaster = JobProgressBroadcaster::default();
    let mut events = broadcaster.subscribe();
    let progress = Arc::new(BroadcastProgress::from(
        broadcaster.start_job(&job.job_id, &job.owner_id),
    ));

    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event.fraction {
                Some(fraction) => eprint!("\r{} {:>5.1}%", event.phase, fraction * 100.0),
                None => eprintln!("\r{}", event.phase),
            }
            if event.status != JobStatus::Processing {
                break;
            }
        }
    });

    let outcome = app.pipeline.acquire(job, progress).await;
    let _ = printer.await;

    let record = outcome.into_result().map_err(explain)?;
    print_record(&record);
    Ok(())
}

fn watch(app: &App) -> Result<()> {
    let hot_folder = app
        .config
        .hot_folder
        .as_ref()
        .ok_or_else(|| anyhow!("No hot_folder configured"))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
        .context("Failed to set Ctrl-C handler")?;

    let watcher = HotFolderWatcher::from_config(
        hot_folder,
        app.config.layout.clone(),
        Arc::new(orchestrator(app)),
    );

    info!("Press Ctrl-C to stop");
    watcher
        .watch(shutdown)
        .context("Hot folder watcher failed")?;
    Ok(())
}

fn list(app: &App) -> Result<()> {
    let records = app.catalog.records().context("Failed to read catalog")?;
    if records.is_empty() {
        println!("Catalog is empty");
        return Ok(());
    }
    for record in &records {
        print_record(record);
    }
    Ok(())
}

/// Leads with the user-facing message and keeps the detailed error as its cause.
fn explain(err: AcquireError) -> anyhow::Error {
    let message = err.user_message();
    anyhow::Error::new(err).context(message)
}

fn print_record(record: &CatalogRecord) {
    println!(
        "{}  {} {}  {}  [{}]  {}",
        record.id,
        record.display_name,
        record.short_version,
        record.bundle_identifier,
        record.source,
        record.bundle_path.display()
    );
}
