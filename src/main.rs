//! surface-gen - submit point clouds to the surface generator and follow the job.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use surface_gen_client::api::LoggingMode;
use surface_gen_client::{
    ApiClient, AppError, ClientSettings, GridSpacing, JobOrchestrator, OutputFormat,
    PreviewSnapshot, ProcessingConfig, ResultView,
};

#[derive(Parser)]
#[command(name = "surface-gen")]
#[command(about = "Generate ground surfaces from LAS/LAZ point clouds")]
#[command(version)]
struct Cli {
    /// Service base URL
    #[arg(long, env = "SURFACE_GEN_API_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Include redacted query strings in request logs
    #[arg(long, global = true)]
    log_queries: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files, wait for processing, and print the results
    Process {
        /// .las or .laz input files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Grid spacing in feet (25 or 50)
        #[arg(long, default_value = "25", value_parser = parse_grid_spacing)]
        grid_spacing: GridSpacing,

        /// Breakline detection threshold
        #[arg(long, default_value_t = 0.1)]
        threshold: f64,

        #[arg(long)]
        source_epsg: Option<u32>,

        #[arg(long)]
        target_epsg: Option<u32>,

        /// Comma-separated output formats (dxf, csv)
        #[arg(long, value_delimiter = ',', default_value = "dxf")]
        formats: Vec<OutputFormat>,

        /// Merge all inputs into one surface
        #[arg(long)]
        merge: bool,

        /// File name for the merged output
        #[arg(long, requires = "merge")]
        merged_name: Option<String>,

        /// Keep every nth point
        #[arg(long)]
        nth_point: Option<u32>,

        /// Download result files into this directory
        #[arg(long)]
        download_dir: Option<PathBuf>,
    },
    /// Print the current status of a job
    Status { job_id: String },
}

fn parse_grid_spacing(raw: &str) -> Result<GridSpacing, AppError> {
    let feet: u32 = raw
        .trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("'{}' is not a number", raw)))?;
    GridSpacing::try_from(feet)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let presentation = e.to_presentation();
            error!("{}", e);
            eprintln!("{}: {}", presentation.title, presentation.message);
            if let Some(action) = presentation.action {
                eprintln!("  {}", action);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let mut settings = ClientSettings::from_env()?;
    if let Some(base_url) = cli.base_url.as_deref() {
        settings = settings.with_base_url(base_url)?;
    }
    let logging_mode = if cli.log_queries {
        LoggingMode::PathAndQueryRedacted
    } else {
        LoggingMode::PathOnly
    };
    let client = ApiClient::new(&settings)?.with_logging_mode(logging_mode);
    info!("Using service at {}", client.base_url());

    match cli.command {
        Commands::Status { job_id } => {
            let status = client.get_job_status(&job_id).await?;
            println!("Job:      {}", status.job_id);
            println!("Status:   {}", status.status);
            if let Some(progress) = status.progress_percent() {
                println!("Progress: {}%", progress);
            }
            if let Some(message) = status.error_message {
                println!("Error:    {}", message);
            }
            Ok(())
        }
        Commands::Process {
            files,
            grid_spacing,
            threshold,
            source_epsg,
            target_epsg,
            formats,
            merge,
            merged_name,
            nth_point,
            download_dir,
        } => {
            let config = ProcessingConfig {
                grid_spacing,
                threshold,
                nth_point,
                source_epsg,
                target_epsg,
                output_formats: formats,
                merge_outputs: merge,
                merged_output_name: merged_name,
            };
            process(client, settings, &files, &config, download_dir).await
        }
    }
}

async fn process(
    client: ApiClient,
    settings: ClientSettings,
    files: &[PathBuf],
    config: &ProcessingConfig,
    download_dir: Option<PathBuf>,
) -> Result<(), AppError> {
    let orchestrator = JobOrchestrator::new(client.clone(), settings);
    let cancel = CancellationToken::new();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mut progress = orchestrator.subscribe();
    let reporter = tokio::spawn(async move {
        let mut last = String::new();
        while progress.changed().await.is_ok() {
            let label = progress.borrow_and_update().status_label();
            if label != last {
                eprintln!("{}", label);
                last = label;
            }
        }
    });

    let job_id = orchestrator.submit(files, config, &cancel).await?;
    info!("Job {} submitted", job_id);

    let view = tokio::select! {
        view = orchestrator.wait_until_settled() => view,
        _ = cancel.cancelled() => {
            orchestrator.stop();
            orchestrator.view()
        }
    };
    drop(orchestrator);
    reporter.abort();

    print_view(&view);

    if let Some(failure) = view.job.as_ref().and_then(|job| job.failure()) {
        return Err(failure);
    }
    if view.stopped {
        return Err(AppError::Cancelled);
    }

    if let (Some(dir), Some(results)) = (download_dir, view.results.as_ref()) {
        let entries = results
            .downloads
            .iter()
            .map(|d| (d.name.as_str(), d.url.as_str()));
        let saved = client.download_all(entries, &dir).await?;
        for path in saved {
            println!("Saved {}", path.display());
        }
    }

    Ok(())
}

fn print_view(view: &ResultView) {
    println!("Status: {}", view.status_label());

    let Some(results) = view.results.as_ref() else {
        return;
    };

    println!("Points processed: {}", results.total_points);
    for file in &results.files {
        println!("  {}: {} points", file.name, file.points);
    }
    if let PreviewSnapshot::Single(preview) = &results.preview {
        if let Some(stats) = &preview.elevation_stats {
            println!(
                "Elevation: min {:.2}, max {:.2}, mean {:.2}",
                stats.min, stats.max, stats.mean
            );
        }
    }
    if let Some(notice) = &results.notice {
        println!("{}", notice.message);
    }

    if !results.downloads.is_empty() {
        match &results.downloads_expire_at {
            Some(expires) => println!("Downloads (expire {}):", expires),
            None => println!("Downloads:"),
        }
        for entry in &results.downloads {
            println!("  {}", entry.name);
        }
    }
}
