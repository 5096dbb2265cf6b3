//! CLI command definitions, routing, and tracing setup.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use docpipe_core::{PipelineController, StageRunner};
use docpipe_remote::HttpProcessingService;
use docpipe_shared::{AppConfig, ClientConfig, PipelineError, RunSummary, init_config, load_config};
use tracing::{info, warn};

use crate::progress::CliPresentation;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docpipe: drive the API documentation harvesting pipeline.
#[derive(Parser)]
#[command(
    name = "docpipe",
    version,
    about = "Run the three-stage API documentation pipeline against a processing service.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Processing service base URL (overrides the config file).
    #[arg(long, env = "DOCPIPE_SERVICE_URL", global = true)]
    pub service_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the full pipeline for an API documentation URL.
    Run {
        /// API documentation URL to harvest.
        url: String,

        /// Directory to download the artifacts into (defaults to config `output_dir`).
        #[arg(short, long)]
        out: Option<String>,

        /// Skip downloading the artifacts after a successful run.
        #[arg(long)]
        no_download: bool,

        /// Re-run a failed pipeline from stage 1 up to this many times.
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },

    /// Show the processing service's current task status.
    Status,

    /// Reset the processing service's task state.
    Reset,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docpipe=info",
        1 => "docpipe=debug",
        _ => "docpipe=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let service_url = cli.service_url.as_deref();
    match cli.command {
        Command::Run {
            url,
            out,
            no_download,
            retries,
        } => cmd_run(&url, service_url, out.as_deref(), no_download, retries).await,
        Command::Status => cmd_status(service_url).await,
        Command::Reset => cmd_reset(service_url).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn build_service(config: &AppConfig, service_url: Option<&str>) -> Result<HttpProcessingService> {
    let client_config = ClientConfig::from_service(&config.service, service_url)?;
    Ok(HttpProcessingService::new(&client_config)?)
}

async fn cmd_run(
    url: &str,
    service_url: Option<&str>,
    out: Option<&str>,
    no_download: bool,
    retries: u32,
) -> Result<()> {
    let config = load_config()?;
    let service = Arc::new(build_service(&config, service_url)?);
    let presentation = Arc::new(CliPresentation::new());
    let controller = PipelineController::new(service.clone(), presentation.clone())
        .with_runner(StageRunner::new(config.pipeline.probe_progress));

    info!(url, service = %service.base_url(), "starting pipeline");

    let mut outcome = interruptible(&controller, controller.start(url)).await?;
    let mut remaining = retries;
    while let Err(err) = &outcome {
        if remaining == 0 || !is_retryable(err) {
            break;
        }
        remaining -= 1;
        warn!(error = %err, remaining, "pipeline failed, retrying from stage 1");
        presentation.note(&format!("retrying from stage 1 ({remaining} retries left)..."));

        outcome = match interruptible(&controller, controller.retry()).await? {
            Ok(Some(summary)) => Ok(summary),
            Ok(None) => break,
            Err(e) => Err(e),
        };
    }

    let summary = outcome.map_err(|e| eyre!("{}", e.user_message()))?;
    print_summary(&summary);

    if no_download {
        return Ok(());
    }

    let dest = PathBuf::from(out.unwrap_or(&config.pipeline.output_dir));
    for artifact in [
        &summary.artifacts.merged_dataset,
        &summary.artifacts.documents_archive,
    ] {
        let path = service.download(artifact, &dest).await?;
        println!("  Saved:  {}", path.display());
    }
    println!();

    Ok(())
}

/// Await `fut`, routing Ctrl-C through the controller's safety handler.
async fn interruptible<T>(
    controller: &PipelineController,
    fut: impl Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        result = fut => Ok(result),
        _ = tokio::signal::ctrl_c() => {
            controller.fail_unexpected("interrupted by user");
            Err(eyre!("interrupted"))
        }
    }
}

/// Stage and safety-boundary failures can be re-driven; rejected input cannot.
fn is_retryable(err: &PipelineError) -> bool {
    matches!(err, PipelineError::Stage { .. } | PipelineError::Unknown { .. })
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("  Pipeline completed successfully!");
    println!("  Run:        {}", summary.run_id);
    println!("  Files:      {}", summary.result.total_files);
    println!("  API files:  {}", summary.result.api_files);
    println!("  Doc files:  {}", summary.result.doc_files);
    println!("  Merged:     {}", summary.merge.merged_files);
    println!("  Dataset:    {}", summary.artifacts.merged_dataset);
    println!("  Archive:    {}", summary.artifacts.documents_archive);
    println!("  Time:       {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

async fn cmd_status(service_url: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let service = build_service(&config, service_url)?;
    let status = service.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn cmd_reset(service_url: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let service = build_service(&config, service_url)?;
    service.reset().await?;
    println!("Service task state reset.");
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
