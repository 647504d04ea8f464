//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use aibridge_codec::{PromptLibrary, PromptSource};
use aibridge_core::{
    Pipeline, PipelineConfig, PipelineEvent, PipelineRunner, ProgressReporter, RunState,
};
use aibridge_providers::{
    AutomaticProvider, FileRelayChannel, ManualRelayProvider, RelayHandle, TransformProvider,
};
use aibridge_shared::{
    AppConfig, DEFAULT_PROMPT_TEMPLATE, config_dir, init_config, load_config, load_config_from,
};
use aibridge_storage::{
    IdRange, ProgressStore, WorkItemStore, detect_language, output_path_for, progress,
};

use crate::progress::CliProgress;

/// Provider name that selects the human relay instead of a configured API.
const MANUAL_PROVIDER: &str = "manual";

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// AIBridge: resumable batch translation through AI providers.
#[derive(Parser)]
#[command(
    name = "aibridge",
    version,
    about = "Translate tabular text in resumable batches through AI providers.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.aibridge/aibridge.toml.
    #[arg(long, global = true, env = "AIBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

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
    /// Translate a source file, resuming from its checkpoint.
    Run(RunArgs),

    /// Show how much of a source file is already translated.
    Status {
        /// Source CSV with `id` and `text` columns.
        input: PathBuf,

        /// Checkpoint file (defaults to the derived output path).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Prompt type used to derive the default output path.
        #[arg(long)]
        prompt_type: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments of `aibridge run`.
#[derive(clap::Args, Debug)]
pub(crate) struct RunArgs {
    /// Source CSV with `id` and `text` columns.
    pub input: PathBuf,

    /// Checkpoint/output file (defaults to <output_dir>/<LANG>/<stem>_<type>_translated.csv).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Configured provider name, or `manual` for the human relay.
    #[arg(short, long, default_value = "gemini")]
    pub provider: String,

    /// Rows per provider call.
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Lowest id to process (inclusive).
    #[arg(long)]
    pub start_id: Option<String>,

    /// Highest id to process (inclusive).
    #[arg(long)]
    pub stop_id: Option<String>,

    /// Prompt type (a `[prompts.<type>]` table).
    #[arg(long)]
    pub prompt_type: Option<String>,

    /// Pause between batches, in milliseconds.
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Exchange directory for the manual relay.
    #[arg(long)]
    pub relay_dir: Option<PathBuf>,
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
        0 => "aibridge=info",
        1 => "aibridge=debug",
        _ => "aibridge=trace",
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
    match cli.command {
        Command::Run(args) => {
            let config = resolve_config(cli.config.as_deref())?;
            cmd_run(&config, args).await
        }
        Command::Status {
            input,
            output,
            prompt_type,
        } => {
            let config = resolve_config(cli.config.as_deref())?;
            cmd_status(&config, &input, output, prompt_type)
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Everything `run` needs, after flags are layered over config.
#[derive(Debug)]
struct RunSettings {
    pipeline: PipelineConfig,
    prompt_type: String,
    language: &'static str,
}

fn resolve_run_settings(config: &AppConfig, args: &RunArgs) -> Result<RunSettings> {
    let prompt_type = args
        .prompt_type
        .clone()
        .unwrap_or_else(|| config.defaults.prompt_type.clone());
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| output_path_for(&args.input, &prompt_type, &config.output_dir()));
    let language = detect_language(&args.input).unwrap_or("Other");

    let template = match PromptLibrary::from_config(config).template(language, &prompt_type) {
        Some(template) => template,
        None => {
            warn!(
                language,
                prompt_type = %prompt_type,
                "no prompt configured, using the built-in template"
            );
            DEFAULT_PROMPT_TEMPLATE.to_string()
        }
    };

    let pipeline = PipelineConfig {
        input: args.input.clone(),
        output,
        range: IdRange::from_bounds(args.start_id.as_deref(), args.stop_id.as_deref()),
        batch_size: args.batch_size.unwrap_or(config.defaults.batch_size),
        batch_delay: Duration::from_millis(
            args.delay_ms.unwrap_or(config.defaults.batch_delay_ms),
        ),
        template,
    };

    Ok(RunSettings {
        pipeline,
        prompt_type,
        language,
    })
}

/// Build the provider named on the command line.
fn build_provider(
    config: &AppConfig,
    args: &RunArgs,
) -> Result<(Arc<dyn TransformProvider>, Option<(RelayHandle, FileRelayChannel)>)> {
    if args.provider == MANUAL_PROVIDER {
        let dir = match &args.relay_dir {
            Some(dir) => dir.clone(),
            None => config_dir()?.join("relay"),
        };
        let channel = FileRelayChannel::new(dir);
        let relay = ManualRelayProvider::new(Arc::new(channel.clone()));
        let handle = relay.handle();
        return Ok((Arc::new(relay), Some((handle, channel))));
    }

    let provider_config = config.provider(&args.provider)?;
    let timeout = Duration::from_secs(config.defaults.request_timeout_secs);
    let provider = AutomaticProvider::new(&provider_config, timeout)?;
    Ok((Arc::new(provider), None))
}

async fn cmd_run(config: &AppConfig, args: RunArgs) -> Result<()> {
    let settings = resolve_run_settings(config, &args)?;
    let (provider, relay) = build_provider(config, &args)?;

    info!(
        input = %settings.pipeline.input.display(),
        output = %settings.pipeline.output.display(),
        provider = provider.name(),
        language = settings.language,
        prompt_type = %settings.prompt_type,
        batch_size = settings.pipeline.batch_size,
        "starting run"
    );
    let output = settings.pipeline.output.clone();

    let runner = PipelineRunner::new(Pipeline::new(
        settings.pipeline,
        WorkItemStore::default(),
        provider,
    ));
    let mut events = runner
        .take_events()
        .ok_or_else(|| eyre!("pipeline event stream unavailable"))?;

    let reporter = CliProgress::new();
    if let Some((handle, _)) = &relay {
        spawn_operator_input(handle.clone());
    }

    runner.start();

    let mut interrupted = false;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    PipelineEvent::StateChanged(state) => reporter.state_changed(&state),
                    PipelineEvent::CheckpointLoaded { processed, total } => {
                        reporter.checkpoint_loaded(processed, total);
                    }
                    PipelineEvent::BatchStarted(batch) => {
                        reporter.batch_started(&batch);
                        if let Some((_, channel)) = &relay {
                            reporter.log(&format!(
                                "batch {}: prompt written to {}. Save the answer as {} and press \
                                 Enter (type 'cancel' to abort).",
                                batch.number,
                                channel.prompt_path().display(),
                                channel.response_path().display(),
                            ));
                        }
                    }
                    PipelineEvent::BatchFinished(report) => reporter.batch_finished(&report),
                    PipelineEvent::Log(message) => reporter.log(&message),
                    PipelineEvent::Finished(_) => break,
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                reporter.log("stop requested, finishing the current batch");
                runner.stop();
                if let Some((handle, _)) = &relay {
                    handle.cancel();
                }
            }
        }
    }

    let summary = runner
        .join()
        .await
        .ok_or_else(|| eyre!("pipeline was not started"))?;
    reporter.finish();

    println!();
    println!("  State:     {}", summary.state.name());
    println!("  Batches:   {}", summary.batches);
    println!("  Completed: {}", summary.completed);
    println!("  Failed:    {}", summary.failed);
    println!("  Progress:  {}/{}", summary.processed, summary.total);
    println!("  Output:    {}", output.display());
    println!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    match summary.state {
        RunState::Failed(reason) => Err(eyre!("run failed: {reason}")),
        _ => Ok(()),
    }
}

/// Read operator commands from stdin: Enter means the response is saved,
/// `cancel` abandons the exchange.
fn spawn_operator_input(handle: RelayHandle) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match line.trim() {
                "cancel" | "c" => handle.cancel(),
                _ => handle.response_ready(),
            }
        }
    });
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

fn cmd_status(
    config: &AppConfig,
    input: &Path,
    output: Option<PathBuf>,
    prompt_type: Option<String>,
) -> Result<()> {
    let prompt_type = prompt_type.unwrap_or_else(|| config.defaults.prompt_type.clone());
    let output =
        output.unwrap_or_else(|| output_path_for(input, &prompt_type, &config.output_dir()));

    let items = WorkItemStore::default().load(input)?;
    let checkpoint = ProgressStore::new(&output).load();
    let (processed, total) = progress(&checkpoint, &items);
    let failed = items
        .iter()
        .filter(|item| checkpoint.get(item.id).is_some_and(|r| !r.is_completed()))
        .count();

    let percent = if total == 0 {
        100.0
    } else {
        processed as f64 * 100.0 / total as f64
    };

    println!();
    println!("  Source:    {}", input.display());
    println!("  Output:    {}", output.display());
    println!("  Progress:  {processed}/{total} ({percent:.1}%)");
    println!("  Failed:    {failed}");
    println!("  Pending:   {}", total - processed);
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config).wrap_err("failed to render config")?;
    println!("{toml_str}");
    Ok(())
}
