//! # Cadre CLI
//!
//! Runs one provider strategy per invocation and prints the execution.
//!
//! ## Commands
//!
//! - `cadre run --prompt P [--provider ID] [--no-fallback]` - Run a strategy
//! - `cadre health` - Probe every registered provider
//! - `cadre providers` - List registered providers and factory types
//!
//! Strategy routing for `run`: a provider with `--no-fallback` runs
//! `single`, a provider alone runs `fallback`, no provider runs `all`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::info;

use cadre_core::{StrategyExecution, UsageRecord};
use cadre_runtime::{
    CallParams, DetachedTasks, HealthMonitor, ProviderCatalog, ProviderRegistry, RuntimeConfig,
    StrategyEngine,
};

/// How long pending usage writes get at exit.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Cadre - call text generation providers under a single, fallback or fan-out strategy
#[derive(Parser)]
#[command(name = "cadre")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true, env = "CADRE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "CADRE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a prompt through the providers
    Run(RunArgs),

    /// Probe every registered provider
    Health {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List registered providers and available provider types
    Providers,
}

#[derive(Args)]
struct RunArgs {
    /// Prompt text
    #[arg(short, long)]
    prompt: String,

    /// Preferred provider id; omit to fan out to all providers
    #[arg(long)]
    provider: Option<String>,

    /// Call only --provider, without falling back to the others
    #[arg(long, requires = "provider")]
    no_fallback: bool,

    /// Model override forwarded to the provider
    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long)]
    max_tokens: Option<u32>,

    /// Append one JSON usage record per request to this file
    #[arg(long, env = "CADRE_USAGE_LOG", value_name = "FILE")]
    usage_log: Option<PathBuf>,

    /// Print the full execution as JSON
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn call_params(&self) -> CallParams {
        let mut params = CallParams::new();
        params.model = self.model.clone();
        params.temperature = self.temperature;
        params.max_tokens = self.max_tokens;
        params
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded environment file");
    }

    let config = load_config(cli.config.as_deref())?;
    let catalog = ProviderCatalog::with_defaults();
    let registry = config
        .build_registry(&catalog)
        .context("Failed to build provider registry")?;

    match cli.command {
        Commands::Run(args) => run(&config, registry, args).await,
        Commands::Health { json } => health(&config, &registry, json).await,
        Commands::Providers => {
            providers(&registry, &catalog);
            Ok(())
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            info!("No config file given, using default providers");
            Ok(RuntimeConfig::default())
        }
    }
}

async fn run(config: &RuntimeConfig, registry: ProviderRegistry, args: RunArgs) -> Result<()> {
    if registry.is_empty() {
        println!(
            "No providers registered. Set OPENAI_API_KEY, ANTHROPIC_API_KEY or GEMINI_API_KEY, \
             or list providers in the config file."
        );
        return Ok(());
    }

    let engine = StrategyEngine::builder()
        .registry(registry)
        .config(config.engine.clone())
        .build();
    let params = args.call_params();

    let execution = match (&args.provider, args.no_fallback) {
        (Some(provider), true) => engine.single(provider, &args.prompt, &params).await?,
        (Some(provider), false) => engine.fallback(&args.prompt, provider, &params).await?,
        (None, _) => engine.all(&args.prompt, &params).await?,
    };

    let request_id = uuid::Uuid::new_v4().to_string();
    let record = UsageRecord::from_execution(&request_id, &execution);

    let tasks = DetachedTasks::new();
    if let Some(path) = args.usage_log.clone() {
        tasks.spawn("usage-log", append_usage(path, record));
    }

    if args.json {
        let body = json!({ "request_id": request_id, "execution": execution });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        print_execution(&request_id, &execution);
    }

    if !tasks.drain(DRAIN_TIMEOUT).await {
        eprintln!("warning: usage record may not have been written");
    }
    let stats = tasks.stats();
    if let Some(error) = stats.last_error {
        eprintln!("warning: failed to write usage record: {}", error);
    }

    Ok(())
}

async fn append_usage(path: PathBuf, record: UsageRecord) -> Result<()> {
    let mut line = serde_json::to_string(&record)?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

fn print_execution(request_id: &str, execution: &StrategyExecution) {
    println!(
        "strategy: {}  request: {}  elapsed: {}ms",
        execution.strategy(),
        request_id,
        execution.elapsed_ms()
    );

    for attempt in execution.attempts() {
        let latency = attempt
            .latency_ms
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "-".to_string());
        let detail = attempt
            .error
            .as_deref()
            .or(attempt.model.as_deref())
            .unwrap_or("");
        println!(
            "  #{:<2} {:<12} {:<16} {:>8}  {}",
            attempt.seq,
            attempt.provider,
            attempt.status.as_str(),
            latency,
            detail
        );
    }

    match execution.winner() {
        Some(winner) => {
            println!("winner: {}", winner.provider);
            println!();
            println!("{}", winner.text.as_deref().unwrap_or("(no text extracted)"));
        }
        None => println!("winner: none (every provider failed)"),
    }

    let totals = execution.totals();
    println!();
    println!(
        "tokens: {} in / {} out  cost: ${:.6}",
        totals.tokens_in, totals.tokens_out, totals.cost_usd
    );
}

async fn health(config: &RuntimeConfig, registry: &ProviderRegistry, json: bool) -> Result<()> {
    let monitor = HealthMonitor::new(&config.health);
    let reports = monitor.probe_all(registry).await;

    if json {
        let body = json!({
            "checked_at": chrono::Utc::now().to_rfc3339(),
            "providers": reports,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!("No providers registered.");
    }
    for report in &reports {
        println!(
            "{:<12} {:<15} configured={:<5} reachable={:<5} {}",
            report.provider,
            report.status.as_str(),
            report.configured,
            report.reachable,
            report.error.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn providers(registry: &ProviderRegistry, catalog: &ProviderCatalog) {
    println!("Registered (in order):");
    if registry.is_empty() {
        println!("  (none)");
    }
    for (position, (id, capability)) in registry.iter().enumerate() {
        println!(
            "  {}. {:<12} model={}",
            position + 1,
            id,
            capability.default_model().unwrap_or("-")
        );
    }

    println!("Available types:");
    for provider_type in catalog.available_types() {
        let description = catalog
            .get_factory(provider_type)
            .map(|f| f.description())
            .unwrap_or("");
        println!("  {:<12} {}", provider_type, description);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadre_core::Attempt;
    use cadre_runtime::{AttemptStatus, ProviderResult, StrategyKind};

    #[test]
    fn test_cli_parses_run_routing_flags() {
        let cli = Cli::try_parse_from([
            "cadre", "run", "--prompt", "hi", "--provider", "openai", "--no-fallback",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.provider.as_deref(), Some("openai"));
                assert!(args.no_fallback);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_no_fallback_requires_provider() {
        assert!(Cli::try_parse_from(["cadre", "run", "--prompt", "hi", "--no-fallback"]).is_err());
    }

    #[test]
    fn test_call_params_from_args() {
        let cli = Cli::try_parse_from([
            "cadre", "run", "-p", "hi", "--model", "gpt-4o", "--max-tokens", "10",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let params = args.call_params();
        assert_eq!(params.model.as_deref(), Some("gpt-4o"));
        assert_eq!(params.max_tokens, Some(10));
        assert_eq!(params.temperature, None);
    }

    #[tokio::test]
    async fn test_append_usage_writes_json_lines() {
        let path = std::env::temp_dir().join(format!("cadre-usage-{}.jsonl", uuid::Uuid::new_v4()));
        let winner = ProviderResult {
            text: Some("hi".into()),
            ..ProviderResult::empty("a", 5)
        };
        let execution = StrategyExecution::new(
            StrategyKind::Single,
            chrono::Utc::now(),
            5,
            Some(winner.clone()),
            vec![Attempt::succeeded(0, &winner, false)],
        );
        let record = UsageRecord::from_execution("req-1", &execution);

        append_usage(path.clone(), record.clone()).await.unwrap();
        append_usage(path.clone(), record).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: UsageRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.request_id, "req-1");
        assert_eq!(parsed.attempts[0].status, AttemptStatus::Ok);
        let _ = std::fs::remove_file(path);
    }
}
