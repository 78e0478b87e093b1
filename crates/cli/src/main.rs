mod config_commands;
mod gateway;

use std::time::Duration;

use {
    clap::{Parser, Subcommand},
    parley_metrics::{MetricsRecorderConfig, init_metrics},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "parley", about = "Parley: per-session run coordination for chat agents")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Custom config directory (overrides default ~/.config/parley/).
    #[arg(long, global = true, env = "PARLEY_CONFIG_DIR")]
    config_dir: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read `session<TAB>message` lines from stdin and answer with a simulated agent
    /// (default when no subcommand is provided).
    Run {
        /// Delay between streamed words of the simulated agent, in milliseconds.
        #[arg(long, default_value_t = 150)]
        latency_ms: u64,
        /// Print Prometheus metrics on exit.
        #[arg(long, default_value_t = false)]
        print_metrics: bool,
        /// Agent id used for the default session key (overrides config value).
        #[arg(long)]
        agent_id: Option<String>,
    },
    /// Show how a message's `/queue` directives are parsed.
    Directives {
        /// Message text, e.g. "/queue collect debounce:2s hello".
        text: String,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_directives(text: &str) -> anyhow::Result<()> {
    let parsed = parley_auto_reply::parse_directives(text);
    let report = serde_json::json!({
        "recognized": parsed.recognized,
        "directiveOnly": parsed.is_directive_only(),
        "reset": parsed.reset,
        "overrides": parsed.overrides,
        "cleaned": parsed.cleaned,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    if let Some(ref dir) = cli.config_dir {
        parley_config::set_config_dir(dir.clone());
    }

    match cli.command {
        None => run(150, false, None).await,
        Some(Commands::Run {
            latency_ms,
            print_metrics,
            agent_id,
        }) => run(latency_ms, print_metrics, agent_id).await,
        Some(Commands::Directives { text }) => print_directives(&text),
        Some(Commands::Config { action }) => config_commands::handle_config(action),
    }
}

async fn run(latency_ms: u64, print_metrics: bool, agent_id: Option<String>) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "parley starting");

    let mut config = parley_config::discover_and_load();
    parley_config::apply_env_overrides(&mut config);
    if let Some(id) = agent_id {
        config.agent.id = id;
    }

    let metrics = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: config
            .metrics
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    })?;

    gateway::run(config, Duration::from_millis(latency_ms)).await?;

    if print_metrics {
        print!("{}", metrics.render());
    }
    Ok(())
}
