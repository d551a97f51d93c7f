use clap::{Parser, Subcommand};
use switcher_core::SwitcherConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
use commands::{
    handle_config_command, run_request, show_status,
    utils::{print_error, CliResult},
    ChannelView, ConfigCommands, RequestTarget,
};

#[derive(Parser)]
#[command(name = "switcher-cli")]
#[command(about = "Switcher CLI - Query and inspect API mirrors with automatic failover")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (defaults to $SWITCHER_CONFIG or config/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load instances and show their health
    Status {
        /// Probe every instance even when periodic tracking is disabled
        #[arg(long)]
        check: bool,

        /// Print statuses as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fetch a video through the first instance that answers
    Video {
        id: String,

        /// Give up after this many seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Fetch a channel through the first instance that answers
    Channel {
        id: String,

        #[arg(long, value_enum, default_value = "info")]
        view: ChannelView,

        /// Give up after this many seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Send a GET for an arbitrary API path under a named request kind
    Request {
        /// Request kind used for blacklisting (video, channel, or any other name)
        kind: String,

        path: String,

        /// Give up after this many seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Configuration Management
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Initializes the logging system based on the configuration.
///
/// `RUST_LOG` takes precedence over `logging.level`.
fn init_logging(config: &SwitcherConfig) {
    let default_directive =
        format!("warn,switcher_core={level},switcher_cli={level}", level = config.logging.level);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer().json();
        registry.with(fmt_layer).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

fn load_config(path: Option<&str>) -> CliResult<SwitcherConfig> {
    let config = match path {
        Some(path) => SwitcherConfig::from_file(path)?,
        None => SwitcherConfig::load()?,
    };
    Ok(config)
}

async fn run(cli: Cli) -> CliResult<()> {
    if let Commands::Config(config_command) = cli.command {
        return handle_config_command(config_command);
    }

    let config = load_config(cli.config.as_deref())?;
    init_logging(&config);

    match cli.command {
        Commands::Status { check, json } => show_status(config, check, json).await,
        Commands::Video { id, timeout } => {
            run_request(config, RequestTarget::video(&id), timeout).await
        }
        Commands::Channel { id, view, timeout } => {
            run_request(config, RequestTarget::channel(&id, view), timeout).await
        }
        Commands::Request { kind, path, timeout } => {
            run_request(config, RequestTarget::custom(&kind, &path), timeout).await
        }
        Commands::Config(_) => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        print_error(&e.to_string());
        return Err(e.into());
    }

    Ok(())
}
