#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

mod cache;
mod config;
mod daemon;
mod engine;
mod error;
mod intel;
mod ipc;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{default_config_path, load_config, LensConfig, DEFAULT_CONFIG};
use daemon::state::ServerState;

#[derive(Parser)]
#[command(name = "vibelens")]
#[command(about = "Project-scoped references and rename for JavaScript/TypeScript", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level filter (e.g. debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Config file (defaults to ~/.vibelens/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP tool server on stdio
    Serve {
        /// Base directory for relative file arguments (defaults to current directory)
        #[arg(long)]
        project_dir: Option<PathBuf>,
    },

    /// Find all references to the symbol at a position
    References {
        file: String,
        /// 1-based line
        line: i64,
        /// 1-based column (UTF-16 code units)
        column: i64,
        /// Leave the declaration site out of the results
        #[arg(long)]
        exclude_definition: bool,
    },

    /// Plan a rename of the symbol at a position (files are not modified)
    Rename {
        file: String,
        line: i64,
        column: i64,
        new_name: String,
    },

    /// Manage configuration (~/.vibelens/config.toml)
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default config.toml
    Init,
    /// Show path to the config file
    Path,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Serve { project_dir } => handle_serve(project_dir, load_config(&config_path)),
        Commands::References {
            file,
            line,
            column,
            exclude_definition,
        } => handle_tool(
            "find_references",
            json!({
                "file": file,
                "line": line,
                "column": column,
                "include_definition": !exclude_definition,
            }),
            load_config(&config_path),
        ),
        Commands::Rename {
            file,
            line,
            column,
            new_name,
        } => handle_tool(
            "rename_symbol",
            json!({ "file": file, "line": line, "column": column, "new_name": new_name }),
            load_config(&config_path),
        ),
        Commands::Config { action } => handle_config(action, &config_path),
    }
}

/// Logs go to stderr; stdout carries protocol and command output.
/// `VIBELENS_LOG_JSON=1` switches to structured JSON lines.
fn init_tracing(log_level: &str) {
    let json_logging = std::env::var("VIBELENS_LOG_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("vibelens={}", log_level).into());

    if json_logging {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    let num_cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus.clamp(2, 8))
        .max_blocking_threads(num_cpus.max(4))
        .thread_name("vibelens-worker")
        .enable_all()
        .build()?;
    Ok(rt)
}

fn project_dir_or_cwd(project_dir: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let dir = match project_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    Ok(dir.canonicalize()?)
}

// === Server ===

fn handle_serve(project_dir: Option<PathBuf>, config: LensConfig) -> anyhow::Result<()> {
    let project_dir = project_dir_or_cwd(project_dir)?;
    let rt = runtime()?;

    rt.block_on(async {
        let state = Arc::new(ServerState::new(project_dir, &config));

        // Signals trigger the same graceful shutdown as stdin EOF
        let token = state.shutdown_token.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            token.cancel();
        });

        ipc::server::run_stdio(state).await
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Failed to register signal handlers: {}", e);
                return std::future::pending().await;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("SIGTERM received, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("SIGINT received, initiating graceful shutdown");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Ctrl-C received, initiating graceful shutdown");
}

// === One-shot commands ===

/// Run a single tool against the current directory, print its JSON result,
/// and exit non-zero when the result carries the error flag.
fn handle_tool(name: &str, args: serde_json::Value, config: LensConfig) -> anyhow::Result<()> {
    let project_dir = project_dir_or_cwd(None)?;
    let rt = runtime()?;

    let output = rt.block_on(async {
        let state = ServerState::new(project_dir, &config);
        daemon::tools::dispatch(name, args, &state.tool_context()).await
    })?;

    println!("{}", serde_json::to_string_pretty(&output.value)?);
    if output.is_error {
        std::process::exit(1);
    }
    Ok(())
}

// === Config ===

fn handle_config(action: Option<ConfigAction>, config_path: &Path) -> anyhow::Result<()> {
    match action {
        Some(ConfigAction::Path) => {
            println!("{}", config_path.display());
        }
        Some(ConfigAction::Init) => {
            if config_path.exists() {
                eprintln!("Config already exists: {}", config_path.display());
                return Ok(());
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(config_path, DEFAULT_CONFIG)?;
            println!("Created: {}", config_path.display());
        }
        None => {
            // Show effective config
            let config = load_config(config_path);
            println!("# Effective config ({})\n", config_path.display());
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
