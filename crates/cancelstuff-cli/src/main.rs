mod config;

use anyhow::Context;
use cancelstuff_assistant::ClaudeCli;
use cancelstuff_gateway::{AuditService, GatewayServer};
use cancelstuff_session::{
    skill_dest, sync_template, Reaper, RequestSerializer, SessionStore, SessionSummary, Workspace,
};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use config::AppConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Grace on top of the assistant timeout so the process timeout reports first.
const SERIALIZER_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "cancelstuff", version, about = "Local subscription audit, powered by Claude Code")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "cancelstuff.toml", global = true)]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config and PORT)
        #[arg(short, long)]
        port: Option<u16>,
        /// Start even if the assistant binary cannot be found
        #[arg(long)]
        skip_check: bool,
    },
    /// Check that the assistant binary is installed
    Check,
    /// Refresh the skill template copied into every session
    SyncSkills {
        /// Directory to copy from
        #[arg(long)]
        source: PathBuf,
        /// Directory to copy into (defaults to <sessions.template_dir>/.claude/skills/<source name>)
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// List the live sessions of a running server
    Sessions {
        /// Server base URL (defaults to the configured host and port)
        #[arg(long)]
        url: Option<String>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let dotenv = dotenvy::dotenv();
    init_tracing(cli.json_logs);
    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    let mut config = AppConfig::load(&cli.config)?;
    config.apply_port_override(std::env::var("PORT").ok())?;
    config.validate()?;

    let assistant = ClaudeCli::new(config.assistant.command.clone())
        .with_timeout(config.assistant.timeout());

    match cli.command {
        Commands::Serve {
            host,
            port,
            skip_check,
        } => {
            if !skip_check && !assistant.check_installed().await {
                print_install_help(assistant.program());
                anyhow::bail!("'{}' is not available", assistant.program());
            }
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            serve(config, assistant, host, port).await?;
        }
        Commands::Check => {
            if assistant.check_installed().await {
                println!("✓ '{}' is installed", assistant.program());
                println!("  If requests fail with an auth error, run `claude` once to log in.");
            } else {
                print_install_help(assistant.program());
                anyhow::bail!("'{}' is not available", assistant.program());
            }
        }
        Commands::SyncSkills { source, dest } => {
            let dest = match dest {
                Some(dest) => dest,
                None => skill_dest(&config.sessions.template_dir, &source)?,
            };
            let copied = sync_template(&source, &dest).await?;
            println!("Synced {} file(s) into {}:", copied.len(), dest.display());
            for path in &copied {
                println!("  {}", path.display());
            }
        }
        Commands::Sessions { url } => {
            let base = url.unwrap_or_else(|| {
                format!("http://{}:{}", config.server.host, config.server.port)
            });
            let sessions = fetch_sessions(&base).await?;
            print!("{}", render_sessions(&sessions));
        }
    }

    Ok(())
}

async fn serve(
    config: AppConfig,
    assistant: ClaudeCli,
    host: String,
    port: u16,
) -> anyhow::Result<()> {
    let temp_root = config.sessions.temp_root();
    let mut workspace = Workspace::new(&temp_root, config.sessions.dir_prefix.clone());
    if config.sessions.template_dir.is_dir() {
        workspace = workspace.with_template(&config.sessions.template_dir);
    } else {
        warn!(
            template = %config.sessions.template_dir.display(),
            "Skill template not found, sessions start empty"
        );
    }

    let serializer = RequestSerializer::new(config.assistant.timeout() + SERIALIZER_GRACE);
    let store = Arc::new(SessionStore::new(workspace, serializer));
    let reaper = Reaper::spawn(
        store.clone(),
        config.sessions.sweep_interval(),
        config.sessions.max_idle(),
    );

    let service = Arc::new(AuditService::new(store.clone(), Arc::new(assistant)));
    let app = GatewayServer::build_with_upload_limit(service, config.server.max_upload_bytes);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(
        addr = %addr,
        temp_root = %temp_root.display(),
        max_idle_secs = config.sessions.max_idle_secs,
        "cancelstuff listening"
    );
    println!("cancelstuff running at http://{addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    reaper.shutdown().await;
    let destroyed = store.destroy_all().await;
    info!(destroyed, "Shutdown complete");

    served.context("Server error")
}

#[derive(Deserialize)]
struct HealthBody {
    sessions: Vec<SessionSummary>,
}

async fn fetch_sessions(base: &str) -> anyhow::Result<Vec<SessionSummary>> {
    let url = format!("{}/api/health", base.trim_end_matches('/'));
    let body: HealthBody = reqwest::get(&url)
        .await
        .with_context(|| format!("Is cancelstuff running? Could not reach {url}"))?
        .error_for_status()?
        .json()
        .await
        .context("Unexpected health response")?;
    Ok(body.sessions)
}

fn render_sessions(sessions: &[SessionSummary]) -> String {
    if sessions.is_empty() {
        return "No live sessions.\n".to_string();
    }
    let mut out = format!("{:<36}  {:<12}  {:>8}\n", "ID", "STATE", "AGE");
    for s in sessions {
        out.push_str(&format!("{:<36}  {:<12}  {:>7}s\n", s.id.to_string(), s.state.to_string(), s.age_secs));
    }
    out.push_str(&format!("\nTotal: {} session(s)\n", sessions.len()));
    out
}

fn print_install_help(program: &str) {
    eprintln!("✗ Claude Code CLI not found ('{program}')");
    eprintln!();
    eprintln!("Install it with:");
    eprintln!("  npm install -g @anthropic-ai/claude-code");
    eprintln!();
    eprintln!("Then log in once by running:");
    eprintln!("  claude");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
