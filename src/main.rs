use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use toolchat::agent_core::Orchestrator;
use toolchat::config::{self, AppConfig};
use toolchat::http::{self, AppState};
use toolchat::inference::GeminiClient;
use toolchat::mcp_client::SessionManager;

#[derive(Parser, Debug)]
#[command(name = "toolchat", version, about = "Gemini chat with MCP tools")]
struct Cli {
    /// Config file (env: TOOLCHAT_CONFIG, default: nearest toolchat.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive chat in the terminal
    Chat,

    /// Serve the chat page and the /chat endpoint
    Serve {
        /// Address to bind (overrides http.bind)
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Log JSON lines instead of plain text
        #[arg(long)]
        log_json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Command::Chat => {
            if let Some(path) = toolchat::init_file_tracing() {
                eprintln!("logs: {}", path.display());
            }
            let config = config::resolve(cli.config.as_deref())?;
            cmd_chat(&config).await
        }
        Command::Serve { bind, log_json } => {
            toolchat::init_stderr_tracing(log_json);
            let config = config::resolve(cli.config.as_deref())?;
            cmd_serve(&config, bind.unwrap_or(config.http.bind)).await
        }
    }
}

/// Build the model client and connect the tool session.
async fn start(config: &AppConfig) -> Result<Arc<Orchestrator>> {
    let driver =
        GeminiClient::from_config(config.model.clone()).context("invalid model configuration")?;
    tracing::info!(model = driver.model_name(), "model client ready");

    let sessions = Arc::new(SessionManager::new());
    sessions.connect(&config.server).await.with_context(|| {
        format!(
            "failed to connect to tool server '{}' ({})",
            config.server.name, config.server.command
        )
    })?;

    Ok(Arc::new(Orchestrator::new(sessions, Arc::new(driver))))
}

// ─── chat ───────────────────────────────────────────────────────────────────

async fn cmd_chat(config: &AppConfig) -> Result<()> {
    let orchestrator = start(config).await?;

    let result = chat_loop(&orchestrator).await;
    orchestrator.sessions().cleanup().await;
    result
}

async fn chat_loop(orchestrator: &Orchestrator) -> Result<()> {
    println!("MCP client started. Type your queries or 'quit' to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nQuery: ");
        std::io::stdout().flush().context("failed to write to stdout")?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        // EOF
        let Some(line) = line else { break };

        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("quit") {
            break;
        }

        match orchestrator.process(query).await {
            Ok(answer) => println!("\n{answer}"),
            Err(e) => {
                tracing::error!(error = %e, "query failed");
                println!("\nError: {e}");
            }
        }
    }
    Ok(())
}

// ─── serve ──────────────────────────────────────────────────────────────────

async fn cmd_serve(config: &AppConfig, bind: SocketAddr) -> Result<()> {
    let orchestrator = start(config).await?;
    let sessions = orchestrator.sessions().clone();

    let result = async {
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .with_context(|| format!("failed to bind {bind}"))?;
        http::serve(listener, AppState::new(orchestrator), shutdown_signal())
            .await
            .context("HTTP server failed")
    }
    .await;

    sessions.cleanup().await;
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
