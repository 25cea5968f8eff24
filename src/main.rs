//! farmd command-line entry point.

#[cfg(not(unix))]
fn main() -> anyhow::Result<()> {
    anyhow::bail!("farmd requires a Unix platform");
}

#[cfg(unix)]
use anyhow::{Context, Result};
#[cfg(unix)]
use clap::{Parser, Subcommand};
#[cfg(unix)]
use std::path::PathBuf;

#[cfg(unix)]
use farmd::build_info::BUILD_SHA;
#[cfg(unix)]
use farmd::config::CoordinatorConfig;
#[cfg(unix)]
use farmd::protocol::{ClientMessage, DaemonMessage, SessionSummary};

#[cfg(unix)]
#[derive(Parser)]
#[command(name = "farmd")]
#[command(about = "Coordinator daemon for a parallel-processing worker farm")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[cfg(unix)]
#[derive(Subcommand)]
enum Command {
    /// Run the coordinator
    Run {
        /// Config file (defaults to ~/.farmd/config.yaml when present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Control socket override
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// List sessions known to the running coordinator
    Status {
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Probe a session's worker process for liveness
    Verify {
        session: usize,
        /// Bound on the wait for the worker's reply
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Terminate a session's worker process
    Terminate {
        session: usize,
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Ask the coordinator to shut down
    Shutdown {
        #[arg(long)]
        socket: Option<PathBuf>,
    },
}

#[cfg(unix)]
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, socket } => {
            let mut config = CoordinatorConfig::load(config.as_deref())?;
            if socket.is_some() {
                config.socket_path = socket;
            }
            eprintln!("[farmd] build {}", BUILD_SHA);
            farmd::server::run_coordinator(config).await
        }

        Command::Status { socket } => {
            let response = request(socket, ClientMessage::List).await?;
            match response {
                DaemonMessage::Sessions(sessions) => {
                    print_sessions(&sessions);
                    Ok(())
                }
                other => unexpected(other),
            }
        }

        Command::Verify {
            session,
            timeout_ms,
            socket,
        } => {
            let response = request(
                socket,
                ClientMessage::Verify {
                    session,
                    timeout_ms,
                },
            )
            .await?;
            match response {
                DaemonMessage::VerifyResult { responsive } => {
                    if responsive {
                        println!("session {} is responsive", session);
                        Ok(())
                    } else {
                        anyhow::bail!("session {} did not answer within {} ms", session, timeout_ms)
                    }
                }
                other => unexpected(other),
            }
        }

        Command::Terminate { session, socket } => {
            let response = request(socket, ClientMessage::Terminate { session }).await?;
            match response {
                DaemonMessage::TerminateResult { outcome } => {
                    println!("session {} terminated ({})", session, outcome);
                    Ok(())
                }
                other => unexpected(other),
            }
        }

        Command::Shutdown { socket } => {
            let response = request(socket, ClientMessage::Shutdown).await?;
            match response {
                DaemonMessage::Ack { build_sha } => {
                    println!("coordinator {} shutting down", build_sha);
                    Ok(())
                }
                other => unexpected(other),
            }
        }
    }
}

/// One request/response round-trip over the control socket.
#[cfg(unix)]
async fn request(socket: Option<PathBuf>, message: ClientMessage) -> Result<DaemonMessage> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let socket_path = match socket {
        Some(path) => path,
        None => farmd::paths::socket_path()?,
    };
    let stream = tokio::net::UnixStream::connect(&socket_path)
        .await
        .with_context(|| format!("Failed to connect to coordinator at {}", socket_path.display()))?;

    let (reader, mut writer) = stream.into_split();
    let line = serde_json::to_string(&message).context("Failed to serialize request")?;
    writer
        .write_all(format!("{}\n", line).as_bytes())
        .await
        .context("Failed to send request")?;

    let mut response = String::new();
    BufReader::new(reader)
        .read_line(&mut response)
        .await
        .context("Failed to read response")?;
    serde_json::from_str(response.trim()).context("Failed to parse response")
}

#[cfg(unix)]
fn unexpected(response: DaemonMessage) -> Result<()> {
    match response {
        DaemonMessage::Error(e) => anyhow::bail!("coordinator error: {}", e),
        other => anyhow::bail!("unexpected response: {:?}", other),
    }
}

#[cfg(unix)]
fn print_sessions(sessions: &[SessionSummary]) {
    if sessions.is_empty() {
        println!("no sessions");
        return;
    }
    println!(
        "{:<4} {:<26} {:<10} {:<18} {:>7} {:>8} {:>8} {:>8}",
        "ID", "TAG", "CLIENT", "STATUS", "PID", "CLIENTS", "WORKERS", "INFLATE"
    );
    for s in sessions {
        println!(
            "{:<4} {:<26} {:<10} {:<18} {:>7} {:>8} {:>8} {:>8}",
            s.session,
            s.tag,
            s.client,
            s.status,
            s.pid.map_or_else(|| "-".to_string(), |p| p.to_string()),
            s.clients,
            s.workers.len(),
            s.inflate,
        );
    }
}
