//! Tree IRC Daemon - Main binary

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, error, info, warn};
use treeircd_core::{
    Admission, AdmissionController, Config, HandleTable, HostResolver, Message, MessageType,
    NewConnection, ServerState, SystemResolver,
};

/// Longest line accepted from a client
const MAX_LINE_LENGTH: usize = 512;

/// Tree IRC Daemon - spanning-tree IRC server
#[derive(Parser)]
#[command(name = "treeircd")]
#[command(about = "A spanning-tree IRC daemon")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Test configuration and exit
    #[arg(long)]
    test_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    if let Some(command) = cli.command {
        match command {
            Commands::Config { output } => {
                generate_config(&output)?;
                return Ok(());
            }
            Commands::Version => {
                show_version();
                return Ok(());
            }
        }
    }

    let config = if cli.config.exists() {
        info!("Loading configuration from {:?}", cli.config);
        Config::from_file(&cli.config)?
    } else {
        info!("Configuration file not found, using defaults");
        Config::default()
    };

    config.validate()?;
    if cli.test_config {
        info!("Configuration is valid");
        return Ok(());
    }

    run(config).await
}

/// Start the listeners and serve clients until interrupted
async fn run(config: Config) -> anyhow::Result<()> {
    let handles = Arc::new(HandleTable::new(config.limits.max_descriptors));
    let resolver: Option<Arc<dyn HostResolver>> = if config.security.enable_dns {
        match SystemResolver::from_system_conf(Duration::from_secs(5)) {
            Ok(resolver) => Some(Arc::new(resolver)),
            Err(e) => {
                warn!("DNS disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let bind_address = config.connection.bind_address.clone();
    let ports = config.connection.ports.clone();
    let state = Arc::new(ServerState::new(config));
    let admission = Arc::new(AdmissionController::new(state.clone(), handles.clone(), resolver));

    info!(
        "Starting {} ({}) on {}",
        state.server_name(),
        state.sid(),
        state.config.server.network
    );

    for port in ports {
        let addr = format!("{}:{}", bind_address, port);
        let listener = TcpListener::bind(&addr).await?;
        info!("Listening for clients on {}", addr);
        tokio::spawn(accept_loop(listener, port, admission.clone(), handles.clone()));
    }

    let housekeeping = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            housekeeping.expire();
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    local_port: u16,
    admission: Arc<AdmissionController>,
    handles: Arc<HandleTable>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Accept failed on port {}: {}", local_port, e);
                continue;
            }
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = handles.reserve();
        let conn = NewConnection {
            handle,
            local_port,
            sender,
        };

        match admission.admit(conn, peer.ip(), peer.port()) {
            Admission::Admitted(uid) => {
                tokio::spawn(serve_client(stream, peer, uid, receiver, admission.clone()));
            }
            Admission::Rejected(reason) => {
                handles.release(handle);
                debug!("Rejected {}: {}", peer, reason);
                tokio::spawn(async move {
                    let (_, writer) = stream.into_split();
                    if let Err(e) = write_messages(receiver, writer).await {
                        debug!("Failed to deliver rejection to {}: {}", peer, e);
                    }
                });
            }
        }
    }
}

/// Read lines from an admitted client until it goes away, then tear the
/// session down
async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    uid: String,
    receiver: mpsc::UnboundedReceiver<Message>,
    admission: Arc<AdmissionController>,
) {
    let (reader, writer) = stream.into_split();
    let writer_task = tokio::spawn(write_messages(receiver, writer));
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    let mut reason = "Connection closed".to_string();
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                reason = format!("Read error: {}", e);
                break;
            }
        };
        if line.is_empty() {
            continue;
        }
        match Message::parse(&line) {
            Ok(message) => match message.command {
                MessageType::Quit => {
                    reason = format!("Quit: {}", message.trailing.unwrap_or_default());
                    break;
                }
                MessageType::Ping => {
                    if let Some(user) = admission.state().users.get(&uid) {
                        user.send(Message::new(MessageType::Pong, message.params));
                    }
                }
                other => debug!("{} sent {}", uid, other),
            },
            Err(e) => debug!("Unparseable line from {}: {}", peer, e),
        }
    }

    admission.disconnect(&uid, &reason);
    if let Err(e) = writer_task.await {
        debug!("Writer for {} ended abnormally: {}", uid, e);
    }
}

/// Drain a session's outbound queue to its socket
async fn write_messages(
    mut receiver: mpsc::UnboundedReceiver<Message>,
    mut writer: tokio::net::tcp::OwnedWriteHalf,
) -> std::io::Result<()> {
    while let Some(message) = receiver.recv().await {
        writer.write_all(format!("{}\r\n", message).as_bytes()).await?;
    }
    writer.shutdown().await
}

/// Initialize logging
fn init_logging(level: &str) -> anyhow::Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    Ok(())
}

/// Generate default configuration file
fn generate_config(output: &PathBuf) -> anyhow::Result<()> {
    let config = Config::default();
    config.to_file(output)?;
    println!("Generated default configuration file: {:?}", output);
    Ok(())
}

/// Show version information
fn show_version() {
    println!("treeircd {}", env!("CARGO_PKG_VERSION"));
}
