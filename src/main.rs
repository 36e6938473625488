//! TCP connection engine (client/server)
//!
//! ```text
//!     tcp-engine [OPTIONS] <HOST> [PORT]          # client
//!     tcp-engine --server-mode [OPTIONS] <HOST> [PORT]   # server
//!
//!   ┌────────────┐   accept    ┌───────────────────┐
//!   │  listener  │────────────▶│ session (per conn)│──▶ processor
//!   └────────────┘             └───────────────────┘
//!         ▲                             ▲
//!         └──────── shutdown token ─────┘   (SIGINT / SIGTERM)
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use tcp_engine::config::loader::load_config;
use tcp_engine::config::validation::validate_config;
use tcp_engine::config::EngineConfig;
use tcp_engine::engine::{ClientEngine, ServeSummary, ServerEngine};
use tcp_engine::lifecycle::signals::spawn_signal_handler;
use tcp_engine::lifecycle::Shutdown;
use tcp_engine::net::Endpoint;
use tcp_engine::observability::{logging, metrics};
use tcp_engine::session::{Discard, Echo, FixedReply, Processor, SessionEnd};
use tcp_engine::EngineError;

const DEFAULT_PORT: u16 = 6060;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProcessorKind {
    /// Send every chunk back unchanged
    Echo,
    /// Answer every chunk with --reply (or the mode's default text)
    Fixed,
    /// Never answer
    Discard,
}

#[derive(Debug, Parser)]
#[command(name = "tcp-engine")]
#[command(about = "Generic TCP client/server with a pluggable payload processor", long_about = None)]
struct Cli {
    /// Activate debug logs
    #[arg(short, long)]
    debug: bool,

    /// Socket timeout in seconds (0 disables it)
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<f64>,

    /// Use non blocking reads (only when no timeout is set)
    #[arg(long)]
    non_blocking: bool,

    /// Pause after each exchange, in seconds
    #[arg(long, value_name = "SECS")]
    sleep_time: Option<f64>,

    /// Exchange buffer size in bytes
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Do not reuse a socket address left in TIME_WAIT
    #[arg(long)]
    no_reuse_address: bool,

    /// Listen backlog size (0 = platform default)
    #[arg(long)]
    backlog_size: Option<u32>,

    /// Do not wait for sessions to finish when the server shuts down
    #[arg(long)]
    daemon: bool,

    /// Start a server. If not set, start a client connection
    #[arg(short, long)]
    server_mode: bool,

    /// TOML configuration file; flags override its values
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// How incoming bytes are answered
    #[arg(long, value_enum, default_value_t = ProcessorKind::Fixed)]
    processor: ProcessorKind,

    /// Reply text for the fixed processor
    #[arg(long)]
    reply: Option<String>,

    /// Text sent right after connecting (client mode)
    #[arg(long)]
    send: Option<String>,

    /// Seconds to wait for sessions to drain on shutdown
    #[arg(long, value_name = "SECS")]
    drain_timeout: Option<u64>,

    /// Expose Prometheus metrics on this address
    #[arg(long, value_name = "ADDR")]
    metrics_address: Option<String>,

    /// Server address to connect to, or local address to bind
    host: String,

    /// Server or destination port
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,
}

impl Cli {
    /// Overlay command-line flags on a loaded configuration.
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(secs) = self.timeout {
            config.socket.read_timeout_ms = secs_to_millis(secs);
        }
        if self.non_blocking {
            config.socket.non_blocking = true;
        }
        if self.no_reuse_address {
            config.socket.reuse_address = false;
        }
        if let Some(backlog) = self.backlog_size {
            config.socket.backlog = backlog;
        }
        if let Some(secs) = self.sleep_time {
            config.session.throttle_ms = secs_to_millis(secs);
        }
        if let Some(size) = self.buffer_size {
            config.session.buffer_size = size;
        }
        if self.daemon {
            config.server.daemon = true;
        }
        if let Some(secs) = self.drain_timeout {
            config.server.drain_timeout_secs = secs;
        }
        if let Some(addr) = &self.metrics_address {
            config.observability.metrics_enabled = true;
            config.observability.metrics_address = addr.clone();
        }
    }

    fn processor(&self) -> Arc<dyn Processor> {
        match self.processor {
            ProcessorKind::Echo => Arc::new(Echo),
            ProcessorKind::Discard => Arc::new(Discard),
            ProcessorKind::Fixed => match (&self.reply, self.server_mode) {
                (Some(reply), _) => Arc::new(FixedReply::new(reply.as_bytes())),
                (None, true) => Arc::new(FixedReply::server_default()),
                (None, false) => Arc::new(FixedReply::client_default()),
            },
        }
    }
}

/// Seconds to whole milliseconds. Any positive value stays at least 1 ms,
/// so a tiny timeout never turns into "no timeout".
fn secs_to_millis(secs: f64) -> u64 {
    if secs > 0.0 {
        ((secs * 1000.0).round() as u64).max(1)
    } else {
        0
    }
}

/// Process exit status for a finished server.
///
/// The server started, so even a listener failure while serving exits 0.
fn server_exit_status(result: &Result<ServeSummary, EngineError>) -> u8 {
    match result {
        Ok(summary) => {
            tracing::info!(
                accepted = summary.accepted,
                drained = summary.drained,
                aborted = summary.aborted,
                "Server stopped"
            );
        }
        Err(e) => tracing::error!(error = %e, "Server stopped with error"),
    }
    0
}

/// Process exit status for a finished client. Only startup failures exit 1.
fn client_exit_status(result: &Result<SessionEnd, EngineError>) -> u8 {
    match result {
        Ok(end) => {
            tracing::info!(end = ?end, "Client session finished");
            0
        }
        Err(e) if e.is_fatal() => 1,
        // Communication and processor failures were logged by the session.
        Err(_) => 0,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("tcp-engine: failed to load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };
    cli.apply(&mut config);

    if let Err(errors) = validate_config(&config) {
        for error in errors {
            eprintln!("tcp-engine: {}", error);
        }
        return ExitCode::FAILURE;
    }

    if let Err(e) = logging::init_logging(&config.observability, cli.debug) {
        eprintln!("tcp-engine: failed to initialize logging: {}", e);
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let processor = cli.processor();

    if cli.server_mode {
        let endpoint = match cli.port {
            0 => Endpoint::any_port(cli.host.clone()),
            port => match Endpoint::new(cli.host.clone(), port) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    tracing::error!(error = %e, "Invalid bind address");
                    return ExitCode::FAILURE;
                }
            },
        };

        tracing::debug!(port = cli.port, "Starting server on port {}", cli.port);
        let server = match ServerEngine::bind(&endpoint, &config, processor).await {
            Ok(server) => server.with_span(tracing::info_span!("server", bind = %endpoint)),
            Err(_) => return ExitCode::FAILURE,
        };

        let result = server.serve(shutdown.token()).await;
        ExitCode::from(server_exit_status(&result))
    } else {
        let endpoint = match Endpoint::new(cli.host.clone(), cli.port) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::error!(error = %e, "Invalid server address");
                return ExitCode::FAILURE;
            }
        };

        let mut client = ClientEngine::from_config(&config)
            .with_span(tracing::info_span!("client", endpoint = %endpoint));
        if let Some(text) = &cli.send {
            client = client.with_greeting(text.as_bytes());
        }

        let result = client.connect(&endpoint, processor, shutdown.token()).await;
        ExitCode::from(client_exit_status(&result))
    }
}
