use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use feishu_mcp::{McpResult, McpServer, ServeSummary};
use mcp_feishu::{
    initialize_server, reconfigure, verify_callback, AppConfig, CallbackVerdict, LoadOptions,
    RootError, RootResult,
};

const DEFAULT_LOG_FILTER: &str = "mcp_feishu=info,feishu_mcp=info,feishu_notify=info";
const DEBUG_LOG_FILTER: &str = "mcp_feishu=debug,feishu_mcp=debug,feishu_notify=debug";

/// Headroom over the webhook timeout when waiting for an in-flight send.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// mcp-feishu: send Feishu webhook messages from an MCP client.
///
/// Configuration comes from FEISHU_* environment variables, with gaps
/// filled from a config file.
#[derive(Parser, Debug)]
#[command(name = "mcp-feishu", version, about, long_about = None)]
struct Cli {
    /// Path to config file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use environment variables only; never read the default config file
    #[arg(long, global = true)]
    env_only: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve MCP requests on stdin/stdout (default)
    Serve,

    /// Load and validate the configuration, then print a redacted summary
    CheckConfig,

    /// Write an example configuration file
    Init {
        /// Where to write it
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Verify a signed callback against the configured secret
    VerifyCallback {
        /// Timestamp header value, Unix seconds
        #[arg(long)]
        timestamp: String,

        /// Base64 signature header value
        #[arg(long)]
        signature: String,

        /// File holding the raw body; stdin when omitted
        #[arg(long)]
        body_file: Option<PathBuf>,
    },
}

fn init_tracing(debug: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if debug {
        EnvFilter::new(DEBUG_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    // stdout carries the protocol.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{}", e);
            1
        }
    };
    // The stdio worker may still be parked in a blocking read; exiting here
    // keeps the runtime from waiting on it.
    std::process::exit(code);
}

async fn run(cli: Cli) -> RootResult<()> {
    let options = LoadOptions {
        config_path: cli.config,
        env_only: cli.env_only,
    };
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => cmd_serve(options).await,
        Commands::CheckConfig => cmd_check_config(&options),
        Commands::Init { path, force } => cmd_init(path.or(options.config_path), force),
        Commands::VerifyCallback {
            timestamp,
            signature,
            body_file,
        } => cmd_verify_callback(&options, &timestamp, &signature, body_file),
    }
}

async fn cmd_serve(options: LoadOptions) -> RootResult<()> {
    let config = AppConfig::load(&options)?;
    let server = Arc::new(initialize_server(&config)?);
    let shutdown = server.shutdown_handle();
    let mut signals = Signals::new()?;

    let mut worker = {
        let server = Arc::clone(&server);
        tokio::task::spawn_blocking(move || {
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            server.run(stdin.lock(), stdout.lock())
        })
    };
    info!("mcp-feishu ready, waiting for requests on stdin");

    loop {
        tokio::select! {
            joined = &mut worker => {
                let result: McpResult<ServeSummary> = joined
                    .map_err(|e| RootError::Internal(format!("server task failed: {}", e)))?;
                let summary = result?;
                info!(requests = summary.requests, responses = summary.responses, "input closed, exiting");
                return Ok(());
            }
            signal = signals.recv() => match signal {
                ProcessSignal::Reload => reload(&server, &options),
                ProcessSignal::Shutdown(name) => {
                    info!(signal = name, "shutdown signal received");
                    shutdown.request_shutdown();
                    let grace = feishu_notify::DEFAULT_TIMEOUT + SHUTDOWN_GRACE;
                    let handle = shutdown.clone();
                    let idle = tokio::task::spawn_blocking(move || handle.wait_idle(grace))
                        .await
                        .unwrap_or(false);
                    if !idle {
                        warn!("in-flight request did not finish before shutdown");
                    }
                    info!("mcp-feishu stopped");
                    return Ok(());
                }
            }
        }
    }
}

/// Re-read configuration and swap the dispatcher. Failures keep the old one.
fn reload(server: &McpServer, options: &LoadOptions) {
    info!("reloading configuration");
    match AppConfig::load(options).and_then(|config| reconfigure(server, &config)) {
        Ok(()) => info!("configuration reloaded"),
        Err(e) => warn!(error = %e, "configuration reload failed, keeping current settings"),
    }
}

fn cmd_check_config(options: &LoadOptions) -> RootResult<()> {
    let config = AppConfig::load(options)?;
    config.validate()?;
    println!("Configuration OK.");
    println!("{}", config.redacted_summary());
    Ok(())
}

fn cmd_init(path: Option<PathBuf>, force: bool) -> RootResult<()> {
    let path = path.unwrap_or_else(AppConfig::default_config_path);
    if path.exists() && !force {
        return Err(RootError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    AppConfig::example().save(&path)?;
    info!(path = %path.display(), "example configuration written");
    println!("Wrote {}. Set feishu.webhook_url before serving.", path.display());
    Ok(())
}

fn cmd_verify_callback(
    options: &LoadOptions,
    timestamp: &str,
    signature: &str,
    body_file: Option<PathBuf>,
) -> RootResult<()> {
    let config = AppConfig::load(options)?;
    let body = match body_file {
        Some(path) => std::fs::read(&path)?,
        None => {
            let mut body = Vec::new();
            std::io::stdin().read_to_end(&mut body)?;
            body
        }
    };

    match verify_callback(&config.feishu, timestamp, signature, &body)? {
        CallbackVerdict::Verified => println!("signature verified"),
        CallbackVerdict::NotApplicable => {
            println!("security_type is not signature; nothing to verify")
        }
    }
    Ok(())
}

enum ProcessSignal {
    Shutdown(&'static str),
    Reload,
}

#[cfg(unix)]
struct Signals {
    term: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> RootResult<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            term: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn recv(&mut self) -> ProcessSignal {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => ProcessSignal::Shutdown("SIGINT"),
            _ = self.term.recv() => ProcessSignal::Shutdown("SIGTERM"),
            _ = self.hangup.recv() => ProcessSignal::Reload,
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> RootResult<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> ProcessSignal {
        let _ = tokio::signal::ctrl_c().await;
        ProcessSignal::Shutdown("ctrl-c")
    }
}
