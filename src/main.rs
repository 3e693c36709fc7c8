//! tlschat - encrypted multi-client chat
//!
//! **Server mode** (`tlschat server`): listens for TLS clients and reads
//! operator commands from the terminal until `/shutdown` or Ctrl+C.
//!
//! **Client mode** (`tlschat client <host> <port>`): connects to a server,
//! announces a name and relays terminal lines until `/logout`.

use clap::{Parser as ClapParser, Subcommand};
use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tlschat::{
    client::{Client, ClientError},
    command::is_valid_name,
    config::{validate_client_port, ClientConfig, ConfigError, ServerFileConfig},
    console::ConsoleSink,
    operator::spawn_line_reader,
    server::{Server, ServerError},
    style::{Colour, Style},
    tls::load_client_config,
};

/// tlschat - encrypted multi-client chat
#[derive(ClapParser, Debug)]
#[command(name = "tlschat", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the chat server with an operator console on this terminal
    Server {
        /// Port to listen on (default 2704)
        #[arg(long, short = 'p')]
        port: Option<u16>,

        /// Address to bind (default 0.0.0.0)
        #[arg(long)]
        bind: Option<IpAddr>,

        /// PEM certificate chain
        #[arg(long, env = "TLSCHAT_CERT")]
        cert: Option<PathBuf>,

        /// PEM private key
        #[arg(long, env = "TLSCHAT_KEY")]
        key: Option<PathBuf>,

        /// File whose lines are sent to each client on connect
        #[arg(long)]
        banner: Option<PathBuf>,

        /// File of word patterns to mask in chat
        #[arg(long)]
        filter: Option<PathBuf>,

        /// Append the console transcript to this file
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// TOML file supplying any of the settings above
        #[arg(long)]
        config: Option<PathBuf>,

        /// Disable ANSI colour
        #[arg(long)]
        no_colour: bool,
    },

    /// Connect to a chat server
    Client {
        /// Server host name (must match its certificate)
        host: String,

        /// Server port (1024-49151)
        port: u16,

        /// PEM certificate(s) to trust for the server
        #[arg(long, env = "TLSCHAT_CA")]
        ca: PathBuf,

        /// Name to join with; prompted for if omitted
        #[arg(long)]
        name: Option<String>,

        /// Disable ANSI colour
        #[arg(long)]
        no_colour: bool,
    },
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("no name entered")]
    NoName,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.command {
        Commands::Server {
            port,
            bind,
            cert,
            key,
            banner,
            filter,
            log_file,
            config,
            no_colour,
        } => {
            let flags = ServerFileConfig {
                bind,
                port,
                cert,
                key,
                banner,
                filter,
                log_file,
                colour: no_colour.then_some(false),
            };
            run_server(config, flags).await
        }
        Commands::Client {
            host,
            port,
            ca,
            name,
            no_colour,
        } => run_client(host, port, ca, name, no_colour).await,
    };

    if let Err(e) = result {
        eprintln!("tlschat: {}", e);
        std::process::exit(1);
    }
}

/// Tracing goes to stderr so it never interleaves with chat output.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tlschat=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── Server mode ────────────────────────────────────────────────────

async fn run_server(config_path: Option<PathBuf>, flags: ServerFileConfig) -> Result<(), CliError> {
    let file = match &config_path {
        Some(path) => ServerFileConfig::load(path)?,
        None => ServerFileConfig::default(),
    };
    let config = file.merge(flags).resolve()?;

    let mut console = ConsoleSink::stdout(config.style);
    if let Some(path) = &config.log_file {
        console = console.with_log_file(path)?;
    }

    let server = Server::bind(&config, console).await?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received Ctrl+C, shutting down");
            shutdown.cancel();
        }
    });

    server.run(spawn_line_reader()).await?;
    Ok(())
}

// ── Client mode ────────────────────────────────────────────────────

async fn run_client(
    host: String,
    port: u16,
    ca: PathBuf,
    name: Option<String>,
    no_colour: bool,
) -> Result<(), CliError> {
    let style = if no_colour {
        Style {
            colour: false,
            timestamps: true,
        }
    } else {
        Style::default()
    };
    validate_client_port(port)?;
    let sink = ConsoleSink::stdout(style);
    let mut input = spawn_line_reader();

    let name = match name {
        Some(name) => name,
        None => prompt_name(&mut input, &sink).await?,
    };
    let config = ClientConfig::new(host, port, ca, name)?;

    let connector = load_client_config(&config.ca).map_err(ClientError::from)?;
    let client = Client::connect(&config.host, config.port, connector).await?;
    client.run(&config.name, input, sink).await?;
    Ok(())
}

/// Ask for a name until a valid one is entered.
async fn prompt_name(input: &mut mpsc::Receiver<String>, sink: &ConsoleSink) -> Result<String, CliError> {
    sink.emit("Enter username, only letters and numbers (no spaces).", None, false);
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let line = input.recv().await.ok_or(CliError::NoName)?;
        let name = line.trim();
        if is_valid_name(name) {
            return Ok(name.to_string());
        }
        sink.emit("Invalid username, try again.", Some(Colour::Error), false);
    }
}
