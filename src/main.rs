//! Mock HTTP Server - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use mock_http_server::{HttpServer, MockServerConfig};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mock-http-server",
    about = "Standalone mock HTTP server - serves expectations from a YAML file",
    version
)]
struct Args {
    /// Path to expectations file
    #[arg(short, long, default_value = "mock-http-server.yaml")]
    config: PathBuf,

    /// Host to listen on
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port to listen on (0 picks a free port)
    #[arg(short, long, default_value_t = 0)]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print default config if requested
    if args.print_config {
        let default_config = include_str!("../config/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    // Load configuration
    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockServerConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no expectations)");
        MockServerConfig::default()
    };

    // Validate and exit if requested
    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} expectations defined)",
            config.expectations.len()
        );
        return Ok(());
    }

    let mut server = HttpServer::with_options(&args.host, args.port, None, config.server.clone());
    config.register(&server)?;
    server.start()?;
    info!(url = %server.url_for("/"), "Serving expectations, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    server.stop()?;
    while let Err(assertion) = server.check_assertions() {
        warn!("{}", assertion);
    }

    Ok(())
}
