//! Server binary.
//!
//! Loads settings, wires the application context and serves the websocket
//! and HTTP surface. Real backend wire clients plug in through the channel
//! factory; this binary registers the simulated factory so the full command
//! surface is exercisable without hardware.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use astrogate::backend::mock::MockFactory;
use astrogate::config::Settings;
use astrogate::context::AppContext;
use astrogate::server;

#[derive(Parser, Debug)]
#[command(name = "astrogate", version, about = "Instrument session gateway")]
struct Args {
    /// Configuration file path.
    #[arg(short, long, default_value = "astrogate.toml")]
    config: PathBuf,

    /// Override the listen address from the configuration.
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut settings = match Settings::load_from(&args.config) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(listen) = args.listen {
        settings.server.listen = listen;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.server.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let ctx = AppContext::new(settings, Arc::new(MockFactory::simulated()));
    if let Err(err) = server::serve(ctx).await {
        error!(error = %err, "server terminated");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
