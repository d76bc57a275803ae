use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use routemark::echo::{EchoController, HealthController};
use routemark::middleware::{RequestLogger, RequireUser, TokenAuth};
use routemark::{ServerBuilder, ServerConfig};
use serde_json::json;
use tracing::info;

/// Demo server for the routemark controller layer
#[derive(Parser)]
#[command(name = "routemark-demo", version, about, long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "ROUTEMARK_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and APP_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Global API prefix (overrides config and API_PREFIX)
    #[arg(long)]
    prefix: Option<String>,

    /// Bearer token accepted for authorized routes
    #[arg(long, env = "ROUTEMARK_DEMO_TOKEN")]
    token: Option<String>,

    /// Print the route table and exit
    #[arg(long, default_value_t = false)]
    print_routes: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    config.apply_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(prefix) = cli.prefix {
        config.api_prefix = prefix;
    }

    let _log_guard = routemark::logging::init(&config.logging)?;

    let addr = config.bind_addr();
    let mut builder = ServerBuilder::new(config).use_middleware(RequestLogger);
    if let Some(token) = cli.token {
        builder = builder.use_middleware(TokenAuth::new(token, json!({ "id": "demo" })));
    }
    let app = builder
        .protect_routes(RequireUser)
        .controller_default::<HealthController>()
        .controller_default::<EchoController>()
        .build()
        .context("registering controllers")?;

    if cli.print_routes {
        app.routes().dump_routes();
        return Ok(());
    }

    let handle = app
        .start(&addr)
        .with_context(|| format!("binding {addr}"))?;
    handle.wait_ready().context("server did not become ready")?;

    wait_for_shutdown()?;
    info!("Shutdown signal received");
    handle.stop();
    Ok(())
}

#[cfg(unix)]
fn wait_for_shutdown() -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("installing signal handlers")?;
    if let Some(signal) = signals.forever().next() {
        info!(signal = signal, "Signal received");
    }
    Ok(())
}

#[cfg(not(unix))]
fn wait_for_shutdown() -> anyhow::Result<()> {
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("waiting on stdin")?;
    Ok(())
}
