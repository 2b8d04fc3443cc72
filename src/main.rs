mod capture;
mod cli;
mod config;
mod detector;
mod encode;
mod net;
mod protocol;
mod render;
mod runtime;
mod session;
mod tui;

use anyhow::{Context, Result};
use cli::{Cli, Commands, RunArgs, ServeArgs};
use config::SessionConfig;
use detector::ServiceOptions;
use net::WsConnector;
use protocol::{Detection, Point};
use runtime::Runtime;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Run(args) => {
            if args.headless {
                init_logging(None)?;
            } else if let Some(path) = &args.log_file {
                init_logging(Some(path))?;
            }
            run_client(args).await?;
        }
        Commands::Serve(args) => {
            init_logging(None)?;
            serve(args).await?;
        }
    }

    Ok(())
}

/// stderr by default, or append to `log_file` with colors off
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "wardcam=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

async fn run_client(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path).context("Failed to load config")?,
        None => SessionConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let connector = WsConnector::new(config.service_url.clone());
    let url = config.service_url.clone();
    let mut runtime = Runtime::new(config, connector, capture::factory(args.source));

    if args.headless {
        runtime
            .start()
            .context("Could not access the capture source")?;
        runtime::run_headless(&mut runtime, args.duration.map(Duration::from_secs)).await;
        return Ok(());
    }

    // query the terminal before raw mode takes over stdin
    let picker = tui::create_picker(args.graphics.as_deref());
    let mut ui = tui::MonitorUI::new(picker, url);
    ui.run(&mut runtime).await.context("Terminal UI failed")?;

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let options = ServiceOptions {
        addr: args.addr,
        mode: args.mode,
        fixed: Detection::new(args.state, args.point.map(|(x, y)| Point::new(x, y))),
        latency: Duration::from_millis(args.latency_ms),
        drop_every: args.drop_every,
    };
    detector::serve(options)
        .await
        .context("Detector service failed")
}
