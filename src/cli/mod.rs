use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::capture::SourceKind;
use crate::config::SessionConfig;
use crate::detector::Mode;
use crate::protocol::HazardState;

#[derive(Parser)]
#[command(name = "wardcam")]
#[command(about = "📷 Live capture client with a remote hazard detector", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream frames to a detector and show the composited view
    Run(RunArgs),

    /// Run a stand-in detector service
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Detector WebSocket URL
    #[arg(short, long)]
    pub url: Option<String>,

    /// JSON config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Capture source
    #[arg(short, long, value_enum, default_value = "screen")]
    pub source: SourceKind,

    /// JPEG quality for transmitted frames (1-100)
    #[arg(short, long)]
    pub quality: Option<u8>,

    /// Upper bound on frames sent per second
    #[arg(long)]
    pub max_send_fps: Option<u32>,

    /// Render ticks per second
    #[arg(long)]
    pub render_fps: Option<u32>,

    /// No terminal UI; log status once per second
    #[arg(long)]
    pub headless: bool,

    /// Stop after this many seconds (headless only)
    #[arg(long, requires = "headless")]
    pub duration: Option<u64>,

    /// Force a graphics protocol: sixel, kitty, iterm2, halfblocks
    #[arg(short, long)]
    pub graphics: Option<String>,

    /// Write logs here (the TUI otherwise discards them)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl RunArgs {
    /// Explicit flags win over file values
    pub fn apply(&self, config: &mut SessionConfig) {
        if let Some(url) = &self.url {
            config.service_url = url.clone();
        }
        if let Some(quality) = self.quality {
            config.jpeg_quality = quality;
        }
        if let Some(fps) = self.max_send_fps {
            config.max_send_fps = Some(fps);
        }
        if let Some(fps) = self.render_fps {
            config.render_fps = fps;
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    pub addr: String,

    /// Where replies come from
    #[arg(short, long, value_enum, default_value = "orbit")]
    pub mode: Mode,

    /// State for `--mode fixed`
    #[arg(long, value_parser = parse_state, default_value = "DANGER")]
    pub state: HazardState,

    /// Point for `--mode fixed`, as X,Y in transmission pixels
    #[arg(long, value_parser = parse_point)]
    pub point: Option<(f64, f64)>,

    /// Delay before each reply, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub latency_ms: u64,

    /// Withhold every Nth reply (0 disables)
    #[arg(long, default_value_t = 0)]
    pub drop_every: u64,
}

fn parse_state(s: &str) -> Result<HazardState, String> {
    match s.to_uppercase().as_str() {
        "SAFE" => Ok(HazardState::Safe),
        "WARNING" => Ok(HazardState::Warning),
        "DANGER" => Ok(HazardState::Danger),
        other => Err(format!("unknown state '{}'", other)),
    }
}

fn parse_point(s: &str) -> Result<(f64, f64), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got '{}'", s))?;
    let x: f64 = x.trim().parse().map_err(|e| format!("bad x: {}", e))?;
    let y: f64 = y.trim().parse().map_err(|e| format!("bad y: {}", e))?;
    Ok((x, y))
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
