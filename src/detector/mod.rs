//! Stand-in detector service.
//!
//! Answers each binary JPEG frame with one JSON text Result. Frames that
//! do not decode are skipped without a reply. Keeps no state between
//! connections.

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::f64::consts::TAU;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use crate::protocol::{classify_in_frame, Detection, HazardState, Point};

/// Steps in one full orbit cycle
const ORBIT_STEPS: u64 = 120;

/// Where replies come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Always SAFE, no point
    Safe,
    /// A point circling the frame center, classified by distance
    Orbit,
    /// The configured state and point
    Fixed,
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub addr: String,
    pub mode: Mode,
    /// Reply for `Mode::Fixed`
    pub fixed: Detection,
    /// Delay before each reply
    pub latency: Duration,
    /// Withhold every Nth reply (0 disables)
    pub drop_every: u64,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            mode: Mode::Orbit,
            fixed: Detection::default(),
            latency: Duration::ZERO,
            drop_every: 0,
        }
    }
}

/// Point on the orbit at `step`, for a `width`×`height` frame. The radius
/// swings between 0.1h and 0.45h so all three states come up.
pub fn orbit_point(step: u64, width: u32, height: u32) -> Point {
    let h = height as f64;
    let phase = (step % ORBIT_STEPS) as f64 / ORBIT_STEPS as f64 * TAU;
    let angle = (step as f64 * 6.0).to_radians();
    let radius = 0.275 * h + 0.175 * h * phase.cos();
    Point::new(
        width as f64 / 2.0 + radius * angle.cos(),
        h / 2.0 + radius * angle.sin(),
    )
}

/// Per-connection reply generator
#[derive(Debug, Clone)]
pub struct Responder {
    mode: Mode,
    fixed: Detection,
    step: u64,
}

impl Responder {
    pub fn new(mode: Mode, fixed: Detection) -> Self {
        Self {
            mode,
            fixed,
            step: 0,
        }
    }

    pub fn respond(&mut self, width: u32, height: u32) -> Detection {
        match self.mode {
            Mode::Safe => Detection::new(HazardState::Safe, None),
            Mode::Fixed => self.fixed,
            Mode::Orbit => {
                let point = orbit_point(self.step, width, height);
                self.step += 1;
                Detection::new(classify_in_frame(point, width, height), Some(point))
            }
        }
    }
}

pub struct DetectorService {
    listener: TcpListener,
    options: ServiceOptions,
}

impl DetectorService {
    pub async fn bind(options: ServiceOptions) -> Result<Self> {
        let listener = TcpListener::bind(&options.addr).await?;
        Ok(Self { listener, options })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        info!(
            addr = %self.local_addr()?,
            mode = ?self.options.mode,
            "detector service listening"
        );

        loop {
            let (stream, peer) = self.listener.accept().await?;
            let options = self.options.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, options).await {
                    let err_str = e.to_string();
                    // plain HTTP or port-scan connections
                    if !err_str.contains("Connection: upgrade") && !err_str.contains("protocol error")
                    {
                        warn!(%peer, "connection error: {}", e);
                    }
                }
            });
        }
    }
}

async fn handle_connection(stream: TcpStream, options: ServiceOptions) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut responder = Responder::new(options.mode, options.fixed);
    let mut received: u64 = 0;
    info!("client connected");

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(WsMessage::Binary(data)) => {
                let frame = match image::load_from_memory_with_format(&data, image::ImageFormat::Jpeg)
                {
                    Ok(img) => img,
                    Err(e) => {
                        debug!("skipping undecodable frame: {}", e);
                        continue;
                    }
                };
                received += 1;
                let result = responder.respond(frame.width(), frame.height());

                if options.drop_every > 0 && received % options.drop_every == 0 {
                    debug!(frame = received, "withholding reply");
                    continue;
                }
                if !options.latency.is_zero() {
                    tokio::time::sleep(options.latency).await;
                }
                ws_sender.send(WsMessage::Text(result.encode()?)).await?;
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    info!(frames = received, "client disconnected");
    Ok(())
}

/// Bind and serve until the process exits
pub async fn serve(options: ServiceOptions) -> Result<()> {
    let service = DetectorService::bind(options).await?;
    service.run().await
}
