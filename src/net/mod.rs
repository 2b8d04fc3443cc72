//! Socket plumbing between the session and the detector service.
//!
//! Each connect attempt gets its own task. The task reports back through
//! the session event queue and ends when either side closes; it always
//! finishes with exactly one `SocketClosed`, also when the connect itself
//! fails.

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, warn};

use crate::session::{Event, LinkId};

#[derive(Debug, Error)]
#[error("link {0} is closed")]
pub struct LinkClosed(pub LinkId);

/// Sending half of one socket. Dropping it closes the socket.
#[derive(Debug)]
pub struct Link {
    id: LinkId,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
}

impl Link {
    pub fn new(id: LinkId, outgoing: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { id, outgoing }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Queue one binary payload for the socket
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), LinkClosed> {
        self.outgoing.send(bytes).map_err(|_| LinkClosed(self.id))
    }

    pub fn close(self) {
        debug!(link = self.id, "closing link");
    }
}

/// Opens sockets on behalf of the runtime
pub trait Connector {
    /// Start connecting. Progress is reported on `events`, tagged with `link`.
    fn connect(&self, link: LinkId, events: mpsc::UnboundedSender<Event>) -> Link;
}

/// WebSocket connector for the detector wire contract: binary JPEG out,
/// JSON text in.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    fn connect(&self, link: LinkId, events: mpsc::UnboundedSender<Event>) -> Link {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(self.url.clone(), link, rx, events));
        Link::new(link, tx)
    }
}

async fn run_socket(
    url: String,
    link: LinkId,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<Event>,
) {
    match connect_async(url.as_str()).await {
        Ok((ws_stream, _)) => {
            let _ = events.send(Event::SocketOpened { link });
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();

            loop {
                tokio::select! {
                    out = outgoing.recv() => match out {
                        Some(bytes) => {
                            if let Err(e) = ws_sender.send(WsMessage::Binary(bytes)).await {
                                debug!(link, "send failed: {}", e);
                                break;
                            }
                        }
                        None => {
                            // link dropped by the session
                            let _ = ws_sender.send(WsMessage::Close(None)).await;
                            break;
                        }
                    },
                    msg = ws_receiver.next() => match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            let _ = events.send(Event::SocketMessage { link, text });
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!(link, "socket error: {}", e);
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
        Err(e) => {
            warn!(link, "failed to connect to {}: {}", url, e);
        }
    }
    let _ = events.send(Event::SocketClosed { link });
}
