//! Session context.
//!
//! `Session` is the single owner of every mutable streaming flag:
//! whether the session is running, the connection state, the in-flight
//! marker, the result cache and the timer generations. It performs no
//! I/O. Each inbound [`Event`] is turned into zero or more [`Action`]s
//! which the runtime executes and whose outcomes come back as events.
//!
//! Sockets are numbered with a fresh [`LinkId`] per connect attempt and
//! timers carry a generation, so late events from a replaced socket or a
//! cancelled timer are dropped here instead of corrupting state.

mod cache;
mod connection;
mod transmit;

pub use cache::{RateMeter, ResultCache};

use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::protocol::Detection;

pub type LinkId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closed => "CLOSED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Reconnect,
    Watchdog,
}

/// Everything that can happen to a session
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SocketOpened { link: LinkId },
    SocketMessage { link: LinkId, text: String },
    /// Socket ended for any reason, including a connect that never opened
    SocketClosed { link: LinkId },
    /// A `Transmit` could not produce or hand off a payload
    SendFailed { link: LinkId },
    Timer { kind: TimerKind, generation: u64 },
    /// A scheduling opportunity (one render tick)
    Tick,
}

/// Side effects requested by the session
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Connect { link: LinkId },
    /// Encode the current frame and send it on `link`
    Transmit { link: LinkId },
    Close { link: LinkId },
    /// Start (or restart) the timer of this kind
    StartTimer {
        kind: TimerKind,
        generation: u64,
        delay: Duration,
    },
    CancelTimer { kind: TimerKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub reconnect_delay: Duration,
    pub watchdog_timeout: Duration,
    pub min_send_interval: Option<Duration>,
}

impl Default for Timings {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

impl Timings {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            reconnect_delay: config.reconnect_delay(),
            watchdog_timeout: config.watchdog_timeout(),
            min_send_interval: config.min_send_interval(),
        }
    }
}

pub struct Session {
    timings: Timings,
    active: bool,
    state: ConnectionState,
    link: LinkId,
    in_flight: bool,
    /// A send attempt is waiting for the next tick
    deferred: bool,
    last_send: Option<Instant>,
    cache: ResultCache,
    rate: RateMeter,
    watchdog_generation: u64,
    watchdog_armed: bool,
    reconnect_generation: u64,
    reconnect_pending: bool,
    actions: Vec<Action>,
}

impl Session {
    pub fn new(timings: Timings) -> Self {
        Self {
            timings,
            active: false,
            state: ConnectionState::Closed,
            link: 0,
            in_flight: false,
            deferred: false,
            last_send: None,
            cache: ResultCache::default(),
            rate: RateMeter::default(),
            watchdog_generation: 0,
            watchdog_armed: false,
            reconnect_generation: 0,
            reconnect_pending: false,
            actions: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[cfg(test)]
    pub fn link(&self) -> LinkId {
        self.link
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn detection(&self) -> Detection {
        self.cache.get()
    }

    /// Completed round trips in the last full second
    pub fn round_trip_rate(&self) -> u32 {
        self.rate.rate()
    }

    /// Take the actions queued since the last call
    pub fn drain_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }

    /// Begin streaming: open a socket and let the transmission loop
    /// wait for it.
    pub fn start(&mut self, now: Instant) {
        if self.active {
            debug!("start ignored: session already active");
            return;
        }
        info!("session starting");
        self.active = true;
        self.in_flight = false;
        self.deferred = false;
        self.last_send = None;
        self.cache.clear();
        self.rate.reset();
        self.connect();
        self.try_send(now);
    }

    /// Stop streaming. Suppresses reconnects, cancels timers, closes the
    /// socket and resets the cache. Calling it again is a no-op.
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        info!("session stopping");
        self.active = false;
        self.cancel_watchdog();
        self.cancel_reconnect();
        if self.state != ConnectionState::Closed {
            self.actions.push(Action::Close { link: self.link });
            self.state = ConnectionState::Closed;
        }
        self.in_flight = false;
        self.deferred = false;
        self.cache.clear();
        self.rate.reset();
    }

    pub fn handle(&mut self, event: Event, now: Instant) {
        match event {
            Event::SocketOpened { link } => {
                if self.is_current(link) {
                    self.on_opened(now);
                }
            }
            Event::SocketMessage { link, text } => {
                if self.is_current(link) {
                    self.on_message(&text, now);
                }
            }
            Event::SocketClosed { link } => {
                if self.is_current(link) {
                    self.on_closed();
                }
            }
            Event::SendFailed { link } => {
                if self.is_current(link) {
                    self.on_send_failed();
                }
            }
            Event::Timer { kind, generation } => match kind {
                TimerKind::Reconnect => self.on_reconnect_due(generation),
                TimerKind::Watchdog => self.on_watchdog(generation, now),
            },
            Event::Tick => self.on_tick(now),
        }
    }

    fn is_current(&self, link: LinkId) -> bool {
        if link != self.link {
            debug!(link, current = self.link, "ignoring event from stale link");
            return false;
        }
        true
    }
}
