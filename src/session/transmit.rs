use std::time::Instant;
use tracing::{debug, warn};

use super::{Action, ConnectionState, Session};
use crate::protocol::Detection;

// Transmission loop. Not timer driven: every completed round trip (or
// failure) re-arms the next attempt, so a slow detector slows the send
// rate instead of building a queue.
impl Session {
    /// Send the current frame if the link is open and nothing is in flight
    pub(super) fn try_send(&mut self, now: Instant) {
        if !self.active {
            return;
        }
        match self.state {
            ConnectionState::Connecting => {
                // retried on the next tick, then again once OPEN
                self.deferred = true;
            }
            ConnectionState::Closed => {
                self.deferred = false;
            }
            ConnectionState::Open => {
                if self.in_flight {
                    return;
                }
                if let (Some(min), Some(last)) = (self.timings.min_send_interval, self.last_send) {
                    if now.saturating_duration_since(last) < min {
                        self.deferred = true;
                        return;
                    }
                }
                self.in_flight = true;
                self.deferred = false;
                self.last_send = Some(now);
                self.actions.push(Action::Transmit { link: self.link });
            }
        }
    }

    pub(super) fn on_message(&mut self, text: &str, now: Instant) {
        if self.state != ConnectionState::Open {
            return;
        }
        self.in_flight = false;
        match Detection::decode(text) {
            Ok(detection) => {
                debug!(state = %detection.state, point = ?detection.point, "detector result");
                self.cache.replace(detection);
                self.rate.record(now);
                self.arm_watchdog();
            }
            Err(e) => {
                warn!("discarding detector message: {}", e);
            }
        }
        self.try_send(now);
    }

    pub(super) fn on_send_failed(&mut self) {
        debug!(link = self.link, "send failed, retrying on next tick");
        self.in_flight = false;
        self.deferred = true;
    }

    pub(super) fn on_tick(&mut self, now: Instant) {
        if self.deferred {
            self.try_send(now);
        }
    }
}
