use tracing::{debug, info, warn};

use super::{Action, ConnectionState, Session, TimerKind};

// Connection manager: the only code that moves `state`.
impl Session {
    /// Open a new socket under a fresh link id
    pub(super) fn connect(&mut self) {
        self.link += 1;
        self.state = ConnectionState::Connecting;
        debug!(link = self.link, "connecting");
        self.actions.push(Action::Connect { link: self.link });
    }

    pub(super) fn on_opened(&mut self, now: std::time::Instant) {
        if !self.active || self.state != ConnectionState::Connecting {
            return;
        }
        info!(link = self.link, "connected to detector");
        self.state = ConnectionState::Open;
        self.arm_watchdog();
        self.try_send(now);
    }

    pub(super) fn on_closed(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        self.in_flight = false;
        self.deferred = false;
        self.cache.clear();
        self.cancel_watchdog();

        if self.active {
            info!(
                link = self.link,
                delay_ms = self.timings.reconnect_delay.as_millis() as u64,
                "detector connection lost, reconnecting"
            );
            self.reconnect_generation += 1;
            self.reconnect_pending = true;
            self.actions.push(Action::StartTimer {
                kind: TimerKind::Reconnect,
                generation: self.reconnect_generation,
                delay: self.timings.reconnect_delay,
            });
        }
    }

    pub(super) fn on_reconnect_due(&mut self, generation: u64) {
        if !self.reconnect_pending || generation != self.reconnect_generation {
            debug!(generation, "ignoring stale reconnect timer");
            return;
        }
        self.reconnect_pending = false;
        if self.active && self.state == ConnectionState::Closed {
            self.connect();
        }
    }

    /// Liveness repair: the socket is left alone, the loop is kicked.
    pub(super) fn on_watchdog(&mut self, generation: u64, now: std::time::Instant) {
        if !self.watchdog_armed || generation != self.watchdog_generation {
            debug!(generation, "ignoring stale watchdog timer");
            return;
        }
        self.watchdog_armed = false;
        if !self.active || self.state != ConnectionState::Open {
            return;
        }
        warn!(
            in_flight = self.in_flight,
            "no detector result within {:?}, forcing a send",
            self.timings.watchdog_timeout
        );
        // a lost reply leaves in_flight set; clear it or the forced send is refused
        self.in_flight = false;
        self.try_send(now);
    }

    pub(super) fn arm_watchdog(&mut self) {
        self.watchdog_generation += 1;
        self.watchdog_armed = true;
        self.actions.push(Action::StartTimer {
            kind: TimerKind::Watchdog,
            generation: self.watchdog_generation,
            delay: self.timings.watchdog_timeout,
        });
    }

    pub(super) fn cancel_watchdog(&mut self) {
        if self.watchdog_armed {
            self.watchdog_armed = false;
            self.watchdog_generation += 1;
            self.actions.push(Action::CancelTimer {
                kind: TimerKind::Watchdog,
            });
        }
    }

    pub(super) fn cancel_reconnect(&mut self) {
        if self.reconnect_pending {
            self.reconnect_pending = false;
            self.reconnect_generation += 1;
            self.actions.push(Action::CancelTimer {
                kind: TimerKind::Reconnect,
            });
        }
    }
}
