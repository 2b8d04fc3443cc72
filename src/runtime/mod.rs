//! Event loop around a [`Session`].
//!
//! Network tasks and timer tasks only ever post events into one queue;
//! the owner of the runtime pulls them with [`Runtime::next_event`] and
//! feeds them back through [`Runtime::dispatch`], interleaved with render
//! ticks. All session state is therefore mutated from a single task.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capture::{CaptureError, CaptureFactory, CaptureSource, Frame};
use crate::config::SessionConfig;
use crate::encode::{Downscaler, EncodeError};
use crate::net::{Connector, Link, LinkClosed};
use crate::protocol::{Detection, HazardState};
use crate::render::{self, Composition, Scene};
use crate::session::{Action, ConnectionState, Event, LinkId, Session, TimerKind, Timings};

/// What the surrounding UI can observe
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub running: bool,
    pub connection: ConnectionState,
    pub state: HazardState,
    /// Completed round trips in the last full second
    pub fps: u32,
    /// User-facing capture failure from the last start attempt
    pub camera_error: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            running: false,
            connection: ConnectionState::Closed,
            state: HazardState::Safe,
            fps: 0,
            camera_error: None,
        }
    }
}

#[derive(Debug, Error)]
enum TransmitError {
    #[error("no capture frame available")]
    NoFrame,
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Link(#[from] LinkClosed),
    #[error("no open link")]
    NoLink,
}

pub struct Runtime<C: Connector> {
    config: SessionConfig,
    scene: Scene,
    session: Session,
    connector: C,
    capture_factory: CaptureFactory,
    capture: Option<Box<dyn CaptureSource>>,
    downscaler: Downscaler,
    link: Option<Link>,
    timers: HashMap<TimerKind, JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    status_tx: watch::Sender<SessionStatus>,
    camera_error: Option<String>,
}

impl<C: Connector> Runtime<C> {
    pub fn new(config: SessionConfig, connector: C, capture_factory: CaptureFactory) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(SessionStatus::default());
        Self {
            scene: Scene::from_config(&config),
            session: Session::new(Timings::from_config(&config)),
            downscaler: Downscaler::from_config(&config),
            config,
            connector,
            capture_factory,
            capture: None,
            link: None,
            timers: HashMap::new(),
            events_tx,
            events_rx,
            status_tx,
            camera_error: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.session.is_active()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.status_tx.borrow().clone()
    }

    pub fn detection(&self) -> Detection {
        self.session.detection()
    }

    pub fn current_frame(&self) -> Option<Frame> {
        self.capture.as_ref().and_then(|c| c.latest())
    }

    /// Acquire the capture source and begin streaming. On failure the
    /// error is also published as `camera_error`; calling again retries.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.session.is_active() {
            return Ok(());
        }
        match (self.capture_factory)(self.config.display) {
            Ok(source) => {
                debug!(
                    native = ?source.resolution(),
                    payload = ?self.downscaler.target(),
                    "capture source ready"
                );
                self.capture = Some(source);
                self.camera_error = None;
            }
            Err(e) => {
                warn!("capture unavailable: {}", e);
                self.camera_error = Some(e.to_string());
                self.publish();
                return Err(e);
            }
        }
        info!(url = %self.config.service_url, "starting session");
        self.session.start(now());
        self.execute();
        self.publish();
        Ok(())
    }

    /// Stop streaming. Repeated calls are no-ops.
    pub fn stop(&mut self) {
        if !self.session.is_active() {
            return;
        }
        self.session.stop();
        self.execute();

        // anything the session did not explicitly cancel goes too
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        if let Some(link) = self.link.take() {
            link.close();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.release();
        }
        info!("session stopped");
        self.publish();
    }

    /// Wait for the next network or timer event
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events_rx.recv().await
    }

    pub fn dispatch(&mut self, event: Event) {
        self.session.handle(event, now());
        self.execute();
        self.publish();
    }

    /// Dispatch every event already queued, without waiting
    #[cfg(test)]
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    /// One render-loop tick: give the transmission loop its scheduling
    /// opportunity, then composite the current frame and result.
    pub fn tick(&mut self, now_ms: i64) -> Option<Composition> {
        self.dispatch(Event::Tick);
        if !self.session.is_active() {
            return None;
        }
        let frame = self.current_frame();
        Some(render::compose(
            &self.scene,
            frame.as_ref(),
            self.session.detection(),
            now_ms,
        ))
    }

    fn execute(&mut self) {
        for action in self.session.drain_actions() {
            match action {
                Action::Connect { link } => {
                    debug!(link, "opening link");
                    let new_link = self.connector.connect(link, self.events_tx.clone());
                    if let Some(old) = self.link.replace(new_link) {
                        old.close();
                    }
                }
                Action::Transmit { link } => {
                    if let Err(e) = self.transmit(link) {
                        debug!(link, "transmit failed: {}", e);
                        let _ = self.events_tx.send(Event::SendFailed { link });
                    }
                }
                Action::Close { link } => {
                    if self.link.as_ref().map(Link::id) == Some(link) {
                        if let Some(l) = self.link.take() {
                            l.close();
                        }
                    }
                }
                Action::StartTimer {
                    kind,
                    generation,
                    delay,
                } => self.start_timer(kind, generation, delay),
                Action::CancelTimer { kind } => {
                    if let Some(timer) = self.timers.remove(&kind) {
                        timer.abort();
                    }
                }
            }
        }
    }

    fn transmit(&mut self, link: LinkId) -> Result<(), TransmitError> {
        let frame = self.current_frame().ok_or(TransmitError::NoFrame)?;
        let payload = self.downscaler.encode(&frame)?;
        let target = self
            .link
            .as_ref()
            .filter(|l| l.id() == link)
            .ok_or(TransmitError::NoLink)?;
        target.send(payload.bytes)?;
        Ok(())
    }

    fn start_timer(&mut self, kind: TimerKind, generation: u64, delay: Duration) {
        let events = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::Timer { kind, generation });
        });
        if let Some(previous) = self.timers.insert(kind, handle) {
            previous.abort();
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(SessionStatus {
            running: self.session.is_active(),
            connection: self.session.state(),
            state: self.session.detection().state,
            fps: self.session.round_trip_rate(),
            camera_error: self.camera_error.clone(),
        });
    }
}

impl<C: Connector> Drop for Runtime<C> {
    fn drop(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}

/// Session clock. Goes through tokio so paused-time tests stay consistent.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Run the render loop without a terminal UI, logging status once per
/// second. Stops the session and returns after `duration` if given.
pub async fn run_headless<C: Connector>(
    runtime: &mut Runtime<C>,
    duration: Option<Duration>,
) {
    let mut ticker = tokio::time::interval(runtime.config().render_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut report = tokio::time::interval(Duration::from_secs(1));
    let deadline = duration.map(|d| tokio::time::Instant::now() + d);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = runtime.tick(chrono::Utc::now().timestamp_millis());
            }
            _ = report.tick() => {
                let status = runtime.status();
                let detection = runtime.detection();
                info!(
                    state = %status.state,
                    point = ?detection.point,
                    fps = status.fps,
                    connection = status.connection.name(),
                    "status"
                );
            }
            Some(event) = runtime.next_event() => runtime.dispatch(event),
            _ = sleep_until(deadline) => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    runtime.stop();
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PatternSource;
    use crate::config::Size;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Records connect attempts and keeps every link's outgoing queue
    #[derive(Clone, Default)]
    struct FakeConnector {
        links: Arc<Mutex<Vec<(LinkId, mpsc::UnboundedReceiver<Vec<u8>>)>>>,
    }

    impl Connector for FakeConnector {
        fn connect(&self, link: LinkId, _events: mpsc::UnboundedSender<Event>) -> Link {
            let (tx, rx) = mpsc::unbounded_channel();
            self.links.lock().unwrap().push((link, rx));
            Link::new(link, tx)
        }
    }

    impl FakeConnector {
        fn attempts(&self) -> usize {
            self.links.lock().unwrap().len()
        }

        /// Payloads sent on `link` since the last call
        fn sent(&self, link: LinkId) -> usize {
            let mut links = self.links.lock().unwrap();
            let (_, rx) = links.iter_mut().find(|(id, _)| *id == link).unwrap();
            let mut count = 0;
            while let Ok(bytes) = rx.try_recv() {
                assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
                count += 1;
            }
            count
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            display: Size::new(64, 48),
            transmission: Size::new(32, 24),
            object: crate::config::ReferenceObject {
                center: (32, 24),
                radius: 5,
            },
            ..SessionConfig::default()
        }
    }

    fn pattern_factory() -> CaptureFactory {
        Box::new(|size| Ok(Box::new(PatternSource::new(size)) as Box<dyn CaptureSource>))
    }

    fn runtime() -> (Runtime<FakeConnector>, FakeConnector) {
        let connector = FakeConnector::default();
        let rt = Runtime::new(config(), connector.clone(), pattern_factory());
        (rt, connector)
    }

    const SAFE: &str = r#"{"state":"SAFE","point":null}"#;

    #[tokio::test(start_paused = true)]
    async fn test_start_opens_link_and_sends_on_open() {
        let (mut rt, conn) = runtime();
        rt.start().unwrap();
        assert_eq!(conn.attempts(), 1);
        assert_eq!(rt.status().connection, ConnectionState::Connecting);
        assert_eq!(conn.sent(1), 0);

        rt.dispatch(Event::SocketOpened { link: 1 });
        assert_eq!(conn.sent(1), 1);

        // ticks while a payload is in flight send nothing
        for _ in 0..10 {
            rt.tick(0);
        }
        assert_eq!(conn.sent(1), 0);

        rt.dispatch(Event::SocketMessage { link: 1, text: SAFE.into() });
        assert_eq!(conn.sent(1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_exact_delay() {
        let (mut rt, conn) = runtime();
        rt.start().unwrap();
        rt.dispatch(Event::SocketOpened { link: 1 });
        rt.dispatch(Event::SocketClosed { link: 1 });
        let closed_at = tokio::time::Instant::now();

        tokio::time::sleep(Duration::from_millis(999)).await;
        rt.pump();
        assert_eq!(conn.attempts(), 1);

        let event = rt.next_event().await.unwrap();
        assert!(matches!(
            event,
            Event::Timer { kind: TimerKind::Reconnect, .. }
        ));
        let elapsed = closed_at.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1010));

        rt.dispatch(event);
        assert_eq!(conn.attempts(), 2);
        assert_eq!(rt.status().connection, ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_mid_session_recovers() {
        let (mut rt, conn) = runtime();
        rt.start().unwrap();
        rt.dispatch(Event::SocketOpened { link: 1 });
        rt.dispatch(Event::SocketMessage {
            link: 1,
            text: r#"{"state":"DANGER","point":[16,12]}"#.into(),
        });
        assert_eq!(rt.status().state, HazardState::Danger);

        rt.dispatch(Event::SocketClosed { link: 1 });
        assert_eq!(rt.status().state, HazardState::Safe);
        let composed = rt.tick(0).unwrap();
        assert_eq!(composed.overlay.label, "SAFE");

        let event = rt.next_event().await.unwrap();
        rt.dispatch(event);
        rt.dispatch(Event::SocketOpened { link: 2 });
        assert_eq!(rt.status().connection, ConnectionState::Open);
        assert_eq!(conn.sent(2), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_fires_once_then_resets() {
        let (mut rt, conn) = runtime();
        rt.start().unwrap();
        let opened_at = tokio::time::Instant::now();
        rt.dispatch(Event::SocketOpened { link: 1 });
        assert_eq!(conn.sent(1), 1);

        // the reply never comes
        let event = rt.next_event().await.unwrap();
        assert!(matches!(
            event,
            Event::Timer { kind: TimerKind::Watchdog, .. }
        ));
        assert!(opened_at.elapsed() >= Duration::from_secs(2));
        rt.dispatch(event);
        assert_eq!(conn.sent(1), 1);

        // no second forced send without a result in between
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(rt.pump(), 0);
        assert_eq!(conn.sent(1), 0);

        // a result re-arms both the loop and the watchdog
        rt.dispatch(Event::SocketMessage { link: 1, text: SAFE.into() });
        assert_eq!(conn.sent(1), 1);
        let event = rt.next_event().await.unwrap();
        assert!(matches!(
            event,
            Event::Timer { kind: TimerKind::Watchdog, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_silences_timers() {
        let (mut rt, conn) = runtime();
        rt.start().unwrap();
        rt.dispatch(Event::SocketOpened { link: 1 });
        rt.dispatch(Event::SocketClosed { link: 1 });

        rt.stop();
        rt.stop();
        assert!(!rt.is_running());
        assert!(rt.current_frame().is_none());
        assert_eq!(rt.status(), SessionStatus::default());
        assert!(rt.tick(0).is_none());

        tokio::time::sleep(Duration::from_secs(5)).await;
        rt.pump();
        assert_eq!(conn.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failure_is_reported_and_retryable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_factory = calls.clone();
        let factory: CaptureFactory = Box::new(move |size| {
            if calls_factory.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(CaptureError::Unavailable("permission denied".into()))
            } else {
                Ok(Box::new(PatternSource::new(size)) as Box<dyn CaptureSource>)
            }
        });
        let conn = FakeConnector::default();
        let mut rt = Runtime::new(config(), conn.clone(), factory);

        assert!(rt.start().is_err());
        let status = rt.status();
        assert!(!status.running);
        assert!(status.camera_error.unwrap().contains("permission denied"));
        assert_eq!(conn.attempts(), 0);

        rt.start().unwrap();
        assert!(rt.status().camera_error.is_none());
        assert_eq!(conn.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_frame_fails_send_and_retries_on_tick() {
        struct Blind;
        impl CaptureSource for Blind {
            fn resolution(&self) -> Size {
                Size::new(64, 48)
            }
            fn latest(&self) -> Option<Frame> {
                None
            }
            fn release(&mut self) {}
        }
        let conn = FakeConnector::default();
        let factory: CaptureFactory =
            Box::new(|_| Ok(Box::new(Blind) as Box<dyn CaptureSource>));
        let mut rt = Runtime::new(config(), conn.clone(), factory);
        rt.start().unwrap();
        rt.dispatch(Event::SocketOpened { link: 1 });

        assert_eq!(rt.pump(), 1);
        assert_eq!(conn.sent(1), 0);

        // tick retries, fails again, and nothing spins in between
        rt.tick(0);
        assert_eq!(rt.pump(), 1);
        assert_eq!(rt.pump(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_safe_service_renders_safe_without_marker() {
        let (mut rt, conn) = runtime();
        rt.start().unwrap();
        rt.dispatch(Event::SocketOpened { link: 1 });

        for _ in 0..5 {
            assert_eq!(conn.sent(1), 1);
            tokio::time::sleep(Duration::from_millis(10)).await;
            rt.dispatch(Event::SocketMessage { link: 1, text: SAFE.into() });
        }
        let composed = rt.tick(0).unwrap();
        assert_eq!(composed.overlay.label, "SAFE");
        assert!(composed.overlay.marker.is_none());
        assert!(!composed.overlay.flash);
    }
}
