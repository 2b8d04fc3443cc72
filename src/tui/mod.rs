mod picker;
mod render;

pub use picker::create_picker;

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use image::DynamicImage;
use ratatui::{backend::CrosstermBackend, Terminal};
use ratatui_image::picker::Picker;
use ratatui_image::protocol::StatefulProtocol;
use std::io;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::net::Connector;
use crate::render::{Composition, Overlay};
use crate::runtime::{Runtime, SessionStatus};

/// What a key press asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Toggle,
    Quit,
}

pub(crate) fn command_for(key: &KeyEvent) -> Option<Command> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Command::Quit),
        KeyCode::Char('q') | KeyCode::Esc => Some(Command::Quit),
        KeyCode::Char('s') | KeyCode::Char(' ') => Some(Command::Toggle),
        _ => None,
    }
}

/// Full-screen live view: composited frame on top, one status line below
pub struct MonitorUI {
    pub(crate) picker: Picker,
    pub(crate) protocol: Option<StatefulProtocol>,
    /// Label, color and marker of the frame on screen
    pub(crate) overlay: Option<Overlay>,
    pub(crate) status: SessionStatus,
    pub(crate) url: String,
}

impl MonitorUI {
    pub fn new(picker: Picker, url: impl Into<String>) -> Self {
        Self {
            picker,
            protocol: None,
            overlay: None,
            status: SessionStatus::default(),
            url: url.into(),
        }
    }

    pub async fn run<C: Connector>(&mut self, runtime: &mut Runtime<C>) -> Result<()> {
        // no mouse capture so native text selection still works
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_loop(&mut terminal, runtime).await;
        runtime.stop();

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    async fn run_loop<C: Connector>(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
        runtime: &mut Runtime<C>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(runtime.config().render_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let status_rx = runtime.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    while event::poll(Duration::ZERO)? {
                        if let Event::Key(key) = event::read()? {
                            match command_for(&key) {
                                Some(Command::Quit) => return Ok(()),
                                Some(Command::Toggle) => self.toggle(runtime),
                                None => {}
                            }
                        }
                    }

                    let composition = runtime.tick(chrono::Utc::now().timestamp_millis());
                    self.status = status_rx.borrow().clone();
                    self.show(composition);
                    terminal.draw(|f| self.ui(f))?;
                }
                Some(event) = runtime.next_event() => runtime.dispatch(event),
            }
        }
    }

    fn toggle<C: Connector>(&mut self, runtime: &mut Runtime<C>) {
        if runtime.is_running() {
            runtime.stop();
        } else if let Err(e) = runtime.start() {
            // kept visible through SessionStatus::camera_error
            tracing::debug!("start failed: {}", e);
        }
    }

    fn show(&mut self, composition: Option<Composition>) {
        match composition {
            Some(Composition { image, overlay }) => {
                let image = DynamicImage::ImageRgb8(image);
                self.protocol = Some(self.picker.new_resize_protocol(image));
                self.overlay = Some(overlay);
            }
            None => {
                self.protocol = None;
                self.overlay = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        }
    }

    #[test]
    fn test_key_commands() {
        assert_eq!(
            command_for(&key(KeyCode::Char('s'), KeyModifiers::NONE)),
            Some(Command::Toggle)
        );
        assert_eq!(
            command_for(&key(KeyCode::Char('q'), KeyModifiers::NONE)),
            Some(Command::Quit)
        );
        assert_eq!(command_for(&key(KeyCode::Esc, KeyModifiers::NONE)), Some(Command::Quit));
        assert_eq!(
            command_for(&key(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(Command::Quit)
        );
        assert_eq!(command_for(&key(KeyCode::Char('x'), KeyModifiers::NONE)), None);
    }

    #[test]
    fn test_key_release_is_ignored() {
        let mut release = key(KeyCode::Char('s'), KeyModifiers::NONE);
        release.kind = KeyEventKind::Release;
        assert_eq!(command_for(&release), None);
    }
}
