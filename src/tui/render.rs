use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};
use ratatui_image::StatefulImage;

use image::Rgb;

use crate::protocol::HazardState;
use crate::render::Overlay;
use crate::runtime::SessionStatus;

use super::MonitorUI;

fn to_color(rgb: Rgb<u8>) -> Color {
    Color::Rgb(rgb[0], rgb[1], rgb[2])
}

/// Bottom bar: hazard label, marker, round-trip rate, link state, key hints
pub(crate) fn status_line(status: &SessionStatus, overlay: &Overlay) -> Line<'static> {
    let mut label_style = Style::default()
        .fg(to_color(overlay.color))
        .add_modifier(Modifier::BOLD);
    // blinks with the red wash on the image
    if overlay.state == HazardState::Danger && overlay.flash {
        label_style = label_style.add_modifier(Modifier::REVERSED);
    }

    let mut spans = vec![Span::styled(format!(" {} ", overlay.label), label_style)];
    if let Some((x, y)) = overlay.marker {
        spans.push(Span::styled(
            format!("@{},{} ", x, y),
            Style::default().fg(Color::Gray),
        ));
    }
    spans.extend([
        Span::raw("│ "),
        Span::styled(format!("{} FPS", status.fps), Style::default().fg(Color::Cyan)),
        Span::raw(" │ "),
        Span::raw(status.connection.name().to_lowercase()),
        Span::raw(" │ "),
        Span::styled("s", Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        Span::raw(" start/stop │ "),
        Span::styled("q", Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        Span::raw(" quit"),
    ]);
    if let Some(err) = &status.camera_error {
        spans.push(Span::raw(" │ "));
        spans.push(Span::styled(err.clone(), Style::default().fg(Color::Red)));
    }
    Line::from(spans)
}

impl MonitorUI {
    pub(crate) fn ui(&mut self, f: &mut Frame) {
        let Some(overlay) = self.overlay else {
            self.render_landing(f);
            return;
        };

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(f.area());

        // no block around the image: borders make ratatui clear the area,
        // which flickers with Sixel/Kitty
        if let Some(ref mut protocol) = self.protocol {
            f.render_stateful_widget(StatefulImage::default(), chunks[0], protocol);
        }

        let status = Paragraph::new(status_line(&self.status, &overlay))
            .style(Style::default().bg(Color::DarkGray).fg(Color::White));
        f.render_widget(status, chunks[1]);
    }

    fn render_landing(&self, f: &mut Frame) {
        let mut lines = vec![
            Line::from(Span::styled(
                "📷 wardcam",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(
                format!("detector: {}", self.url),
                Style::default().fg(Color::DarkGray),
            )),
            Line::raw(""),
            Line::from(vec![
                Span::raw("Press "),
                Span::styled("s", Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
                Span::raw(" to start, "),
                Span::styled("q", Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
                Span::raw(" to quit"),
            ]),
        ];
        if let Some(err) = &self.status.camera_error {
            lines.push(Line::raw(""));
            lines.push(Line::from(Span::styled(
                err.clone(),
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            )));
            lines.push(Line::from(Span::styled(
                "Please ensure the device is available and access is granted.",
                Style::default().fg(Color::Red),
            )));
        }

        let landing = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        f.render_widget(landing, f.area());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Detection, Point};
    use crate::render::{compose, Scene};
    use crate::config::SessionConfig;
    use crate::session::ConnectionState;

    fn text(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    fn overlay(detection: Detection, now_ms: i64) -> Overlay {
        compose(&Scene::from_config(&SessionConfig::default()), None, detection, now_ms).overlay
    }

    #[test]
    fn test_status_line_contents() {
        let status = SessionStatus {
            running: true,
            connection: ConnectionState::Open,
            state: HazardState::Warning,
            fps: 12,
            camera_error: None,
        };
        let warning = overlay(
            Detection::new(HazardState::Warning, Some(Point::new(40.0, 30.0))),
            0,
        );
        let line = status_line(&status, &warning);
        let rendered = text(&line);
        assert!(rendered.starts_with(" WARNING @80,60 "));
        assert!(rendered.contains("12 FPS"));
        assert!(rendered.contains("open"));
        assert!(rendered.contains("s start/stop"));
        assert_eq!(line.spans[0].style.fg, Some(Color::Rgb(255, 255, 0)));
    }

    #[test]
    fn test_status_line_danger_blinks_with_flash() {
        let status = SessionStatus {
            running: true,
            connection: ConnectionState::Connecting,
            state: HazardState::Danger,
            fps: 0,
            camera_error: Some("no device".to_string()),
        };
        let danger = Detection::new(HazardState::Danger, None);

        let lit = status_line(&status, &overlay(danger, 0));
        assert!(text(&lit).starts_with(" DANGER DANGER "));
        assert_eq!(lit.spans[0].style.fg, Some(Color::Rgb(255, 0, 0)));
        assert!(lit.spans[0].style.add_modifier.contains(Modifier::REVERSED));
        assert_eq!(lit.spans.last().map(|s| s.content.as_ref()), Some("no device"));

        let dark = status_line(&status, &overlay(danger, 200));
        assert!(!dark.spans[0].style.add_modifier.contains(Modifier::REVERSED));
        assert!(dark.spans[0].style.add_modifier.contains(Modifier::BOLD));
    }
}
