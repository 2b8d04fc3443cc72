//! Terminal graphics protocol selection.
//!
//! Tries, in order: an explicit `--graphics` choice, a stdio capability
//! query, then environment-variable heuristics. Halfblocks works on any
//! 24-bit color terminal and is the final fallback.

use ratatui_image::picker::{Picker, ProtocolType};
use tracing::{info, warn};

/// Must be called before entering raw mode / alternate screen
pub fn create_picker(force_protocol: Option<&str>) -> Picker {
    if let Some(name) = force_protocol {
        match parse_protocol(name) {
            Some(proto) => {
                let mut picker = Picker::halfblocks();
                picker.set_protocol_type(proto);
                info!("graphics: forced {:?}", proto);
                return picker;
            }
            None => warn!("unknown graphics protocol '{}', using auto-detect", name),
        }
    }

    match Picker::from_query_stdio() {
        Ok(picker) => {
            info!("graphics: detected {:?}", picker.protocol_type());
            picker
        }
        Err(_) => {
            let proto = guess_protocol(
                &env_var("TERM_PROGRAM"),
                &env_var("TERM"),
                !env_var("WT_SESSION").is_empty(),
            );
            let mut picker = Picker::halfblocks();
            if proto != ProtocolType::Halfblocks {
                picker.set_protocol_type(proto);
            }
            info!("graphics: {:?} (env heuristic)", proto);
            picker
        }
    }
}

fn parse_protocol(name: &str) -> Option<ProtocolType> {
    match name.to_lowercase().as_str() {
        "sixel" => Some(ProtocolType::Sixel),
        "kitty" => Some(ProtocolType::Kitty),
        "iterm2" | "iterm" => Some(ProtocolType::Iterm2),
        "halfblocks" | "half" | "text" => Some(ProtocolType::Halfblocks),
        _ => None,
    }
}

fn env_var(key: &str) -> String {
    std::env::var(key).unwrap_or_default()
}

fn guess_protocol(term_program: &str, term: &str, windows_terminal: bool) -> ProtocolType {
    if term_program.contains("WezTerm") {
        ProtocolType::Sixel
    } else if term_program.contains("iTerm") {
        ProtocolType::Iterm2
    } else if term.contains("xterm-kitty")
        || term_program.contains("kitty")
        || term_program.to_lowercase().contains("ghostty")
    {
        ProtocolType::Kitty
    } else if windows_terminal {
        ProtocolType::Sixel
    } else {
        ProtocolType::Halfblocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_protocol_names() {
        assert_eq!(parse_protocol("Sixel"), Some(ProtocolType::Sixel));
        assert_eq!(parse_protocol("iterm"), Some(ProtocolType::Iterm2));
        assert_eq!(parse_protocol("text"), Some(ProtocolType::Halfblocks));
        assert_eq!(parse_protocol("braille"), None);
    }

    #[test]
    fn test_guess_from_environment() {
        assert_eq!(guess_protocol("WezTerm", "", false), ProtocolType::Sixel);
        assert_eq!(guess_protocol("", "xterm-kitty", false), ProtocolType::Kitty);
        assert_eq!(guess_protocol("ghostty", "", false), ProtocolType::Kitty);
        assert_eq!(guess_protocol("", "xterm-256color", true), ProtocolType::Sixel);
        assert_eq!(
            guess_protocol("Apple_Terminal", "xterm-256color", false),
            ProtocolType::Halfblocks
        );
    }
}
