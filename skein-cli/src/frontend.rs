//! Line-mode front end: every displayed line goes to stdout with a
//! timestamp and the server refnum.

use std::io::Write;

use chrono::{DateTime, Local};
use skein_sdk::{Event, Frontend, Levels, ServerRef};

pub struct Terminal {
    alt_nicks: Vec<String>,
    /// Next alternate to offer.
    next_alt: usize,
}

impl Terminal {
    pub fn new(alt_nicks: Vec<String>) -> Self {
        Self { alt_nicks, next_alt: 0 }
    }

    fn emit(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{line}");
    }
}

pub fn format_line(at: DateTime<Local>, server: ServerRef, target: Option<&str>, text: &str) -> String {
    match target {
        Some(t) => format!("{} [{server}] {t} {text}", at.format("%H:%M")),
        None => format!("{} [{server}] {text}", at.format("%H:%M")),
    }
}

impl Frontend for Terminal {
    fn display(&mut self, server: ServerRef, target: Option<&str>, _level: Levels, text: &str) {
        self.emit(&format_line(Local::now(), server, target, text));
    }

    /// Offer the configured alternates in order, skipping the one just
    /// refused. Once they are used up the user picks with /nick.
    fn prompt_nickname(&mut self, _server: ServerRef, rejected: &str) -> Option<String> {
        while let Some(nick) = self.alt_nicks.get(self.next_alt) {
            self.next_alt += 1;
            if !nick.eq_ignore_ascii_case(rejected) {
                return Some(nick.clone());
            }
        }
        None
    }

    fn event(&mut self, event: &Event) {
        match event {
            Event::Registered { .. } => self.next_alt = 0,
            Event::ReconnectScheduled {
                server, attempt, delay, ..
            } => {
                self.emit(&format_line(
                    Local::now(),
                    *server,
                    None,
                    &format!("*** Reconnecting in {:.1}s (attempt {attempt})", delay.as_secs_f64()),
                ));
            }
            _ => {}
        }
        tracing::debug!(?event, "Client event");
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const S: ServerRef = ServerRef { refnum: 1, generation: 1 };

    #[test]
    fn line_layout() {
        let at = Local.with_ymd_and_hms(2024, 5, 1, 9, 7, 0).unwrap();
        assert_eq!(format_line(at, S, Some("#rust"), "<bob> hi"), "09:07 [1] #rust <bob> hi");
        assert_eq!(format_line(at, S, None, "*** Connecting"), "09:07 [1] *** Connecting");
    }

    #[test]
    fn alternates_are_offered_once_each() {
        let mut t = Terminal::new(vec!["bob".into(), "bob2".into(), "bobby".into()]);
        assert_eq!(t.prompt_nickname(S, "bob").as_deref(), Some("bob2"));
        assert_eq!(t.prompt_nickname(S, "bob2").as_deref(), Some("bobby"));
        assert_eq!(t.prompt_nickname(S, "bobby"), None);

        t.event(&Event::Registered {
            server: S,
            nick: "bobby".into(),
        });
        assert_eq!(t.prompt_nickname(S, "bob").as_deref(), Some("bob2"));
    }
}
