use crate::session::{ChatGateway, Incoming};
use jukebox_core::{ChannelId, ParticipantId};
use thiserror::Error;
use tracing::debug;

pub const CONSOLE_CHANNEL: &str = "console";

#[derive(Debug, Default)]
pub struct ConsoleGateway {
    presence: Option<String>,
}

impl ConsoleGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatGateway for ConsoleGateway {
    fn send_message(&mut self, channel: &ChannelId, text: &str) {
        for line in text.lines() {
            println!("[#{channel}] {line}");
        }
    }

    fn send_error(&mut self, channel: &ChannelId, text: &str) {
        for line in text.lines() {
            println!("[#{channel}] error: {line}");
        }
    }

    fn set_listening_to(&mut self, title: Option<&str>) {
        let title = title.map(str::to_string);
        if title == self.presence {
            return;
        }
        match &title {
            Some(t) => println!("(listening to {t})"),
            None => println!("(presence cleared)"),
        }
        self.presence = title;
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LineError {
    #[error("expected `name: message` or `name[role,...]: message`")]
    MissingAuthor,
    #[error("role list is missing its closing `]`")]
    UnclosedRoles,
}

/// Parses `alice: !play foo` or `alice[dj,mod]: !forceskip`.
///
/// Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Incoming>, LineError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (head, content) = line.split_once(':').ok_or(LineError::MissingAuthor)?;
    let head = head.trim();

    let (author, roles) = match head.split_once('[') {
        Some((author, rest)) => {
            let roles = rest.strip_suffix(']').ok_or(LineError::UnclosedRoles)?;
            let roles = roles
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
            (author.trim(), roles)
        }
        None => (head, Vec::new()),
    };
    if author.is_empty() {
        return Err(LineError::MissingAuthor);
    }

    debug!(author, "console line");
    Ok(Some(Incoming {
        author: ParticipantId::new(author),
        roles,
        channel: ChannelId::new(CONSOLE_CHANNEL),
        content: content.trim().to_string(),
    }))
}
