//! Message parser - Parses raw input lines into structured messages

use crate::domain::entities::{Content, Message};

/// Parses incoming lines into structured Message objects
pub struct MessageParser {
    command_prefix: String,
}

impl MessageParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.command_prefix
    }

    /// Parse a text line sent by `sender`
    pub fn parse(&self, text: impl Into<String>, sender: Option<String>) -> Message {
        let text = text.into();
        let trimmed = text.trim();

        if trimmed.is_empty() {
            return Message::new(Content::Empty).with_sender_opt(sender);
        }

        // Check if it's a command
        if let Some(rest) = trimmed.strip_prefix(self.command_prefix.as_str()) {
            return self.parse_command(rest, sender);
        }

        // Regular text message
        Message::from_text(trimmed).with_sender_opt(sender)
    }

    fn parse_command(&self, cmd_text: &str, sender: Option<String>) -> Message {
        let mut parts = tokenize(cmd_text).into_iter();
        let name = parts.next().unwrap_or_default().to_lowercase();
        let args: Vec<String> = parts.collect();

        Message::from_command(name, args).with_sender_opt(sender)
    }
}

/// Whitespace split where double quotes group words, so `1="new text"`
/// yields the single token `1=new text`
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut started = false;

    for c in input.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                started = true;
            }
            c if c.is_whitespace() && !quoted => {
                if started {
                    tokens.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                current.push(c);
                started = true;
            }
        }
    }
    if started {
        tokens.push(current);
    }
    tokens
}
