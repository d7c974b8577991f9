use chrono::{DateTime, Utc};

/// Message content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Command { name: String, args: Vec<String> },
    Empty,
}

impl Content {
    pub fn text(&self) -> Option<&str> {
        match self {
            Content::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_command(&self) -> bool {
        matches!(self, Content::Command { .. })
    }
}

/// An incoming line from the command layer
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    /// Voter id of the author, if known
    pub sender: Option<String>,
    pub content: Content,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(content: Content) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: None,
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(Content::Text(text.into()))
    }

    pub fn from_command(name: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(Content::Command { name: name.into(), args })
    }

    pub fn with_sender(mut self, voter_id: impl Into<String>) -> Self {
        self.sender = Some(voter_id.into());
        self
    }

    pub fn with_sender_opt(mut self, voter_id: Option<String>) -> Self {
        if let Some(id) = voter_id {
            self.sender = Some(id);
        }
        self
    }
}
