//! Console adapter - interactive shell over stdin/stdout

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

use crate::application::errors::CommandError;
use crate::application::messaging::MessageParser;
use crate::application::services::CommandService;
use crate::domain::traits::{Bot, BotInfo};

/// Console bot adapter
///
/// Each line is one message from the current user. `/as <voter>` switches the
/// user, `/quit` ends the session.
pub struct ConsoleAdapter {
    info: BotInfo,
    parser: MessageParser,
    commands: Arc<CommandService>,
    current_user: Mutex<Option<String>>,
}

impl ConsoleAdapter {
    pub fn new(name: impl Into<String>, commands: Arc<CommandService>) -> Self {
        let parser = MessageParser::new(commands.prefix());
        Self {
            info: BotInfo {
                id: "console".to_string(),
                name: name.into(),
            },
            parser,
            commands,
            current_user: Mutex::new(None),
        }
    }

    pub fn with_user(self, user: Option<String>) -> Self {
        Self {
            current_user: Mutex::new(user),
            ..self
        }
    }

    /// Handles one input line. Returns `false` once the session should end.
    pub async fn handle_line(&self, line: &str) -> Result<bool, CommandError> {
        let line = line.trim();
        if line == "/quit" || line == "/exit" {
            return Ok(false);
        }
        if let Some(user) = line.strip_prefix("/as ") {
            let user = user.trim().to_string();
            self.send_message(&format!("Now acting as {}", user)).await?;
            *self.current_user.lock().await = Some(user);
            return Ok(true);
        }

        let sender = self.current_user.lock().await.clone();
        let message = self.parser.parse(line, sender);
        match self.commands.handle(&message).await {
            Ok(Some(reply)) => self.send_message(&reply).await?,
            Ok(None) => {}
            Err(e) => {
                tracing::debug!("Command failed: {}", e);
                self.send_message(&format!("Error: {}", e)).await?;
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl Bot for ConsoleAdapter {
    async fn start(&self) -> Result<(), CommandError> {
        tracing::info!("Starting console bot");
        self.send_message(&format!(
            "{} ready. Type {}help for commands, /as <voter> to switch user, /quit to leave.",
            self.info.name,
            self.commands.prefix()
        ))
        .await?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to read input: {}", e);
                    break;
                }
            };
            if !self.handle_line(&line).await? {
                break;
            }
        }
        tracing::info!("Console session ended");
        Ok(())
    }

    async fn send_message(&self, text: &str) -> Result<(), CommandError> {
        println!("[BOT] {}", text);
        Ok(())
    }

    fn bot_info(&self) -> BotInfo {
        self.info.clone()
    }
}
