use async_trait::async_trait;
use crate::application::errors::CommandError;

/// Bot trait - abstraction for the front end that talks to users
#[async_trait]
pub trait Bot: Send + Sync {
    /// Start the bot and begin listening for messages
    async fn start(&self) -> Result<(), CommandError>;

    /// Send a reply to the user
    async fn send_message(&self, text: &str) -> Result<(), CommandError>;

    /// Get bot info
    fn bot_info(&self) -> BotInfo;
}

/// Bot information
#[derive(Debug, Clone)]
pub struct BotInfo {
    pub id: String,
    pub name: String,
}
