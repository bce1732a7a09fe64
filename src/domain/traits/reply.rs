use async_trait::async_trait;

use crate::application::errors::BotError;
use crate::domain::entities::{Message, ReplyTarget};

/// Outbound messaging - what plugins use to answer
///
/// The transport supplies the implementation; plugins and built-in funcs
/// only ever see it through this trait.
#[async_trait]
pub trait Replier: Send + Sync {
    /// Send a text to a user or group
    async fn send_text(&self, target: &ReplyTarget, text: &str) -> Result<(), BotError>;

    /// Answer a message where it came from
    async fn reply(&self, message: &Message, text: &str) -> Result<(), BotError> {
        self.send_text(&message.reply_target(), text).await
    }
}

/// Replier that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReplier;

#[async_trait]
impl Replier for NullReplier {
    async fn send_text(&self, target: &ReplyTarget, text: &str) -> Result<(), BotError> {
        tracing::debug!("Dropping reply to {:?}: {}", target, text);
        Ok(())
    }
}
