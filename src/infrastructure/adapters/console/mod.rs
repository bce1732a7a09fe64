//! Console adapter for development/testing
//!
//! Each stdin line becomes a private message from the configured user.
//! A line starting with `#<group> ` is sent to that group instead.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::application::errors::BotError;
use crate::application::messaging::EventBus;
use crate::domain::entities::{Event, Message, ReplyTarget};
use crate::domain::traits::Replier;

const PLATFORM: &str = "console";

/// Prints replies to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReplier;

#[async_trait]
impl Replier for ConsoleReplier {
    async fn send_text(&self, target: &ReplyTarget, text: &str) -> Result<(), BotError> {
        match target {
            ReplyTarget::User(user) => println!("[BOT -> {}] {}", user, text),
            ReplyTarget::Group(group) => println!("[BOT -> #{}] {}", group, text),
        }
        Ok(())
    }
}

/// Console transport for local development
pub struct ConsoleAdapter {
    user_id: String,
    bus: Arc<EventBus>,
}

impl ConsoleAdapter {
    pub fn new(user_id: impl Into<String>, bus: Arc<EventBus>) -> Self {
        Self {
            user_id: user_id.into(),
            bus,
        }
    }

    /// Turn a console line into a message; blank lines give `None`
    pub fn parse_line(&self, line: &str) -> Option<Message> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let message = match line.strip_prefix('#') {
            Some(rest) => {
                let (group, text) = rest.split_once(char::is_whitespace)?;
                let text = text.trim();
                if group.is_empty() || text.is_empty() {
                    return None;
                }
                Message::group(self.user_id.clone(), group, text)
            }
            None => Message::private(self.user_id.clone(), line),
        };
        Some(message.with_platform(PLATFORM))
    }

    /// Read stdin until EOF or `quit`, publishing every line
    pub async fn run(&self) -> Result<(), BotError> {
        tracing::info!("Console transport ready, type 'quit' to stop");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| BotError::Network(format!("Failed to read stdin: {}", e)))?
        {
            if matches!(line.trim(), "quit" | "exit") {
                break;
            }
            match self.parse_line(&line) {
                Some(message) => {
                    self.bus.publish_async(Event::from_message(message));
                }
                None => tracing::debug!("Ignoring console line {:?}", line),
            }
        }

        tracing::info!("Console transport stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::messaging::BusSettings;
    use crate::application::rbac::{AccessController, AccessSettings, SharedAccessController};

    fn adapter() -> ConsoleAdapter {
        let access = AccessController::new(AccessSettings::default()).unwrap();
        let bus = EventBus::new(
            SharedAccessController::new(access),
            Arc::new(ConsoleReplier),
            BusSettings::default(),
        )
        .unwrap();
        ConsoleAdapter::new("42", bus)
    }

    #[tokio::test]
    async fn test_parse_line() {
        let adapter = adapter();
        let private = adapter.parse_line("  /plg ").unwrap();
        assert!(!private.is_group());
        assert_eq!(private.raw_message, "/plg");
        assert_eq!(private.platform, "console");

        let group = adapter.parse_line("#7 hello there").unwrap();
        assert_eq!(group.group_id.as_deref(), Some("7"));
        assert_eq!(group.raw_message, "hello there");

        assert!(adapter.parse_line("   ").is_none());
        assert!(adapter.parse_line("#7").is_none());
    }
}
