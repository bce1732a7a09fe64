use chrono::{DateTime, Utc};

use super::EventSource;

/// Where a message was sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    Private,
    Group,
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Private => "private",
            MessageType::Group => "group",
        }
    }
}

/// Destination of a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTarget {
    User(String),
    Group(String),
}

/// An incoming chat message
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub user_id: String,
    pub group_id: Option<String>,
    pub raw_message: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub platform: String,
    pub raw: Option<serde_json::Value>,
}

impl Message {
    pub fn private(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            group_id: None,
            raw_message: text.into(),
            message_type: MessageType::Private,
            timestamp: Utc::now(),
            platform: "unknown".to_string(),
            raw: None,
        }
    }

    pub fn group(
        user_id: impl Into<String>,
        group_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let mut msg = Self::private(user_id, text);
        msg.group_id = Some(group_id.into());
        msg.message_type = MessageType::Group;
        msg
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn is_group(&self) -> bool {
        self.message_type == MessageType::Group
    }

    /// Permission scope of this message
    pub fn source(&self) -> EventSource {
        EventSource::new(self.user_id.clone(), self.group_id.clone())
    }

    /// Group messages are answered in the group, private ones to the sender
    pub fn reply_target(&self) -> ReplyTarget {
        match &self.group_id {
            Some(group) => ReplyTarget::Group(group.clone()),
            None => ReplyTarget::User(self.user_id.clone()),
        }
    }

    /// Whitespace separated words after the first one
    pub fn args(&self) -> Vec<&str> {
        self.raw_message.split_whitespace().skip(1).collect()
    }
}
