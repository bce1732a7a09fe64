//! Events flowing through the bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Message;

/// A message posted in a group
pub const GROUP_MESSAGE_EVENT: &str = "whisker.group_message_event";
/// A direct message to the bot
pub const PRIVATE_MESSAGE_EVENT: &str = "whisker.private_message_event";
/// Friend or group join requests
pub const REQUEST_EVENT: &str = "whisker.request_event";
/// Platform notices
pub const NOTICE_EVENT: &str = "whisker.notice_event";
/// Published once every plugin of the first batch is loaded
pub const STARTUP_EVENT: &str = "whisker.startup_event";
/// Published before plugins are unloaded at shutdown
pub const SHUTDOWN_EVENT: &str = "whisker.shutdown_event";

/// Prefix marking a subscription type as a regular expression
pub const REGEX_PREFIX: &str = "re:";

/// Who sent an event and where
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventSource {
    pub user_id: String,
    pub group_id: Option<String>,
}

impl EventSource {
    pub fn new(user_id: impl Into<String>, group_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            group_id,
        }
    }

    pub fn private(user_id: impl Into<String>) -> Self {
        Self::new(user_id, None)
    }

    pub fn group(user_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self::new(user_id, Some(group_id.into()))
    }
}

/// Event payload
#[derive(Debug, Clone)]
pub enum EventData {
    Message(Message),
    Json(serde_json::Value),
    Empty,
}

impl EventData {
    pub fn message(&self) -> Option<&Message> {
        match self {
            EventData::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn json(&self) -> Option<&serde_json::Value> {
        match self {
            EventData::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// Handle returned by `subscribe`
///
/// A slot index plus the generation the slot had when the handler was
/// stored. A handle whose generation is stale refers to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

/// One entry of an event's result list
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// A value a handler chose to report
    Value(serde_json::Value),
    /// A handler or func failed; dispatch continued with the next one
    Error {
        owner: String,
        /// `None` when the failure came from a func body
        subscription: Option<SubscriptionId>,
        message: String,
    },
}

impl HandlerOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, HandlerOutcome::Error { .. })
    }
}

/// An occurrence published on the bus
#[derive(Debug, Clone)]
pub struct Event {
    pub id: String,
    pub event_type: String,
    pub data: EventData,
    pub source: Option<EventSource>,
    pub timestamp: DateTime<Utc>,
    results: Vec<HandlerOutcome>,
    propagation_stopped: bool,
}

impl Event {
    pub fn new(event_type: impl Into<String>, data: EventData) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            data,
            source: None,
            timestamp: Utc::now(),
            results: Vec::new(),
            propagation_stopped: false,
        }
    }

    /// Wrap a chat message, picking the group or private message type
    pub fn from_message(message: Message) -> Self {
        let event_type = if message.is_group() {
            GROUP_MESSAGE_EVENT
        } else {
            PRIVATE_MESSAGE_EVENT
        };
        let source = message.source();
        Self::new(event_type, EventData::Message(message)).with_source(source)
    }

    pub fn with_source(mut self, source: EventSource) -> Self {
        self.source = Some(source);
        self
    }

    /// No handler after the current one runs in this dispatch
    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }

    pub fn add_result(&mut self, value: serde_json::Value) {
        self.results.push(HandlerOutcome::Value(value));
    }

    pub(crate) fn push_outcome(&mut self, outcome: HandlerOutcome) {
        self.results.push(outcome);
    }

    pub fn results(&self) -> &[HandlerOutcome] {
        &self.results
    }

    pub fn into_results(self) -> Vec<HandlerOutcome> {
        self.results
    }

    pub fn message(&self) -> Option<&Message> {
        self.data.message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_message_picks_type() {
        let private = Event::from_message(Message::private("42", "hi"));
        assert_eq!(private.event_type, PRIVATE_MESSAGE_EVENT);
        assert_eq!(private.source.as_ref().map(|s| s.user_id.as_str()), Some("42"));

        let group = Event::from_message(Message::group("42", "7", "hi"));
        assert_eq!(group.event_type, GROUP_MESSAGE_EVENT);
        assert_eq!(
            group.source.and_then(|s| s.group_id),
            Some("7".to_string())
        );
    }

    #[test]
    fn test_results_keep_order() {
        let mut event = Event::new("custom", EventData::Empty);
        event.add_result(serde_json::json!(1));
        event.add_result(serde_json::json!("two"));
        assert_eq!(event.results().len(), 2);
        assert_eq!(event.results()[0], HandlerOutcome::Value(serde_json::json!(1)));
        assert!(!event.is_propagation_stopped());
        event.stop_propagation();
        assert!(event.is_propagation_stopped());
    }
}
