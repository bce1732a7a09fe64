//! Handler registry
//!
//! Subscriptions live in slots addressed by [`SubscriptionId`]. Removing a
//! subscription frees its slot and bumps the slot's generation, so an old
//! handle can never remove a newer subscription that reused the slot.

use std::sync::Arc;

use async_trait::async_trait;
use regex_lite::Regex;

use crate::application::errors::BotError;
use crate::domain::entities::event::REGEX_PREFIX;
use crate::domain::entities::{BoxFuture, Event, SubscriptionId};

/// Async event handler
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &mut Event) -> Result<(), BotError>;
}

type HandlerFn = dyn for<'a> Fn(&'a mut Event) -> BoxFuture<'a, Result<(), BotError>> + Send + Sync;

struct FnHandler(Box<HandlerFn>);

#[async_trait]
impl EventHandler for FnHandler {
    async fn handle(&self, event: &mut Event) -> Result<(), BotError> {
        (self.0)(event).await
    }
}

/// Wrap a closure returning a boxed future as a handler
pub fn handler_fn<F>(f: F) -> Arc<dyn EventHandler>
where
    F: for<'a> Fn(&'a mut Event) -> BoxFuture<'a, Result<(), BotError>> + Send + Sync + 'static,
{
    Arc::new(FnHandler(Box::new(f)))
}

/// Synchronous handler run on the blocking pool
pub type BlockingHandler = Arc<dyn Fn(Event) -> Result<(), BotError> + Send + Sync>;

/// What a subscription runs
#[derive(Clone)]
pub enum Handler {
    /// Awaited in order; may stop propagation and add results
    Async(Arc<dyn EventHandler>),
    /// Fire-and-forget on a copy of the event
    Blocking(BlockingHandler),
}

#[derive(Debug)]
enum Pattern {
    Exact(String),
    Regex(Regex),
}

struct Entry {
    pattern: Pattern,
    priority: i32,
    owner: String,
    seq: u64,
    handler: Handler,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    entry: Option<Entry>,
}

/// A subscription selected for one dispatch
#[derive(Clone)]
pub struct ResolvedHandler {
    pub id: SubscriptionId,
    pub owner: String,
    pub priority: i32,
    pub handler: Handler,
}

/// Slot arena of subscriptions
#[derive(Default)]
pub struct HandlerRegistry {
    slots: Vec<Slot>,
    free: Vec<usize>,
    next_seq: u64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a handler; `re:` types are compiled as patterns anchored at
    /// the start of the event type
    pub fn insert(
        &mut self,
        event_type: &str,
        priority: i32,
        owner: &str,
        handler: Handler,
    ) -> Result<SubscriptionId, BotError> {
        let pattern = match event_type.strip_prefix(REGEX_PREFIX) {
            Some(raw) => Pattern::Regex(
                Regex::new(&format!("^(?:{})", raw))
                    .map_err(|e| BotError::InvalidArgs(format!("bad event pattern '{}': {}", raw, e)))?,
            ),
            None => Pattern::Exact(event_type.to_string()),
        };

        let entry = Entry {
            pattern,
            priority,
            owner: owner.to_string(),
            seq: self.next_seq,
            handler,
        };
        self.next_seq += 1;

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.entry = Some(entry);
        Ok(SubscriptionId {
            index,
            generation: slot.generation,
        })
    }

    /// Returns whether the handle was live
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        match self.slots.get_mut(id.index) {
            Some(slot) if slot.generation == id.generation && slot.entry.is_some() => {
                slot.entry = None;
                slot.generation += 1;
                self.free.push(id.index);
                true
            }
            _ => false,
        }
    }

    /// Remove every subscription of an owner; returns how many went
    pub fn remove_owner(&mut self, owner: &str) -> usize {
        let ids: Vec<SubscriptionId> = self
            .live()
            .filter(|(_, entry)| entry.owner == owner)
            .map(|(id, _)| id)
            .collect();
        ids.into_iter().filter(|id| self.remove(*id)).count()
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.slots
            .get(id.index)
            .map(|slot| slot.generation == id.generation && slot.entry.is_some())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handlers for `event_type` in dispatch order
    ///
    /// Exact subscriptions come first, then matching patterns. Each group is
    /// ordered by priority (highest first), then owner name, then the order
    /// of subscription.
    pub fn resolve(&self, event_type: &str) -> Vec<ResolvedHandler> {
        let mut exact = Vec::new();
        let mut patterns = Vec::new();
        for (id, entry) in self.live() {
            match &entry.pattern {
                Pattern::Exact(t) if t == event_type => exact.push((id, entry)),
                Pattern::Regex(re) if re.is_match(event_type) => patterns.push((id, entry)),
                _ => {}
            }
        }

        let order = |a: &(SubscriptionId, &Entry), b: &(SubscriptionId, &Entry)| {
            b.1.priority
                .cmp(&a.1.priority)
                .then_with(|| a.1.owner.cmp(&b.1.owner))
                .then_with(|| a.1.seq.cmp(&b.1.seq))
        };
        exact.sort_by(order);
        patterns.sort_by(order);

        exact
            .into_iter()
            .chain(patterns)
            .map(|(id, entry)| ResolvedHandler {
                id,
                owner: entry.owner.clone(),
                priority: entry.priority,
                handler: entry.handler.clone(),
            })
            .collect()
    }

    fn live(&self) -> impl Iterator<Item = (SubscriptionId, &Entry)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry.as_ref().map(|entry| {
                (
                    SubscriptionId {
                        index,
                        generation: slot.generation,
                    },
                    entry,
                )
            })
        })
    }
}
