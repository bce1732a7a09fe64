//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use whisker::application::messaging::{BusSettings, EventBus};
use whisker::application::plugins::{LoaderSettings, PluginLoader};
use whisker::application::rbac::{AccessController, AccessSettings, SharedAccessController};
use whisker::domain::entities::{PluginDescriptor, ReplyTarget};
use whisker::domain::traits::{factory_fn, Plugin, PluginFactory, Replier};
use whisker::infrastructure::storage::MemoryDataStore;
use whisker::BotError;

static INIT: Once = Once::new();

pub fn ensure_init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Keeps every reply in memory
#[derive(Default)]
pub struct RecordingReplier {
    sent: Mutex<Vec<(ReplyTarget, String)>>,
}

impl RecordingReplier {
    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn sent(&self) -> Vec<(ReplyTarget, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Replier for RecordingReplier {
    async fn send_text(&self, target: &ReplyTarget, text: &str) -> Result<(), BotError> {
        self.sent.lock().unwrap().push((target.clone(), text.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub bus: Arc<EventBus>,
    pub replier: Arc<RecordingReplier>,
    pub store: MemoryDataStore,
}

pub fn harness_with(settings: AccessSettings, bus_settings: BusSettings) -> Harness {
    ensure_init();
    let access = AccessController::new(settings).unwrap();
    let replier = Arc::new(RecordingReplier::default());
    let bus = EventBus::new(
        SharedAccessController::new(access),
        replier.clone() as Arc<dyn Replier>,
        bus_settings,
    )
    .unwrap();
    Harness {
        bus,
        replier,
        store: MemoryDataStore::new(),
    }
}

/// Bus with `root` as its root user
pub fn harness() -> Harness {
    harness_with(
        AccessSettings {
            root: Some("root".to_string()),
            ..AccessSettings::default()
        },
        BusSettings::default(),
    )
}

impl Harness {
    pub fn loader(&self) -> PluginLoader {
        PluginLoader::new(
            Arc::clone(&self.bus),
            Arc::new(self.store.clone()),
            LoaderSettings::default(),
        )
    }
}

/// Plugin that does nothing beyond carrying its descriptor
pub struct Plain {
    pub descriptor: PluginDescriptor,
}

#[async_trait]
impl Plugin for Plain {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }
}

pub fn plain(descriptor: PluginDescriptor) -> Arc<dyn PluginFactory> {
    let inner = descriptor.clone();
    factory_fn(descriptor, move |_env| {
        Ok(Box::new(Plain {
            descriptor: inner.clone(),
        }) as Box<dyn Plugin>)
    })
}

/// Factory whose constructor always fails
pub fn broken(descriptor: PluginDescriptor) -> Arc<dyn PluginFactory> {
    factory_fn(descriptor, |_env| Err(BotError::Plugin("cannot build".to_string())))
}
