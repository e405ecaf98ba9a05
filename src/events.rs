use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::model_config::ModelConfig;
use crate::types::{Capabilities, Shape};

/// Notifications published to the host application.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Human-readable progress or error text.
    Status(String),
    ModelConfigsChanged(Vec<ModelConfig>),
    /// The newly loaded model, or `None` when no model is loaded.
    ModelLoaded(Option<ModelConfig>),
    PredictionStarted,
    PredictionResult(Vec<Shape>),
    PredictionFinished,
    CapabilitiesChanged(Capabilities),
    SegmentationModeEnabled,
    SegmentationModeDisabled,
}

/// Fan-out of events to any number of channel subscribers.
///
/// Every subscriber sees events in emission order; channels are unbounded so
/// a slow subscriber never loses events. Dropped receivers are forgotten on
/// the next emission.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<Event>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<Event> {
        let (sender, receiver) = unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    pub fn emit(&self, event: Event) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| s.send(event.clone()).is_ok());
    }

    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.emit(Event::Status(message));
    }
}
