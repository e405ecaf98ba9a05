//! Owns the loaded model and serializes load, unload and predict requests.
//!
//! Loads run on the `model-loader` worker and predictions on the
//! `model-executor` worker. Each worker sits behind a single-flight slot: a
//! request arriving while its slot is busy is turned away with a status
//! message, never queued. The loaded-model pointer has its own lock, held
//! only to read or swap the `Arc`; inference locks the engine itself. An
//! unloaded engine is released by whoever drops the last `Arc`, so unloading
//! from the caller's thread never waits for a running prediction.

use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use image::DynamicImage;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::events::{Event, EventBus};
use crate::model_config::ModelConfig;
use crate::registry::ModelRegistry;
use crate::slot::{SlotGuard, SlotWorker};
use crate::traits::{Engine, EngineFactory};
use crate::types::{Capabilities, Mark, Shape};

pub const MSG_LOAD_BUSY: &str = "Another model is being loaded. Please wait for it to finish.";
pub const MSG_NO_MODEL_SELECTED: &str = "No model selected.";
pub const MSG_INVALID_MODEL: &str = "Error in loading model: Invalid model name.";
pub const MSG_MODEL_LOADED: &str = "Model loaded. Ready for labeling.";
pub const MSG_NOT_LOADED: &str = "Model is not loaded. Choose a mode to continue.";
pub const MSG_PREDICT_BUSY: &str = "Another model is being executed. Please wait for it to finish.";
pub const MSG_INFERENCING: &str = "Inferencing AI model. Please wait...";
pub const MSG_PREDICTION_ERROR: &str = "Error in model prediction. Please check the model.";
pub const MSG_PREDICTION_DONE: &str = "Finished inferencing AI model. Check the result.";

/// Outcome of a request to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Handed to a worker; completion arrives as events.
    Dispatched,
    /// Finished synchronously.
    Completed,
    /// The slot was busy; nothing changed.
    Busy,
    /// Rejected: unknown model, invalid config, or no model loaded.
    Invalid,
}

/// The active model and its engine.
pub struct LoadedModel {
    pub config: ModelConfig,
    pub capabilities: Capabilities,
    engine: Mutex<Box<dyn Engine>>,
}

impl Drop for LoadedModel {
    fn drop(&mut self) {
        self.engine.get_mut().release();
        debug!("Released {}", self.config.name);
    }
}

struct Shared {
    loaded: Mutex<Option<Arc<LoadedModel>>>,
    registry: Mutex<ModelRegistry>,
    factory: Box<dyn EngineFactory>,
    events: EventBus,
}

pub struct ModelManager {
    shared: Arc<Shared>,
    loader: SlotWorker,
    executor: SlotWorker,
}

impl ModelManager {
    pub fn new(registry: ModelRegistry, factory: impl EngineFactory + 'static) -> Result<Self> {
        Ok(Self {
            shared: Arc::new(Shared {
                loaded: Mutex::new(None),
                registry: Mutex::new(registry),
                factory: Box::new(factory),
                events: EventBus::new(),
            }),
            loader: SlotWorker::spawn("model-loader")?,
            executor: SlotWorker::spawn("model-executor")?,
        })
    }

    pub fn subscribe(&self) -> Receiver<Event> {
        self.shared.events.subscribe()
    }

    pub fn model_configs(&self) -> Vec<ModelConfig> {
        self.shared.registry.lock().list_configs().to_vec()
    }

    pub fn loaded_config(&self) -> Option<ModelConfig> {
        self.shared
            .loaded
            .lock()
            .as_ref()
            .map(|loaded| loaded.config.clone())
    }

    pub fn is_loading(&self) -> bool {
        self.loader.is_busy()
    }

    pub fn is_predicting(&self) -> bool {
        self.executor.is_busy()
    }

    /// Block until neither a load nor a prediction is in flight.
    pub fn wait_idle(&self) {
        self.loader.wait_idle();
        self.executor.wait_idle();
    }

    /// Load the registered model identified by `config_file` in the
    /// background, or unload the current model when `None`.
    pub fn load_model(&self, config_file: Option<&Path>) -> Submission {
        let Some(guard) = self.try_acquire_loader() else {
            return Submission::Busy;
        };
        self.load_with_guard(guard, config_file)
    }

    fn try_acquire_loader(&self) -> Option<SlotGuard> {
        let guard = self.loader.try_acquire();
        if guard.is_none() {
            self.shared.events.status(MSG_LOAD_BUSY);
        }
        guard
    }

    fn load_with_guard(&self, guard: SlotGuard, config_file: Option<&Path>) -> Submission {
        let events = &self.shared.events;
        let Some(config_file) = config_file else {
            drop(self.shared.take_loaded());
            drop(guard);
            events.status(MSG_NO_MODEL_SELECTED);
            events.emit(Event::ModelLoaded(None));
            return Submission::Completed;
        };

        let config = self.shared.registry.lock().find(config_file).cloned();
        let Some(config) = config else {
            events.status(MSG_INVALID_MODEL);
            return Submission::Invalid;
        };

        events.status(format!(
            "Loading model: {}. Please wait...",
            config.display_name
        ));
        let shared = Arc::clone(&self.shared);
        match self
            .loader
            .dispatch(guard, move |guard| shared.load_model(config, guard))
        {
            Ok(()) => Submission::Dispatched,
            Err(e) => {
                events.status(format!("Error in loading model: {}", e.user_message()));
                Submission::Invalid
            }
        }
    }

    /// Register a custom model config (or refresh it) and load it.
    pub fn load_custom_model(&self, config_file: &Path) -> Submission {
        let events = &self.shared.events;
        let Some(guard) = self.try_acquire_loader() else {
            return Submission::Busy;
        };

        let added = {
            let mut registry = self.shared.registry.lock();
            registry
                .add_or_replace_custom(config_file)
                .map(|config| (config, registry.list_configs().to_vec()))
        };
        match added {
            Ok((config, configs)) => {
                events.emit(Event::ModelConfigsChanged(configs));
                self.load_with_guard(guard, Some(&config.config_file))
            }
            Err(e) => {
                events.status(format!(
                    "Error in loading custom model: {}",
                    e.user_message()
                ));
                Submission::Invalid
            }
        }
    }

    /// Drop the loaded model without status messages. Busy while a load
    /// is in flight, since that load would install its model afterwards.
    pub fn unload_model(&self) -> Submission {
        let Some(_guard) = self.try_acquire_loader() else {
            return Submission::Busy;
        };
        drop(self.shared.take_loaded());
        Submission::Completed
    }

    /// Forward prompt marks to the loaded model if it takes prompts.
    /// Returns whether they were forwarded.
    pub fn set_auto_labeling_marks(&self, marks: Vec<Mark>) -> bool {
        let loaded = self.shared.loaded.lock().clone();
        match loaded {
            Some(loaded) if loaded.capabilities.supports_prompts() => {
                loaded.engine.lock().set_marks(marks);
                true
            }
            _ => false,
        }
    }

    /// Predict on the calling thread, holding the executor slot.
    ///
    /// Blocks for the whole inference; interactive callers should use
    /// [`ModelManager::predict_shapes_threading`]. Returns no shapes when
    /// another prediction is running.
    pub fn predict_shapes(&self, image: &Arc<DynamicImage>) -> Vec<Shape> {
        let Some(guard) = self.executor.try_acquire() else {
            self.shared.reject_prediction(MSG_PREDICT_BUSY);
            return Vec::new();
        };
        let shapes = self.shared.run_prediction(image);
        drop(guard);
        match shapes {
            Some(shapes) => {
                self.shared.finish_prediction(shapes.clone());
                shapes
            }
            None => Vec::new(),
        }
    }

    /// Predict on the executor worker; the result arrives as
    /// [`Event::PredictionResult`] followed by [`Event::PredictionFinished`].
    pub fn predict_shapes_threading(&self, image: Arc<DynamicImage>) -> Submission {
        let events = &self.shared.events;
        if self.shared.loaded.lock().is_none() {
            self.shared.reject_prediction(MSG_NOT_LOADED);
            return Submission::Invalid;
        }
        let Some(guard) = self.executor.try_acquire() else {
            self.shared.reject_prediction(MSG_PREDICT_BUSY);
            return Submission::Busy;
        };

        events.emit(Event::PredictionStarted);
        events.status(MSG_INFERENCING);
        let shared = Arc::clone(&self.shared);
        let dispatched = self.executor.dispatch(guard, move |guard| {
            let shapes = shared.run_prediction(&image);
            drop(guard);
            if let Some(shapes) = shapes {
                shared.finish_prediction(shapes);
            }
        });
        match dispatched {
            Ok(()) => Submission::Dispatched,
            Err(e) => {
                warn!("Could not dispatch prediction: {}", e);
                self.shared.reject_prediction(MSG_PREDICTION_ERROR);
                Submission::Invalid
            }
        }
    }
}

impl Drop for ModelManager {
    fn drop(&mut self) {
        self.loader.wait_idle();
        self.executor.wait_idle();
        let loaded = self.shared.loaded.lock().take();
        drop(loaded);
    }
}

impl Shared {
    /// Runs on the loader worker.
    fn load_model(&self, config: ModelConfig, guard: SlotGuard) {
        if let Some(previous) = self.take_loaded() {
            // Free the old sessions before building new ones.
            previous.engine.lock().release();
        }

        debug!("Creating {} engine for {}", config.model_type, config.name);
        let engine = match self.factory.create(&config) {
            Ok(engine) => engine,
            Err(e) => {
                drop(guard);
                warn!("Error in loading model {}: {}", config.name, e);
                self.events.status(format!(
                    "Error in loading model: {}",
                    e.user_message()
                ));
                self.events.emit(Event::ModelLoaded(None));
                return;
            }
        };

        let capabilities = engine.capabilities();
        let loaded = Arc::new(LoadedModel {
            config: config.clone(),
            capabilities: capabilities.clone(),
            engine: Mutex::new(engine),
        });
        *self.loaded.lock() = Some(loaded);

        let config = {
            let mut registry = self.registry.lock();
            if let Err(e) = registry.touch(&config.config_file) {
                warn!("Could not record use of {}: {}", config.name, e);
            }
            registry.find(&config.config_file).cloned().unwrap_or(config)
        };
        drop(guard);

        self.events.status(MSG_MODEL_LOADED);
        self.events.emit(Event::ModelLoaded(Some(config)));
        let prompts = capabilities.supports_prompts();
        self.events.emit(Event::CapabilitiesChanged(capabilities));
        if prompts {
            self.events.emit(Event::SegmentationModeEnabled);
        }
    }

    /// Detach the current model, if any. Its engine is released when the
    /// last holder (possibly a running prediction) lets go of it.
    fn take_loaded(&self) -> Option<Arc<LoadedModel>> {
        let previous = self.loaded.lock().take()?;
        if previous.capabilities.supports_prompts() {
            self.events.emit(Event::SegmentationModeDisabled);
        }
        Some(previous)
    }

    /// `None` when no model is loaded; the rejection events are already sent.
    fn run_prediction(&self, image: &Arc<DynamicImage>) -> Option<Vec<Shape>> {
        let loaded = self.loaded.lock().clone();
        let Some(loaded) = loaded else {
            self.reject_prediction(MSG_NOT_LOADED);
            return None;
        };

        let result = loaded.engine.lock().predict_shapes(image);
        match result {
            Ok(shapes) => Some(shapes),
            Err(e) => {
                warn!("Error in predict_shapes: {}", e);
                self.events.status(MSG_PREDICTION_ERROR);
                Some(Vec::new())
            }
        }
    }

    fn finish_prediction(&self, shapes: Vec<Shape>) {
        self.events.emit(Event::PredictionResult(shapes));
        self.events.status(MSG_PREDICTION_DONE);
        self.events.emit(Event::PredictionFinished);
    }

    fn reject_prediction(&self, message: &str) {
        self.events.status(message);
        self.events.emit(Event::PredictionResult(Vec::new()));
        self.events.emit(Event::PredictionFinished);
    }
}
