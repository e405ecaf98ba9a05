use std::{sync::Arc, time::Duration};

use anyhow::{bail, ensure, Context, Result};
use crossbeam_channel::Receiver;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use autolabel_rs::{
    model_config::normalize_path, Config, Event, ModelManager, ModelRegistry, OnnxEngineFactory,
    Submission, YamlSettingsStore,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::new();

    let store = YamlSettingsStore::new(&config.settings);
    let registry = ModelRegistry::load(config.resources.clone(), Box::new(store))
        .context("Failed to read the model list")?;
    let manager = ModelManager::new(registry, OnnxEngineFactory::new(config.device_id))?;
    let events = manager.subscribe();

    if config.list {
        for model in manager.model_configs() {
            let origin = if model.is_custom { "custom" } else { "built-in" };
            println!(
                "{}\t{}\t{}\t{}",
                model.display_name,
                model.model_type,
                origin,
                model.config_file.display()
            );
        }
        return Ok(());
    }

    let Some(model_path) = &config.model else {
        bail!("No model given; pass --model or --list");
    };
    let Some(image_path) = &config.image else {
        bail!("No image given; pass --image");
    };
    ensure!(image_path.exists(), "Image path does not exist");

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} [{elapsed}] {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));

    let model_path = normalize_path(model_path)?;
    let known = manager
        .model_configs()
        .iter()
        .any(|c| c.config_file == model_path);
    let submission = if known {
        manager.load_model(Some(&model_path))
    } else {
        manager.load_custom_model(&model_path)
    };
    if submission != Submission::Dispatched {
        bail!(last_status(&events).unwrap_or_else(|| "Model could not be loaded".to_string()));
    }
    let loaded = wait_for(&events, &spinner, |event| match event {
        Event::ModelLoaded(loaded) => Some(loaded),
        _ => None,
    })?;
    if loaded.is_none() {
        spinner.finish_and_clear();
        bail!(spinner.message());
    }

    let image = image::open(image_path)
        .with_context(|| format!("Failed to open image: {}", image_path.display()))?;
    let marks = config.marks();
    if !marks.is_empty() && !manager.set_auto_labeling_marks(marks) {
        tracing::warn!("The loaded model does not take prompts; ignoring them");
    }

    if manager.predict_shapes_threading(Arc::new(image)) != Submission::Dispatched {
        bail!(last_status(&events).unwrap_or_else(|| "Prediction was rejected".to_string()));
    }
    let shapes = wait_for(&events, &spinner, |event| match event {
        Event::PredictionResult(shapes) => Some(shapes),
        _ => None,
    })?;
    spinner.finish_with_message(format!("{} shape(s)", shapes.len()));

    println!("{}", serde_json::to_string_pretty(&shapes)?);
    Ok(())
}

/// Receive events, mirroring status text on the spinner, until `pick` accepts one.
fn wait_for<T>(
    events: &Receiver<Event>,
    spinner: &ProgressBar,
    mut pick: impl FnMut(Event) -> Option<T>,
) -> Result<T> {
    loop {
        let event = events.recv().context("Model manager stopped")?;
        if let Event::Status(message) = &event {
            spinner.set_message(message.clone());
        }
        if let Some(value) = pick(event) {
            return Ok(value);
        }
    }
}

fn last_status(events: &Receiver<Event>) -> Option<String> {
    events
        .try_iter()
        .filter_map(|event| match event {
            Event::Status(message) => Some(message),
            _ => None,
        })
        .last()
}
