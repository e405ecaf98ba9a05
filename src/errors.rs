use std::path::PathBuf;
use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the labeling engine.
///
/// # Failure domains
///
/// Each variant maps to one failure domain the host application reacts to
/// differently: configuration problems and model load failures abort the
/// request with a status message, prediction failures degrade to an empty
/// result. Busy slots are not errors at all (see `coordinator::Submission`).
#[derive(Error, Debug)]
pub enum AutoLabelError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Model load error: {operation} failed")]
    ModelLoad {
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Prediction error: {operation} failed")]
    Prediction {
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings error: {operation} failed")]
    Settings {
        operation: String,
        #[source]
        source: BoxedSource,
    },
}

pub type Result<T> = std::result::Result<T, AutoLabelError>;

impl AutoLabelError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn model_load(operation: impl Into<String>, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::ModelLoad {
            operation: operation.into(),
            source: message.into(),
        }
    }

    pub fn prediction(operation: impl Into<String>, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Prediction {
            operation: operation.into(),
            source: message.into(),
        }
    }

    /// Message shown to the user, including the innermost cause.
    pub fn user_message(&self) -> String {
        match self {
            Self::Config { message } => message.clone(),
            Self::ModelLoad { operation, source }
            | Self::Prediction { operation, source }
            | Self::Settings { operation, source } => format!("{operation}: {source}"),
            Self::FileSystem {
                path,
                operation,
                source,
            } => format!("{operation} {}: {source}", path.display()),
        }
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Code that knows the path should construct `AutoLabelError::FileSystem`
/// directly; this is the fallback for `?` on bare I/O calls.
impl From<std::io::Error> for AutoLabelError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

/// Image decoding or resizing happens inside a prediction.
impl From<image::ImageError> for AutoLabelError {
    fn from(err: image::ImageError) -> Self {
        Self::Prediction {
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

/// Session construction maps its own errors to `ModelLoad`; anything reaching
/// this conversion comes from `Session::run`.
impl From<ort::Error> for AutoLabelError {
    fn from(err: ort::Error) -> Self {
        Self::Prediction {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ndarray::ShapeError> for AutoLabelError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Prediction {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<serde_yaml::Error> for AutoLabelError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config {
            message: format!("invalid YAML: {err}"),
        }
    }
}
