use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::Ltrb;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("region {region} lies outside the {width}x{height} scene")]
    RegionOutOfBounds { region: Ltrb, width: u32, height: u32 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to read pattern {path}: {source}")]
    Pattern {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("could not locate {pattern} (confidence {confidence:.2})")]
    LocateFailed { pattern: String, confidence: f32 },

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("chain ran out of candidates without reaching {exits:?}")]
    UnreachedExit { exits: Vec<String> },

    #[error("global timeout of {0:?} exceeded")]
    GlobalTimeout(Duration),

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Device hiccups the chain driver retries after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Device(e) if e.is_transient())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("duplicate action name {0:?}")]
    DuplicateAction(String),

    #[error("unknown action {name:?}{}", referenced_by.as_ref().map(|r| format!(" (referenced by {r:?})")).unwrap_or_default())]
    UnknownAction {
        name: String,
        referenced_by: Option<String>,
    },

    #[error("malformed config document {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config folder {0} does not exist")]
    Missing(PathBuf),
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("device io: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not decode capture: {0}")]
    Decode(String),

    #[error("device disconnected: {0}")]
    Disconnected(String),

    #[error("unsupported on this device: {0}")]
    Unsupported(&'static str),
}

impl DeviceError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeviceError::Command { .. } | DeviceError::Io(_) | DeviceError::Decode(_)
        )
    }
}
