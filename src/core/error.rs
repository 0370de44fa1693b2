//! Error types for the terrain pipeline

use std::any::Any;

use thiserror::Error;

use crate::terrain::coordinate::{SurveyTileKey, TileKey};

/// Main error type for the terrain pipeline
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Survey tile {0} is not available")]
    SurveyNotFound(SurveyTileKey),

    #[error("Survey tile {key} is malformed: {reason}")]
    MalformedSurvey { key: SurveyTileKey, reason: String },

    #[error("Persisted tile {key} is corrupt or short: {reason}")]
    PersistedTileCorrupt { key: TileKey, reason: String },

    #[error("Failed to persist tile {key}: {source}")]
    PersistWrite {
        key: TileKey,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a background load, delivered through shared futures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("load task panicked: {0}")]
    Panicked(String),

    #[error("load task was cancelled")]
    Cancelled,

    #[error("lod {lod} is outside 0..={max}")]
    LodOutOfRange { lod: i32, max: u32 },
}

impl From<tokio::task::JoinError> for LoadError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            LoadError::Panicked(panic_message(err.into_panic()))
        } else {
            LoadError::Cancelled
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
