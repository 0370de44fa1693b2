//! Core pipeline types and utilities

pub mod config;
pub mod error;
pub mod logging;

pub use config::{SurveyFormat, TerrainConfig, MAX_HEIGHT_WIDTH};
pub use error::{Error, LoadError, Result};
