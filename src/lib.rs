//! Terrastream - streaming multi-resolution terrain from raw elevation surveys

pub mod core;
pub mod streaming;
pub mod terrain;
