//! Core types, config, errors, and settings model for voxdub.

pub mod clock;
pub mod config;
pub mod error;
pub mod processor;
pub mod settings;
pub mod types;
