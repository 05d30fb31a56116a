//! Configuration module for the readalong CLI.
//!
//! Provides CLI argument parsing and conversion into library settings.

#[allow(clippy::module_inception)]
mod config;

pub use config::{AppConfig, BackendKind, Command, LocateArgs, NarrateArgs};
