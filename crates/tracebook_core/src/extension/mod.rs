//! Plugin contracts.
//!
//! Plugins are compiled in and registered in-process; they receive the
//! workspace handle explicitly and subscribe to model channels instead of
//! polling. Dynamic loading is out of scope.

pub mod kernel;
pub mod manifest;

pub use kernel::{Plugin, PluginError, PluginRegistry, PluginStage};
pub use manifest::{ManifestValidationError, PluginManifest, PluginRole};
