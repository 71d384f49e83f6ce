//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate model and repository calls into workspace-level APIs.
//! - Keep the CLI and plugins decoupled from file layout details.

pub mod workspace_service;
