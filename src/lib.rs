#![deny(missing_docs)]

//! Core library for the finrag document question-answering service.

/// HTTP routing, middleware, and error rendering.
pub mod api;
/// Credential checks for caller and admin surfaces.
pub mod auth;
/// Environment-driven configuration management.
pub mod config;
/// Process-wide serving state.
pub mod context;
/// Documents and chunks.
pub mod document;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Request-facing error taxonomy.
pub mod error;
/// Answer generation clients and prompt assembly.
pub mod generation;
/// Liveness reporting.
pub mod health;
/// Vector index, persistence, and snapshot publication.
pub mod index;
/// Corpus loading, splitting, and ingestion orchestration.
pub mod ingestion;
/// Structured logging and tracing setup.
pub mod logging;
/// Question answering with citations.
pub mod query;
/// Sliding-window rate limiting.
pub mod rate_limit;
