#![deny(missing_docs)]

//! Core library for the chunklab chunking-strategy benchmark service.

/// HTTP routing and REST handlers.
pub mod api;
/// Chunk-test orchestration, metrics and summaries.
pub mod chunk_test;
/// Chunking strategies and the method registry.
pub mod chunking;
/// Environment-driven configuration management.
pub mod config;
/// Benchmark dataset sources and registry.
pub mod datasets;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Vector index abstraction with in-memory and Qdrant backends.
pub mod index;
/// Job scheduler, progress tracking and single-flight coordination.
pub mod jobs;
/// Structured logging and tracing setup.
pub mod logging;
/// Service counters.
pub mod metrics;
/// Document extraction, cleaning and ingestion pipeline.
pub mod processing;
/// Retry policy and decorator for provider calls.
pub mod retry;
/// Application service wiring every component together.
pub mod service;
/// Durable chunk-test records and results.
pub mod store;
/// Timestamp helpers.
pub mod timestamp;
