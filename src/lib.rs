//! # tupleweave
//!
//! Keyed, parallel streaming topologies in pure Rust.
//!
//! A topology wires one source stage to processor stages. Every stage runs as
//! several concurrent instances, and every edge carries a grouping that decides
//! which downstream instance receives each record. A fields grouping sends all
//! records with equal key values to the same instance, so per-key state lives
//! privately inside one instance and never needs coordination.
//!
//! ## Key Features
//!
//! - **Per-Instance State**: no shared mutable state between stage instances
//! - **Groupings**: shuffle, fields, all (broadcast) and global
//! - **Async-First**: one Tokio task per instance, bounded queues for back-pressure
//! - **Validated Up Front**: schemas, grouping keys and acyclicity are checked before anything runs
//! - **Isolated Failures**: a failing record is reported and dropped or retried; the run continues
//!
//! ## Quick Start
//!
//! ```rust
//! use tupleweave::config::RuntimeConfig;
//! use tupleweave::word_count;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let topology = word_count::topology_from_lines(
//!   ["the cat", "the dog", "the cat"],
//!   2,
//!   3,
//!   RuntimeConfig::default(),
//! )?;
//! let output = topology.run().await;
//! let totals = word_count::final_counts(&output.records);
//! assert_eq!(totals["the"], 3);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

/// Runtime and pipeline configuration.
pub mod config;
/// Buffered, schema-checked stage output.
pub mod emitter;
/// Construction and runtime errors, failure reports and error strategies.
pub mod error;
/// Recursive file listing for text sources.
pub mod files;
/// Edge groupings and per-instance routers.
pub mod grouping;
/// Tracing subscriber setup.
pub mod logging;
/// Records, values and schemas.
pub mod record;
/// Task-per-instance execution of a built topology.
pub mod runtime;
/// Source and processor traits.
pub mod stage;
/// Built-in text stages.
pub mod stages;
/// Topology declaration and validation.
pub mod topology;
/// The word-count pipeline.
pub mod word_count;

#[cfg(test)]
mod topology_test;
