//! # Error Handling
//!
//! Errors come in two families with different propagation rules:
//!
//! - **[`TopologyError`]**: raised while a topology is being built. Any of these
//!   aborts startup; no stage instance ever runs.
//! - **[`StageError`]**: raised while a single record is being produced or
//!   processed. These are isolated to the record and instance that caused
//!   them: they are reported as a [`StageFailure`] to the run's [`ErrorSink`],
//!   the record is dropped (or retried, see [`ErrorStrategy`]), and every other
//!   instance keeps running.
//!
//! ## Error Strategies
//!
//! - **Skip**: drop the failed record and continue (default)
//! - **Retry(n)**: process the record again, up to `n` extra attempts
//! - **Custom**: user-defined handler deciding per failure
//!
//! Schema violations are never retried: the same emission would fail again.
//!
//! ```rust
//! use tupleweave::error::{ErrorAction, ErrorStrategy, StageError, StageFailure};
//! use tupleweave::stage::InstanceContext;
//!
//! let strategy = ErrorStrategy::new_custom(|failure| {
//!   if failure.retries < 1 && failure.message.contains("timeout") {
//!     ErrorAction::Retry
//!   } else {
//!     ErrorAction::Skip
//!   }
//! });
//!
//! let ctx = InstanceContext::new("count", 0, 1);
//! let failure = StageFailure::new(&ctx, &StageError::processing("timeout"), 0);
//! assert_eq!(strategy.decide(&failure), ErrorAction::Retry);
//! ```

use crate::stage::InstanceContext;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Errors detected while building a topology.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopologyError {
  /// No stages were declared.
  #[error("topology declares no stages")]
  EmptyTopology,

  /// Two stages share a name.
  #[error("stage '{0}' is declared more than once")]
  DuplicateStage(String),

  /// An edge references a stage that was never declared.
  #[error("stage '{stage}' subscribes to unknown stage '{missing}'")]
  UnknownStage {
    /// Stage declaring the edge.
    stage: String,
    /// Name that could not be resolved.
    missing: String,
  },

  /// A stage was declared with zero instances.
  #[error("stage '{stage}' has parallelism {parallelism}; must be at least 1")]
  InvalidParallelism {
    /// Stage name.
    stage: String,
    /// Requested parallelism.
    parallelism: usize,
  },

  /// Queue capacity of zero was configured.
  #[error("channel capacity must be at least 1")]
  InvalidChannelCapacity,

  /// No source stage was declared.
  #[error("topology has no source stage")]
  MissingSource,

  /// More than one source stage was declared.
  #[error("topology has more than one source stage: {0:?}")]
  MultipleSources(Vec<String>),

  /// A source stage subscribed to another stage.
  #[error("source stage '{0}' cannot subscribe to other stages")]
  SourceWithInputs(String),

  /// A processor stage has no inbound edges and would never receive input.
  #[error("processor stage '{0}' has no inbound edges")]
  DisconnectedStage(String),

  /// The stage graph contains a cycle.
  #[error("cycle detected involving stage '{0}'")]
  CycleDetected(String),

  /// A grouping keys on a field the upstream stage does not emit.
  #[error(
    "grouping from '{upstream}' into '{downstream}' keys on unknown field '{field}' (upstream emits {schema})"
  )]
  UnknownField {
    /// Upstream stage.
    upstream: String,
    /// Downstream stage.
    downstream: String,
    /// The unresolved key field.
    field: String,
    /// Upstream output schema, rendered.
    schema: String,
  },

  /// A fields grouping declared no key fields.
  #[error("fields grouping from '{upstream}' into '{downstream}' declares no key fields")]
  EmptyGroupingKey {
    /// Upstream stage.
    upstream: String,
    /// Downstream stage.
    downstream: String,
  },

  /// An edge's upstream output disagrees with what the downstream expects.
  #[error("schema mismatch between '{upstream}' and '{downstream}': {reason}")]
  SchemaMismatch {
    /// Upstream stage.
    upstream: String,
    /// Downstream stage.
    downstream: String,
    /// Description of the disagreement.
    reason: String,
  },

  /// Instances of one stage declared different output schemas.
  #[error("instances of stage '{0}' declare different output schemas")]
  InconsistentSchema(String),
}

/// Errors raised while producing or processing a single record.
#[derive(Debug, Error)]
pub enum StageError {
  /// Emitted values disagree with the stage's declared schema.
  #[error("schema mismatch: {0}")]
  SchemaMismatch(String),

  /// An input file could not be listed, opened or read.
  #[error("failed to read '{}': {source}", .path.display())]
  SourceRead {
    /// File that failed.
    path: PathBuf,
    /// Underlying I/O error.
    #[source]
    source: std::io::Error,
  },

  /// Any other failure returned by stage logic.
  #[error("{0}")]
  Processing(String),
}

impl StageError {
  /// Creates a [`StageError::Processing`] from a message.
  pub fn processing(message: impl Into<String>) -> Self {
    StageError::Processing(message.into())
  }

  /// Returns the failure kind for reporting.
  pub fn kind(&self) -> FailureKind {
    match self {
      StageError::SchemaMismatch(_) => FailureKind::SchemaMismatch,
      StageError::SourceRead { .. } => FailureKind::SourceRead,
      StageError::Processing(_) => FailureKind::Processing,
    }
  }
}

/// Category of a reported [`StageFailure`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FailureKind {
  /// An emission disagreed with the declared schema.
  SchemaMismatch,
  /// A source file could not be read.
  SourceRead,
  /// Stage logic returned an error.
  Processing,
  /// A stage instance panicked.
  Panicked,
}

/// A runtime failure reported to the error sink.
#[derive(Clone, Debug, Serialize)]
pub struct StageFailure {
  /// Stage whose instance failed.
  pub stage: String,
  /// Index of the failing instance.
  pub instance: usize,
  /// Failure category.
  pub kind: FailureKind,
  /// Rendered error message.
  pub message: String,
  /// When the failure was observed.
  pub timestamp: DateTime<Utc>,
  /// Attempts already retried for the record.
  pub retries: usize,
}

impl StageFailure {
  /// Builds a failure report for an instance.
  pub fn new(ctx: &InstanceContext, error: &StageError, retries: usize) -> Self {
    Self {
      stage: ctx.stage().to_string(),
      instance: ctx.index(),
      kind: error.kind(),
      message: error.to_string(),
      timestamp: Utc::now(),
      retries,
    }
  }

  /// Builds a report for an instance whose task panicked.
  pub fn panicked(ctx: &InstanceContext, message: impl Into<String>) -> Self {
    Self {
      stage: ctx.stage().to_string(),
      instance: ctx.index(),
      kind: FailureKind::Panicked,
      message: message.into(),
      timestamp: Utc::now(),
      retries: 0,
    }
  }
}

impl fmt::Display for StageFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}[{}] {:?}: {}",
      self.stage, self.instance, self.kind, self.message
    )
  }
}

/// Collector for runtime failures, shared by every instance of a run.
#[derive(Clone, Debug)]
pub struct ErrorSink {
  tx: mpsc::UnboundedSender<StageFailure>,
}

impl ErrorSink {
  /// Creates a sink and the receiver that collects its reports.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<StageFailure>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }

  /// Logs and records a failure.
  pub fn report(&self, failure: StageFailure) {
    match failure.kind {
      FailureKind::SourceRead | FailureKind::Panicked => error!(
        stage = %failure.stage,
        instance = failure.instance,
        kind = ?failure.kind,
        error = %failure.message,
        "stage failure"
      ),
      _ => warn!(
        stage = %failure.stage,
        instance = failure.instance,
        kind = ?failure.kind,
        retries = failure.retries,
        error = %failure.message,
        "record failed"
      ),
    }
    // The receiver lives as long as the run; a closed sink only means nobody listens.
    let _ = self.tx.send(failure);
  }
}

/// Action to take after a record fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
  /// Drop the record and continue with the next one.
  Skip,
  /// Process the same record again.
  Retry,
}

type CustomErrorHandler = Arc<dyn Fn(&StageFailure) -> ErrorAction + Send + Sync>;

/// Retries after which a custom handler is no longer consulted and the record
/// is skipped.
pub const CUSTOM_RETRY_LIMIT: usize = 16;

/// Per-stage policy for records whose processing fails.
#[derive(Default)]
pub enum ErrorStrategy {
  /// Drop failed records.
  #[default]
  Skip,
  /// Retry a failed record up to the given number of extra attempts, then drop it.
  Retry(usize),
  /// Decide per failure, for at most [`CUSTOM_RETRY_LIMIT`] retries per record.
  Custom(CustomErrorHandler),
}

impl ErrorStrategy {
  /// Creates a custom strategy from a handler.
  ///
  /// Once a record has been retried [`CUSTOM_RETRY_LIMIT`] times it is skipped
  /// without consulting the handler.
  pub fn new_custom<F>(f: F) -> Self
  where
    F: Fn(&StageFailure) -> ErrorAction + Send + Sync + 'static,
  {
    Self::Custom(Arc::new(f))
  }

  /// Decides what to do with a failed record.
  pub fn decide(&self, failure: &StageFailure) -> ErrorAction {
    match self {
      ErrorStrategy::Skip => ErrorAction::Skip,
      ErrorStrategy::Retry(max) if failure.retries < *max => ErrorAction::Retry,
      ErrorStrategy::Retry(_) => ErrorAction::Skip,
      ErrorStrategy::Custom(_) if failure.retries >= CUSTOM_RETRY_LIMIT => ErrorAction::Skip,
      ErrorStrategy::Custom(handler) => handler(failure),
    }
  }
}

impl Clone for ErrorStrategy {
  fn clone(&self) -> Self {
    match self {
      ErrorStrategy::Skip => ErrorStrategy::Skip,
      ErrorStrategy::Retry(n) => ErrorStrategy::Retry(*n),
      ErrorStrategy::Custom(handler) => ErrorStrategy::Custom(handler.clone()),
    }
  }
}

impl fmt::Debug for ErrorStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ErrorStrategy::Skip => write!(f, "ErrorStrategy::Skip"),
      ErrorStrategy::Retry(n) => write!(f, "ErrorStrategy::Retry({})", n),
      ErrorStrategy::Custom(_) => write!(f, "ErrorStrategy::Custom"),
    }
  }
}

impl PartialEq for ErrorStrategy {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (ErrorStrategy::Skip, ErrorStrategy::Skip) => true,
      (ErrorStrategy::Retry(a), ErrorStrategy::Retry(b)) => a == b,
      (ErrorStrategy::Custom(_), ErrorStrategy::Custom(_)) => true,
      _ => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn failure(retries: usize) -> StageFailure {
    let ctx = InstanceContext::new("count", 1, 3);
    StageFailure::new(&ctx, &StageError::processing("boom"), retries)
  }

  #[test]
  fn test_skip_strategy() {
    assert_eq!(ErrorStrategy::Skip.decide(&failure(0)), ErrorAction::Skip);
  }

  #[test]
  fn test_retry_strategy_is_bounded() {
    let strategy = ErrorStrategy::Retry(1);
    assert_eq!(strategy.decide(&failure(0)), ErrorAction::Retry);
    assert_eq!(strategy.decide(&failure(1)), ErrorAction::Skip);
  }

  #[test]
  fn test_custom_strategy() {
    let strategy = ErrorStrategy::new_custom(|f| {
      if f.stage == "count" {
        ErrorAction::Retry
      } else {
        ErrorAction::Skip
      }
    });
    assert_eq!(strategy.decide(&failure(5)), ErrorAction::Retry);
    assert_eq!(format!("{:?}", strategy), "ErrorStrategy::Custom");
  }

  #[test]
  fn test_custom_strategy_retries_are_bounded() {
    let strategy = ErrorStrategy::new_custom(|_| ErrorAction::Retry);
    assert_eq!(
      strategy.decide(&failure(CUSTOM_RETRY_LIMIT - 1)),
      ErrorAction::Retry
    );
    assert_eq!(
      strategy.decide(&failure(CUSTOM_RETRY_LIMIT)),
      ErrorAction::Skip
    );
  }

  #[test]
  fn test_failure_carries_instance_info() {
    let f = failure(2);
    assert_eq!(f.stage, "count");
    assert_eq!(f.instance, 1);
    assert_eq!(f.kind, FailureKind::Processing);
    assert_eq!(f.retries, 2);
    assert_eq!(f.to_string(), "count[1] Processing: boom");
  }

  #[tokio::test]
  async fn test_error_sink_collects_reports() {
    let (sink, mut rx) = ErrorSink::channel();
    sink.report(failure(0));
    drop(sink);
    let received = rx.recv().await.unwrap();
    assert_eq!(received.message, "boom");
    assert!(rx.recv().await.is_none());
  }

  #[test]
  fn test_source_read_error_message() {
    let err = StageError::SourceRead {
      path: PathBuf::from("/books/a.txt"),
      source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
    };
    assert_eq!(err.kind(), FailureKind::SourceRead);
    assert_eq!(err.to_string(), "failed to read '/books/a.txt': gone");
  }
}
