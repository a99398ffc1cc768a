//! # Emitter
//!
//! The output side of a stage instance. Stage logic calls [`Emitter::emit`];
//! the emitter validates the values against the stage's declared schema and
//! parks the resulting [`Record`] in an outbox. The runtime drains the outbox
//! after the stage call returns and hands each record to the routers of the
//! stage's outgoing edges, so emitting never blocks stage logic.
//!
//! A rejected emission is reported to the run's [`ErrorSink`] right here and
//! the offending values are dropped; earlier emissions in the same call stay
//! in the outbox.

use crate::error::{ErrorSink, StageError, StageFailure};
use crate::record::{Record, Schema, Value};
use crate::stage::InstanceContext;
use std::sync::Arc;
use tracing::trace;

/// Buffered, schema-checked output of one stage instance.
#[derive(Debug)]
pub struct Emitter {
  ctx: InstanceContext,
  schema: Arc<Schema>,
  outbox: Vec<Record>,
  errors: ErrorSink,
  debug: bool,
  rejected: bool,
}

impl Emitter {
  /// Creates an emitter for an instance whose records follow `schema`.
  ///
  /// With `debug` set, every accepted emission is logged at `TRACE`.
  pub fn new(ctx: InstanceContext, schema: Arc<Schema>, errors: ErrorSink, debug: bool) -> Self {
    Self {
      ctx,
      schema,
      outbox: Vec::new(),
      errors,
      debug,
      rejected: false,
    }
  }

  /// Emits one record.
  ///
  /// # Errors
  ///
  /// Returns [`StageError::SchemaMismatch`] if the values disagree with the
  /// declared schema. The failure has already been reported when this returns.
  pub fn emit<I, V>(&mut self, values: I) -> Result<(), StageError>
  where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
  {
    let values: Vec<Value> = values.into_iter().map(Into::into).collect();
    match Record::try_new(self.ctx.stage_arc(), Arc::clone(&self.schema), values) {
      Ok(record) => {
        if self.debug {
          trace!(
            stage = %self.ctx.stage(),
            instance = self.ctx.index(),
            values = ?record.values(),
            "emit"
          );
        }
        self.outbox.push(record);
        Ok(())
      }
      Err(err) => {
        self.errors.report(StageFailure::new(&self.ctx, &err, 0));
        self.rejected = true;
        Err(err)
      }
    }
  }

  /// The schema emissions are checked against.
  pub fn schema(&self) -> &Schema {
    &self.schema
  }

  /// Number of records waiting in the outbox.
  pub fn pending(&self) -> usize {
    self.outbox.len()
  }

  /// Takes every buffered record, oldest first.
  pub fn drain(&mut self) -> Vec<Record> {
    std::mem::take(&mut self.outbox)
  }

  /// Drops every buffered record.
  pub(crate) fn discard(&mut self) {
    self.outbox.clear();
  }

  /// Whether an emission was rejected (and reported) since the last call.
  pub(crate) fn take_rejected(&mut self) -> bool {
    std::mem::take(&mut self.rejected)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::FailureKind;
  use crate::record::ValueKind;

  fn emitter() -> (Emitter, tokio::sync::mpsc::UnboundedReceiver<StageFailure>) {
    let (sink, rx) = ErrorSink::channel();
    let schema = Arc::new(Schema::typed([
      ("word", ValueKind::Str),
      ("count", ValueKind::Int),
    ]));
    (
      Emitter::new(InstanceContext::new("count", 0, 2), schema, sink, true),
      rx,
    )
  }

  #[test]
  fn test_emit_buffers_in_order() {
    let (mut emitter, _rx) = emitter();
    emitter
      .emit(vec![Value::from("the"), Value::from(1i64)])
      .unwrap();
    emitter
      .emit(vec![Value::from("cat"), Value::from(1i64)])
      .unwrap();

    assert_eq!(emitter.pending(), 2);
    let records = emitter.drain();
    assert_eq!(records[0].str_field("word"), Some("the"));
    assert_eq!(records[1].str_field("word"), Some("cat"));
    assert_eq!(records[0].source(), "count");
    assert_eq!(emitter.pending(), 0);
  }

  #[test]
  fn test_emit_rejects_and_reports_mismatch() {
    let (mut emitter, mut rx) = emitter();
    let err = emitter.emit(["only-one"]).unwrap_err();

    assert!(matches!(err, StageError::SchemaMismatch(_)));
    assert_eq!(emitter.pending(), 0);

    let failure = rx.try_recv().unwrap();
    assert_eq!(failure.kind, FailureKind::SchemaMismatch);
    assert_eq!(failure.stage, "count");

    assert!(emitter.take_rejected());
    assert!(!emitter.take_rejected());
  }

  #[test]
  fn test_schema_is_the_declared_one() {
    let (mut emitter, _rx) = emitter();
    assert_eq!(emitter.schema().to_string(), "[word, count]");
    emitter
      .emit(vec![Value::from("the"), Value::from(1i64)])
      .unwrap();
    assert!(!emitter.take_rejected());
  }

  #[test]
  fn test_discard_clears_outbox() {
    let (mut emitter, _rx) = emitter();
    emitter
      .emit(vec![Value::from("dog"), Value::from(3i64)])
      .unwrap();
    emitter.discard();
    assert!(emitter.drain().is_empty());
  }
}
