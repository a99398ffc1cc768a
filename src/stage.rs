//! # Stage Contract
//!
//! A stage is one logical unit of computation instantiated `parallelism` times.
//! It plays one of two roles:
//!
//! - **[`Source`]**: pulled by the runtime. Each call to [`Source::next`]
//!   yields one record's values, a non-fatal failure, or [`SourceEvent::Done`].
//! - **[`Processor`]**: pushed one record at a time. [`Processor::process`]
//!   may emit any number of derived records through its [`Emitter`].
//!
//! The role is picked per stage when it is declared, through [`StageRole`].
//! Every instance is built by a factory that receives the instance's
//! [`InstanceContext`], so instances never share construction-time state
//! unless the factory deliberately hands out clones of something immutable.
//!
//! ## Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use tupleweave::emitter::Emitter;
//! use tupleweave::error::StageError;
//! use tupleweave::record::{Record, Schema};
//! use tupleweave::stage::Processor;
//!
//! struct Upper;
//!
//! #[async_trait]
//! impl Processor for Upper {
//!   fn output_schema(&self) -> Schema {
//!     Schema::new(["word"])
//!   }
//!
//!   async fn process(&mut self, record: &Record, emitter: &mut Emitter) -> Result<(), StageError> {
//!     let word = record.str_field("word").ok_or_else(|| StageError::processing("no word"))?;
//!     emitter.emit([word.to_uppercase()])
//!   }
//! }
//! ```

use crate::emitter::Emitter;
use crate::error::StageError;
use crate::record::{Record, Schema, Value};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Identity of one stage instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceContext {
  stage: Arc<str>,
  index: usize,
  parallelism: usize,
}

impl InstanceContext {
  /// Creates the context for instance `index` of `parallelism`.
  pub fn new(stage: impl Into<Arc<str>>, index: usize, parallelism: usize) -> Self {
    Self {
      stage: stage.into(),
      index,
      parallelism,
    }
  }

  /// Stage name.
  pub fn stage(&self) -> &str {
    &self.stage
  }

  /// Shared handle to the stage name.
  pub fn stage_arc(&self) -> Arc<str> {
    Arc::clone(&self.stage)
  }

  /// Instance index in `[0, parallelism)`.
  pub fn index(&self) -> usize {
    self.index
  }

  /// Number of instances of this stage.
  pub fn parallelism(&self) -> usize {
    self.parallelism
  }
}

impl fmt::Display for InstanceContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}[{}/{}]", self.stage, self.index, self.parallelism)
  }
}

/// Result of polling a [`Source`].
#[derive(Debug)]
pub enum SourceEvent {
  /// Values for one record in the source's output schema.
  Emit(Vec<Value>),
  /// A non-fatal failure; the runtime reports it and keeps polling.
  Failed(StageError),
  /// The source is exhausted and will not be polled again.
  Done,
}

/// A pull-driven record producer.
#[async_trait]
pub trait Source: Send {
  /// Fields of every record this source emits.
  fn output_schema(&self) -> Schema;

  /// Produces the next event.
  ///
  /// Must be cancel safe: the runtime may drop the returned future when a stop
  /// is requested, and a later call must not lose or duplicate input.
  async fn next(&mut self) -> SourceEvent;
}

/// A record-at-a-time transform or aggregation.
#[async_trait]
pub trait Processor: Send {
  /// Fields of every record this processor emits. Terminal processors that
  /// emit nothing may return [`Schema::empty`].
  fn output_schema(&self) -> Schema;

  /// Fields this processor expects on its inputs, if it cares.
  ///
  /// When declared, every upstream stage must emit a compatible schema or the
  /// topology fails to build.
  fn input_schema(&self) -> Option<Schema> {
    None
  }

  /// Handles one input record.
  ///
  /// Emissions are buffered and only delivered downstream if this returns `Ok`;
  /// on `Err` everything emitted during the call is discarded.
  async fn process(&mut self, record: &Record, emitter: &mut Emitter) -> Result<(), StageError>;
}

/// Builds one [`Source`] instance per context.
pub type SourceFactory = Box<dyn Fn(&InstanceContext) -> Box<dyn Source> + Send + Sync>;

/// Builds one [`Processor`] instance per context.
pub type ProcessorFactory = Box<dyn Fn(&InstanceContext) -> Box<dyn Processor> + Send + Sync>;

/// The role a stage plays, with the factory for its instances.
pub enum StageRole {
  /// Pull-driven producer with no inputs.
  Source(SourceFactory),
  /// Record processor fed by upstream edges.
  Processor(ProcessorFactory),
}

impl StageRole {
  /// Wraps a source factory.
  pub fn source<F, S>(factory: F) -> Self
  where
    F: Fn(&InstanceContext) -> S + Send + Sync + 'static,
    S: Source + 'static,
  {
    StageRole::Source(Box::new(move |ctx| Box::new(factory(ctx)) as Box<dyn Source>))
  }

  /// Wraps a processor factory.
  pub fn processor<F, P>(factory: F) -> Self
  where
    F: Fn(&InstanceContext) -> P + Send + Sync + 'static,
    P: Processor + 'static,
  {
    StageRole::Processor(Box::new(move |ctx| {
      Box::new(factory(ctx)) as Box<dyn Processor>
    }))
  }

  /// Returns `true` for the source role.
  pub fn is_source(&self) -> bool {
    matches!(self, StageRole::Source(_))
  }

  pub(crate) fn instantiate(&self, ctx: &InstanceContext) -> StageInstance {
    match self {
      StageRole::Source(factory) => StageInstance::Source(factory(ctx)),
      StageRole::Processor(factory) => StageInstance::Processor(factory(ctx)),
    }
  }
}

impl fmt::Debug for StageRole {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StageRole::Source(_) => write!(f, "StageRole::Source"),
      StageRole::Processor(_) => write!(f, "StageRole::Processor"),
    }
  }
}

/// A constructed instance, owned by exactly one runtime task.
pub(crate) enum StageInstance {
  Source(Box<dyn Source>),
  Processor(Box<dyn Processor>),
}

impl StageInstance {
  pub(crate) fn output_schema(&self) -> Schema {
    match self {
      StageInstance::Source(source) => source.output_schema(),
      StageInstance::Processor(processor) => processor.output_schema(),
    }
  }

  pub(crate) fn input_schema(&self) -> Option<Schema> {
    match self {
      StageInstance::Source(_) => None,
      StageInstance::Processor(processor) => processor.input_schema(),
    }
  }
}
