//! In-memory line source.

use super::text_source::LINE_FIELD;
use crate::record::{Schema, Value, ValueKind};
use crate::stage::{InstanceContext, Source, SourceEvent};
use async_trait::async_trait;
use std::collections::VecDeque;

/// Emits a fixed list of lines, then finishes.
#[derive(Debug, Default)]
pub struct LinesSource {
  lines: VecDeque<String>,
}

impl LinesSource {
  /// Creates a source over `lines`, emitted in order.
  pub fn new<I, S>(lines: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      lines: lines.into_iter().map(Into::into).collect(),
    }
  }

  /// The share of `lines` emitted by one instance: every line whose position
  /// is the instance index modulo the parallelism.
  pub fn for_instance<I, S>(lines: I, ctx: &InstanceContext) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let parallelism = ctx.parallelism().max(1);
    Self::new(
      lines
        .into_iter()
        .enumerate()
        .filter(|(position, _)| position % parallelism == ctx.index())
        .map(|(_, line)| line),
    )
  }
}

#[async_trait]
impl Source for LinesSource {
  fn output_schema(&self) -> Schema {
    Schema::typed([(LINE_FIELD, ValueKind::Str)])
  }

  async fn next(&mut self) -> SourceEvent {
    match self.lines.pop_front() {
      Some(line) => SourceEvent::Emit(vec![Value::from(line)]),
      None => SourceEvent::Done,
    }
  }
}
