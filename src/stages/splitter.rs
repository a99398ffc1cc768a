//! Line to word splitting.

use super::text_source::LINE_FIELD;
use crate::emitter::Emitter;
use crate::error::StageError;
use crate::record::{Record, Schema, ValueKind};
use crate::stage::Processor;
use async_trait::async_trait;

/// Name of the field carrying a single word.
pub const WORD_FIELD: &str = "word";

/// Emits one `["word"]` record per whitespace-delimited token of a line.
///
/// Tokens are emitted left to right; runs of whitespace never produce empty
/// words. Stateless, so any grouping works upstream of it.
#[derive(Clone, Copy, Debug, Default)]
pub struct WordSplitter;

impl WordSplitter {
  /// Creates a splitter.
  pub fn new() -> Self {
    Self
  }
}

#[async_trait]
impl Processor for WordSplitter {
  fn output_schema(&self) -> Schema {
    Schema::typed([(WORD_FIELD, ValueKind::Str)])
  }

  fn input_schema(&self) -> Option<Schema> {
    Some(Schema::new([LINE_FIELD]))
  }

  async fn process(&mut self, record: &Record, emitter: &mut Emitter) -> Result<(), StageError> {
    let line = record
      .str_field(LINE_FIELD)
      .ok_or_else(|| StageError::processing(format!("record from '{}' has no line", record.source())))?;
    for word in line.split_whitespace() {
      emitter.emit([word])?;
    }
    Ok(())
  }
}
