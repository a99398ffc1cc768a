//! Running word frequencies.

use super::splitter::WORD_FIELD;
use crate::emitter::Emitter;
use crate::error::StageError;
use crate::record::{Record, Schema, Value, ValueKind};
use crate::stage::Processor;
use async_trait::async_trait;
use std::collections::HashMap;

/// Name of the field carrying a running count.
pub const COUNT_FIELD: &str = "count";

/// Counts words and emits `["word", "count"]` after every increment.
///
/// State is private to the instance. Fed through a fields grouping on
/// `word`, each instance sees every occurrence of the words it owns, so the
/// emitted count is the exact global count so far.
#[derive(Debug, Default)]
pub struct WordCounter {
  counts: HashMap<String, u64>,
}

impl WordCounter {
  /// Creates a counter with no words seen.
  pub fn new() -> Self {
    Self::default()
  }

  /// Count so far for `word`.
  pub fn count(&self, word: &str) -> u64 {
    self.counts.get(word).copied().unwrap_or(0)
  }

  /// Number of distinct words seen.
  pub fn distinct(&self) -> usize {
    self.counts.len()
  }
}

#[async_trait]
impl Processor for WordCounter {
  fn output_schema(&self) -> Schema {
    Schema::typed([(WORD_FIELD, ValueKind::Str), (COUNT_FIELD, ValueKind::Int)])
  }

  fn input_schema(&self) -> Option<Schema> {
    Some(Schema::new([WORD_FIELD]))
  }

  async fn process(&mut self, record: &Record, emitter: &mut Emitter) -> Result<(), StageError> {
    let word = record
      .str_field(WORD_FIELD)
      .ok_or_else(|| StageError::processing(format!("record from '{}' has no word", record.source())))?;
    let count = self.counts.entry(word.to_string()).or_insert(0);
    *count += 1;
    emitter.emit([Value::from(word), Value::from(*count)])
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorSink;
  use crate::stage::InstanceContext;
  use std::sync::Arc;

  #[tokio::test]
  async fn test_counts_are_cumulative() {
    let (sink, _rx) = ErrorSink::channel();
    let mut counter = WordCounter::new();
    let mut emitter = Emitter::new(
      InstanceContext::new("count", 0, 1),
      Arc::new(counter.output_schema()),
      sink,
      false,
    );
    let schema = Arc::new(Schema::new([WORD_FIELD]));

    for word in ["the", "cat", "the", "the"] {
      let record =
        Record::try_new(Arc::from("split"), Arc::clone(&schema), vec![Value::from(word)]).unwrap();
      counter.process(&record, &mut emitter).await.unwrap();
    }

    let emitted: Vec<(String, i64)> = emitter
      .drain()
      .iter()
      .map(|r| {
        (
          r.str_field(WORD_FIELD).unwrap().to_string(),
          r.int_field(COUNT_FIELD).unwrap(),
        )
      })
      .collect();
    assert_eq!(
      emitted,
      vec![
        ("the".to_string(), 1),
        ("cat".to_string(), 1),
        ("the".to_string(), 2),
        ("the".to_string(), 3),
      ]
    );
    assert_eq!(counter.count("the"), 3);
    assert_eq!(counter.count("dog"), 0);
    assert_eq!(counter.distinct(), 2);
  }
}
