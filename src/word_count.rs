//! # Word Count
//!
//! The canonical three-stage pipeline:
//!
//! ```text
//! text (source) --shuffle--> split --fields(word)--> count
//! ```
//!
//! Lines are spread round-robin over the splitters; words are keyed to
//! counters so each counter owns a disjoint set of words. The output is one
//! `(word, count)` record per word occurrence, with counts per word rising
//! 1, 2, 3, ... in arrival order.

use crate::config::{RuntimeConfig, WordCountConfig};
use crate::error::TopologyError;
use crate::record::Record;
use crate::stages::{COUNT_FIELD, LinesSource, TextSource, WORD_FIELD, WordCounter, WordSplitter};
use crate::topology::{Topology, TopologyBuilder};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name of the source stage.
pub const SOURCE: &str = "text";
/// Name of the splitter stage.
pub const SPLITTER: &str = "split";
/// Name of the counter stage.
pub const COUNTER: &str = "count";

/// Builds the word-count topology over the files below `config.text_root`.
///
/// # Errors
///
/// Propagates any [`TopologyError`], e.g. a zero parallelism in `config`.
pub fn topology(config: &WordCountConfig) -> Result<Topology, TopologyError> {
  let root = config.text_root.clone();
  let mut builder = TopologyBuilder::new("word-count").with_config(config.runtime.clone());
  builder.set_source(SOURCE, config.source_parallelism, move |ctx| {
    TextSource::for_instance(&root, ctx)
  });
  wire_counting(
    &mut builder,
    config.splitter_parallelism,
    config.counter_parallelism,
  );
  builder.build()
}

/// Builds the word-count topology over in-memory lines.
///
/// # Errors
///
/// Propagates any [`TopologyError`].
pub fn topology_from_lines<I, S>(
  lines: I,
  splitter_parallelism: usize,
  counter_parallelism: usize,
  runtime: RuntimeConfig,
) -> Result<Topology, TopologyError>
where
  I: IntoIterator<Item = S>,
  S: Into<String>,
{
  let lines: Arc<[String]> = lines.into_iter().map(Into::into).collect();
  let mut builder = TopologyBuilder::new("word-count").with_config(runtime);
  builder.set_source(SOURCE, 1, move |ctx| {
    LinesSource::for_instance(lines.iter().cloned(), ctx)
  });
  wire_counting(&mut builder, splitter_parallelism, counter_parallelism);
  builder.build()
}

fn wire_counting(builder: &mut TopologyBuilder, splitter: usize, counter: usize) {
  builder
    .set_processor(SPLITTER, splitter, |_| WordSplitter::new())
    .shuffle_grouping(SOURCE);
  builder
    .set_processor(COUNTER, counter, |_| WordCounter::new())
    .fields_grouping(SPLITTER, [WORD_FIELD]);
}

/// Folds counter output into the final count per word.
///
/// Counts for a word only ever rise, so the largest one seen is the total.
pub fn final_counts(records: &[Record]) -> BTreeMap<String, u64> {
  let mut totals = BTreeMap::new();
  for record in records {
    let (Some(word), Some(count)) = (record.str_field(WORD_FIELD), record.int_field(COUNT_FIELD))
    else {
      continue;
    };
    let count = u64::try_from(count).unwrap_or(0);
    let total = totals.entry(word.to_string()).or_insert(0);
    *total = (*total).max(count);
  }
  totals
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::grouping::Grouping;

  #[test]
  fn test_topology_shape() {
    let topology =
      topology_from_lines(["the cat"], 5, 3, RuntimeConfig::default()).unwrap();

    assert_eq!(topology.execution_order(), vec![SOURCE, SPLITTER, COUNTER]);
    assert_eq!(topology.parallelism(SPLITTER), Some(5));
    assert_eq!(topology.parallelism(COUNTER), Some(3));
    assert_eq!(topology.terminal_stages(), vec![COUNTER]);
    assert_eq!(topology.edges()[0].grouping(), &Grouping::Shuffle);
    assert_eq!(topology.edges()[1].grouping(), &Grouping::fields(["word"]));
    assert_eq!(
      topology.output_schema(COUNTER).map(ToString::to_string),
      Some("[word, count]".to_string())
    );
  }

  #[test]
  fn test_max_task_parallelism_caps_stages() {
    let runtime = RuntimeConfig::default().with_max_task_parallelism(3);
    let topology = topology_from_lines(["x"], 5, 4, runtime).unwrap();
    assert_eq!(topology.parallelism(SPLITTER), Some(3));
    assert_eq!(topology.parallelism(COUNTER), Some(3));
  }

  #[test]
  fn test_zero_parallelism_rejected() {
    let err = topology_from_lines(["x"], 0, 1, RuntimeConfig::default())
      .err()
      .unwrap();
    assert_eq!(
      err,
      TopologyError::InvalidParallelism {
        stage: SPLITTER.to_string(),
        parallelism: 0,
      }
    );
  }

  #[tokio::test]
  async fn test_end_to_end_counts() {
    let output = topology_from_lines(
      ["the cat", "the dog", "the cat"],
      2,
      3,
      RuntimeConfig::default(),
    )
    .unwrap()
    .run()
    .await;

    let mut per_word: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for record in &output.records {
      per_word
        .entry(record.str_field("word").unwrap().to_string())
        .or_default()
        .push(record.int_field("count").unwrap());
    }
    assert_eq!(per_word["the"], vec![1, 2, 3]);
    assert_eq!(per_word["cat"], vec![1, 2]);
    assert_eq!(per_word["dog"], vec![1]);

    let totals = final_counts(&output.records);
    assert_eq!(totals.get("the"), Some(&3));
    assert_eq!(totals.get("cat"), Some(&2));
    assert_eq!(totals.get("dog"), Some(&1));
    assert!(output.report.is_clean());
  }
}
