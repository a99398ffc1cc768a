//! # Topology Validation Test Suite
//!
//! Every construction error is raised before any instance runs. These tests
//! declare small, broken topologies and check the exact error returned.

use crate::config::RuntimeConfig;
use crate::emitter::Emitter;
use crate::error::{StageError, TopologyError};
use crate::grouping::Grouping;
use crate::record::{Record, Schema, ValueKind};
use crate::stage::{InstanceContext, Processor};
use crate::stages::{LinesSource, WordCounter, WordSplitter};
use crate::topology::TopologyBuilder;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Forwards records unchanged under a fixed schema.
struct Relay {
  schema: Schema,
}

impl Relay {
  fn new(fields: &[&str]) -> Self {
    Self {
      schema: Schema::new(fields.iter().copied()),
    }
  }
}

#[async_trait]
impl Processor for Relay {
  fn output_schema(&self) -> Schema {
    self.schema.clone()
  }

  async fn process(&mut self, record: &Record, emitter: &mut Emitter) -> Result<(), StageError> {
    emitter.emit(record.values().iter().cloned())
  }
}

fn lines(builder: &mut TopologyBuilder) {
  builder.set_source("text", 1, |_| LinesSource::new(["a b"]));
}

#[test]
fn test_empty_topology() {
  let err = TopologyBuilder::new("t").build().unwrap_err();
  assert_eq!(err, TopologyError::EmptyTopology);
}

#[test]
fn test_duplicate_stage() {
  let mut builder = TopologyBuilder::new("t");
  lines(&mut builder);
  builder
    .set_processor("split", 1, |_| WordSplitter::new())
    .shuffle_grouping("text");
  builder
    .set_processor("split", 1, |_| WordSplitter::new())
    .shuffle_grouping("text");
  assert_eq!(
    builder.build().unwrap_err(),
    TopologyError::DuplicateStage("split".into())
  );
}

#[test]
fn test_zero_parallelism() {
  let mut builder = TopologyBuilder::new("t");
  lines(&mut builder);
  builder
    .set_processor("split", 0, |_| WordSplitter::new())
    .shuffle_grouping("text");
  assert_eq!(
    builder.build().unwrap_err(),
    TopologyError::InvalidParallelism {
      stage: "split".into(),
      parallelism: 0,
    }
  );
}

#[test]
fn test_zero_channel_capacity() {
  let mut builder =
    TopologyBuilder::new("t").with_config(RuntimeConfig::default().with_channel_capacity(0));
  lines(&mut builder);
  assert_eq!(
    builder.build().unwrap_err(),
    TopologyError::InvalidChannelCapacity
  );
}

#[test]
fn test_missing_source() {
  let mut builder = TopologyBuilder::new("t");
  builder
    .set_processor("split", 1, |_| WordSplitter::new())
    .shuffle_grouping("split");
  assert_eq!(builder.build().unwrap_err(), TopologyError::MissingSource);
}

#[test]
fn test_multiple_sources() {
  let mut builder = TopologyBuilder::new("t");
  builder.set_source("a", 1, |_| LinesSource::new(["x"]));
  builder.set_source("b", 1, |_| LinesSource::new(["y"]));
  assert_eq!(
    builder.build().unwrap_err(),
    TopologyError::MultipleSources(vec!["a".into(), "b".into()])
  );
}

#[test]
fn test_source_cannot_subscribe() {
  let mut builder = TopologyBuilder::new("t");
  builder
    .set_source("text", 1, |_| LinesSource::new(["x"]))
    .shuffle_grouping("split");
  builder
    .set_processor("split", 1, |_| WordSplitter::new())
    .shuffle_grouping("text");
  assert_eq!(
    builder.build().unwrap_err(),
    TopologyError::SourceWithInputs("text".into())
  );
}

#[test]
fn test_disconnected_processor() {
  let mut builder = TopologyBuilder::new("t");
  lines(&mut builder);
  builder.set_processor("split", 1, |_| WordSplitter::new());
  assert_eq!(
    builder.build().unwrap_err(),
    TopologyError::DisconnectedStage("split".into())
  );
}

#[test]
fn test_unknown_upstream() {
  let mut builder = TopologyBuilder::new("t");
  lines(&mut builder);
  builder
    .set_processor("split", 1, |_| WordSplitter::new())
    .shuffle_grouping("txt");
  assert_eq!(
    builder.build().unwrap_err(),
    TopologyError::UnknownStage {
      stage: "split".into(),
      missing: "txt".into(),
    }
  );
}

#[test]
fn test_cycle_detected() {
  let mut builder = TopologyBuilder::new("t");
  lines(&mut builder);
  builder
    .set_processor("a", 1, |_| Relay::new(&["line"]))
    .shuffle_grouping("text")
    .shuffle_grouping("b");
  builder
    .set_processor("b", 1, |_| Relay::new(&["line"]))
    .shuffle_grouping("a");
  assert!(matches!(
    builder.build().unwrap_err(),
    TopologyError::CycleDetected(stage) if stage == "a"
  ));
}

#[test]
fn test_self_loop_detected() {
  let mut builder = TopologyBuilder::new("t");
  lines(&mut builder);
  builder
    .set_processor("a", 1, |_| Relay::new(&["line"]))
    .shuffle_grouping("text")
    .shuffle_grouping("a");
  assert_eq!(
    builder.build().unwrap_err(),
    TopologyError::CycleDetected("a".into())
  );
}

#[test]
fn test_fields_grouping_on_unknown_field() {
  let mut builder = TopologyBuilder::new("t");
  lines(&mut builder);
  builder
    .set_processor("split", 2, |_| WordSplitter::new())
    .shuffle_grouping("text");
  builder
    .set_processor("count", 2, |_| WordCounter::new())
    .fields_grouping("split", ["wrd"]);
  assert_eq!(
    builder.build().unwrap_err(),
    TopologyError::UnknownField {
      upstream: "split".into(),
      downstream: "count".into(),
      field: "wrd".into(),
      schema: "[word]".into(),
    }
  );
}

#[test]
fn test_fields_grouping_without_keys() {
  let mut builder = TopologyBuilder::new("t");
  lines(&mut builder);
  builder
    .set_processor("split", 1, |_| WordSplitter::new())
    .grouping("text", Grouping::Fields(vec![]));
  assert!(matches!(
    builder.build().unwrap_err(),
    TopologyError::EmptyGroupingKey { .. }
  ));
}

#[test]
fn test_input_schema_mismatch() {
  let mut builder = TopologyBuilder::new("t");
  lines(&mut builder);
  // The counter expects ["word"] but receives lines.
  builder
    .set_processor("count", 1, |_| WordCounter::new())
    .shuffle_grouping("text");
  match builder.build().unwrap_err() {
    TopologyError::SchemaMismatch {
      upstream,
      downstream,
      reason,
    } => {
      assert_eq!(upstream, "text");
      assert_eq!(downstream, "count");
      assert!(reason.contains("[word]"));
      assert!(reason.contains("[line]"));
    }
    other => panic!("unexpected error: {other}"),
  }
}

#[test]
fn test_inconsistent_instance_schemas() {
  let mut builder = TopologyBuilder::new("t");
  lines(&mut builder);
  builder
    .set_processor("relay", 2, |ctx: &InstanceContext| {
      if ctx.index() == 0 {
        Relay::new(&["line"])
      } else {
        Relay::new(&["other"])
      }
    })
    .shuffle_grouping("text");
  assert_eq!(
    builder.build().unwrap_err(),
    TopologyError::InconsistentSchema("relay".into())
  );
}

#[test]
fn test_one_instance_per_parallelism_slot() {
  let built = Arc::new(AtomicUsize::new(0));
  let mut builder = TopologyBuilder::new("t");
  lines(&mut builder);
  let counter = Arc::clone(&built);
  builder
    .set_processor("split", 4, move |ctx: &InstanceContext| {
      assert_eq!(ctx.parallelism(), 4);
      counter.fetch_add(1, Ordering::SeqCst);
      WordSplitter::new()
    })
    .shuffle_grouping("text");

  let topology = builder.build().unwrap();
  assert_eq!(built.load(Ordering::SeqCst), 4);
  assert_eq!(topology.parallelism("split"), Some(4));
  assert_eq!(topology.parallelism("missing"), None);
}

#[test]
fn test_diamond_topology_order() {
  let mut builder = TopologyBuilder::new("diamond");
  lines(&mut builder);
  builder
    .set_processor("join", 1, |_| Relay::new(&["line"]))
    .shuffle_grouping("left")
    .shuffle_grouping("right");
  builder
    .set_processor("left", 2, |_| Relay::new(&["line"]))
    .shuffle_grouping("text");
  builder
    .set_processor("right", 2, |_| Relay::new(&["line"]))
    .all_grouping("text");

  let topology = builder.build().unwrap();
  assert_eq!(
    topology.execution_order(),
    vec!["text", "left", "right", "join"]
  );
  assert_eq!(topology.terminal_stages(), vec!["join"]);
  assert_eq!(topology.edges().len(), 4);
}

#[test]
fn test_typed_upstream_satisfies_untyped_input() {
  let mut builder = TopologyBuilder::new("t");
  lines(&mut builder);
  builder
    .set_processor("split", 1, |_| WordSplitter::new())
    .shuffle_grouping("text");
  let topology = builder.build().unwrap();
  assert_eq!(
    topology.output_schema("text"),
    Some(&Schema::typed([("line", ValueKind::Str)]))
  );
}
