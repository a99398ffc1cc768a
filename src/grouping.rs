//! # Groupings and Routing
//!
//! Every edge of a topology carries a [`Grouping`], which decides which
//! downstream instance receives each record emitted upstream.
//!
//! - **Shuffle**: round-robin over the downstream instances. Every instance
//!   gets work; no key affinity.
//! - **Fields**: the key fields are hashed and reduced modulo the downstream
//!   parallelism, so equal keys always land on the same instance. This is what
//!   makes per-instance aggregation correct.
//! - **All**: every downstream instance receives a copy.
//! - **Global**: everything goes to instance 0.
//!
//! A grouping is declared by field name and resolved once, at build time, into
//! a [`GroupingPlan`] holding field positions. Each upstream instance then owns
//! a private [`Router`], so routing needs no coordination between instances.

use crate::error::TopologyError;
use crate::record::{Record, Schema, Value};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

/// How records on an edge are distributed across downstream instances.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "fields")]
pub enum Grouping {
  /// Round-robin across downstream instances.
  Shuffle,
  /// Hash of the named key fields, modulo downstream parallelism.
  Fields(Vec<String>),
  /// Every downstream instance receives every record.
  All,
  /// Every record goes to downstream instance 0.
  Global,
}

impl Grouping {
  /// Fields grouping over the given key fields.
  pub fn fields<I, S>(keys: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Grouping::Fields(keys.into_iter().map(Into::into).collect())
  }

  /// Resolves field names against the upstream schema.
  ///
  /// # Errors
  ///
  /// [`TopologyError::EmptyGroupingKey`] if a fields grouping names no keys,
  /// [`TopologyError::UnknownField`] if a key is not in `schema`.
  pub fn resolve(
    &self,
    upstream: &str,
    downstream: &str,
    schema: &Schema,
  ) -> Result<GroupingPlan, TopologyError> {
    match self {
      Grouping::Shuffle => Ok(GroupingPlan::Shuffle),
      Grouping::All => Ok(GroupingPlan::All),
      Grouping::Global => Ok(GroupingPlan::Global),
      Grouping::Fields(keys) => {
        if keys.is_empty() {
          return Err(TopologyError::EmptyGroupingKey {
            upstream: upstream.to_string(),
            downstream: downstream.to_string(),
          });
        }
        let indices = keys
          .iter()
          .map(|key| {
            schema
              .index_of(key)
              .ok_or_else(|| TopologyError::UnknownField {
                upstream: upstream.to_string(),
                downstream: downstream.to_string(),
                field: key.clone(),
                schema: schema.to_string(),
              })
          })
          .collect::<Result<Vec<_>, _>>()?;
        Ok(GroupingPlan::Fields(indices))
      }
    }
  }
}

/// A grouping with key fields resolved to positions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupingPlan {
  /// Round-robin.
  Shuffle,
  /// Hash of the values at these positions.
  Fields(Vec<usize>),
  /// Broadcast.
  All,
  /// Instance 0.
  Global,
}

/// Hashes the key values of `values` at `indices`.
///
/// Deterministic for a given build: `DefaultHasher::new()` uses fixed keys, so
/// every upstream instance computes the same hash for the same key.
pub fn fields_hash(values: &[Value], indices: &[usize]) -> u64 {
  let mut hasher = DefaultHasher::new();
  for &i in indices {
    if let Some(value) = values.get(i) {
      value.hash_canonical(&mut hasher);
    }
  }
  hasher.finish()
}

/// Target instance for a fields grouping. A parallelism of 0 is treated as 1.
pub fn fields_partition(values: &[Value], indices: &[usize], parallelism: usize) -> usize {
  (fields_hash(values, indices) % parallelism.max(1) as u64) as usize
}

/// Downstream instances a record is delivered to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Targets {
  /// A single instance.
  One(usize),
  /// Every instance.
  All,
}

/// Per-upstream-instance routing state for one edge.
#[derive(Debug)]
pub struct Router {
  plan: GroupingPlan,
  parallelism: usize,
  next: usize,
}

impl Router {
  /// Creates a router for `parallelism` downstream instances.
  ///
  /// `offset` seeds the round-robin cursor; the runtime passes the upstream
  /// instance index so parallel upstreams start on different targets.
  pub fn new(plan: GroupingPlan, parallelism: usize, offset: usize) -> Self {
    let parallelism = parallelism.max(1);
    Self {
      plan,
      parallelism,
      next: offset % parallelism,
    }
  }

  /// Downstream parallelism this router distributes over.
  pub fn parallelism(&self) -> usize {
    self.parallelism
  }

  /// Picks the target(s) for `record`.
  pub fn select(&mut self, record: &Record) -> Targets {
    match &self.plan {
      GroupingPlan::Shuffle => {
        let target = self.next;
        self.next = (self.next + 1) % self.parallelism;
        Targets::One(target)
      }
      GroupingPlan::Fields(indices) => {
        Targets::One(fields_partition(record.values(), indices, self.parallelism))
      }
      GroupingPlan::All => Targets::All,
      GroupingPlan::Global => Targets::One(0),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::record::ValueKind;
  use proptest::prelude::*;
  use std::sync::Arc;

  fn word_schema() -> Arc<Schema> {
    Arc::new(Schema::typed([("word", ValueKind::Str)]))
  }

  fn word(w: &str) -> Record {
    Record::try_new(Arc::from("split"), word_schema(), vec![Value::from(w)]).unwrap()
  }

  #[test]
  fn test_resolve_fields() {
    let schema = Schema::new(["word", "count"]);
    let plan = Grouping::fields(["count"])
      .resolve("a", "b", &schema)
      .unwrap();
    assert_eq!(plan, GroupingPlan::Fields(vec![1]));
  }

  #[test]
  fn test_resolve_unknown_field() {
    let err = Grouping::fields(["w"])
      .resolve("split", "count", &Schema::new(["word"]))
      .unwrap_err();
    assert_eq!(
      err,
      TopologyError::UnknownField {
        upstream: "split".into(),
        downstream: "count".into(),
        field: "w".into(),
        schema: "[word]".into(),
      }
    );
  }

  #[test]
  fn test_resolve_empty_key() {
    let err = Grouping::Fields(vec![])
      .resolve("split", "count", &Schema::new(["word"]))
      .unwrap_err();
    assert!(matches!(err, TopologyError::EmptyGroupingKey { .. }));
  }

  #[test]
  fn test_shuffle_round_robin_from_offset() {
    let mut router = Router::new(GroupingPlan::Shuffle, 3, 1);
    let picks: Vec<_> = (0..6).map(|_| router.select(&word("x"))).collect();
    assert_eq!(
      picks,
      vec![
        Targets::One(1),
        Targets::One(2),
        Targets::One(0),
        Targets::One(1),
        Targets::One(2),
        Targets::One(0),
      ]
    );
  }

  #[test]
  fn test_all_and_global() {
    let mut all = Router::new(GroupingPlan::All, 4, 0);
    let mut global = Router::new(GroupingPlan::Global, 4, 3);
    assert_eq!(all.select(&word("a")), Targets::All);
    assert_eq!(global.select(&word("a")), Targets::One(0));
  }

  #[test]
  fn test_parallelism_one_always_zero() {
    let mut router = Router::new(GroupingPlan::Fields(vec![0]), 1, 0);
    for w in ["the", "cat", "dog"] {
      assert_eq!(router.select(&word(w)), Targets::One(0));
    }
  }

  #[test]
  fn test_fields_partition_zero_parallelism() {
    assert_eq!(fields_partition(&[Value::from("the")], &[0], 0), 0);
  }

  #[test]
  fn test_fields_distinguishes_kinds() {
    let a = fields_hash(&[Value::from("1")], &[0]);
    let b = fields_hash(&[Value::from(1i64)], &[0]);
    assert_ne!(a, b);
  }

  #[test]
  fn test_grouping_serde() {
    let json = serde_json::to_string(&Grouping::fields(["word"])).unwrap();
    assert_eq!(json, r#"{"type":"fields","fields":["word"]}"#);
    let back: Grouping = serde_json::from_str(r#"{"type":"shuffle"}"#).unwrap();
    assert_eq!(back, Grouping::Shuffle);
  }

  proptest! {
    #[test]
    fn prop_fields_routing_is_stable_across_routers(
      w in "[a-z]{1,12}",
      parallelism in 1usize..16,
      offset_a in 0usize..8,
      offset_b in 0usize..8,
    ) {
      let plan = GroupingPlan::Fields(vec![0]);
      let mut a = Router::new(plan.clone(), parallelism, offset_a);
      let mut b = Router::new(plan, parallelism, offset_b);
      let record = word(&w);
      let first = a.select(&record);
      prop_assert_eq!(first, b.select(&record));
      prop_assert_eq!(first, a.select(&record));
      match first {
        Targets::One(i) => prop_assert!(i < parallelism),
        Targets::All => prop_assert!(false),
      }
    }

    #[test]
    fn prop_shuffle_covers_every_instance(parallelism in 1usize..12, offset in 0usize..12) {
      let mut router = Router::new(GroupingPlan::Shuffle, parallelism, offset);
      let mut seen = vec![0usize; parallelism];
      for _ in 0..parallelism * 3 {
        if let Targets::One(i) = router.select(&word("x")) {
          seen[i] += 1;
        }
      }
      prop_assert!(seen.iter().all(|&n| n == 3));
    }
  }
}
