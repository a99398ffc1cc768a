//! # Topology
//!
//! A topology is a directed acyclic graph of named stages. Exactly one stage
//! is a [`Source`](crate::stage::Source); every other stage is a
//! [`Processor`](crate::stage::Processor) subscribed to one or more upstream
//! stages, each subscription labelled with a [`Grouping`].
//!
//! Topologies are declared through [`TopologyBuilder`] and validated by
//! [`TopologyBuilder::build`]. Validation instantiates every stage instance,
//! so a built [`Topology`] is ready to run and every construction error is
//! reported before any instance executes.
//!
//! # Example
//!
//! ```rust
//! use tupleweave::stages::{LinesSource, WordCounter, WordSplitter};
//! use tupleweave::topology::TopologyBuilder;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let lines = vec!["the cat".to_string(), "the dog".to_string()];
//!
//! let mut builder = TopologyBuilder::new("word-count");
//! builder.set_source("text", 1, move |ctx| LinesSource::for_instance(lines.clone(), ctx));
//! builder
//!   .set_processor("split", 2, |_| WordSplitter::new())
//!   .shuffle_grouping("text");
//! builder
//!   .set_processor("count", 2, |_| WordCounter::new())
//!   .fields_grouping("split", ["word"]);
//!
//! let output = builder.build()?.run().await;
//! assert_eq!(output.records.len(), 4);
//! # Ok(())
//! # }
//! ```

use crate::config::RuntimeConfig;
use crate::error::{ErrorStrategy, TopologyError};
use crate::grouping::{Grouping, GroupingPlan};
use crate::record::{Record, Schema};
use crate::runtime::{self, RunReport, RunningTopology};
use crate::stage::{InstanceContext, Processor, Source, StageInstance, StageRole};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

struct StageDecl {
  name: String,
  parallelism: usize,
  role: StageRole,
  inputs: Vec<(String, Grouping)>,
  strategy: ErrorStrategy,
}

/// Declares stages and the edges between them.
pub struct TopologyBuilder {
  name: String,
  config: RuntimeConfig,
  stages: Vec<StageDecl>,
}

impl TopologyBuilder {
  /// Creates an empty builder.
  ///
  /// # Arguments
  ///
  /// * `name` - Name of the topology, used in logs and the run report.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      config: RuntimeConfig::default(),
      stages: Vec::new(),
    }
  }

  /// Replaces the runtime configuration.
  #[must_use]
  pub fn with_config(mut self, config: RuntimeConfig) -> Self {
    self.config = config;
    self
  }

  /// Declares the source stage.
  ///
  /// # Arguments
  ///
  /// * `name` - Unique stage name.
  /// * `parallelism` - Number of instances; must be at least 1.
  /// * `factory` - Builds one source per instance.
  ///
  /// # Returns
  ///
  /// A [`StageDeclarer`]. Sources may not subscribe to other stages, so any
  /// grouping declared on it fails the build.
  pub fn set_source<F, S>(
    &mut self,
    name: impl Into<String>,
    parallelism: usize,
    factory: F,
  ) -> StageDeclarer<'_>
  where
    F: Fn(&InstanceContext) -> S + Send + Sync + 'static,
    S: Source + 'static,
  {
    self.set_stage(name, parallelism, StageRole::source(factory))
  }

  /// Declares a processor stage.
  ///
  /// # Arguments
  ///
  /// * `name` - Unique stage name.
  /// * `parallelism` - Number of instances; must be at least 1.
  /// * `factory` - Builds one processor per instance. Each instance owns
  ///   whatever the factory returns; nothing is shared between instances.
  ///
  /// # Returns
  ///
  /// A [`StageDeclarer`] for subscribing the stage to its upstreams.
  pub fn set_processor<F, P>(
    &mut self,
    name: impl Into<String>,
    parallelism: usize,
    factory: F,
  ) -> StageDeclarer<'_>
  where
    F: Fn(&InstanceContext) -> P + Send + Sync + 'static,
    P: Processor + 'static,
  {
    self.set_stage(name, parallelism, StageRole::processor(factory))
  }

  /// Declares a stage with an explicit role.
  pub fn set_stage(
    &mut self,
    name: impl Into<String>,
    parallelism: usize,
    role: StageRole,
  ) -> StageDeclarer<'_> {
    self.stages.push(StageDecl {
      name: name.into(),
      parallelism,
      role,
      inputs: Vec::new(),
      strategy: ErrorStrategy::default(),
    });
    let index = self.stages.len() - 1;
    StageDeclarer {
      decl: &mut self.stages[index],
    }
  }

  /// Validates the declaration and instantiates every stage instance.
  ///
  /// # Errors
  ///
  /// Returns the first [`TopologyError`] found. Checks run in this order:
  /// empty topology, duplicate names, channel capacity, parallelism, source
  /// count, source inputs, disconnected processors, unknown upstreams, cycles,
  /// schema consistency across instances, grouping keys, input schemas.
  pub fn build(self) -> Result<Topology, TopologyError> {
    let TopologyBuilder {
      name,
      config,
      stages,
    } = self;

    if stages.is_empty() {
      return Err(TopologyError::EmptyTopology);
    }

    let mut seen = HashSet::new();
    for decl in &stages {
      if !seen.insert(decl.name.as_str()) {
        return Err(TopologyError::DuplicateStage(decl.name.clone()));
      }
    }

    if config.channel_capacity == 0 {
      return Err(TopologyError::InvalidChannelCapacity);
    }

    for decl in &stages {
      if decl.parallelism == 0 {
        return Err(TopologyError::InvalidParallelism {
          stage: decl.name.clone(),
          parallelism: decl.parallelism,
        });
      }
    }

    let sources: Vec<&StageDecl> = stages.iter().filter(|d| d.role.is_source()).collect();
    match sources.as_slice() {
      [] => return Err(TopologyError::MissingSource),
      [source] => {
        if !source.inputs.is_empty() {
          return Err(TopologyError::SourceWithInputs(source.name.clone()));
        }
      }
      many => {
        return Err(TopologyError::MultipleSources(
          many.iter().map(|d| d.name.clone()).collect(),
        ));
      }
    }

    for decl in &stages {
      if !decl.role.is_source() && decl.inputs.is_empty() {
        return Err(TopologyError::DisconnectedStage(decl.name.clone()));
      }
      for (upstream, _) in &decl.inputs {
        if !seen.contains(upstream.as_str()) {
          return Err(TopologyError::UnknownStage {
            stage: decl.name.clone(),
            missing: upstream.clone(),
          });
        }
      }
    }

    let order = topological_order(&stages)?;

    let mut by_name: HashMap<String, StageDecl> =
      stages.into_iter().map(|d| (d.name.clone(), d)).collect();
    let mut built: Vec<BuiltStage> = Vec::with_capacity(order.len());
    let mut inputs: Vec<(String, Vec<(String, Grouping)>)> = Vec::new();

    for stage_name in &order {
      let Some(decl) = by_name.remove(stage_name) else {
        continue;
      };
      let parallelism = config.effective_parallelism(decl.parallelism);
      if parallelism != decl.parallelism {
        debug!(
          stage = %decl.name,
          requested = decl.parallelism,
          parallelism,
          "parallelism capped by max_task_parallelism"
        );
      }

      let stage_arc: Arc<str> = Arc::from(decl.name.as_str());
      let instances: Vec<StageInstance> = (0..parallelism)
        .map(|index| {
          decl
            .role
            .instantiate(&InstanceContext::new(Arc::clone(&stage_arc), index, parallelism))
        })
        .collect();

      let schema = instances
        .first()
        .map(StageInstance::output_schema)
        .unwrap_or_default();
      if instances.iter().any(|i| i.output_schema() != schema) {
        return Err(TopologyError::InconsistentSchema(decl.name));
      }
      let input_schema = instances.first().and_then(StageInstance::input_schema);

      inputs.push((decl.name.clone(), decl.inputs));
      built.push(BuiltStage {
        name: stage_arc,
        parallelism,
        schema: Arc::new(schema),
        input_schema,
        instances,
        strategy: decl.strategy,
      });
    }

    let mut edges = Vec::new();
    for (downstream, subscriptions) in inputs {
      let expected = built
        .iter()
        .find(|s| *s.name == *downstream)
        .and_then(|s| s.input_schema.clone());
      for (upstream, grouping) in subscriptions {
        let Some(up) = built.iter().find(|s| *s.name == *upstream) else {
          continue;
        };
        let plan = grouping.resolve(&upstream, &downstream, &up.schema)?;
        if let Some(expected) = &expected {
          if !up.schema.is_compatible_with(expected) {
            return Err(TopologyError::SchemaMismatch {
              upstream,
              downstream,
              reason: format!("expects {}, upstream emits {}", expected, up.schema),
            });
          }
        }
        edges.push(Edge {
          upstream,
          downstream: downstream.clone(),
          grouping,
          plan,
        });
      }
    }

    debug!(
      topology = %name,
      stages = built.len(),
      edges = edges.len(),
      "topology built"
    );

    Ok(Topology {
      name,
      config,
      stages: built,
      edges,
    })
  }
}

/// Subscribes a freshly declared stage to its upstreams.
pub struct StageDeclarer<'a> {
  decl: &'a mut StageDecl,
}

impl StageDeclarer<'_> {
  /// Subscribes with an explicit grouping.
  pub fn grouping(self, upstream: impl Into<String>, grouping: Grouping) -> Self {
    self.decl.inputs.push((upstream.into(), grouping));
    self
  }

  /// Round-robin subscription.
  pub fn shuffle_grouping(self, upstream: impl Into<String>) -> Self {
    self.grouping(upstream, Grouping::Shuffle)
  }

  /// Keyed subscription: records with equal values in `keys` reach the same instance.
  pub fn fields_grouping<I, S>(self, upstream: impl Into<String>, keys: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.grouping(upstream, Grouping::fields(keys))
  }

  /// Broadcast subscription.
  pub fn all_grouping(self, upstream: impl Into<String>) -> Self {
    self.grouping(upstream, Grouping::All)
  }

  /// Every record goes to instance 0.
  pub fn global_grouping(self, upstream: impl Into<String>) -> Self {
    self.grouping(upstream, Grouping::Global)
  }

  /// Sets the policy for records whose processing fails.
  pub fn with_error_strategy(self, strategy: ErrorStrategy) -> Self {
    self.decl.strategy = strategy;
    self
  }
}

/// Kahn's algorithm over the declared subscriptions.
///
/// Ties are broken by declaration order, so the result is deterministic.
fn topological_order(stages: &[StageDecl]) -> Result<Vec<String>, TopologyError> {
  let mut in_degree: HashMap<&str, usize> = HashMap::new();
  let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

  for decl in stages {
    in_degree.insert(decl.name.as_str(), decl.inputs.len());
    adjacency.entry(decl.name.as_str()).or_default();
  }
  for decl in stages {
    for (upstream, _) in &decl.inputs {
      adjacency
        .entry(upstream.as_str())
        .or_default()
        .push(decl.name.as_str());
    }
  }

  let mut queue: VecDeque<&str> = stages
    .iter()
    .map(|d| d.name.as_str())
    .filter(|name| in_degree.get(name) == Some(&0))
    .collect();

  let mut order = Vec::with_capacity(stages.len());
  while let Some(name) = queue.pop_front() {
    order.push(name.to_string());
    if let Some(neighbors) = adjacency.get(name) {
      for &neighbor in neighbors {
        if let Some(degree) = in_degree.get_mut(neighbor) {
          *degree -= 1;
          if *degree == 0 {
            queue.push_back(neighbor);
          }
        }
      }
    }
  }

  if order.len() != stages.len() {
    let stuck = stages
      .iter()
      .find(|d| in_degree.get(d.name.as_str()).is_some_and(|&n| n > 0))
      .map(|d| d.name.clone())
      .unwrap_or_default();
    return Err(TopologyError::CycleDetected(stuck));
  }

  Ok(order)
}

/// A validated connection between two stages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge {
  upstream: String,
  downstream: String,
  grouping: Grouping,
  plan: GroupingPlan,
}

impl Edge {
  /// Emitting stage.
  pub fn upstream(&self) -> &str {
    &self.upstream
  }

  /// Receiving stage.
  pub fn downstream(&self) -> &str {
    &self.downstream
  }

  /// Declared grouping.
  pub fn grouping(&self) -> &Grouping {
    &self.grouping
  }

  pub(crate) fn plan(&self) -> &GroupingPlan {
    &self.plan
  }
}

pub(crate) struct BuiltStage {
  pub(crate) name: Arc<str>,
  pub(crate) parallelism: usize,
  pub(crate) schema: Arc<Schema>,
  pub(crate) input_schema: Option<Schema>,
  pub(crate) instances: Vec<StageInstance>,
  pub(crate) strategy: ErrorStrategy,
}

/// A validated topology with every stage instance constructed.
pub struct Topology {
  pub(crate) name: String,
  pub(crate) config: RuntimeConfig,
  pub(crate) stages: Vec<BuiltStage>,
  pub(crate) edges: Vec<Edge>,
}

impl Topology {
  /// Topology name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Runtime settings the topology was built with.
  pub fn config(&self) -> &RuntimeConfig {
    &self.config
  }

  /// Stage names, upstream before downstream.
  pub fn execution_order(&self) -> Vec<&str> {
    self.stages.iter().map(|s| &*s.name).collect()
  }

  /// Effective parallelism of a stage, after any cap.
  pub fn parallelism(&self, stage: &str) -> Option<usize> {
    self.stage(stage).map(|s| s.parallelism)
  }

  /// Declared output schema of a stage.
  pub fn output_schema(&self, stage: &str) -> Option<&Schema> {
    self.stage(stage).map(|s| s.schema.as_ref())
  }

  /// All edges, grouped by downstream stage in execution order.
  pub fn edges(&self) -> &[Edge] {
    &self.edges
  }

  /// Stages with no outgoing edges; their emissions form the run's output.
  pub fn terminal_stages(&self) -> Vec<&str> {
    self
      .stages
      .iter()
      .filter(|s| !self.edges.iter().any(|e| *e.upstream == *s.name))
      .map(|s| &*s.name)
      .collect()
  }

  fn stage(&self, name: &str) -> Option<&BuiltStage> {
    self.stages.iter().find(|s| &*s.name == name)
  }

  /// Spawns every instance onto the current tokio runtime.
  ///
  /// # Panics
  ///
  /// Panics if called outside a tokio runtime.
  pub fn start(self) -> RunningTopology {
    runtime::launch(self)
  }

  /// Runs to completion and collects every terminal record.
  pub async fn run(self) -> RunOutput {
    let mut running = self.start();
    let outputs = running.take_output_receiver();
    let report = running.join().await;

    let mut records = Vec::new();
    if let Some(mut rx) = outputs {
      while let Some(record) = rx.recv().await {
        records.push(record);
      }
    }
    RunOutput { records, report }
  }
}

impl fmt::Debug for Topology {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Topology")
      .field("name", &self.name)
      .field("stages", &self.execution_order())
      .field("edges", &self.edges)
      .finish()
  }
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunOutput {
  /// Records emitted by terminal stages, in arrival order.
  pub records: Vec<Record>,
  /// Counters and failures.
  pub report: RunReport,
}
