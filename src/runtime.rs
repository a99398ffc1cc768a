//! # Runtime
//!
//! Executes a built [`Topology`]: one tokio task per stage instance.
//!
//! ## Hand-off
//!
//! Every processor instance owns one bounded inbound queue. Each upstream
//! instance holds a sender to every downstream instance it may route to plus
//! a private [`Router`] per outgoing edge. After a stage call returns, the
//! instance drains its [`Emitter`] outbox and pushes each record to the
//! selected queues. A full queue suspends the pushing instance, which is the
//! only back-pressure mechanism. Records emitted by terminal stages go to the
//! run's unbounded output channel.
//!
//! ## Drain
//!
//! Sources are polled until [`SourceEvent::Done`] or until a stop is
//! requested. A finished instance drops its senders; once every upstream
//! instance of a queue has finished, the queue closes and its consumer exits
//! after processing what is left. A run therefore completes only after every
//! queue is empty and nothing is in flight.
//!
//! ## Failures
//!
//! A failed [`Processor::process`](crate::stage::Processor::process) call
//! discards its emissions, is reported to the error sink, and is retried or
//! skipped according to the stage's [`ErrorStrategy`]. A panicking instance is
//! reported when the run is joined; other instances keep running.

use crate::emitter::Emitter;
use crate::error::{ErrorAction, ErrorSink, ErrorStrategy, StageError, StageFailure};
use crate::grouping::{Router, Targets};
use crate::record::Record;
use crate::stage::{InstanceContext, Processor, Source, SourceEvent, StageInstance};
use crate::topology::Topology;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct StageCounters {
  received: AtomicU64,
  emitted: AtomicU64,
  failed: AtomicU64,
}

/// Per-stage totals for a finished run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StageReport {
  /// Stage name.
  pub name: String,
  /// Number of instances that ran.
  pub parallelism: usize,
  /// Records taken from inbound queues.
  pub received: u64,
  /// Records accepted by the emitter and delivered.
  pub emitted: u64,
  /// Records dropped after failing.
  pub failed: u64,
}

/// Summary of a finished run.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
  /// Topology name.
  pub topology: String,
  /// Totals per stage, in execution order.
  pub stages: Vec<StageReport>,
  /// Every reported failure, oldest first.
  pub failures: Vec<StageFailure>,
  /// Records routed but never processed. Zero unless an instance panicked.
  pub in_flight: usize,
}

impl RunReport {
  /// Totals for one stage.
  pub fn stage(&self, name: &str) -> Option<&StageReport> {
    self.stages.iter().find(|s| s.name == name)
  }

  /// Returns `true` if nothing failed.
  pub fn is_clean(&self) -> bool {
    self.failures.is_empty()
  }
}

struct Route {
  downstream: Arc<str>,
  router: Router,
  senders: Vec<mpsc::Sender<Record>>,
}

/// Output side of one instance: routers for every outgoing edge.
struct Outlet {
  ctx: InstanceContext,
  routes: Vec<Route>,
  output: Option<mpsc::UnboundedSender<Record>>,
  counters: Arc<StageCounters>,
  in_flight: Arc<AtomicUsize>,
}

impl Outlet {
  async fn flush(&mut self, emitter: &mut Emitter) {
    for record in emitter.drain() {
      self.counters.emitted.fetch_add(1, Ordering::Relaxed);
      for route in &mut self.routes {
        match route.router.select(&record) {
          Targets::One(target) => {
            deliver(&self.ctx, route, target, record.clone(), &self.in_flight).await
          }
          Targets::All => {
            for target in 0..route.senders.len() {
              deliver(&self.ctx, route, target, record.clone(), &self.in_flight).await;
            }
          }
        }
      }
      if let Some(output) = &self.output {
        // Dropping the receiver is how callers opt out of the output.
        let _ = output.send(record);
      }
    }
  }
}

async fn deliver(
  ctx: &InstanceContext,
  route: &Route,
  target: usize,
  record: Record,
  in_flight: &AtomicUsize,
) {
  let Some(sender) = route.senders.get(target) else {
    return;
  };
  in_flight.fetch_add(1, Ordering::SeqCst);
  if sender.send(record).await.is_err() {
    in_flight.fetch_sub(1, Ordering::SeqCst);
    warn!(
      stage = %ctx.stage(),
      instance = ctx.index(),
      downstream = %route.downstream,
      target,
      "downstream instance is gone; record dropped"
    );
  }
}

/// Handle to a running topology.
pub struct RunningTopology {
  name: String,
  cancel: CancellationToken,
  outputs: Option<mpsc::UnboundedReceiver<Record>>,
  tasks: Vec<(InstanceContext, JoinHandle<()>)>,
  failures: mpsc::UnboundedReceiver<StageFailure>,
  stages: Vec<(String, usize, Arc<StageCounters>)>,
  in_flight: Arc<AtomicUsize>,
}

impl RunningTopology {
  /// Stream of records emitted by terminal stages.
  ///
  /// Returns `None` if the output was already taken. The stream ends once
  /// every terminal instance has finished.
  pub fn outputs(&mut self) -> Option<UnboundedReceiverStream<Record>> {
    self.outputs.take().map(UnboundedReceiverStream::new)
  }

  pub(crate) fn take_output_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<Record>> {
    self.outputs.take()
  }

  /// Asks every source to stop pulling input. Queued records still drain.
  pub fn stop(&self) {
    info!(topology = %self.name, "stop requested");
    self.cancel.cancel();
  }

  /// Token that stops the run when cancelled.
  pub fn stop_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  /// Records currently routed but not yet processed.
  pub fn in_flight(&self) -> usize {
    self.in_flight.load(Ordering::SeqCst)
  }

  /// Waits for every instance to finish and summarizes the run.
  pub async fn join(mut self) -> RunReport {
    let mut failures = Vec::new();
    for (ctx, handle) in self.tasks.drain(..) {
      if let Err(err) = handle.await {
        let message = if err.is_panic() {
          panic_message(err.into_panic())
        } else {
          "task cancelled".to_string()
        };
        error!(
          stage = %ctx.stage(),
          instance = ctx.index(),
          error = %message,
          "stage instance panicked"
        );
        failures.push(StageFailure::panicked(&ctx, message));
      }
    }

    while let Ok(failure) = self.failures.try_recv() {
      failures.push(failure);
    }
    failures.sort_by_key(|f| f.timestamp);

    let stages = self
      .stages
      .iter()
      .map(|(name, parallelism, counters)| StageReport {
        name: name.clone(),
        parallelism: *parallelism,
        received: counters.received.load(Ordering::Relaxed),
        emitted: counters.emitted.load(Ordering::Relaxed),
        failed: counters.failed.load(Ordering::Relaxed),
      })
      .collect();

    let report = RunReport {
      topology: self.name.clone(),
      stages,
      failures,
      in_flight: self.in_flight.load(Ordering::SeqCst),
    };
    info!(
      topology = %report.topology,
      failures = report.failures.len(),
      "topology finished"
    );
    report
  }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "panic".to_string()
  }
}

pub(crate) fn launch(topology: Topology) -> RunningTopology {
  let Topology {
    name,
    config,
    stages,
    edges,
  } = topology;

  let cancel = CancellationToken::new();
  let (errors, failures) = ErrorSink::channel();
  let (output_tx, output_rx) = mpsc::unbounded_channel();
  let in_flight = Arc::new(AtomicUsize::new(0));

  let mut senders: HashMap<Arc<str>, Vec<mpsc::Sender<Record>>> = HashMap::new();
  let mut inboxes: HashMap<Arc<str>, Vec<mpsc::Receiver<Record>>> = HashMap::new();
  for stage in &stages {
    let is_source = stage
      .instances
      .first()
      .is_some_and(|i| matches!(i, StageInstance::Source(_)));
    if is_source {
      continue;
    }
    let (txs, rxs): (Vec<_>, Vec<_>) = (0..stage.parallelism)
      .map(|_| mpsc::channel(config.channel_capacity))
      .unzip();
    senders.insert(Arc::clone(&stage.name), txs);
    inboxes.insert(Arc::clone(&stage.name), rxs);
  }

  info!(topology = %name, stages = stages.len(), "starting topology");

  let mut tasks = Vec::new();
  let mut summary = Vec::with_capacity(stages.len());
  for stage in stages {
    let counters = Arc::new(StageCounters::default());
    summary.push((stage.name.to_string(), stage.parallelism, Arc::clone(&counters)));

    let outgoing: Vec<_> = edges
      .iter()
      .filter(|e| e.upstream() == &*stage.name)
      .collect();
    let mut stage_inboxes = inboxes.remove(&stage.name).unwrap_or_default().into_iter();

    for (index, instance) in stage.instances.into_iter().enumerate() {
      let ctx = InstanceContext::new(Arc::clone(&stage.name), index, stage.parallelism);
      let emitter = Emitter::new(
        ctx.clone(),
        Arc::clone(&stage.schema),
        errors.clone(),
        config.debug,
      );
      let routes = outgoing
        .iter()
        .map(|edge| {
          let targets = senders.get(edge.downstream()).cloned().unwrap_or_default();
          Route {
            downstream: Arc::from(edge.downstream()),
            router: Router::new(edge.plan().clone(), targets.len(), index),
            senders: targets,
          }
        })
        .collect();
      let outlet = Outlet {
        ctx: ctx.clone(),
        routes,
        output: outgoing.is_empty().then(|| output_tx.clone()),
        counters: Arc::clone(&counters),
        in_flight: Arc::clone(&in_flight),
      };

      let handle = match instance {
        StageInstance::Source(source) => tokio::spawn(run_source(
          ctx.clone(),
          source,
          emitter,
          outlet,
          errors.clone(),
          cancel.clone(),
        )),
        StageInstance::Processor(processor) => {
          let Some(inbox) = stage_inboxes.next() else {
            continue;
          };
          tokio::spawn(run_processor(
            ctx.clone(),
            processor,
            inbox,
            emitter,
            outlet,
            ProcessorPolicy {
              strategy: stage.strategy.clone(),
              errors: errors.clone(),
            },
            Arc::clone(&in_flight),
          ))
        }
      };
      tasks.push((ctx, handle));
    }
  }

  RunningTopology {
    name,
    cancel,
    outputs: Some(output_rx),
    tasks,
    failures,
    stages: summary,
    in_flight,
  }
}

async fn run_source(
  ctx: InstanceContext,
  mut source: Box<dyn Source>,
  mut emitter: Emitter,
  mut outlet: Outlet,
  errors: ErrorSink,
  cancel: CancellationToken,
) {
  debug!(stage = %ctx.stage(), instance = ctx.index(), "source started");
  loop {
    let event = tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        debug!(stage = %ctx.stage(), instance = ctx.index(), "source stopped");
        break;
      }
      event = source.next() => event,
    };

    match event {
      SourceEvent::Emit(values) => {
        if emitter.emit(values).is_ok() {
          outlet.flush(&mut emitter).await;
        } else {
          emitter.take_rejected();
          outlet.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
      }
      SourceEvent::Failed(err) => {
        outlet.counters.failed.fetch_add(1, Ordering::Relaxed);
        errors.report(StageFailure::new(&ctx, &err, 0));
      }
      SourceEvent::Done => {
        debug!(stage = %ctx.stage(), instance = ctx.index(), "source exhausted");
        break;
      }
    }
  }
}

struct ProcessorPolicy {
  strategy: ErrorStrategy,
  errors: ErrorSink,
}

async fn run_processor(
  ctx: InstanceContext,
  mut processor: Box<dyn Processor>,
  mut inbox: mpsc::Receiver<Record>,
  mut emitter: Emitter,
  mut outlet: Outlet,
  policy: ProcessorPolicy,
  in_flight: Arc<AtomicUsize>,
) {
  debug!(stage = %ctx.stage(), instance = ctx.index(), "processor started");
  while let Some(record) = inbox.recv().await {
    outlet.counters.received.fetch_add(1, Ordering::Relaxed);

    let mut retries = 0;
    loop {
      let result = processor.process(&record, &mut emitter).await;
      let rejected = emitter.take_rejected();
      match result {
        Ok(()) => {
          outlet.flush(&mut emitter).await;
          break;
        }
        Err(err) => {
          emitter.discard();
          let failure = StageFailure::new(&ctx, &err, retries);
          let action = match err {
            // The same input would fail validation again.
            StageError::SchemaMismatch(_) => {
              if !rejected {
                policy.errors.report(failure);
              }
              ErrorAction::Skip
            }
            _ => {
              let action = policy.strategy.decide(&failure);
              policy.errors.report(failure);
              action
            }
          };
          match action {
            ErrorAction::Retry => retries += 1,
            ErrorAction::Skip => {
              outlet.counters.failed.fetch_add(1, Ordering::Relaxed);
              break;
            }
          }
        }
      }
    }

    in_flight.fetch_sub(1, Ordering::SeqCst);
  }
  debug!(stage = %ctx.stage(), instance = ctx.index(), "processor drained");
}
