use crate::buffer::RingBuffer;
use crate::consumer::{Consumer, ConsumerReport, RoleHandler};
use crate::error::{PipelineError, Result};
use crate::metrics::{MetricsSnapshot, RoleMetrics};
use crate::phase::{Phase, PhaseController};
use crate::producer::{Producer, ProducerReport};
use crate::profiling::Hotspots;
use crate::record::Record;
use crate::rendezvous::CompletionRendezvous;
use crate::report::PhaseHook;
use crate::role::{OriginMatcher, Role, RoleId, RoleTable};
use crate::source::RecordSource;
use log::info;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default ring buffer capacity
pub const DEFAULT_CAPACITY: usize = 1000;

/// Shared state for one run.
///
/// Created once, shared behind an `Arc` by the producer, every consumer and
/// the sampler, and dropped after all of them are joined.
#[derive(Debug)]
pub struct PipelineContext {
    buffer: RingBuffer<Record>,
    phases: PhaseController,
    rendezvous: CompletionRendezvous,
    hotspots: Arc<Hotspots>,
}

impl PipelineContext {
    pub fn new(capacity: usize) -> Self {
        Self::starting_at(capacity, Phase::Football)
    }

    /// Context whose phase controller starts at `phase`
    pub fn starting_at(capacity: usize, phase: Phase) -> Self {
        Self::with_hotspots(capacity, phase, Arc::new(Hotspots::new()))
    }

    fn with_hotspots(capacity: usize, phase: Phase, hotspots: Arc<Hotspots>) -> Self {
        Self {
            buffer: RingBuffer::new(capacity),
            phases: PhaseController::starting_at(phase),
            rendezvous: CompletionRendezvous::new(),
            hotspots,
        }
    }

    pub fn buffer(&self) -> &RingBuffer<Record> {
        &self.buffer
    }

    pub fn phases(&self) -> &PhaseController {
        &self.phases
    }

    pub fn rendezvous(&self) -> &CompletionRendezvous {
        &self.rendezvous
    }

    pub fn hotspots(&self) -> &Hotspots {
        &self.hotspots
    }

    /// Wake every waiter and make every further wait fail.
    ///
    /// Safe to call more than once and from any thread. The cancelled flag
    /// is set before the buffer closes, so a thread woken by the close
    /// always observes it.
    pub fn cancel(&self) {
        self.phases.cancel();
        self.rendezvous.cancel();
        self.buffer.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.phases.is_cancelled()
    }
}

/// Builder for constructing pipelines
pub struct PipelineBuilder {
    capacity: usize,
    roles: Vec<Role>,
    hotspots: Option<Arc<Hotspots>>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            roles: Vec::new(),
            hotspots: None,
        }
    }

    /// Set the ring buffer capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Add a consumer role. Role ids follow declaration order.
    pub fn add_role(mut self, name: impl Into<String>, matcher: OriginMatcher) -> Self {
        self.roles.push(Role::new(name, matcher));
        self
    }

    pub fn add_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles.extend(roles);
        self
    }

    /// Record timing spans into an existing table
    pub fn with_hotspots(mut self, hotspots: Arc<Hotspots>) -> Self {
        self.hotspots = Some(hotspots);
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Result<Pipeline> {
        if self.capacity == 0 {
            return Err(PipelineError::ConfigError(
                "buffer capacity must be at least 1".into(),
            ));
        }
        let roles = RoleTable::new(self.roles)?;
        let hotspots = self.hotspots.unwrap_or_default();
        let metrics = roles.ids().map(|_| RoleMetrics::new()).collect();

        Ok(Pipeline {
            context: Arc::new(PipelineContext::with_hotspots(
                self.capacity,
                Phase::Football,
                hotspots,
            )),
            roles,
            metrics,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured pipeline that has not started yet
pub struct Pipeline {
    context: Arc<PipelineContext>,
    roles: RoleTable,
    metrics: Vec<RoleMetrics>,
}

impl Pipeline {
    /// Shared context, e.g. for a resource sampler
    pub fn context(&self) -> Arc<PipelineContext> {
        Arc::clone(&self.context)
    }

    pub fn roles(&self) -> &RoleTable {
        &self.roles
    }

    /// Get metrics for a role
    pub fn role_metrics(&self, role: RoleId) -> Option<&RoleMetrics> {
        self.metrics.get(role.index())
    }

    /// Get a summary of all role metrics
    pub fn metrics_summary(&self) -> String {
        let mut summary = String::from("Pipeline Metrics Summary:\n");
        for (id, role) in self.roles.iter() {
            summary.push_str(&format!(
                "  Role {} ({}): {}\n",
                id,
                role.name(),
                self.metrics[id.index()].snapshot().format()
            ));
        }
        summary
    }

    /// Start one thread per role and the producer thread.
    ///
    /// Every handler is built before any thread starts, so a failing factory
    /// leaves nothing running. Consumers are registered with the rendezvous
    /// before their threads are spawned.
    pub fn start<F>(
        self,
        source: Box<dyn RecordSource>,
        hook: Box<dyn PhaseHook>,
        mut handler_factory: F,
    ) -> Result<RunningPipeline>
    where
        F: FnMut(RoleId, &Role) -> Result<Box<dyn RoleHandler>>,
    {
        let handlers = self
            .roles
            .iter()
            .map(|(id, role)| handler_factory(id, role))
            .collect::<Result<Vec<_>>>()?;

        let roles = self.roles.clone();
        let metrics = self.metrics.clone();
        let context = self.context();
        let mut running = RunningPipeline {
            started: Instant::now(),
            producer: None,
            consumers: Vec::with_capacity(handlers.len()),
            pipeline: self,
        };

        for ((id, role), handler) in roles.iter().zip(handlers) {
            let mut consumer = Consumer::new(id, role.name(), Arc::clone(&context))
                .with_metrics(metrics[id.index()].clone());

            context.rendezvous().register();
            let spawned = thread::Builder::new()
                .name(format!("consumer-{}", role.name()))
                .spawn(move || consumer.run(handler));
            match spawned {
                Ok(handle) => running.consumers.push((id, handle)),
                Err(e) => {
                    context.rendezvous().retire(false);
                    running.abort();
                    return Err(PipelineError::ThreadError(e.to_string()));
                }
            }
        }

        let producer = Producer::new(Arc::clone(&context), roles.clone(), source, hook);
        let spawned = thread::Builder::new()
            .name("producer".to_string())
            .spawn(move || producer.run());
        match spawned {
            Ok(handle) => running.producer = Some(handle),
            Err(e) => {
                running.abort();
                return Err(PipelineError::ThreadError(e.to_string()));
            }
        }

        info!(
            "Pipeline started: {} roles, buffer capacity {}",
            roles.len(),
            context.buffer().capacity()
        );
        Ok(running)
    }
}

/// A running pipeline that can be cancelled and waited on
pub struct RunningPipeline {
    pipeline: Pipeline,
    producer: Option<JoinHandle<Result<ProducerReport>>>,
    consumers: Vec<(RoleId, JoinHandle<Result<ConsumerReport>>)>,
    started: Instant,
}

impl RunningPipeline {
    pub fn context(&self) -> Arc<PipelineContext> {
        self.pipeline.context()
    }

    /// Get metrics for a role
    pub fn role_metrics(&self, role: RoleId) -> Option<&RoleMetrics> {
        self.pipeline.role_metrics(role)
    }

    /// Get metrics summary
    pub fn metrics_summary(&self) -> String {
        self.pipeline.metrics_summary()
    }

    /// Ask every thread to stop. [`wait`](Self::wait) then returns
    /// [`PipelineError::Cancelled`].
    pub fn cancel(&self) {
        self.pipeline.context.cancel();
    }

    /// Wait for the run to reach `Done` and join every thread.
    ///
    /// The first error that is not a consequence of teardown wins, so a
    /// consumer that panicked is reported rather than the producer noticing
    /// that its consumers went away.
    pub fn wait(mut self) -> Result<PipelineSummary> {
        let context = self.pipeline.context();
        let mut errors = Vec::new();

        let produced = match self.producer.take().map(JoinHandle::join) {
            Some(Ok(Ok(report))) => Some(report),
            Some(Ok(Err(e))) => {
                errors.push(e);
                None
            }
            Some(Err(_)) => {
                context.cancel();
                errors.push(PipelineError::ThreadError("producer panicked".into()));
                None
            }
            None => None,
        };

        let mut claimed = BTreeMap::new();
        for (id, handle) in self.consumers.drain(..) {
            let name = self.pipeline.roles.name(id).to_string();
            match handle.join() {
                Ok(Ok(report)) => {
                    claimed.insert(name, report.claimed);
                }
                Ok(Err(e)) => errors.push(e),
                Err(_) => errors.push(PipelineError::ThreadError(format!(
                    "consumer '{name}' panicked"
                ))),
            }
        }

        if let Some(pos) = errors.iter().position(|e| !is_teardown(e)) {
            return Err(errors.swap_remove(pos));
        }
        if let Some(e) = errors.into_iter().next() {
            return Err(e);
        }

        let report = produced.unwrap_or_default();
        Ok(PipelineSummary {
            produced: report.produced,
            claimed,
            roles: self
                .pipeline
                .roles
                .iter()
                .map(|(id, role)| {
                    (
                        role.name().to_string(),
                        self.pipeline.metrics[id.index()].snapshot(),
                    )
                })
                .collect(),
            capacity: context.buffer().capacity(),
            peak_buffered: context.buffer().peak(),
            producer_blocks: context.buffer().block_count(),
            skipped_origins: report.skipped_origins,
            skipped_lines: report.skipped_lines,
            elapsed: self.started.elapsed(),
        })
    }

    /// Cancel and join whatever was spawned so far
    fn abort(&mut self) {
        self.pipeline.context.cancel();
        if let Some(handle) = self.producer.take() {
            let _ = handle.join();
        }
        for (_, handle) in self.consumers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for RunningPipeline {
    fn drop(&mut self) {
        if self.producer.is_some() || !self.consumers.is_empty() {
            self.abort();
        }
    }
}

fn is_teardown(error: &PipelineError) -> bool {
    matches!(error, PipelineError::Cancelled | PipelineError::NoConsumers)
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub produced: BTreeMap<Phase, u64>,
    /// Records claimed per role name and phase
    pub claimed: BTreeMap<String, BTreeMap<Phase, u64>>,
    pub roles: Vec<(String, MetricsSnapshot)>,
    pub capacity: usize,
    /// Highest number of records buffered at once
    pub peak_buffered: usize,
    /// Times the producer blocked on a full buffer
    pub producer_blocks: u64,
    pub skipped_origins: u64,
    pub skipped_lines: u64,
    pub elapsed: Duration,
}

impl PipelineSummary {
    pub fn produced(&self, phase: Phase) -> u64 {
        self.produced.get(&phase).copied().unwrap_or(0)
    }

    /// Records claimed by `role` in `phase`
    pub fn claimed(&self, role: &str, phase: Phase) -> u64 {
        self.claimed
            .get(role)
            .and_then(|phases| phases.get(&phase))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_claimed(&self, phase: Phase) -> u64 {
        self.claimed
            .values()
            .filter_map(|phases| phases.get(&phase))
            .sum()
    }

    pub fn format(&self) -> String {
        let mut out = format!(
            "Run finished in {:.2}s (buffer peak {}/{}, producer blocked {} times)\n",
            self.elapsed.as_secs_f64(),
            self.peak_buffered,
            self.capacity,
            self.producer_blocks
        );
        for phase in Phase::ACTIVE {
            out.push_str(&format!(
                "  {}: produced {}, claimed {}\n",
                phase.title(),
                self.produced(phase),
                self.total_claimed(phase)
            ));
        }
        if self.skipped_origins > 0 || self.skipped_lines > 0 {
            out.push_str(&format!(
                "  Skipped {} origins and {} lines\n",
                self.skipped_origins, self.skipped_lines
            ));
        }
        for (name, snapshot) in &self.roles {
            out.push_str(&format!("  Role {name}: {}\n", snapshot.format()));
        }
        out
    }
}
