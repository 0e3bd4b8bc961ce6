use crate::error::{PipelineError, Result};
use crate::phase::Phase;
use crate::pipeline::PipelineContext;
use crate::record::Record;
use crate::report::{PhaseHook, PhaseSummary};
use crate::role::{RoleId, RoleTable};
use crate::source::RecordSource;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Instant;

/// What the producer emitted over the run
#[derive(Debug, Clone, Default)]
pub struct ProducerReport {
    pub produced: BTreeMap<Phase, u64>,
    /// Origins skipped because they failed to open or no role owns them
    pub skipped_origins: u64,
    /// Lines skipped because they were unreadable or oversized
    pub skipped_lines: u64,
}

impl ProducerReport {
    pub fn produced(&self, phase: Phase) -> u64 {
        self.produced.get(&phase).copied().unwrap_or(0)
    }
}

/// Origins of one phase paired with the role that owns each
type PhasePlan = Vec<(String, Option<RoleId>)>;

/// Streams every phase into the ring buffer and drives the phase handoff
pub struct Producer {
    context: Arc<PipelineContext>,
    roles: RoleTable,
    source: Box<dyn RecordSource>,
    hook: Box<dyn PhaseHook>,
    report: ProducerReport,
}

impl Producer {
    pub fn new(
        context: Arc<PipelineContext>,
        roles: RoleTable,
        source: Box<dyn RecordSource>,
        hook: Box<dyn PhaseHook>,
    ) -> Self {
        Self {
            context,
            roles,
            source,
            hook,
            report: ProducerReport::default(),
        }
    }

    /// Run every phase to completion.
    ///
    /// Any error cancels the pipeline so consumers parked on the buffer or
    /// the phase controller unwind instead of waiting forever.
    pub fn run(mut self) -> Result<ProducerReport> {
        match self.run_phases() {
            Ok(()) => Ok(self.report),
            Err(e) => {
                if !matches!(e, PipelineError::Cancelled) {
                    let phase = self.context.phases().current();
                    error!("Producer aborted during {phase} phase: {e}");
                }
                self.context.cancel();
                Err(e)
            }
        }
    }

    fn run_phases(&mut self) -> Result<()> {
        let mut phase = self.context.phases().current();
        let mut plans = self.plan_phases(phase)?;
        while !phase.is_done() {
            let plan = plans.remove(&phase).unwrap_or_default();
            phase = self.run_phase(phase, plan)?;
        }
        Ok(())
    }

    /// List and classify the origins of every phase from `first` on.
    ///
    /// Runs before the first record is queued, so an overlap in any phase
    /// fails the run before any phase has been processed.
    fn plan_phases(&mut self, first: Phase) -> Result<BTreeMap<Phase, PhasePlan>> {
        let mut plans = BTreeMap::new();
        for phase in Phase::ACTIVE.into_iter().filter(|p| *p >= first) {
            let origins = self.source.origins(phase).unwrap_or_else(|e| {
                warn!("Listing {phase} origins failed: {e}");
                Vec::new()
            });
            let owners = self.roles.classify_all(&origins)?;
            plans.insert(phase, origins.into_iter().zip(owners).collect());
        }
        Ok(plans)
    }

    fn run_phase(&mut self, phase: Phase, plan: PhasePlan) -> Result<Phase> {
        let context = Arc::clone(&self.context);
        let started = Instant::now();
        info!("Starting {phase} phase...");

        {
            let _span = context.hotspots().span(format!("{phase}_phase"));

            if let Err(e) = self.hook.prepare(phase) {
                warn!("Preparing {phase} phase failed: {e}");
            }

            for (origin, owner) in &plan {
                match *owner {
                    Some(owner) => self.stream_origin(phase, origin, owner)?,
                    None => {
                        warn!("No role owns {origin}, skipping");
                        self.report.skipped_origins += 1;
                    }
                }
            }
        }

        context.phases().mark_exhausted(context.buffer());
        context.rendezvous().wait_all_left()?;
        if context.rendezvous().alive() == 0 {
            return Err(self.teardown_error());
        }

        let summary = PhaseSummary {
            phase,
            produced: self.report.produced(phase),
            elapsed: started.elapsed(),
        };
        info!(
            "{phase} phase drained: {} records in {:.2}s",
            summary.produced,
            summary.elapsed.as_secs_f64()
        );
        if let Err(e) = self.hook.drained(phase, &summary) {
            error!("Phase hook failed after {phase}: {e}");
        }

        context.rendezvous().reset_phase();
        let hook = &mut self.hook;
        Ok(context
            .phases()
            .advance_phase(context.buffer(), |next| hook.reset(next)))
    }

    fn stream_origin(&mut self, phase: Phase, origin: &str, owner: RoleId) -> Result<()> {
        let context = Arc::clone(&self.context);
        let _span = context.hotspots().span("csv_file_processing");

        let lines = match self.source.open(origin) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("{e}, skipping");
                self.report.skipped_origins += 1;
                return Ok(());
            }
        };

        for line in lines {
            let line = match line {
                Ok(line) => line,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!("Undecodable line in {origin}, skipping: {e}");
                    self.report.skipped_lines += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Read error on {origin}, abandoning rest of file: {e}");
                    self.report.skipped_lines += 1;
                    break;
                }
            };
            if context.rendezvous().alive() == 0 {
                return Err(self.teardown_error());
            }
            let record = match Record::new(line, origin, owner) {
                Ok(record) => record,
                Err(e) => {
                    warn!("{e}, skipping line");
                    self.report.skipped_lines += 1;
                    continue;
                }
            };
            if context.buffer().enqueue(record).is_err() {
                return Err(self.teardown_error());
            }
            *self.report.produced.entry(phase).or_default() += 1;
        }

        debug!("Finished reading file: {origin}");
        Ok(())
    }

    /// Why the pipeline can no longer make progress
    fn teardown_error(&self) -> PipelineError {
        if self.context.is_cancelled() {
            PipelineError::Cancelled
        } else {
            PipelineError::NoConsumers
        }
    }
}
