use crate::buffer::Dequeue;
use crate::error::{PipelineError, Result};
use crate::metrics::RoleMetrics;
use crate::phase::Phase;
use crate::pipeline::PipelineContext;
use crate::record::Record;
use crate::role::RoleId;
use log::{debug, error};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Aggregation callback for one consumer role
pub trait RoleHandler: Send + 'static {
    /// Fold one claimed record into the aggregate store.
    ///
    /// Called exactly once per claimed record and never concurrently for the
    /// same role. Other roles may run at the same time.
    fn apply(&mut self, phase: Phase, record: &Record) -> Result<()>;

    /// Called before the consumer takes its first record
    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once the consumer has observed [`Phase::Done`]
    fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "handler"
    }
}

/// A handler backed by a closure
pub struct FnHandler<F>
where
    F: FnMut(Phase, &Record) -> Result<()> + Send + 'static,
{
    name: String,
    apply: F,
}

impl<F> FnHandler<F>
where
    F: FnMut(Phase, &Record) -> Result<()> + Send + 'static,
{
    pub fn new(name: impl Into<String>, apply: F) -> Self {
        Self {
            name: name.into(),
            apply,
        }
    }
}

impl<F> RoleHandler for FnHandler<F>
where
    F: FnMut(Phase, &Record) -> Result<()> + Send + 'static,
{
    fn apply(&mut self, phase: Phase, record: &Record) -> Result<()> {
        (self.apply)(phase, record)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// What one consumer claimed over the run
#[derive(Debug, Clone, Default)]
pub struct ConsumerReport {
    pub claimed: BTreeMap<Phase, u64>,
}

impl ConsumerReport {
    pub fn claimed(&self, phase: Phase) -> u64 {
        self.claimed.get(&phase).copied().unwrap_or(0)
    }
}

/// Keeps the rendezvous honest if the consumer thread exits early.
///
/// A role that disappears mid-run strands its records at the head of the
/// queue, so an abnormal exit cancels the whole pipeline.
struct Participation<'a> {
    context: &'a PipelineContext,
    active: bool,
    finished: bool,
}

impl<'a> Participation<'a> {
    fn new(context: &'a PipelineContext) -> Self {
        Self {
            context,
            active: false,
            finished: false,
        }
    }

    fn enter(&mut self) {
        self.context.rendezvous().enter();
        self.active = true;
    }

    fn leave(&mut self) {
        self.context.rendezvous().leave();
        self.active = false;
    }
}

impl Drop for Participation<'_> {
    fn drop(&mut self) {
        self.context.rendezvous().retire(self.active);
        if !self.finished {
            self.context.cancel();
        }
    }
}

/// Drives one role: claims owned records and takes part in phase handoff
pub struct Consumer {
    role: RoleId,
    role_name: String,
    context: Arc<PipelineContext>,
    metrics: RoleMetrics,
}

impl Consumer {
    /// Create a consumer for `role`.
    ///
    /// The caller must have registered it with the rendezvous before its
    /// thread starts.
    pub fn new(role: RoleId, role_name: impl Into<String>, context: Arc<PipelineContext>) -> Self {
        Self {
            role,
            role_name: role_name.into(),
            context,
            metrics: RoleMetrics::new(),
        }
    }

    /// Share an existing metrics handle instead of a private one
    pub fn with_metrics(mut self, metrics: RoleMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &RoleMetrics {
        &self.metrics
    }

    /// Run until the pipeline reaches [`Phase::Done`] or is cancelled
    pub fn run(&mut self, mut handler: Box<dyn RoleHandler>) -> Result<ConsumerReport> {
        let context = Arc::clone(&self.context);
        let mut participation = Participation::new(&context);
        let mut report = ConsumerReport::default();

        handler.on_start()?;

        let mut phase = context.phases().current();
        while !phase.is_done() {
            participation.enter();
            let span = format!("{phase}_{}", self.role_name);

            loop {
                match context.buffer().dequeue_if(|r: &Record| r.owner() == self.role) {
                    Dequeue::Claimed(record) => {
                        self.apply(handler.as_mut(), phase, &record, &span);
                        *report.claimed.entry(phase).or_default() += 1;
                    }
                    Dequeue::NotOwned(ticket) => {
                        self.metrics.record_not_owned();
                        context.buffer().wait_for_head_change(ticket);
                    }
                    Dequeue::Drained => break,
                    Dequeue::Closed => return Err(PipelineError::Cancelled),
                }
            }

            participation.leave();
            debug!(
                "Role {} drained {phase} after {} records",
                self.role_name,
                report.claimed(phase)
            );
            phase = context.phases().wait_for_phase_change(phase)?;
        }

        participation.finished = true;
        handler.on_shutdown()?;
        Ok(report)
    }

    fn apply(&self, handler: &mut dyn RoleHandler, phase: Phase, record: &Record, span: &str) {
        let start = Instant::now();
        if let Err(e) = handler.apply(phase, record) {
            error!(
                "Role {} ({}) failed on record from {}: {e}",
                self.role_name,
                handler.name(),
                record.origin()
            );
            self.metrics.record_failure();
        }
        let elapsed = start.elapsed();
        self.metrics.record_claimed();
        self.metrics.record_latency(elapsed);
        self.context.hotspots().record(span, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::thread;

    fn record(payload: &str, owner: usize) -> Record {
        Record::new(payload, "memory", RoleId::new(owner)).unwrap()
    }

    #[test]
    fn test_fn_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut handler = FnHandler::new("collect", move |phase, record: &Record| {
            sink.lock().push((phase, record.payload().to_string()));
            Ok(())
        });
        handler.apply(Phase::Tennis, &record("x", 0)).unwrap();
        assert_eq!(handler.name(), "collect");
        assert_eq!(*seen.lock(), vec![(Phase::Tennis, "x".to_string())]);
    }

    #[test]
    fn test_consumer_claims_only_owned_records() {
        let context = Arc::new(PipelineContext::new(4));
        context.rendezvous().register();
        context.rendezvous().register();

        let buffer = context.buffer();
        buffer.enqueue(record("a", 0)).unwrap();
        buffer.enqueue(record("b", 1)).unwrap();
        buffer.enqueue(record("c", 0)).unwrap();
        context.phases().mark_exhausted(buffer);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..2)
            .map(|role| {
                let context = Arc::clone(&context);
                let sink = Arc::clone(&seen);
                thread::spawn(move || {
                    let mut consumer = Consumer::new(RoleId::new(role), format!("r{role}"), context);
                    let handler = FnHandler::new("collect", move |_, record: &Record| {
                        sink.lock().push((role, record.payload().to_string()));
                        Ok(())
                    });
                    let result = consumer.run(Box::new(handler));
                    (result, consumer.metrics().total_claimed())
                })
            })
            .collect();

        // Both roles drain Football; finish the run from here
        context.rendezvous().wait_all_left().unwrap();
        context.rendezvous().reset_phase();
        context.phases().advance_phase(context.buffer(), |_| {});
        context.phases().mark_exhausted(context.buffer());
        context.rendezvous().wait_all_left().unwrap();
        context.rendezvous().reset_phase();
        context.phases().advance_phase(context.buffer(), |_| {});

        let claimed: Vec<u64> = handles
            .into_iter()
            .map(|h| {
                let (result, claimed) = h.join().unwrap();
                assert_eq!(result.unwrap().claimed(Phase::Football), claimed);
                claimed
            })
            .collect();
        assert_eq!(claimed, vec![2, 1]);

        let mut seen = seen.lock().clone();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                (0, "a".to_string()),
                (0, "c".to_string()),
                (1, "b".to_string())
            ]
        );
        assert!(context.hotspots().get("football_r0").is_some());
    }

    #[test]
    fn test_handler_error_is_not_fatal() {
        let context = Arc::new(PipelineContext::starting_at(4, Phase::Tennis));
        context.rendezvous().register();
        context.buffer().enqueue(record("bad", 0)).unwrap();
        context.phases().mark_exhausted(context.buffer());

        let worker = {
            let context = Arc::clone(&context);
            thread::spawn(move || {
                let mut consumer = Consumer::new(RoleId::new(0), "r0", context);
                let handler = FnHandler::new("fails", |_, _: &Record| {
                    Err(PipelineError::HandlerError("boom".into()))
                });
                let report = consumer.run(Box::new(handler));
                (report, consumer.metrics().total_failures())
            })
        };

        context.rendezvous().wait_all_left().unwrap();
        context.phases().advance_phase(context.buffer(), |_| {});
        let (report, failures) = worker.join().unwrap();
        assert_eq!(report.unwrap().claimed(Phase::Tennis), 1);
        assert_eq!(failures, 1);
        assert!(!context.is_cancelled());
    }

    #[test]
    fn test_panicking_handler_cancels_pipeline() {
        let context = Arc::new(PipelineContext::new(4));
        context.rendezvous().register();
        context.buffer().enqueue(record("boom", 0)).unwrap();

        let worker = {
            let context = Arc::clone(&context);
            thread::spawn(move || {
                let mut consumer = Consumer::new(RoleId::new(0), "r0", context);
                let handler = FnHandler::new("panics", |_, _: &Record| -> Result<()> {
                    panic!("handler blew up")
                });
                consumer.run(Box::new(handler))
            })
        };

        assert!(worker.join().is_err());
        assert!(context.is_cancelled());
        assert_eq!(context.rendezvous().alive(), 0);
        assert!(context.buffer().enqueue(record("late", 0)).is_err());
    }
}
