//! Hotspot timing and the passive resource sampler.
//!
//! The sampler runs on its own thread and only reads shared state: the phase
//! controller (to stop once the run reaches [`Phase::Done`]), the ring buffer
//! fill level and the hotspot table. It has no part in the pipeline protocol.

use crate::error::{PipelineError, Result};
use crate::phase::Phase;
use crate::pipeline::PipelineContext;
use crossbeam::channel::{self, Sender};
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Accumulated timing for one named span
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HotspotStats {
    pub total: Duration,
    pub calls: u64,
}

impl HotspotStats {
    pub fn average(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(self.total.as_secs_f64() / self.calls as f64)
        }
    }
}

/// Thread-safe table of named timing spans
#[derive(Debug, Default)]
pub struct Hotspots {
    spans: Mutex<BTreeMap<String, HotspotStats>>,
}

impl Hotspots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one timed call to `name`
    pub fn record(&self, name: &str, elapsed: Duration) {
        let mut spans = self.spans.lock();
        let stats = spans.entry(name.to_string()).or_default();
        stats.total += elapsed;
        stats.calls += 1;
    }

    /// Start a span that is recorded when the guard drops
    pub fn span(&self, name: impl Into<String>) -> HotspotGuard<'_> {
        HotspotGuard {
            hotspots: self,
            name: name.into(),
            start: Instant::now(),
        }
    }

    pub fn get(&self, name: &str) -> Option<HotspotStats> {
        self.spans.lock().get(name).copied()
    }

    /// All spans sorted by name
    pub fn snapshot(&self) -> Vec<(String, HotspotStats)> {
        self.spans
            .lock()
            .iter()
            .map(|(name, stats)| (name.clone(), *stats))
            .collect()
    }
}

/// Records elapsed time into its [`Hotspots`] table on drop
pub struct HotspotGuard<'a> {
    hotspots: &'a Hotspots,
    name: String,
    start: Instant,
}

impl Drop for HotspotGuard<'_> {
    fn drop(&mut self) {
        self.hotspots.record(&self.name, self.start.elapsed());
    }
}

/// One resource reading
#[derive(Debug, Clone)]
pub struct Sample {
    pub index: u64,
    pub cpu_percent: f32,
    pub memory_kb: u64,
    pub wall: Duration,
    pub phase: Phase,
    pub buffered: usize,
}

impl Sample {
    /// Render the sample and the hotspot table as a performance log block
    pub fn render(&self, hotspots: &[(String, HotspotStats)]) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Sample {}:", self.index);
        let _ = writeln!(out, "Phase: {}", self.phase);
        let _ = writeln!(out, "CPU Usage: {:.2}%", self.cpu_percent);
        let _ = writeln!(out, "Memory Usage: {} KB", self.memory_kb);
        let _ = writeln!(out, "Wall Clock Time: {:.6} seconds", self.wall.as_secs_f64());
        let _ = writeln!(out, "Buffered Records: {}", self.buffered);
        out.push_str("Hotspots:\n");
        for (name, stats) in hotspots {
            let _ = writeln!(
                out,
                "  {name}: Total Time={:.6}, Calls={}, Avg Time={:.6}",
                stats.total.as_secs_f64(),
                stats.calls,
                stats.average().as_secs_f64()
            );
        }
        out.push_str("------------------------\n");
        out
    }
}

struct ProcessStats {
    system: System,
    pid: Pid,
    started: Instant,
    samples: u64,
}

impl ProcessStats {
    fn new() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let mut system = System::new();
        // First refresh only establishes the CPU baseline
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );
        Self {
            system,
            pid,
            started: Instant::now(),
            samples: 0,
        }
    }

    fn sample(&mut self, context: &PipelineContext) -> Sample {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );
        let (cpu_percent, memory_kb) = self
            .system
            .process(self.pid)
            .map_or((0.0, 0), |p| (p.cpu_usage(), p.memory() / 1024));
        self.samples += 1;
        Sample {
            index: self.samples,
            cpu_percent,
            memory_kb,
            wall: self.started.elapsed(),
            phase: context.phases().current(),
            buffered: context.buffer().len(),
        }
    }
}

/// Handle to the background sampler thread
pub struct ResourceSampler {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<u64>>,
}

impl ResourceSampler {
    /// Spawn a sampler that reads `context` every `interval`.
    ///
    /// Each sample is logged and, when `log_path` is set, appended to that
    /// file. The thread exits on its own once the phase reaches `Done`.
    pub fn spawn(
        context: Arc<PipelineContext>,
        interval: Duration,
        log_path: Option<PathBuf>,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let ticker = channel::tick(interval);

        let handle = thread::Builder::new()
            .name("resource-sampler".to_string())
            .spawn(move || {
                let mut stats = ProcessStats::new();
                loop {
                    crossbeam::select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            emit(&stats.sample(&context), &context, log_path.as_ref());
                            if context.phases().current().is_done() {
                                break;
                            }
                        }
                    }
                }
                emit(&stats.sample(&context), &context, log_path.as_ref());
                stats.samples
            })
            .map_err(|e| PipelineError::ThreadError(e.to_string()))?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the sampler, wait for its final sample and return the sample count
    pub fn stop(mut self) -> Result<u64> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<u64> {
        // Disconnecting the channel wakes the select immediately
        self.stop.take();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| PipelineError::ThreadError("resource sampler panicked".into())),
            None => Ok(0),
        }
    }
}

impl Drop for ResourceSampler {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn emit(sample: &Sample, context: &PipelineContext, log_path: Option<&PathBuf>) {
    info!(
        "sample {}: phase={} cpu={:.1}% mem={}KB buffered={} wall={:.1}s",
        sample.index,
        sample.phase,
        sample.cpu_percent,
        sample.memory_kb,
        sample.buffered,
        sample.wall.as_secs_f64()
    );

    let Some(path) = log_path else {
        return;
    };
    let block = sample.render(&context.hotspots().snapshot());
    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(block.as_bytes()));
    if let Err(e) = written {
        warn!("Failed to append to performance log {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hotspot_span_records_on_drop() {
        let hotspots = Hotspots::new();
        {
            let _span = hotspots.span("csv_file_processing");
            thread::sleep(Duration::from_millis(2));
        }
        hotspots.record("csv_file_processing", Duration::from_millis(4));

        let stats = hotspots.get("csv_file_processing").unwrap();
        assert_eq!(stats.calls, 2);
        assert!(stats.total >= Duration::from_millis(6));
        assert!(hotspots.get("football_phase").is_none());
    }

    #[test]
    fn test_hotspot_average_with_huge_call_count() {
        let stats = HotspotStats {
            total: Duration::from_secs(1 << 32),
            calls: 1 << 32,
        };
        assert_eq!(stats.average(), Duration::from_secs(1));
        assert_eq!(HotspotStats::default().average(), Duration::ZERO);
    }

    #[test]
    fn test_sample_render_block() {
        let sample = Sample {
            index: 3,
            cpu_percent: 12.5,
            memory_kb: 2048,
            wall: Duration::from_millis(1500),
            phase: Phase::Tennis,
            buffered: 7,
        };
        let spans = vec![(
            "tennis_phase".to_string(),
            HotspotStats {
                total: Duration::from_secs(2),
                calls: 4,
            },
        )];
        let block = sample.render(&spans);
        assert!(block.starts_with("Sample 3:\n"));
        assert!(block.contains("CPU Usage: 12.50%"));
        assert!(block.contains("Memory Usage: 2048 KB"));
        assert!(block.contains("tennis_phase: Total Time=2.000000, Calls=4, Avg Time=0.500000"));
        assert!(block.ends_with("------------------------\n"));
    }

    #[test]
    fn test_sampler_writes_final_sample_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("performance_log.txt");
        let context = Arc::new(PipelineContext::new(4));

        let sampler =
            ResourceSampler::spawn(Arc::clone(&context), Duration::from_secs(3600), Some(log.clone()))
                .unwrap();
        let samples = sampler.stop().unwrap();
        assert_eq!(samples, 1);

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("Sample 1:"));
        assert!(contents.contains("Phase: football"));
    }
}
