//! Phase hooks and the per-phase text report.

use crate::error::{PipelineError, Result};
use crate::phase::Phase;
use crate::players::PlayerStore;
use crate::source::ROSTER_MARKER;
use log::info;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Number of PPA leaders listed in a report
pub const TOP_PPA: usize = 10;

/// Facts about a phase that has just drained
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub produced: u64,
    pub elapsed: Duration,
}

/// Callbacks the producer runs around each phase.
///
/// All three run on the producer thread. `drained` runs after every consumer
/// has left the phase, so aggregates are final. `reset` runs inside the
/// phase transition, before any consumer can observe the next phase.
pub trait PhaseHook: Send {
    fn prepare(&mut self, _phase: Phase) -> Result<()> {
        Ok(())
    }

    fn drained(&mut self, _phase: Phase, _summary: &PhaseSummary) -> Result<()> {
        Ok(())
    }

    /// Clear phase-scoped state before `next` starts
    fn reset(&mut self, _next: Phase) {}
}

/// A hook that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl PhaseHook for NoopHook {}

/// Loads each phase roster and writes `<phase>_report.txt` once it drains
pub struct ReportWriter {
    store: Arc<PlayerStore>,
    data_dir: PathBuf,
    report_dir: PathBuf,
    top_n: usize,
}

impl ReportWriter {
    pub fn new(
        store: Arc<PlayerStore>,
        data_dir: impl Into<PathBuf>,
        report_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            data_dir: data_dir.into(),
            report_dir: report_dir.into(),
            top_n: TOP_PPA,
        }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn roster_path(&self, phase: Phase) -> PathBuf {
        self.data_dir
            .join(phase.as_str())
            .join(format!("{ROSTER_MARKER}.csv"))
    }

    pub fn report_path(&self, phase: Phase) -> PathBuf {
        self.report_dir.join(format!("{}_report.txt", phase.as_str()))
    }

    /// Render the report for the aggregates currently in the store
    pub fn render(&self, phase: Phase) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} Results:", phase.title());
        match self.store.leader() {
            Some(leader) => {
                let _ = writeln!(
                    out,
                    "Player with max points: {}, points: {}",
                    leader.full_name(),
                    leader.points
                );
            }
            None => out.push_str("Player with max points: none, points: 0\n"),
        }

        let _ = writeln!(out, "\nTop {} PPA Players:", self.top_n);
        for (rank, player) in self.store.top_ppa(self.top_n).iter().enumerate() {
            let _ = writeln!(
                out,
                "{:2}. {} ({}): {:.4}",
                rank + 1,
                player.full_name(),
                player.id,
                player.ppa
            );
        }
        out
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        fs::write(path, contents)
            .map_err(|e| PipelineError::ReportError(format!("{}: {e}", path.display())))
    }
}

impl PhaseHook for ReportWriter {
    fn prepare(&mut self, phase: Phase) -> Result<()> {
        let path = self.roster_path(phase);
        let loaded = self.store.load_roster(&path)?;
        info!("Loaded {loaded} players from {}", path.display());
        Ok(())
    }

    fn drained(&mut self, phase: Phase, summary: &PhaseSummary) -> Result<()> {
        let path = self.report_path(phase);
        self.write(&path, &self.render(phase))?;
        info!(
            "{} report written to {} ({} records)",
            phase.title(),
            path.display(),
            summary.produced
        );
        Ok(())
    }

    fn reset(&mut self, _next: Phase) {
        self.store.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer(dir: &Path) -> (Arc<PlayerStore>, ReportWriter) {
        let store = Arc::new(PlayerStore::new());
        let writer = ReportWriter::new(Arc::clone(&store), dir.join("data"), dir);
        (store, writer)
    }

    #[test]
    fn test_render_without_leader() {
        let dir = tempfile::tempdir().unwrap();
        let (store, writer) = writer(dir.path());
        store.load_roster_lines(["1,Ann,Lee"]).unwrap();

        let report = writer.render(Phase::Football);
        assert_eq!(
            report,
            "Football Results:\n\
             Player with max points: none, points: 0\n\
             \n\
             Top 10 PPA Players:\n \
             1. Ann Lee (1): 0.0000\n"
        );
    }

    #[test]
    fn test_render_orders_by_ppa() {
        let dir = tempfile::tempdir().unwrap();
        let (store, writer) = writer(dir.path());
        store
            .load_roster_lines(["1,Ann,Lee", "2,Bo,Kim", "3,Cy,Diaz"])
            .unwrap();
        store.credit_ppa(2, 1.5, 3, 0.25);
        store.record_ranking(3, "2019-0001", 90);

        let report = writer.with_top_n(2).render(Phase::Tennis);
        assert!(report.starts_with("Tennis Results:\nPlayer with max points: Cy Diaz, points: 90\n"));
        assert!(report.contains(" 1. Bo Kim (2): 1.5000\n 2. Cy Diaz (3): 0.2500\n"));
        assert!(!report.contains("Ann Lee"));
    }

    #[test]
    fn test_hook_lifecycle_writes_report_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mut writer) = writer(dir.path());
        let roster_dir = dir.path().join("data").join("football");
        fs::create_dir_all(&roster_dir).unwrap();
        fs::write(
            roster_dir.join("atp_players.csv"),
            "player_id,name_first,name_last\n5,Eve,Ng\n",
        )
        .unwrap();

        writer.prepare(Phase::Football).unwrap();
        assert_eq!(store.len(), 1);

        let summary = PhaseSummary {
            phase: Phase::Football,
            produced: 0,
            elapsed: Duration::ZERO,
        };
        writer.drained(Phase::Football, &summary).unwrap();
        let written = fs::read_to_string(dir.path().join("football_report.txt")).unwrap();
        assert!(written.contains(" 1. Eve Ng (5): 0.0000"));

        writer.reset(Phase::Tennis);
        assert!(store.is_empty());
        // No tennis roster on disk
        assert!(writer.prepare(Phase::Tennis).is_err());
    }
}
