//! Line-oriented record sources.
//!
//! A [`RecordSource`] lists the origins for a phase and streams each one line
//! by line. [`CsvTreeSource`] walks `<root>/<phase>/` for CSV files.
//! [`MemorySource`] serves fixed lines for tests and benchmarks.

use crate::error::{PipelineError, Result};
use crate::phase::Phase;
use log::warn;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Lines of one origin, in file order
pub type LineStream = Box<dyn Iterator<Item = io::Result<String>> + Send>;

/// File name fragment of the per-phase player roster
pub const ROSTER_MARKER: &str = "atp_players";

/// Sequential supplier of raw lines for the producer
pub trait RecordSource: Send {
    /// Origins holding records for `phase`, in delivery order
    fn origins(&mut self, phase: Phase) -> Result<Vec<String>>;

    /// Open one origin for streaming
    fn open(&mut self, origin: &str) -> Result<LineStream>;
}

/// Walks a directory tree of CSV files, one subdirectory per phase.
///
/// Header lines are skipped and roster files are left out. The producer loads
/// rosters directly and never queues them.
#[derive(Debug, Clone)]
pub struct CsvTreeSource {
    root: PathBuf,
}

impl CsvTreeSource {
    /// Open a source rooted at `root`.
    ///
    /// Fails if the root cannot be listed. This is the one fatal source error.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::read_dir(&root).map_err(|source| PipelineError::SourceUnavailable {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the records of `phase`
    pub fn phase_dir(&self, phase: Phase) -> PathBuf {
        self.root.join(phase.as_str())
    }

    /// Path of the roster file for `phase`
    pub fn roster_path(&self, phase: Phase) -> PathBuf {
        self.phase_dir(phase).join(format!("{ROSTER_MARKER}.csv"))
    }
}

/// Split `reader` into lines, decoding each one lossily.
///
/// Bytes that are not UTF-8 become U+FFFD, so a mis-encoded row never hides
/// the rows after it. Only genuine read failures surface as errors.
pub fn lossy_lines<R>(reader: R) -> impl Iterator<Item = io::Result<String>> + Send
where
    R: BufRead + Send,
{
    reader.split(b'\n').map(|line| {
        line.map(|bytes| {
            String::from_utf8_lossy(&bytes)
                .trim_end_matches('\r')
                .to_string()
        })
    })
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn is_record_csv(entry: &DirEntry) -> bool {
    entry.file_type().is_file()
        && entry.path().extension().is_some_and(|ext| ext == "csv")
        && !entry.file_name().to_string_lossy().contains(ROSTER_MARKER)
}

impl RecordSource for CsvTreeSource {
    fn origins(&mut self, phase: Phase) -> Result<Vec<String>> {
        let dir = self.phase_dir(phase);
        if !dir.is_dir() {
            warn!("No data directory for {phase} at {}", dir.display());
            return Ok(Vec::new());
        }

        let mut origins = Vec::new();
        for entry in WalkDir::new(&dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_hidden(e))
        {
            match entry {
                Ok(entry) if is_record_csv(&entry) => {
                    origins.push(entry.path().to_string_lossy().into_owned());
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable entry under {}: {e}", dir.display()),
            }
        }
        Ok(origins)
    }

    fn open(&mut self, origin: &str) -> Result<LineStream> {
        let file = File::open(origin).map_err(|source| PipelineError::Source {
            origin: origin.to_string(),
            source,
        })?;
        Ok(Box::new(lossy_lines(BufReader::new(file)).skip(1)))
    }
}

/// In-memory source. Lines are served verbatim, no header is skipped.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    phases: HashMap<Phase, Vec<String>>,
    lines: HashMap<String, Vec<String>>,
    broken: Vec<String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an origin with its lines to `phase`
    pub fn with_origin<I, S>(mut self, phase: Phase, origin: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let origin = origin.into();
        self.phases.entry(phase).or_default().push(origin.clone());
        self.lines
            .insert(origin, lines.into_iter().map(Into::into).collect());
        self
    }

    /// Add an origin to `phase` that fails to open
    pub fn with_broken_origin(mut self, phase: Phase, origin: impl Into<String>) -> Self {
        let origin = origin.into();
        self.phases.entry(phase).or_default().push(origin.clone());
        self.broken.push(origin);
        self
    }

    /// Total number of lines registered for `phase`
    pub fn line_count(&self, phase: Phase) -> usize {
        self.phases
            .get(&phase)
            .into_iter()
            .flatten()
            .filter_map(|origin| self.lines.get(origin))
            .map(Vec::len)
            .sum()
    }
}

impl RecordSource for MemorySource {
    fn origins(&mut self, phase: Phase) -> Result<Vec<String>> {
        Ok(self.phases.get(&phase).cloned().unwrap_or_default())
    }

    fn open(&mut self, origin: &str) -> Result<LineStream> {
        if self.broken.iter().any(|b| b == origin) {
            return Err(PipelineError::Source {
                origin: origin.to_string(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "origin is unreadable"),
            });
        }
        let lines = self.lines.get(origin).cloned().unwrap_or_default();
        Ok(Box::new(lines.into_iter().map(Ok)))
    }
}
