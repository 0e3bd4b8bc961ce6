//! A phased, bounded-buffer producer/consumer pipeline for sports statistics.
//!
//! One producer streams CSV rows from a record source into a fixed-capacity
//! ring buffer. A small set of consumers, each with a fixed role, claims only
//! the records its role owns. Phases run strictly in order: every football
//! record is drained and reported before the first tennis record is queued.
//!
//! # Features
//!
//! - Mutex + condition variable ring buffer with per-role head claiming
//! - Completion rendezvous that gates each phase transition on every
//!   consumer having drained it
//! - Origin-to-role classification checked before any record is queued
//! - Per-role metrics: claims, parks, failures, apply latency percentiles
//! - Named hotspot timings and a passive CPU/memory sampler
//!
//! # Example
//!
//! ```ignore
//! use sports_analyzer::{scoring, CsvTreeSource, PipelineBuilder, PlayerStore, ReportWriter};
//! use std::sync::Arc;
//!
//! let store = Arc::new(PlayerStore::new());
//! let pipeline = PipelineBuilder::new()
//!     .with_capacity(1000)
//!     .add_roles(scoring::sports_roles())
//!     .build()?;
//!
//! let running = pipeline.start(
//!     Box::new(CsvTreeSource::open("data")?),
//!     Box::new(ReportWriter::new(Arc::clone(&store), "data", ".")),
//!     |_, role| scoring::handler_for(role.name(), Arc::clone(&store)),
//! )?;
//! let summary = running.wait()?;
//! ```

pub mod buffer;
pub mod config;
pub mod consumer;
pub mod error;
pub mod metrics;
pub mod phase;
pub mod pipeline;
pub mod players;
pub mod producer;
pub mod profiling;
pub mod record;
pub mod rendezvous;
pub mod report;
pub mod role;
pub mod scoring;
pub mod source;

// Re-exports for convenience
pub use buffer::{Dequeue, HeadTicket, RingBuffer};
pub use config::AnalyzerConfig;
pub use consumer::{Consumer, ConsumerReport, FnHandler, RoleHandler};
pub use error::{PipelineError, Result};
pub use metrics::{MetricsSnapshot, PercentileTracker, RoleMetrics};
pub use phase::{Phase, PhaseController, PhaseSnapshot};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineContext, PipelineSummary, RunningPipeline};
pub use players::{Player, PlayerStore};
pub use producer::{Producer, ProducerReport};
pub use profiling::{Hotspots, ResourceSampler};
pub use record::{Record, MAX_PAYLOAD_LEN};
pub use rendezvous::CompletionRendezvous;
pub use report::{NoopHook, PhaseHook, PhaseSummary, ReportWriter};
pub use role::{OriginMatcher, Role, RoleId, RoleTable};
pub use source::{CsvTreeSource, MemorySource, RecordSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
