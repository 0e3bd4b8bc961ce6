use crate::error::{PipelineError, Result};
use crate::pipeline::DEFAULT_CAPACITY;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Stream football and tennis CSV corpora through a bounded buffer and
/// write one report per sport.
#[derive(Parser, Debug, Clone)]
#[command(name = "sports-analyzer", version)]
pub struct AnalyzerConfig {
    /// Directory holding one sub-directory per sport (`football/`, `tennis/`)
    #[arg(short = 'd', long = "data-dir", default_value = "data")]
    pub data_dir: PathBuf,

    /// Directory the `<sport>_report.txt` files are written to
    #[arg(short = 'o', long = "report-dir", default_value = ".")]
    pub report_dir: PathBuf,

    /// Ring buffer capacity in records
    #[arg(short = 'c', long = "capacity", default_value_t = DEFAULT_CAPACITY)]
    pub capacity: usize,

    /// Seconds between resource samples
    #[arg(long = "sample-interval", default_value = "10")]
    pub sample_interval_secs: u64,

    /// File the resource samples are appended to
    #[arg(long = "perf-log", default_value = "performance_log.txt")]
    pub perf_log: PathBuf,

    /// Do not start the resource sampler
    #[arg(long = "no-sampler", default_value = "false")]
    pub no_sampler: bool,
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(PipelineError::ConfigError(
                "--capacity must be at least 1".into(),
            ));
        }
        if !self.no_sampler && self.sample_interval_secs == 0 {
            return Err(PipelineError::ConfigError(
                "--sample-interval must be at least 1 second".into(),
            ));
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalyzerConfig::parse_from(["sports-analyzer"]);
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.capacity, 1000);
        assert_eq!(config.sample_interval(), Duration::from_secs(10));
        assert!(!config.no_sampler);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = AnalyzerConfig::parse_from(["sports-analyzer", "--capacity", "0"]);
        assert!(matches!(config.validate(), Err(PipelineError::ConfigError(_))));

        let config = AnalyzerConfig::parse_from(["sports-analyzer", "--sample-interval", "0"]);
        assert!(config.validate().is_err());

        let config = AnalyzerConfig::parse_from([
            "sports-analyzer",
            "--sample-interval",
            "0",
            "--no-sampler",
        ]);
        assert!(config.validate().is_ok());
    }
}
