use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use sports_analyzer::{
    scoring, AnalyzerConfig, CsvTreeSource, PipelineBuilder, PlayerStore, ReportWriter,
    ResourceSampler, VERSION,
};
use std::fs;
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = AnalyzerConfig::parse();
    config.validate()?;
    info!("Running sports-analyzer version {VERSION}");

    // Nothing starts if the corpus root is unusable
    let source = CsvTreeSource::open(&config.data_dir)
        .with_context(|| format!("cannot open data directory {}", config.data_dir.display()))?;
    fs::create_dir_all(&config.report_dir).with_context(|| {
        format!("cannot create report directory {}", config.report_dir.display())
    })?;

    let store = Arc::new(PlayerStore::new());
    let pipeline = PipelineBuilder::new()
        .with_capacity(config.capacity)
        .add_roles(scoring::sports_roles())
        .build()?;

    let sampler = if config.no_sampler {
        None
    } else {
        Some(ResourceSampler::spawn(
            pipeline.context(),
            config.sample_interval(),
            Some(config.perf_log.clone()),
        )?)
    };

    let hook = ReportWriter::new(Arc::clone(&store), &config.data_dir, &config.report_dir);
    let running = pipeline.start(Box::new(source), Box::new(hook), |_, role| {
        scoring::handler_for(role.name(), Arc::clone(&store))
    })?;
    let result = running.wait();

    if let Some(sampler) = sampler {
        match sampler.stop() {
            Ok(samples) => info!("Resource sampler recorded {samples} samples"),
            Err(e) => warn!("{e}"),
        }
    }

    let summary = result.context("pipeline run failed")?;
    info!("{}", summary.format());
    Ok(())
}
