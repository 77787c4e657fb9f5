//! CLI subcommands

pub mod config;
pub mod flat;
pub mod stereo;

use anyhow::{Context as _, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stereo_sizing_fusion::MeasurementReport;
use stereo_sizing_object_detection::YoloDetector;
use stereo_sizing_pipeline::{PipelineConfig, SizingPipeline};
use stereo_sizing_storage::LocalStorage;

/// Config file (if any) with environment overrides applied
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::from_yaml(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    Ok(config.apply_env()?)
}

pub fn build_pipeline(config: PipelineConfig) -> Result<SizingPipeline> {
    let detector = YoloDetector::new(config.detector.clone()).with_context(|| {
        format!(
            "Failed to load detector from {}",
            config.detector.model_path.display()
        )
    })?;
    Ok(SizingPipeline::new(config, Arc::new(detector))?)
}

/// Storage rooted at the input's directory, plus the input's name within it
pub fn local_source(input: &Path) -> Result<(LocalStorage, String)> {
    let name = input
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Not a file path: {}", input.display()))?
        .to_string();
    let root = match input.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((LocalStorage::new(root), name))
}

/// One report per input file
#[derive(Serialize)]
pub struct FileReport {
    pub source: String,
    #[serde(flatten)]
    pub report: MeasurementReport,
}

pub fn print_reports(reports: &[FileReport]) -> Result<()> {
    let json = match reports {
        [single] => serde_json::to_string_pretty(single)?,
        _ => serde_json::to_string_pretty(reports)?,
    };
    println!("{json}");
    Ok(())
}
