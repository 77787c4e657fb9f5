//! Pixel-only sizing of local single images

use super::{build_pipeline, local_source, print_reports, FileReport};
use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;
use stereo_sizing_pipeline::PipelineConfig;

#[derive(Args)]
pub struct FlatCommand {
    /// Single camera images of any resolution
    #[arg(value_name = "FILES", required = true)]
    pub inputs: Vec<PathBuf>,
}

impl FlatCommand {
    pub async fn execute(self, config: PipelineConfig) -> Result<()> {
        let pipeline = build_pipeline(config)?;

        let mut reports = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let (source, name) = local_source(input)?;
            let report = pipeline
                .process_2d(&source, &name)
                .await
                .with_context(|| format!("Failed to process {}", input.display()))?;
            reports.push(FileReport {
                source: input.display().to_string(),
                report,
            });
        }
        print_reports(&reports)
    }
}
