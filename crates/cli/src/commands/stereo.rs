//! Stereo sizing of local side-by-side frames

use super::{build_pipeline, local_source, print_reports, FileReport};
use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Instant;
use stereo_sizing_pipeline::PipelineConfig;
use stereo_sizing_storage::LocalStorage;
use tracing::info;

#[derive(Args)]
pub struct StereoCommand {
    /// Side-by-side stereo frames
    #[arg(value_name = "FILES", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Directory for disparity visualizations
    #[arg(long, default_value = "./disparity_output")]
    pub output_dir: PathBuf,

    /// Skip writing disparity visualizations
    #[arg(long, default_value = "false")]
    pub no_disparity: bool,
}

impl StereoCommand {
    pub async fn execute(self, mut config: PipelineConfig) -> Result<()> {
        let start = Instant::now();
        if self.no_disparity {
            config.store_disparity_image = false;
        } else {
            std::fs::create_dir_all(&self.output_dir)
                .context("Failed to create output directory")?;
        }
        let pipeline = build_pipeline(config)?;
        let sink = LocalStorage::new(&self.output_dir);

        let mut reports = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let (source, name) = local_source(input)?;
            let report = pipeline
                .process(&source, &sink, &name)
                .await
                .with_context(|| format!("Failed to process {}", input.display()))?;
            reports.push(FileReport {
                source: input.display().to_string(),
                report,
            });
        }

        print_reports(&reports)?;
        info!(
            "Sized {} frame(s) in {:.3}s",
            reports.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }
}
