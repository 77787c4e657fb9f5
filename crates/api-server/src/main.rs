//! API Server Binary Entry Point

use anyhow::Context;
use std::sync::Arc;
use stereo_sizing_api_server::{start_server, ApiState};
use stereo_sizing_object_detection::YoloDetector;
use stereo_sizing_pipeline::{PipelineConfig, SizingPipeline};
use stereo_sizing_storage::{ImageSource, PublicUrlSource, S3Config, S3ObjectStorage};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stereo_sizing_api_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::var("STEREO_CONFIG") {
        Ok(path) => PipelineConfig::from_yaml(&path)
            .with_context(|| format!("loading pipeline config from {path}"))?,
        Err(_) => PipelineConfig::default(),
    }
    .apply_env()?;

    let detector = YoloDetector::new(config.detector.clone()).context("loading detector")?;
    let pipeline = SizingPipeline::new(config, Arc::new(detector))?;

    let s3_config = S3Config::default();
    let bucket = s3_config.bucket.clone();
    let s3 = Arc::new(
        S3ObjectStorage::new(s3_config)
            .await
            .context("connecting to object storage")?,
    );
    // Sources come from the public bucket URL when one is configured
    let source: Arc<dyn ImageSource> = match std::env::var("PUBLIC_BASE_URL") {
        Ok(base) if !base.is_empty() => Arc::new(PublicUrlSource::new(&base, &bucket)?),
        _ => s3.clone(),
    };

    let addr = std::env::var("API_SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
    let state = ApiState::new(pipeline, source, s3);

    tracing::info!("Starting Stereo Fruit Sizing API Server");
    start_server(&addr, state).await?;

    Ok(())
}
