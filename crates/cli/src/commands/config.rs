//! Print the resolved pipeline configuration

use anyhow::Result;
use clap::Args;
use stereo_sizing_pipeline::PipelineConfig;

#[derive(Args)]
pub struct ConfigCommand {
    /// Also validate the configuration
    #[arg(long, default_value = "false")]
    pub check: bool,
}

impl ConfigCommand {
    pub fn execute(self, config: &PipelineConfig) -> Result<()> {
        if self.check {
            config.validate()?;
        }
        print!("{}", serde_yaml::to_string(config)?);
        Ok(())
    }
}
