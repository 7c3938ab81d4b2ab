use convctx_config::Config;
use tracing::info;

/// Strategy for creating the configuration template at `~/convctx/config.json`.
#[derive(Debug, Clone, Copy)]
pub struct InitStrategy;

impl super::CommandStrategy for InitStrategy {
    type Input = ();

    async fn execute(&self, _input: Self::Input) -> anyhow::Result<()> {
        let path = Config::create_config()?;
        info!("Config written to {}", path.display());
        Ok(())
    }
}
