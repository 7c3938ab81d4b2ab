use convctx_config::Config;

/// Strategy for displaying the effective configuration.
///
/// Values come from `~/convctx/config.json` when present, defaults otherwise.
#[derive(Debug, Clone, Copy)]
pub struct InfoStrategy;

impl super::CommandStrategy for InfoStrategy {
    type Input = Config;

    async fn execute(&self, config: Self::Input) -> anyhow::Result<()> {
        let source = match Config::config_path() {
            Ok(path) if path.exists() => path.display().to_string(),
            _ => "(defaults)".to_string(),
        };

        println!("=== convctx Configuration ===\n");
        println!("Source: {source}");
        println!();

        let conversation = &config.conversation;
        println!("Conversation:");
        println!("  Parameter Name: {}", conversation.parameter_name);
        println!(
            "  Default Timeout: {}",
            format_millis(conversation.default_timeout_ms)
        );
        println!(
            "  Concurrent Access Timeout: {}",
            format_millis(conversation.concurrent_access_timeout_ms)
        );
        println!("  Store Prefix: {}", conversation.store_prefix);
        println!("  Id Strategy: {:?}", conversation.id_strategy);
        println!();

        println!("Logging:");
        println!("  Level: {}", config.logging.level);

        Ok(())
    }
}

fn format_millis(ms: u64) -> String {
    if ms >= 60_000 && ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms >= 1000 && ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{ms}ms")
    }
}
