//! Server startup utilities.

use collector_config::AppConfig;
use tracing::info;

/// Prints the startup banner.
pub fn print_banner() {
    info!(r#"
   ______      ____          __
  / ____/___  / / /__  _____/ /_____  _____
 / /   / __ \/ / / _ \/ ___/ __/ __ \/ ___/
/ /___/ /_/ / / /  __/ /__/ /_/ /_/ / /
\____/\____/_/_/\___/\___/\__/\____/_/
    "#);
}

/// Prints the effective runtime settings.
pub fn print_startup_info(config: &AppConfig) {
    let separator = "=".repeat(60);
    info!("{}", separator);
    info!("Environment:     {}", config.app.environment);
    info!("Database:        {}", config.database.url);
    info!("Workers:         {}", config.scheduler.max_concurrent);
    info!("Max retries:     {}", config.scheduler.max_retries);
    info!("Sessions:        {}", config.vault.sessions_dir.display());
    info!(
        "Encryption:      {}",
        if config.vault.key().is_some() { "enabled" } else { "disabled" }
    );
    info!("{}", separator);
}
