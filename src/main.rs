use dotenvy::dotenv;
use std::sync::Arc;
use tg_reminder_bot::config::Settings;
use tg_reminder_bot::runner::run_bot;
use tg_reminder_bot::telemetry::init_logging;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv().ok();

    // Setup logging with redaction
    init_logging().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?;

    info!("Starting reminder bot...");

    let settings = init_settings();

    run_bot(settings).await;

    Ok(())
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}
