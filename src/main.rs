use anyhow::Result;
use signal_sender::config::SenderConfig;
use signal_sender::{run, RunMode};
use tracing::{error, info, warn};

const MALFORMED_SWITCH: &str = "--malformed";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signal_sender=info".into()),
        )
        .init();

    let mut mode = RunMode::Primary;
    for arg in std::env::args().skip(1) {
        if arg == MALFORMED_SWITCH {
            mode = RunMode::Malformed;
        } else {
            warn!(argument = %arg, "Ignoring unknown argument");
        }
    }

    // Failures are logged, not reflected in the exit status
    let config = match SenderConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return Ok(());
        }
    };

    info!(
        url = %config.nats.url,
        mail_topic = %config.topics.mail,
        whatsapp_topic = %config.topics.whatsapp,
        mode = ?mode,
        "Signal sender starting"
    );

    match run(&config, mode).await {
        Ok(summary) => info!(
            mail_sent = summary.mail.successful(),
            whatsapp_sent = summary.whatsapp.successful(),
            failed = summary.failed(),
            "Done"
        ),
        Err(e) => error!(error = %e, "Run aborted"),
    }

    Ok(())
}
