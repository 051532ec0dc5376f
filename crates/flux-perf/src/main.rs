use anyhow::Context;
use clap::Parser;
use flux_alert::{Channel, LogNotifier, NotificationDispatcher, Notifier};
use flux_config::{ConfigLoader, LogFormat, LoggingConfig};
use flux_perf::PerfEngine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "FLUX performance observability daemon")]
struct Args {
    /// Directory containing engine.toml
    #[arg(short, long, default_value = "./config")]
    config_dir: PathBuf,

    /// Log level, overrides logging.level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::new(&args.config_dir)
        .load()
        .with_context(|| format!("failed to load config from {}", args.config_dir.display()))?;

    init_tracing(&config.logging, args.log_level.as_deref());
    info!(config_dir = %args.config_dir.display(), "Starting flux-perfd");

    let dispatcher =
        NotificationDispatcher::new(Duration::from_secs(config.alerting.delivery_timeout_secs));
    // 所有渠道默认写日志，外部投递由嵌入方注册
    let log_notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    for channel in Channel::ALL {
        dispatcher.register(channel, log_notifier.clone()).await;
    }

    let engine = PerfEngine::new(config, dispatcher).await?;
    engine.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    engine.stop().await;
    Ok(())
}

fn init_tracing(logging: &LoggingConfig, level_override: Option<&str>) {
    let level = level_override.unwrap_or(&logging.level).to_string();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    match logging.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}
