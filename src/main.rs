use std::sync::Arc;

use anyhow::Context as _;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use chat_sheriff::channels::{Channel, TelegramChannel};
use chat_sheriff::config::BotConfig;
use chat_sheriff::llm::{AiExecutor, ExecutorSettings, HttpCompletionBackend, ImageGenerator};
use chat_sheriff::maintenance::{SWEEP_INTERVAL, spawn_context_sweep, spawn_history_purge};
use chat_sheriff::pipeline::MessageTriage;
use chat_sheriff::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BotConfig::from_env().context("failed to load configuration")?;
    let _log_guard = init_tracing(&config);

    eprintln!("🤠 Chat Sheriff v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.ai.model);
    eprintln!("   Database: {}", config.db_path.display());

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );

    // ── Telegram ─────────────────────────────────────────────────────────
    let telegram = Arc::new(TelegramChannel::new(config.telegram_token.clone()));
    let bot = telegram.get_me().await.context("getMe failed")?;
    tracing::info!(bot_id = bot.id, username = %bot.username, "Authorized");
    let channel: Arc<dyn Channel> = telegram;

    // ── AI ───────────────────────────────────────────────────────────────
    let backend = Arc::new(
        HttpCompletionBackend::new(
            config.ai.url.clone(),
            config.ai.api_key.clone(),
            config.ai.timeout,
        )
        .context("failed to build completion client")?,
    );
    let executor = Arc::new(
        AiExecutor::new(backend, ExecutorSettings::from(&config.ai))
            .with_channel(Arc::clone(&channel))
            .with_billing(Arc::clone(&db)),
    );
    let images = Arc::new(
        ImageGenerator::new(config.ai.image_url.clone())
            .context("failed to build image client")?,
    );

    // ── Pipeline ─────────────────────────────────────────────────────────
    let triage = MessageTriage::new(
        config.triage_settings(bot),
        Arc::clone(&channel),
        Arc::clone(&db),
        executor,
    )
    .with_image_generator(images);

    let purge = spawn_history_purge(
        Arc::clone(&db),
        config.retention.history_days,
        SWEEP_INTERVAL,
    );
    let sweep = spawn_context_sweep(
        Arc::clone(&db),
        config.retention.context_retention_days,
        SWEEP_INTERVAL,
    );

    let stream = channel.start().await.context("failed to start update stream")?;

    tokio::select! {
        _ = triage.run(stream) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    purge.abort();
    sweep.abort();
    Ok(())
}

/// Stderr always; a daily-rolling file too when a log directory is set.
fn init_tracing(config: &BotConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match config.log_dir {
        Some(ref dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sheriff.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .init();
            None
        }
    }
}
