use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use krisha_scan::bot::{BotService, Delegates, ScanDelegate};
use krisha_scan::config::Config;
use krisha_scan::crawler::PageFetcher;
use krisha_scan::lifecycle::{
    graceful_shutdown, run_cleanup, wait_for_signal, Cancel, Cleaner, ShutdownTarget,
};
use krisha_scan::parser::{system_clock, ListingParser, SharedParser};
use krisha_scan::scanner::Orchestrator;
use krisha_scan::storage::{MemoryStore, Persister, RedisStore, SharedStore, StoreShutdown};
use krisha_scan::transport::{
    run_sender, telegram::run_inbound, Outbox, OutboxNotifier, TelegramClient,
};

/// How long to wait for the loops to wind down after shutdown
const LOOP_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the service until a termination signal arrives
pub async fn run(config: Config, memory_store: bool) -> Result<()> {
    config.validate_for_run()?;
    let scan_config = config.scan_config()?;

    let (store, redis): (SharedStore, Option<Arc<RedisStore>>) = if memory_store {
        tracing::warn!("Using in-memory store, state is lost on restart");
        let memory: SharedStore = Arc::new(MemoryStore::new());
        (memory, None)
    } else {
        let redis = Arc::new(
            RedisStore::connect(&config.store)
                .await
                .context("Failed to connect to Redis")?,
        );
        let shared: SharedStore = redis.clone();
        (shared, Some(redis))
    };
    let persister = Persister::new(config.store.timeout());

    let telegram = Arc::new(
        TelegramClient::new(
            &config.bot.api_url,
            &config.bot.api_token,
            config.update_timeout(),
            config.bot.sends_per_second,
        )
        .context("Failed to create bot API client")?,
    );
    let me = telegram.get_me().await.context("Failed to authorize bot")?;
    let bot_username = me.username.unwrap_or_default();
    tracing::info!(bot = %bot_username, "Authorized");
    if let Err(e) = telegram.set_my_commands().await {
        tracing::warn!(error = %e, "Failed to set bot commands");
    }

    let (outbox, outbound) = Outbox::new(config.send_buffer());

    let parser: SharedParser = Arc::new(ListingParser::new(system_clock(scan_config.time_zone)));
    let fetcher = PageFetcher::with_timeout(config.request_timeout())
        .context("Failed to create page fetcher")?;
    let notifier = Arc::new(OutboxNotifier::new(
        outbox.clone(),
        config.scanner.target_host.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        scan_config,
        parser,
        fetcher,
        store.clone(),
        persister.clone(),
        notifier,
    ));

    let cancel = Cancel::new();
    let delegates = Delegates::scan(Arc::new(ScanDelegate::new(
        orchestrator.clone(),
        config.pages(),
    )));
    let bot = Arc::new(
        BotService::new(
            store,
            persister.clone(),
            delegates,
            bot_username.clone(),
            config.scanner.target_host.clone(),
        )
        .with_cancel(cancel.clone()),
    );

    match bot.recover().await {
        Ok(restored) => tracing::info!(restored, "Recovery finished"),
        Err(e) => tracing::warn!(error = %e, "Recovery aborted"),
    }

    let sender = tokio::spawn(run_sender(
        outbound,
        telegram.clone(),
        config.send_delay()?,
        cancel.clone(),
    ));
    let inbound = tokio::spawn(run_inbound(
        telegram,
        bot_username,
        bot.clone(),
        outbox,
        cancel.clone(),
    ));
    let cleaners: Vec<Arc<dyn Cleaner>> = vec![bot.clone(), orchestrator.clone()];
    let cleanup = tokio::spawn(run_cleanup(
        cleaners,
        config.cleanup_interval()?,
        cancel.clone(),
    ));

    wait_for_signal().await;

    let targets: Vec<Arc<dyn ShutdownTarget>> = vec![
        orchestrator,
        bot,
        Arc::new(StoreShutdown::new(persister, redis)),
    ];
    graceful_shutdown(targets, config.shutdown_timeout()).await;

    cancel.cancel();
    let loops = async {
        let _ = tokio::join!(sender, inbound, cleanup);
    };
    if tokio::time::timeout(LOOP_EXIT_TIMEOUT, loops).await.is_err() {
        tracing::warn!("Background loops did not stop in time");
    }

    Ok(())
}
