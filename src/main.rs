use car_sniper::config::{load_config, AppConfig, SessionProviderKind, TransportKind, TranslatorKind};
use car_sniper::exchange::HttpRateSource;
use car_sniper::matcher::MatchEngine;
use car_sniper::notifier::TelegramNotifier;
use car_sniper::pipeline::Crawler;
use car_sniper::scraper::build_transport;
use car_sniper::scraper::fetcher::build_client;
use car_sniper::session::{HttpWarmupProvider, SessionManager, SessionProvider};
use car_sniper::storage::SqliteStorage;
use car_sniper::translate::{LlmTranslator, NoTranslation, TranslationProvider};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Set panic hook to log details about any panic
    std::panic::set_hook(Box::new(|panic_info| {
        error!("😱 Panic occurred: {}", panic_info);
    }));

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.json".into());
    let config: Arc<AppConfig> = match load_config(&config_path) {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!("Config load error ({}): {}", config_path, e);
            return;
        }
    };

    // Initialize storage (SQLite) with async access (wrapped in a Mutex)
    let storage = match SqliteStorage::new(&config.database_path) {
        Ok(s) => Arc::new(Mutex::new(s)),
        Err(e) => {
            error!("Failed to initialize storage: {}", e);
            return;
        }
    };

    let session = Arc::new(SessionManager::new(session_provider(&config), &config.session));

    let transport = match build_transport(&config.scraper, session.clone()) {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to build transport: {}", e);
            return;
        }
    };
    let rates = match build_client(&config.scraper) {
        Ok(client) => Arc::new(HttpRateSource::new(client, &config.exchange)),
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return;
        }
    };
    let crawler = Crawler::new(
        &config.scraper,
        transport,
        storage.clone(),
        translator(&config),
        rates,
    );

    let notifier = match TelegramNotifier::new(config.telegram_bot_token.clone()) {
        Ok(n) => Arc::new(n),
        Err(e) => {
            error!("Failed to initialize notifier: {}", e);
            return;
        }
    };
    let matcher = MatchEngine::new(storage.clone(), notifier);

    let mut jobs = Vec::new();

    if config.scraper.transport == TransportKind::Session {
        let every = Duration::from_secs(config.session_refresh_interval_seconds.max(60));
        let mut startup = true;
        jobs.push(spawn_periodic(every, move || {
            let session = session.clone();
            // at startup reuse a still-valid blob, later ticks always recapture
            let reuse = std::mem::replace(&mut startup, false);
            async move {
                let result = if reuse { session.load().await } else { session.refresh().await };
                if let Err(e) = result {
                    warn!("Scheduled session refresh failed: {}", e);
                }
            }
        }));
    }

    let crawler = Arc::new(crawler);
    let crawl_config = config.clone();
    jobs.push(spawn_periodic(
        Duration::from_secs(config.crawl_interval_seconds.max(60)),
        move || {
            let crawler = crawler.clone();
            let config = crawl_config.clone();
            async move {
                match crawler.run_crawl(&config.scraper.categories, config.scraper.max_pages).await {
                    Ok(report) => info!(
                        "Crawl report: {} stored, {} skipped, {} failed",
                        report.stored, report.skipped_existing, report.failed
                    ),
                    Err(e) => error!("Crawl aborted: {}", e),
                }
            }
        },
    ));

    let matcher = Arc::new(matcher);
    let sweeper = matcher.clone();
    jobs.push(spawn_periodic(
        Duration::from_secs(config.sweep_interval_seconds.max(60)),
        move || {
            let matcher = sweeper.clone();
            async move {
                if let Err(e) = matcher.sweep_new_matches().await {
                    error!("Filter sweep failed: {}", e);
                }
            }
        },
    ));
    jobs.push(spawn_periodic(
        Duration::from_secs(config.reminder_interval_seconds.max(60)),
        move || {
            let matcher = matcher.clone();
            async move {
                if let Err(e) = matcher.remind_expiring_subscriptions().await {
                    error!("Subscription reminders failed: {}", e);
                }
            }
        },
    ));

    info!("🚀 car-sniper started with {} categories", config.scraper.categories.len());
    run_until(
        async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("🛑 Ctrl-C received, shutting down");
        },
        jobs,
    )
    .await;
}

/// Runs `job` on its own task every `every`; a slow run delays only its own next tick.
fn spawn_periodic<F, Fut>(every: Duration, mut job: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            job().await;
        }
    })
}

/// Waits for `shutdown`, then aborts every job mid-run.
async fn run_until<S: Future<Output = ()>>(shutdown: S, jobs: Vec<JoinHandle<()>>) {
    shutdown.await;
    for job in &jobs {
        job.abort();
    }
    for job in jobs {
        let _ = job.await;
    }
}

fn session_provider(config: &AppConfig) -> Arc<dyn SessionProvider> {
    match config.session.provider {
        SessionProviderKind::Http => http_warmup(config),
        #[cfg(feature = "browser")]
        SessionProviderKind::Browser => Arc::new(car_sniper::session::browser::BrowserProvider::new(
            config.scraper.user_agent.clone(),
        )),
        #[cfg(not(feature = "browser"))]
        SessionProviderKind::Browser => {
            warn!("Built without the `browser` feature, using HTTP warm-up");
            http_warmup(config)
        }
    }
}

fn http_warmup(config: &AppConfig) -> Arc<dyn SessionProvider> {
    Arc::new(HttpWarmupProvider::new(
        config.scraper.user_agent.clone(),
        Duration::from_secs(config.scraper.request_timeout_seconds),
    ))
}

fn translator(config: &AppConfig) -> Arc<dyn TranslationProvider> {
    let timeout = Duration::from_secs(config.scraper.request_timeout_seconds);
    match config.translation.provider {
        TranslatorKind::Llm => match LlmTranslator::new(config.translation.clone(), timeout) {
            Ok(t) => Arc::new(t),
            Err(e) => {
                warn!("Translator unavailable, keeping original labels: {}", e);
                Arc::new(NoTranslation)
            }
        },
        TranslatorKind::Disabled => Arc::new(NoTranslation),
    }
}
