use marketpulse::alerts::{AlertDispatcher, LogSink};
use marketpulse::api::{BinanceClient, MarketData};
use marketpulse::cache::{CacheStore, CachedAnalytics, MemoryStore, RedisStore};
use marketpulse::config::Settings;
use marketpulse::scheduler::Scheduler;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Duration;

// Hourly candles settle shortly after the boundary; give the exchange a
// moment before asking for them.
const INDICATOR_PERIOD: Duration = Duration::from_secs(3600);
const INDICATOR_GRACE: Duration = Duration::from_secs(45);

// Breakout scans follow the 5-minute candles.
const BREAKOUT_PERIOD: Duration = Duration::from_secs(300);
const BREAKOUT_GRACE: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    tracing::info!("🚀 MarketPulse starting - Multi-Loop Architecture");

    let settings = Settings::from_env();
    let source: Arc<dyn MarketData> = Arc::new(BinanceClient::new(
        settings.api_base.clone(),
        settings.http_timeout,
    )?);
    let store = connect_store(&settings.redis_url).await;
    let analytics = Arc::new(CachedAnalytics::new(source, store, &settings));
    let dispatcher = Arc::new(AlertDispatcher::new(Arc::new(LogSink)));

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Exchange: {}", settings.api_base);
    tracing::info!(
        "  RSI: period {} (MA {}), oversold at {} over {} days",
        settings.rsi_period,
        settings.rsi_ma_period,
        settings.oversold_threshold,
        settings.oversold_days
    );
    tracing::info!(
        "  Breakout: {:02}:00 session open (UTC{:+}), {} day lookback",
        settings.session_start_hour,
        settings.session_tz_offset_hours,
        settings.breakout_days
    );
    tracing::info!("  Symbols: {}", settings.symbols.len());
    for symbol in &settings.symbols {
        tracing::info!("    - {}", symbol);
    }

    tracing::info!("\n🔄 Spawning independent loops...");

    let mut scheduler = Scheduler::new();

    // Loop 1: RSI + oversold refresh (hourly, clock-aligned)
    {
        let analytics = analytics.clone();
        let symbols = settings.symbols.clone();
        scheduler.spawn_aligned("indicator", INDICATOR_PERIOD, INDICATOR_GRACE, move || {
            indicator_tick(analytics.clone(), symbols.clone())
        });
    }

    // Loop 2: Breakout scan (every 5 minutes, clock-aligned)
    {
        let analytics = analytics.clone();
        let dispatcher = dispatcher.clone();
        let symbols = settings.symbols.clone();
        scheduler.spawn_aligned("breakout", BREAKOUT_PERIOD, BREAKOUT_GRACE, move || {
            breakout_tick(analytics.clone(), dispatcher.clone(), symbols.clone())
        });
    }

    tracing::info!("✅ All loops spawned successfully");
    tracing::info!(
        "  🔄 Indicators: hourly, {}s after the boundary",
        INDICATOR_GRACE.as_secs()
    );
    tracing::info!(
        "  📡 Breakouts: every 5 min, {}s after the boundary",
        BREAKOUT_GRACE.as_secs()
    );
    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::signal::ctrl_c().await?;
    tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
    scheduler.shutdown().await;

    tracing::info!("👋 MarketPulse stopped");
    Ok(())
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter("marketpulse=info,marketpulse::breakout=debug")
        .init();
}

async fn connect_store(redis_url: &str) -> Arc<dyn CacheStore> {
    match RedisStore::new(redis_url).await {
        Ok(store) => {
            tracing::info!("Redis cache enabled at {}", redis_url);
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Redis ({}), continuing with in-memory cache",
                e
            );
            Arc::new(MemoryStore::new())
        }
    }
}

// ============================================================================
// Independent Loop Tasks
// ============================================================================

/// Hourly tick: refresh RSI readings and the oversold history.
async fn indicator_tick(analytics: Arc<CachedAnalytics>, symbols: Vec<String>) {
    tracing::info!("🔄 [INDICATORS] Tick at {}", Utc::now().format("%H:%M:%S"));

    let now = Utc::now();
    let readings = analytics.rsi_readings(&symbols, now).await;
    if readings.is_empty() {
        tracing::warn!("  ✗ No RSI readings this tick");
    }
    for reading in &readings {
        match reading.rsi {
            Some(rsi) => tracing::info!(
                "  ✓ {} @ ${:.4} RSI {:.1}{}",
                reading.symbol,
                reading.price,
                rsi,
                if reading.is_stale { " (stale)" } else { "" }
            ),
            None => tracing::info!(
                "  ✓ {} @ ${:.4} RSI warming up",
                reading.symbol,
                reading.price
            ),
        }
    }

    let events = analytics.oversold_events(&symbols, now).await;
    match events.first() {
        Some(latest) => tracing::info!(
            "  📉 {} oversold events on record (latest: {} RSI {:.1} at {})",
            events.len(),
            latest.symbol,
            latest.rsi,
            latest.timestamp.format("%Y-%m-%d %H:%M")
        ),
        None => tracing::info!("  📉 No oversold events on record"),
    }
}

/// Five-minute tick: rescan breakouts and alert on anything new.
async fn breakout_tick(
    analytics: Arc<CachedAnalytics>,
    dispatcher: Arc<AlertDispatcher>,
    symbols: Vec<String>,
) {
    tracing::info!("📡 [BREAKOUT] Tick at {}", Utc::now().format("%H:%M:%S"));

    let scan = analytics.breakout_scan(&symbols, Utc::now()).await;
    tracing::info!(
        "  ✓ {} signals, {} pending breakouts",
        scan.signals.len(),
        scan.pending.len()
    );
    dispatcher.publish(&scan).await;
}
