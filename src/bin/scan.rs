use marketpulse::api::{BinanceClient, MarketData};
use marketpulse::cache::{CachedAnalytics, MemoryStore};
use marketpulse::config::Settings;
use marketpulse::models::{
    BreakoutScan, OversoldEvent, RsiReading, SignalOutcome, TradeDirection,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "scan", about = "One-shot market scans against the exchange")]
struct Cli {
    /// Comma-separated symbols, overriding SYMBOLS from the environment
    #[arg(long)]
    symbols: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Current RSI snapshot for the watchlist
    Rsi,
    /// Oversold events over the lookback window
    Oversold {
        /// Days of history to cover
        #[arg(long)]
        days: Option<u32>,
    },
    /// Session-range breakout signals
    Breakout {
        /// Days of history to cover
        #[arg(long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter("marketpulse=warn")
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env();

    if let Some(symbols) = &cli.symbols {
        settings.symbols = symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    match &cli.command {
        Commands::Oversold { days: Some(days) } => settings.oversold_days = *days,
        Commands::Breakout { days: Some(days) } => settings.breakout_days = *days,
        _ => {}
    }

    let source: Arc<dyn MarketData> = Arc::new(BinanceClient::new(
        settings.api_base.clone(),
        settings.http_timeout,
    )?);
    let analytics = CachedAnalytics::new(source, Arc::new(MemoryStore::new()), &settings);
    let now = Utc::now();

    match cli.command {
        Commands::Rsi => {
            print_rsi(&analytics.rsi_readings(&settings.symbols, now).await);
        }
        Commands::Oversold { .. } => {
            print_oversold(
                &analytics.oversold_events(&settings.symbols, now).await,
                settings.oversold_days,
            );
        }
        Commands::Breakout { .. } => {
            print_breakout(
                &analytics.breakout_scan(&settings.symbols, now).await,
                settings.breakout_days,
            );
        }
    }

    Ok(())
}

fn print_rsi(readings: &[RsiReading]) {
    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║                    RSI SNAPSHOT                       ║");
    println!("╚═══════════════════════════════════════════════════════╝\n");

    println!(
        "{:<12} {:>14} {:>8} {:>8}   {}",
        "Symbol", "Price", "RSI", "MA", "As of"
    );
    println!("{}", "─".repeat(66));

    for reading in readings {
        let rsi = reading
            .rsi
            .map_or("warming".to_string(), |v| format!("{:.1}", v));
        let ma = reading
            .rsi_moving_average
            .map_or("-".to_string(), |v| format!("{:.1}", v));
        println!(
            "{:<12} {:>14.4} {:>8} {:>8}   {}{}",
            reading.symbol,
            reading.price,
            rsi,
            ma,
            reading.timestamp.format("%Y-%m-%d %H:%M UTC"),
            if reading.is_stale { "  ⚠ stale" } else { "" }
        );
    }
    if readings.is_empty() {
        println!("(no readings)");
    }
}

fn print_oversold(events: &[OversoldEvent], days: u32) {
    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║                  OVERSOLD EVENTS                      ║");
    println!("╚═══════════════════════════════════════════════════════╝\n");

    println!("Lookback: {} days, {} events\n", days, events.len());
    println!("{:<12} {:>8} {:>14}   {}", "Symbol", "RSI", "Price", "When");
    println!("{}", "─".repeat(60));

    for event in events {
        println!(
            "{:<12} {:>8.1} {:>14.4}   {}",
            event.symbol,
            event.rsi,
            event.price,
            event.timestamp.format("%Y-%m-%d %H:%M UTC")
        );
    }
    if events.is_empty() {
        println!("(none)");
    }
}

fn print_breakout(scan: &BreakoutScan, days: u32) {
    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║               SESSION RANGE BREAKOUTS                 ║");
    println!("╚═══════════════════════════════════════════════════════╝\n");

    println!(
        "Lookback: {} days, {} signals, {} pending\n",
        days,
        scan.signals.len(),
        scan.pending.len()
    );

    for signal in &scan.signals {
        let direction = match signal.direction {
            TradeDirection::Long => "LONG",
            TradeDirection::Short => "SHORT",
        };
        let outcome = match signal.outcome {
            SignalOutcome::Win => "✅ target hit",
            SignalOutcome::Loss => "❌ stopped out",
            SignalOutcome::Pending => "⏳ open",
        };
        println!(
            "🚨 {} {} @ {:.4} ({})",
            signal.symbol, direction, signal.entry_price, outcome
        );
        println!(
            "   range {:.4}-{:.4} on {}, re-entry {}",
            signal.range.low,
            signal.range.high,
            signal.range.date,
            signal.reentry_time.format("%Y-%m-%d %H:%M UTC")
        );
        println!(
            "   stop {:.4}  target {:.4}",
            signal.stop_loss, signal.take_profit
        );
    }

    for pending in &scan.pending {
        println!(
            "👀 {} broke {:?} its range, price {:.4} ({:+.2}% from re-entry)",
            pending.symbol,
            pending.side,
            pending.current_price,
            pending.distance_to_range() * 100.0
        );
    }

    if scan.signals.is_empty() && scan.pending.is_empty() {
        println!("(nothing to report)");
    }
}
