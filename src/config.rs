use std::time::Duration;

/// Runtime settings, read from environment variables with sane defaults.
///
/// Every knob has a default so the binary runs with nothing but network
/// access; `.env` files are loaded by the binaries before this is built.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Symbols to track, e.g. "BTCUSDT,ETHUSDT"
    pub symbols: Vec<String>,
    /// Exchange REST base, e.g. "https://api.binance.com/api/v3"
    pub api_base: String,
    pub redis_url: String,
    pub http_timeout: Duration,

    pub rsi_period: usize,
    pub rsi_ma_period: usize,

    pub oversold_threshold: f64,
    pub oversold_days: u32,

    /// How many past trading days the breakout scan covers
    pub breakout_days: u32,
    /// Hour (in the session timezone) at which the detection window opens
    pub session_start_hour: u32,
    /// Fixed UTC offset of the session timezone, in hours
    pub session_tz_offset_hours: i32,

    /// Pause between symbols in a sequential batch
    pub inter_symbol_delay: Duration,

    pub rsi_ttl_ms: u64,
    pub oversold_ttl_ms: u64,
    pub breakout_ttl_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            symbols: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "SOLUSDT".to_string(),
            ],
            api_base: "https://api.binance.com/api/v3".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            http_timeout: Duration::from_secs(30),
            rsi_period: 14,
            rsi_ma_period: 14,
            oversold_threshold: 30.0,
            oversold_days: 30,
            breakout_days: 2,
            session_start_hour: 8,
            session_tz_offset_hours: 0,
            inter_symbol_delay: Duration::from_millis(350),
            rsi_ttl_ms: 2 * 60 * 60 * 1000,      // 2h
            oversold_ttl_ms: 2 * 60 * 60 * 1000, // 2h
            breakout_ttl_ms: 15 * 60 * 1000,     // 15min
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Settings::default();

        let symbols = std::env::var("WATCH_SYMBOLS")
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_uppercase())
                    .filter(|p| !p.is_empty())
                    .collect::<Vec<_>>()
            })
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.symbols);

        Self {
            symbols,
            api_base: env_or("EXCHANGE_API_BASE", defaults.api_base),
            redis_url: env_or("REDIS_URL", defaults.redis_url),
            http_timeout: Duration::from_secs(env_parsed("HTTP_TIMEOUT_SECS", 30)),
            rsi_period: env_parsed("RSI_PERIOD", defaults.rsi_period),
            rsi_ma_period: env_parsed("RSI_MA_PERIOD", defaults.rsi_ma_period),
            oversold_threshold: env_parsed("OVERSOLD_THRESHOLD", defaults.oversold_threshold),
            oversold_days: env_parsed("OVERSOLD_DAYS", defaults.oversold_days),
            breakout_days: env_parsed("BREAKOUT_DAYS", defaults.breakout_days),
            session_start_hour: env_parsed("SESSION_START_HOUR", defaults.session_start_hour),
            session_tz_offset_hours: env_parsed(
                "SESSION_TZ_OFFSET_HOURS",
                defaults.session_tz_offset_hours,
            ),
            inter_symbol_delay: Duration::from_millis(env_parsed("INTER_SYMBOL_DELAY_MS", 350)),
            rsi_ttl_ms: env_parsed("RSI_TTL_MS", defaults.rsi_ttl_ms),
            oversold_ttl_ms: env_parsed("OVERSOLD_TTL_MS", defaults.oversold_ttl_ms),
            breakout_ttl_ms: env_parsed("BREAKOUT_TTL_MS", defaults.breakout_ttl_ms),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
