use config::{Config, Environment, File};
pub use config::ConfigError;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::grid::{GridError, GridResult, Pair, PricePoint};

/// Main configuration struct
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Job configuration (exchange, product, trade pairs)
    pub job: JobSettings,
    /// Runner configuration
    #[serde(default)]
    pub runner: RunnerSettings,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize)]
pub struct JobSettings {
    /// Human-assigned job name, resolved to the durable job id
    pub name: String,
    /// Exchange identifier (e.g. "hyperliquid")
    pub exchange: String,
    /// Product to trade (e.g. "BTC-EUR")
    pub product: String,
    /// Quote currency
    pub currency: String,
    /// Fee percentage per trade leg, e.g. "0.25"
    pub fee_percent: String,
    /// Seed for the deterministic order identifier sequence
    pub id_seed: String,
    /// Trade pairs, one loop each
    pub pairs: Vec<PairSettings>,
}

/// One configured buy/sell pair. Prices are strings so decimals survive
/// the config layer without floating-point rounding.
#[derive(Debug, Deserialize)]
pub struct PairSettings {
    pub buy_price: String,
    pub sell_price: String,
    pub size: String,
    #[serde(default)]
    pub cancel_distance: Option<String>,
}

impl JobSettings {
    pub fn fee_percent(&self) -> GridResult<Decimal> {
        parse_decimal("job.fee_percent", &self.fee_percent)
    }

    /// Parse and validate the configured pairs.
    pub fn pairs(&self) -> GridResult<Vec<Pair>> {
        self.pairs
            .iter()
            .map(|p| {
                let size = parse_decimal("pair.size", &p.size)?;
                let cancel = match &p.cancel_distance {
                    Some(raw) => parse_decimal("pair.cancel_distance", raw)?,
                    None => Decimal::ZERO,
                };
                Pair::new(
                    PricePoint::new(parse_decimal("pair.buy_price", &p.buy_price)?, size, cancel),
                    PricePoint::new(parse_decimal("pair.sell_price", &p.sell_price)?, size, cancel),
                )
            })
            .collect()
    }
}

fn parse_decimal(field: &str, raw: &str) -> GridResult<Decimal> {
    raw.parse()
        .map_err(|_| GridError::Config(format!("{field}: not a decimal: {raw:?}")))
}

#[derive(Debug, Deserialize)]
pub struct RunnerSettings {
    /// Forced persistence cadence in seconds
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Record crossings without placing live orders
    #[serde(default)]
    pub watch_only: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval_secs(),
            watch_only: false,
        }
    }
}

fn default_flush_interval_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Default)]
pub struct LogConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load settings from a configuration file
    pub fn new(config_path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(config_path))
            // Environment variables override the file,
            // e.g. APP_JOB__ID_SEED=...
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
