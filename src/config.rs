use anyhow::{anyhow, Result};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, str::FromStr, time::Duration};

use crate::types::{Market, Pair, TriangleMarkets};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub accounts: AccountsConfig,
    pub triangle: TriangleConfig,
    pub scheduler: SchedulerConfig,
    pub execution: ExecutionConfig,
    pub journal: JournalConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExchangeConfig {
    pub ticker_url: String,
    pub request_timeout_secs: u64,
    /// Starting balances of the paper exchange, as decimal strings.
    #[serde(default)]
    pub paper_balances: HashMap<String, String>,
}

/// One credential set. The name doubles as the scheduler lane.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AccountConfig {
    pub name: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AccountsConfig {
    pub ab: AccountConfig,
    pub bc: AccountConfig,
    pub ac: AccountConfig,
    pub utility: AccountConfig,
}

impl AccountsConfig {
    pub fn all(&self) -> [&AccountConfig; 4] {
        [&self.ab, &self.bc, &self.ac, &self.utility]
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TriangleConfig {
    pub asset_a: String,
    pub asset_b: String,
    pub asset_c: String,
    pub profit_threshold: String,
    pub balance_fraction: String,
    pub fill_tolerance: String,
    pub amount_scale: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateClassConfig {
    pub max_calls: usize,
    pub interval_ms: u64,
}

impl RateClassConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchedulerConfig {
    pub public: RateClassConfig,
    pub private: RateClassConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExecutionConfig {
    pub fill_timeout_ms: u64,
    pub fill_poll_interval_ms: u64,
    pub retry_backoff_ms: u64,
    pub max_retry_rounds: u32,
    pub max_trades: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct JournalConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AlertConfig {
    pub webhook_url: Option<String>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let mut settings = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::Environment::with_prefix("TRIARB").separator("__"));

        // Override journal database URL from environment if present
        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            settings = settings.set_override("journal.database_url", db_url)?;
        }

        let config: Config = settings.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let names: Vec<&str> = self.accounts.all().iter().map(|a| a.name.as_str()).collect();
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(anyhow!("Account names must not be empty"));
            }
            if names[..i].contains(name) {
                return Err(anyhow!("Duplicate account name: {}", name));
            }
        }

        let assets = [
            &self.triangle.asset_a,
            &self.triangle.asset_b,
            &self.triangle.asset_c,
        ];
        if assets[0] == assets[1] || assets[1] == assets[2] || assets[0] == assets[2] {
            return Err(anyhow!("Triangle assets must be distinct"));
        }

        TradeSettings::from_config(self)?;

        if self.scheduler.public.max_calls == 0 || self.scheduler.private.max_calls == 0 {
            return Err(anyhow!("Rate classes must allow at least one call per interval"));
        }
        if self.execution.fill_poll_interval_ms == 0 || self.execution.fill_timeout_ms == 0 {
            return Err(anyhow!("Fill polling durations must be positive"));
        }

        Ok(())
    }

    pub fn markets(&self) -> TriangleMarkets {
        let t = &self.triangle;
        TriangleMarkets {
            ab: Market {
                pair: Pair::new(&t.asset_a, &t.asset_b),
                account: self.accounts.ab.name.clone(),
            },
            bc: Market {
                pair: Pair::new(&t.asset_b, &t.asset_c),
                account: self.accounts.bc.name.clone(),
            },
            ac: Market {
                pair: Pair::new(&t.asset_a, &t.asset_c),
                account: self.accounts.ac.name.clone(),
            },
        }
    }
}

/// Parsed numeric and timing settings used on the trading path.
#[derive(Debug, Clone)]
pub struct TradeSettings {
    pub profit_threshold: BigDecimal,
    pub balance_fraction: BigDecimal,
    pub fill_tolerance: BigDecimal,
    pub amount_scale: i64,
    pub fill_timeout: Duration,
    pub fill_poll_interval: Duration,
    pub retry_backoff: Duration,
    pub max_retry_rounds: u32,
    pub max_trades: Option<u64>,
}

impl TradeSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let profit_threshold = BigDecimal::from_str(&config.triangle.profit_threshold)
            .map_err(|e| anyhow!("Invalid profit_threshold: {}", e))?;

        let balance_fraction = BigDecimal::from_str(&config.triangle.balance_fraction)
            .map_err(|e| anyhow!("Invalid balance_fraction: {}", e))?;

        let fill_tolerance = BigDecimal::from_str(&config.triangle.fill_tolerance)
            .map_err(|e| anyhow!("Invalid fill_tolerance: {}", e))?;

        if profit_threshold <= BigDecimal::from(1) {
            return Err(anyhow!(
                "profit_threshold must be above 1, got {}",
                profit_threshold
            ));
        }
        if balance_fraction <= BigDecimal::from(0) || balance_fraction > BigDecimal::from(1) {
            return Err(anyhow!(
                "balance_fraction must be in (0, 1], got {}",
                balance_fraction
            ));
        }
        if fill_tolerance <= BigDecimal::from(0) {
            return Err(anyhow!("fill_tolerance must be positive"));
        }

        let execution = &config.execution;
        Ok(Self {
            profit_threshold,
            balance_fraction,
            fill_tolerance,
            amount_scale: config.triangle.amount_scale,
            fill_timeout: Duration::from_millis(execution.fill_timeout_ms),
            fill_poll_interval: Duration::from_millis(execution.fill_poll_interval_ms),
            retry_backoff: Duration::from_millis(execution.retry_backoff_ms),
            max_retry_rounds: execution.max_retry_rounds,
            max_trades: execution.max_trades,
        })
    }
}

/// Hides everything but the first and last two characters of a credential.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}****{}", head, tail)
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    let source = r#"
        [exchange]
        ticker_url = "https://poloniex.com/public?command=returnTicker"
        request_timeout_secs = 5

        [exchange.paper_balances]
        BTC = "1.0"
        ETH = "10.0"
        BCH = "50.0"

        [accounts.ab]
        name = "private_0"
        [accounts.bc]
        name = "private_2"
        [accounts.ac]
        name = "private_1"
        [accounts.utility]
        name = "private_util"

        [triangle]
        asset_a = "BTC"
        asset_b = "ETH"
        asset_c = "BCH"
        profit_threshold = "1.008"
        balance_fraction = "0.999"
        fill_tolerance = "0.00000001"
        amount_scale = 8

        [scheduler.public]
        max_calls = 2
        interval_ms = 1000
        [scheduler.private]
        max_calls = 4
        interval_ms = 1000

        [execution]
        fill_timeout_ms = 10000
        fill_poll_interval_ms = 500
        retry_backoff_ms = 10000
        max_retry_rounds = 3

        [journal]
        max_connections = 2
    "#;

    config::Config::builder()
        .add_source(config::File::from_str(source, config::FileFormat::Toml))
        .build()
        .and_then(|c| c.try_deserialize())
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parses_and_validates() {
        let config = test_config();
        config.validate().unwrap();

        let markets = config.markets();
        assert_eq!(
            markets.symbols(),
            ["BTC_ETH".to_string(), "ETH_BCH".to_string(), "BTC_BCH".to_string()]
        );
        assert_eq!(markets.ab.account, "private_0");
        assert!(config.execution.max_trades.is_none());
        assert!(config.alerts.webhook_url.is_none());
    }

    #[test]
    fn test_trade_settings_parse_decimals() {
        let settings = TradeSettings::from_config(&test_config()).unwrap();
        assert_eq!(settings.profit_threshold, BigDecimal::from_str("1.008").unwrap());
        assert_eq!(settings.fill_timeout, Duration::from_secs(10));
        assert_eq!(settings.fill_poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_duplicate_account_rejected() {
        let mut config = test_config();
        config.accounts.utility.name = "private_0".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_must_exceed_one() {
        let mut config = test_config();
        config.triangle.profit_threshold = "0.99".to_string();
        assert!(config.validate().is_err());

        config.triangle.profit_threshold = "not-a-number".to_string();
        assert!(TradeSettings::from_config(&config).is_err());
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("ABCDEFGH"), "AB****GH");
        assert_eq!(mask_secret("abc"), "****");
    }
}
