/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed, validated orchestrator configuration
[POS]:    Configuration layer - recognized key surface for trading/rateBudget/optimizer
[UPDATE]: When adding a new recognized configuration key
*/

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_initial_sl_roi() -> f64 {
    0.5
}
fn default_initial_tp_roi() -> f64 {
    2.0
}
fn default_break_even_buffer() -> f64 {
    0.1
}
fn default_trailing_step_percent() -> f64 {
    0.15
}
fn default_trailing_move_percent() -> f64 {
    0.05
}
fn default_trailing_mode() -> String {
    "staircase".to_string()
}
fn default_position_size_percent() -> f64 {
    0.5
}
fn default_leverage() -> u32 {
    10
}
fn default_stop_price_type() -> String {
    "MP".to_string()
}
fn default_stop_update_min_interval_ms() -> u64 {
    1500
}
fn default_stop_min_move_ticks() -> u32 {
    2
}
fn default_maker_fee() -> f64 {
    0.0002
}
fn default_taker_fee() -> f64 {
    0.0006
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradingConfig {
    #[serde(rename = "initialSLRoi", default = "default_initial_sl_roi")]
    pub initial_sl_roi: f64,
    #[serde(rename = "initialTPRoi", default = "default_initial_tp_roi")]
    pub initial_tp_roi: f64,
    #[serde(rename = "breakEvenBuffer", default = "default_break_even_buffer")]
    pub break_even_buffer: f64,
    #[serde(
        rename = "trailingStepPercent",
        default = "default_trailing_step_percent"
    )]
    pub trailing_step_percent: f64,
    #[serde(
        rename = "trailingMovePercent",
        default = "default_trailing_move_percent"
    )]
    pub trailing_move_percent: f64,
    #[serde(rename = "trailingMode", default = "default_trailing_mode")]
    pub trailing_mode: String,
    #[serde(
        rename = "positionSizePercent",
        default = "default_position_size_percent"
    )]
    pub position_size_percent: f64,
    #[serde(rename = "defaultLeverage", default = "default_leverage")]
    pub default_leverage: u32,
    #[serde(rename = "stopPriceType", default = "default_stop_price_type")]
    pub stop_price_type: String,
    #[serde(
        rename = "stopUpdateMinIntervalMs",
        default = "default_stop_update_min_interval_ms"
    )]
    pub stop_update_min_interval_ms: u64,
    #[serde(rename = "stopMinMoveTicks", default = "default_stop_min_move_ticks")]
    pub stop_min_move_ticks: u32,
    #[serde(rename = "makerFee", default = "default_maker_fee")]
    pub maker_fee: f64,
    #[serde(rename = "takerFee", default = "default_taker_fee")]
    pub taker_fee: f64,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

impl Default for TradingConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("defaults must parse")
    }
}

fn default_headroom() -> f64 {
    0.3
}
fn default_backoff_initial_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    60_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateBudgetConfig {
    #[serde(default = "default_class_rate")]
    pub critical: f64,
    #[serde(default = "default_class_rate")]
    pub high: f64,
    #[serde(default = "default_class_rate")]
    pub medium: f64,
    #[serde(default = "default_class_rate")]
    pub low: f64,
    #[serde(default = "default_headroom")]
    pub headroom: f64,
    #[serde(rename = "backoffInitialMs", default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(rename = "backoffMaxMs", default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(
        rename = "backoffMultiplier",
        default = "default_backoff_multiplier"
    )]
    pub backoff_multiplier: f64,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

fn default_class_rate() -> f64 {
    10.0
}

impl Default for RateBudgetConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("defaults must parse")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct VariationConfig {
    #[serde(default)]
    pub variations: Vec<f64>,
}

fn default_min_sample_size() -> u32 {
    20
}
fn default_min_win_rate() -> f64 {
    0.55
}
fn default_min_avg_roi() -> f64 {
    1.0
}
fn default_min_sharpe_ratio() -> f64 {
    1.0
}
fn default_confidence_level() -> f64 {
    0.95
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromotionConfig {
    #[serde(rename = "minSampleSize", default = "default_min_sample_size")]
    pub min_sample_size: u32,
    #[serde(rename = "minWinRate", default = "default_min_win_rate")]
    pub min_win_rate: f64,
    #[serde(rename = "minAvgROI", default = "default_min_avg_roi")]
    pub min_avg_roi: f64,
    #[serde(rename = "minSharpeRatio", default = "default_min_sharpe_ratio")]
    pub min_sharpe_ratio: f64,
    #[serde(rename = "confidenceLevel", default = "default_confidence_level")]
    pub confidence_level: f64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("defaults must parse")
    }
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}
fn default_circuit_breaker_reset_ms() -> u64 {
    5 * 60 * 1000
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_backoff_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorHandlingConfig {
    #[serde(
        rename = "circuitBreakerThreshold",
        default = "default_circuit_breaker_threshold"
    )]
    pub circuit_breaker_threshold: u32,
    #[serde(
        rename = "circuitBreakerResetMs",
        default = "default_circuit_breaker_reset_ms"
    )]
    pub circuit_breaker_reset_ms: u64,
    #[serde(rename = "maxRetries", default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(rename = "retryBackoffMs", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("defaults must parse")
    }
}

fn default_max_concurrent_variants() -> u32 {
    8
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptimizerConfig {
    #[serde(
        rename = "maxConcurrentVariants",
        default = "default_max_concurrent_variants"
    )]
    pub max_concurrent_variants: u32,
    #[serde(default)]
    pub profiles: Vec<String>,
    #[serde(default)]
    pub leverage: VariationConfig,
    #[serde(rename = "positionSize", default)]
    pub position_size: VariationConfig,
    #[serde(default)]
    pub promotion: PromotionConfig,
    #[serde(rename = "errorHandling", default)]
    pub error_handling: ErrorHandlingConfig,
    #[serde(rename = "publishIntervalMs", default)]
    pub publish_interval_ms: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("defaults must parse")
    }
}

/// Top-level orchestrator configuration; the recognized keys in this struct
/// are the total surface. Unknown keys at the top level are warned about,
/// not silently dropped.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    pub symbol: String,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(rename = "rateBudget", default)]
    pub rate_budget: RateBudgetConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

impl StrategyConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects trailing modes other than "staircase" and stop price types
    /// other than "MP"; both are reserved-but-unimplemented per the spec.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trading.trailing_mode != "staircase" {
            return Err(ConfigError::Invalid(format!(
                "trading.trailingMode={} is not implemented; only \"staircase\" is honored",
                self.trading.trailing_mode
            )));
        }
        if self.trading.stop_price_type != "MP" {
            return Err(ConfigError::Invalid(format!(
                "trading.stopPriceType={} invalid; must be \"MP\"",
                self.trading.stop_price_type
            )));
        }
        if !(1..=100).contains(&self.trading.default_leverage) {
            return Err(ConfigError::Invalid(format!(
                "trading.defaultLeverage={} out of range 1..=100",
                self.trading.default_leverage
            )));
        }
        if !self.extra.is_empty() {
            warn!(keys = ?self.extra.keys().collect::<Vec<_>>(), "unrecognized top-level config keys");
        }
        if !self.trading.extra.is_empty() {
            warn!(keys = ?self.trading.extra.keys().collect::<Vec<_>>(), "unrecognized trading config keys");
        }
        if !self.rate_budget.extra.is_empty() {
            warn!(keys = ?self.rate_budget.extra.keys().collect::<Vec<_>>(), "unrecognized rateBudget config keys");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_sections_omitted() {
        let cfg = StrategyConfig::from_str("symbol: BTC-USD\n").unwrap();
        assert_eq!(cfg.trading.default_leverage, 10);
        assert_eq!(cfg.trading.trailing_mode, "staircase");
        assert_eq!(cfg.rate_budget.headroom, 0.3);
        assert_eq!(cfg.optimizer.promotion.min_sample_size, 20);
    }

    #[test]
    fn rejects_unimplemented_trailing_mode() {
        let err = StrategyConfig::from_str("symbol: BTC-USD\ntrading:\n  trailingMode: atr\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_non_mp_stop_price_type() {
        let err = StrategyConfig::from_str("symbol: BTC-USD\ntrading:\n  stopPriceType: LP\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn accepts_full_recognized_surface() {
        let yaml = r#"
symbol: BTC-USD
trading:
  initialSLRoi: 0.5
  initialTPRoi: 2.0
  defaultLeverage: 20
rateBudget:
  critical: 5
  headroom: 0.25
optimizer:
  maxConcurrentVariants: 4
  promotion:
    minSampleSize: 30
"#;
        let cfg = StrategyConfig::from_str(yaml).unwrap();
        assert_eq!(cfg.trading.default_leverage, 20);
        assert_eq!(cfg.rate_budget.critical, 5.0);
        assert_eq!(cfg.optimizer.max_concurrent_variants, 4);
        assert_eq!(cfg.optimizer.promotion.min_sample_size, 30);
    }
}
