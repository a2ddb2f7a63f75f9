use anyhow::{anyhow, bail, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

use crate::policy::strategy_params;
use crate::registry::AssetConfig;

const DEFAULT_STRATEGY: &str = "base";
const DEFAULT_INTERVAL_SECS: u64 = 10;
/// Hard floor on the cycle interval. Anything below this hammers the
/// exchange; a configuration asking for less is a startup error.
pub const MIN_INTERVAL_SECS: u64 = 4;
const DEFAULT_HISTORY_CAP: usize = 120;
const DEFAULT_LEVERAGE_FLOOR: u32 = 25;
const DEFAULT_CONNECTOR: &str = "paper";
const DEFAULT_JOURNAL_FILE: &str = "volfarm_journal.jsonl";
const DEFAULT_PACING_MS: u64 = 200;
const DEFAULT_PAPER_EQUITY: &str = "1000";
const DEFAULT_MIN_TRADING_AMOUNT: &str = "0.01";
const DEFAULT_DECIMAL_PLACES: u32 = 2;
const DEFAULT_TARGET_LSD: f64 = 0.0;
const DEFAULT_MIN_LSD: f64 = -60.0;
const DEFAULT_MAX_LSD: f64 = 60.0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct AssetYaml {
    pair: String,
    min_trading_amount: Option<Decimal>,
    decimal_places: Option<u32>,
    target_lsd: Option<f64>,
    min_lsd: Option<f64>,
    max_lsd: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct VolFarmYaml {
    strategy: Option<String>,
    interval_secs: Option<u64>,
    history_cap: Option<usize>,
    leverage_floor: Option<u32>,
    connector_name: Option<String>,
    journal_file: Option<String>,
    pacing_ms: Option<u64>,
    paper_equity: Option<Decimal>,
    assets: Option<Vec<AssetYaml>>,
}

#[derive(Debug, Clone)]
pub struct VolFarmConfig {
    pub strategy: String,
    pub interval_secs: u64,
    pub history_cap: usize,
    pub leverage_floor: u32,
    pub connector_name: String,
    pub journal_file: String,
    /// Upper bound of the random delay inserted between order submissions.
    pub pacing_ms: u64,
    pub paper_equity: Decimal,
    pub assets: Vec<AssetConfig>,
}

impl VolFarmConfig {
    pub fn from_env_or_yaml() -> Result<Self> {
        let config_path = env::var("VOLFARM_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty());
        if let Some(path) = config_path {
            return Self::from_yaml_path(path);
        }
        Self::from_env()
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open config {}", path_ref.display()))?;
        let yaml: VolFarmYaml = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse config {}", path_ref.display()))?;

        let assets = yaml
            .assets
            .unwrap_or_default()
            .into_iter()
            .map(resolve_asset)
            .collect::<Result<Vec<_>>>()?;

        let mut cfg = VolFarmConfig {
            strategy: yaml.strategy.unwrap_or_else(|| DEFAULT_STRATEGY.to_string()),
            interval_secs: yaml.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS),
            history_cap: yaml.history_cap.unwrap_or(DEFAULT_HISTORY_CAP),
            leverage_floor: yaml.leverage_floor.unwrap_or(DEFAULT_LEVERAGE_FLOOR),
            connector_name: yaml
                .connector_name
                .unwrap_or_else(|| DEFAULT_CONNECTOR.to_string()),
            journal_file: yaml
                .journal_file
                .unwrap_or_else(|| DEFAULT_JOURNAL_FILE.to_string()),
            pacing_ms: yaml.pacing_ms.unwrap_or(DEFAULT_PACING_MS),
            paper_equity: yaml
                .paper_equity
                .unwrap_or_else(default_paper_equity),
            assets,
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let pairs = env::var("VOLFARM_PAIRS").unwrap_or_else(|_| "ETHUSDT".to_string());
        let assets = pairs
            .split(',')
            .map(|pair| pair.trim())
            .filter(|pair| !pair.is_empty())
            .map(default_asset)
            .collect();

        let mut cfg = VolFarmConfig {
            strategy: env::var("VOLFARM_STRATEGY").unwrap_or_else(|_| DEFAULT_STRATEGY.to_string()),
            interval_secs: DEFAULT_INTERVAL_SECS,
            history_cap: DEFAULT_HISTORY_CAP,
            leverage_floor: DEFAULT_LEVERAGE_FLOOR,
            connector_name: env::var("CONNECTOR_NAME")
                .unwrap_or_else(|_| DEFAULT_CONNECTOR.to_string()),
            journal_file: env::var("JOURNAL_FILE")
                .unwrap_or_else(|_| DEFAULT_JOURNAL_FILE.to_string()),
            pacing_ms: DEFAULT_PACING_MS,
            paper_equity: default_paper_equity(),
            assets,
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(value) = env_parse::<u64>("INTERVAL_SECS") {
            self.interval_secs = value;
        }
        if let Some(value) = env_parse::<usize>("HISTORY_CAP") {
            self.history_cap = value;
        }
        if let Some(value) = env_parse::<u32>("LEVERAGE_FLOOR") {
            self.leverage_floor = value;
        }
        if let Some(value) = env_parse::<u64>("PACING_MS") {
            self.pacing_ms = value;
        }
        if let Some(value) = env_parse::<Decimal>("PAPER_EQUITY") {
            self.paper_equity = value;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs < MIN_INTERVAL_SECS {
            bail!(
                "interval_secs {} is below the floor of {}",
                self.interval_secs,
                MIN_INTERVAL_SECS
            );
        }
        if strategy_params(&self.strategy).is_none() {
            bail!("unknown strategy {:?}", self.strategy);
        }
        if self.assets.is_empty() {
            bail!("no tradable pairs configured");
        }
        if self.history_cap == 0 {
            bail!("history_cap must be positive");
        }
        let mut seen = HashSet::new();
        for asset in &self.assets {
            if !seen.insert(asset.pair.as_str()) {
                bail!("pair {} configured twice", asset.pair);
            }
            if asset.min_trading_amount <= Decimal::ZERO {
                bail!("pair {} has a non-positive min_trading_amount", asset.pair);
            }
            if !(asset.min_lsd < asset.target_lsd && asset.target_lsd < asset.max_lsd) {
                bail!(
                    "pair {} needs min_lsd < target_lsd < max_lsd (got {} / {} / {})",
                    asset.pair,
                    asset.min_lsd,
                    asset.target_lsd,
                    asset.max_lsd
                );
            }
        }
        Ok(())
    }
}

fn resolve_asset(yaml: AssetYaml) -> Result<AssetConfig> {
    if yaml.pair.trim().is_empty() {
        return Err(anyhow!("asset entry with an empty pair"));
    }
    let defaults = default_asset(&yaml.pair);
    Ok(AssetConfig {
        pair: yaml.pair.trim().to_string(),
        min_trading_amount: yaml
            .min_trading_amount
            .unwrap_or(defaults.min_trading_amount),
        decimal_places: yaml.decimal_places.unwrap_or(DEFAULT_DECIMAL_PLACES),
        target_lsd: yaml.target_lsd.unwrap_or(DEFAULT_TARGET_LSD),
        min_lsd: yaml.min_lsd.unwrap_or(DEFAULT_MIN_LSD),
        max_lsd: yaml.max_lsd.unwrap_or(DEFAULT_MAX_LSD),
    })
}

fn default_asset(pair: &str) -> AssetConfig {
    AssetConfig {
        pair: pair.to_string(),
        min_trading_amount: Decimal::from_str(DEFAULT_MIN_TRADING_AMOUNT)
            .unwrap_or(Decimal::ONE),
        decimal_places: DEFAULT_DECIMAL_PLACES,
        target_lsd: DEFAULT_TARGET_LSD,
        min_lsd: DEFAULT_MIN_LSD,
        max_lsd: DEFAULT_MAX_LSD,
    }
}

fn default_paper_equity() -> Decimal {
    Decimal::from_str(DEFAULT_PAPER_EQUITY).unwrap_or(Decimal::ONE_THOUSAND)
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
