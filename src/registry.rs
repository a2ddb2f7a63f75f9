use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

use crate::connector::PositionSide;

static EMPTY_HISTORY: Lazy<VecDeque<f64>> = Lazy::new(VecDeque::new);

/// Static per-pair trading parameters, built once at startup from
/// configuration and never changed during a run.
#[derive(Debug, Clone)]
pub struct AssetConfig {
    pub pair: String,
    pub min_trading_amount: Decimal,
    pub decimal_places: u32,
    /// Long/short delta the pair should gravitate toward, in percent.
    pub target_lsd: f64,
    pub min_lsd: f64,
    pub max_lsd: f64,
}

#[derive(Debug, Default)]
struct SideHistories {
    long: VecDeque<f64>,
    short: VecDeque<f64>,
}

/// The configured basket plus bounded rolling PnL-percent histories per
/// side, ordered newest-first. Basket iteration order is configuration
/// order; it drives execution sequencing, not correctness.
pub struct AssetRegistry {
    assets: Vec<AssetConfig>,
    histories: HashMap<String, SideHistories>,
    cap: usize,
}

impl AssetRegistry {
    pub fn new(assets: Vec<AssetConfig>, cap: usize) -> Self {
        let histories = assets
            .iter()
            .map(|asset| (asset.pair.clone(), SideHistories::default()))
            .collect();
        Self {
            assets,
            histories,
            cap,
        }
    }

    pub fn assets(&self) -> &[AssetConfig] {
        &self.assets
    }

    pub fn get(&self, pair: &str) -> Option<&AssetConfig> {
        self.assets.iter().find(|a| a.pair == pair)
    }

    /// Push a new sample at the front, evicting the oldest past the cap.
    /// Unknown pairs are rejected at startup, so a miss here is only
    /// possible for positions the exchange reports outside the basket.
    pub fn record_sample(&mut self, pair: &str, side: PositionSide, value: f64) {
        let histories = match self.histories.get_mut(pair) {
            Some(h) => h,
            None => {
                log::debug!("[REGISTRY] ignoring sample for unconfigured pair {}", pair);
                return;
            }
        };
        let history = match side {
            PositionSide::Long => &mut histories.long,
            PositionSide::Short => &mut histories.short,
        };
        history.push_front(value);
        history.truncate(self.cap);
    }

    /// Read-only view of one side's history, newest-first.
    pub fn history(&self, pair: &str, side: PositionSide) -> &VecDeque<f64> {
        match self.histories.get(pair) {
            Some(h) => match side {
                PositionSide::Long => &h.long,
                PositionSide::Short => &h.short,
            },
            None => &EMPTY_HISTORY,
        }
    }
}
