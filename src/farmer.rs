use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use crate::advisor::{liquidity_level, Action, AdviceEngine, InvestmentAdvice};
use crate::config::VolFarmConfig;
use crate::connector::{ExchangeConnector, OrderReceipt, PositionSnapshot};
use crate::journal::{AccountRecord, DealJournal, DealRecord};
use crate::policy::strategy_params;
use crate::ports::paper::PaperConnector;
use crate::registry::AssetRegistry;

/// Closed set of compiled-in connectors, selected by configuration.
pub fn create_connector(cfg: &VolFarmConfig) -> Result<Arc<dyn ExchangeConnector>> {
    match cfg.connector_name.as_str() {
        "paper" => Ok(Arc::new(PaperConnector::new(cfg.paper_equity))),
        other => bail!("unknown connector {:?}", other),
    }
}

/// Owns the periodic decision loop: snapshot, derive, apply, journal.
pub struct VolatilityFarmer {
    cfg: VolFarmConfig,
    connector: Arc<dyn ExchangeConnector>,
    engine: AdviceEngine,
    journal: DealJournal,
}

impl VolatilityFarmer {
    pub fn new(cfg: VolFarmConfig, connector: Arc<dyn ExchangeConnector>) -> Result<Self> {
        let strategy = strategy_params(&cfg.strategy)
            .ok_or_else(|| anyhow!("unknown strategy {:?}", cfg.strategy))?;
        let registry = AssetRegistry::new(cfg.assets.clone(), cfg.history_cap);
        let engine = AdviceEngine::new(strategy, registry);
        let journal = DealJournal::new(cfg.journal_file.clone());
        Ok(Self {
            cfg,
            connector,
            engine,
            journal,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        log::info!(
            "[FARMER] strategy={} connector={} pairs={} interval={}s",
            self.cfg.strategy,
            self.cfg.connector_name,
            self.cfg.assets.len(),
            self.cfg.interval_secs
        );
        let mut ticker = tokio::time::interval(Duration::from_secs(self.cfg.interval_secs));
        loop {
            ticker.tick().await;
            if let Err(e) = self.cycle().await {
                log::error!("[FARMER] cycle failed: {:?}", e);
            }
        }
    }

    /// One full decision cycle. A failure anywhere aborts this cycle only;
    /// in-memory state is updated last, so a failed cycle leaves no trace.
    pub async fn cycle(&mut self) -> Result<()> {
        let account = self
            .connector
            .get_account_snapshot()
            .await
            .context("account snapshot fetch failed")?;
        if account.equity <= Decimal::ZERO {
            bail!("non-positive equity {} reported by connector", account.equity);
        }
        let positions = self
            .connector
            .get_positions()
            .await
            .context("position snapshot fetch failed")?;

        self.raise_low_leverage(&positions).await;

        let advices = self.engine.derive_advices(&account, &positions);
        log::debug!(
            "[FARMER] ll={:.2} positions={} advices={}",
            liquidity_level(&account),
            positions.len(),
            advices.len()
        );

        if let Err(e) = self.journal.record_account(&AccountRecord {
            timestamp: Utc::now(),
            equity: account.equity,
            available_balance: account.available_balance,
            liquidity_level: liquidity_level(&account),
            open_positions: positions.len(),
        }) {
            log::warn!("[JOURNAL] account record failed: {}", e);
        }

        self.apply_advices(&advices).await;
        self.engine.record_cycle(&positions, !advices.is_empty());
        Ok(())
    }

    /// Any leg running below the leverage floor gets bumped before advices
    /// are derived, awaited one pair at a time.
    async fn raise_low_leverage(&self, positions: &[PositionSnapshot]) {
        let mut raised = HashSet::new();
        for position in positions {
            if position.leverage >= self.cfg.leverage_floor {
                continue;
            }
            if !raised.insert(position.pair.clone()) {
                continue;
            }
            log::info!(
                "[LEVERAGE] raising {} from {}x to {}x",
                position.pair,
                position.leverage,
                self.cfg.leverage_floor
            );
            if let Err(e) = self
                .connector
                .set_leverage(&position.pair, self.cfg.leverage_floor)
                .await
            {
                log::warn!("[LEVERAGE] failed to raise {}: {}", position.pair, e);
            }
        }
    }

    /// Applies advices in order. Rejections are journaled, never retried.
    async fn apply_advices(&self, advices: &[InvestmentAdvice]) {
        for advice in advices {
            self.pace().await;
            log::info!(
                "[ORDER] {} {} {} ({})",
                advice.action.as_str(),
                advice.amount,
                advice.pair,
                advice.reason
            );
            let result = self.submit(advice).await;
            let (order_id, rejected) = match &result {
                Ok(receipt) => (Some(receipt.order_id.clone()), false),
                Err(e) => {
                    log::warn!(
                        "[ORDER] {} {} rejected: {}",
                        advice.action.as_str(),
                        advice.pair,
                        e
                    );
                    (None, true)
                }
            };
            if let Err(e) = self.journal.record_deal(&DealRecord {
                timestamp: Utc::now(),
                pair: advice.pair.clone(),
                action: advice.action,
                amount: advice.amount,
                reason: advice.reason.clone(),
                order_id,
                rejected,
            }) {
                log::warn!("[JOURNAL] deal record failed: {}", e);
            }
        }
    }

    async fn submit(&self, advice: &InvestmentAdvice) -> Result<OrderReceipt> {
        let receipt = match advice.action {
            Action::Buy => self.connector.buy(&advice.pair, advice.amount, false).await,
            Action::Sell => self.connector.sell(&advice.pair, advice.amount, false).await,
            Action::ReduceLong => self.connector.sell(&advice.pair, advice.amount, true).await,
            Action::ReduceShort => self.connector.buy(&advice.pair, advice.amount, true).await,
            Action::Pause => bail!("PAUSE is not submittable"),
        };
        receipt.map_err(|e| anyhow!("{}", e))
    }

    /// Random delay spreading successive submissions; no effect on what is
    /// submitted.
    async fn pace(&self) {
        if self.cfg.pacing_ms == 0 {
            return;
        }
        let jitter = {
            let mut rng = rand::thread_rng();
            rng.gen_range(0..=self.cfg.pacing_ms)
        };
        sleep(Duration::from_millis(jitter)).await;
    }
}
