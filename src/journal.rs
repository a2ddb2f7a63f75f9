use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use crate::advisor::Action;

/// One applied (or rejected) advice.
#[derive(Debug, Serialize)]
pub struct DealRecord {
    pub timestamp: DateTime<Utc>,
    pub pair: String,
    pub action: Action,
    pub amount: Decimal,
    pub reason: String,
    pub order_id: Option<String>,
    pub rejected: bool,
}

/// Per-cycle account snapshot line.
#[derive(Debug, Serialize)]
pub struct AccountRecord {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
    pub available_balance: Decimal,
    pub liquidity_level: f64,
    pub open_positions: usize,
}

/// Append-only JSONL sink. Writes are best-effort; callers log a warning
/// on failure and move on, the decision loop never blocks on the journal.
pub struct DealJournal {
    path: PathBuf,
}

impl DealJournal {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn record_deal(&self, record: &DealRecord) -> std::io::Result<()> {
        self.append_line(record)
    }

    pub fn record_account(&self, record: &AccountRecord) -> std::io::Result<()> {
        self.append_line(record)
    }

    fn append_line<T: Serialize>(&self, record: &T) -> std::io::Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn journal_appends_one_line_per_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let journal = DealJournal::new(&path);
        journal
            .record_deal(&DealRecord {
                timestamp: Utc::now(),
                pair: "ETHUSDT".to_string(),
                action: Action::Buy,
                amount: dec!(0.01),
                reason: "we open our ETHUSDT long position by 0.01".to_string(),
                order_id: Some("1".to_string()),
                rejected: false,
            })
            .unwrap();
        journal
            .record_account(&AccountRecord {
                timestamp: Utc::now(),
                equity: dec!(100),
                available_balance: dec!(80),
                liquidity_level: 16.0,
                open_positions: 2,
            })
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"action\":\"Buy\""));
        assert!(lines[1].contains("\"liquidity_level\":16.0"));
    }
}
