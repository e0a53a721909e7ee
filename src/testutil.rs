//! Shared fixtures for module tests.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;

use crate::bank::BankRecord;
use crate::ledger::{FetchStats, LedgerClient, LedgerError};
use crate::model::{Category, Currency, Transaction, TransactionUpdate, TxType};
use crate::orders::{Offer, Order, Payment};

/// Opt-in log output for debugging a test run: `RUST_LOG=debug cargo test`.
#[allow(dead_code)]
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

pub(crate) fn pln() -> Currency {
    Currency {
        code: "PLN".to_owned(),
        symbol: "zł".to_owned(),
        decimals: 2,
    }
}

pub(crate) fn make_tx(id: i64, date: NaiveDate, amount: &str, description: &str) -> Transaction {
    Transaction {
        id,
        date,
        amount: BigDecimal::from_str(amount).expect("bad fixture amount"),
        kind: TxType::Withdrawal,
        description: description.to_owned(),
        tags: HashSet::new(),
        notes: None,
        category: None,
        currency: pln(),
        fx: None,
    }
}

pub(crate) fn make_record(date: NaiveDate, amount: &str, details: &str) -> BankRecord {
    BankRecord {
        date,
        amount: BigDecimal::from_str(amount).expect("bad fixture amount"),
        details: details.to_owned(),
        recipient: String::new(),
        operation_amount: BigDecimal::from_str(amount).expect("bad fixture amount"),
        sender: String::new(),
        operation_currency: "PLN".to_owned(),
        account_currency: "PLN".to_owned(),
        sender_account: String::new(),
        recipient_account: String::new(),
    }
}

pub(crate) fn make_payment_dated(payment_id: &str, amount: &str, date: NaiveDate) -> Payment {
    let amount = BigDecimal::from_str(amount).expect("bad fixture amount");
    Payment {
        payment_id: payment_id.to_owned(),
        orders: vec![Order {
            order_id: format!("group-{}", payment_id),
            seller: "seller1".to_owned(),
            offers: vec![Offer {
                offer_id: format!("offer-{}", payment_id),
                title: "Kubek ceramiczny".to_owned(),
                unit_price: amount.clone(),
                price_currency: "PLN".to_owned(),
                friendly_url: String::new(),
                quantity: 1,
                image_url: String::new(),
            }],
            order_date: date,
            total_cost: amount.clone(),
            payment_amount: amount,
            payment_id: payment_id.to_owned(),
            payment_provider: Some("P24".to_owned()),
            payment_method: None,
        }],
    }
}

pub(crate) fn make_payment(payment_id: &str, amount: &str) -> Payment {
    make_payment_dated(
        payment_id,
        amount,
        NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
    )
}

/// Ledger client double backed by a fixed transaction list. Clones share
/// the recorded updates and fetch ranges.
#[derive(Clone)]
pub(crate) struct StubLedger {
    transactions: Arc<Vec<Transaction>>,
    categories: Arc<Vec<Category>>,
    stats: FetchStats,
    fail_updates: Option<u16>,
    updates: Arc<Mutex<Vec<(i64, TransactionUpdate)>>>,
    fetch_ranges: Arc<Mutex<Vec<(Option<NaiveDate>, Option<NaiveDate>)>>>,
}

impl StubLedger {
    pub(crate) fn with_transactions(transactions: Vec<Transaction>) -> Self {
        Self {
            transactions: Arc::new(transactions),
            categories: Arc::new(vec![
                Category {
                    id: 1,
                    name: "groceries".to_owned(),
                },
                Category {
                    id: 2,
                    name: "shopping".to_owned(),
                },
            ]),
            stats: FetchStats::default(),
            fail_updates: None,
            updates: Arc::new(Mutex::new(Vec::new())),
            fetch_ranges: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn with_stats(mut self, stats: FetchStats) -> Self {
        self.stats = stats;
        self
    }

    pub(crate) fn failing_updates(mut self, status: u16) -> Self {
        self.fail_updates = Some(status);
        self
    }

    pub(crate) fn updates(&self) -> Vec<(i64, TransactionUpdate)> {
        self.updates.lock().unwrap().clone()
    }

    pub(crate) fn fetch_ranges(&self) -> Vec<(Option<NaiveDate>, Option<NaiveDate>)> {
        self.fetch_ranges.lock().unwrap().clone()
    }

    fn in_range(
        tx: &Transaction,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> bool {
        start_date.map_or(true, |start| tx.date >= start)
            && end_date.map_or(true, |end| tx.date <= end)
    }
}

#[async_trait]
impl LedgerClient for StubLedger {
    async fn fetch_transactions(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        _page_size: usize,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.fetch_ranges
            .lock()
            .unwrap()
            .push((start_date, end_date));
        Ok(self
            .transactions
            .iter()
            .filter(|tx| Self::in_range(tx, start_date, end_date))
            .cloned()
            .collect())
    }

    async fn fetch_transactions_with_stats(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<(Vec<Transaction>, FetchStats), LedgerError> {
        let transactions = self
            .fetch_transactions(start_date, end_date, 0)
            .await?;
        Ok((transactions, self.stats.clone()))
    }

    async fn get_transaction(&self, tx_id: i64) -> Result<Transaction, LedgerError> {
        self.transactions
            .iter()
            .find(|tx| tx.id == tx_id)
            .cloned()
            .ok_or(LedgerError::Api {
                status: Some(404),
                message: format!("transaction {} not found", tx_id),
            })
    }

    async fn fetch_categories(&self) -> Result<Vec<Category>, LedgerError> {
        Ok(self.categories.as_ref().clone())
    }

    async fn update_transaction(
        &self,
        tx_id: i64,
        update: &TransactionUpdate,
    ) -> Result<(), LedgerError> {
        if let Some(status) = self.fail_updates {
            return Err(LedgerError::Api {
                status: Some(status),
                message: "stubbed update failure".to_owned(),
            });
        }
        self.updates.lock().unwrap().push((tx_id, update.clone()));
        Ok(())
    }
}
