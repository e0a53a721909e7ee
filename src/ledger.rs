use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{Category, Transaction, TransactionUpdate};

pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Error surfaced by the ledger client collaborator. The client library is
/// a black box; this is the shape of failures it is expected to report.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger authentication failed")]
    Auth { status: u16 },
    #[error("ledger api error: {message}")]
    Api { status: Option<u16>, message: String },
    #[error("ledger request timed out")]
    Timeout,
}

impl LedgerError {
    pub fn status(&self) -> Option<u16> {
        match self {
            LedgerError::Auth { status } => Some(*status),
            LedgerError::Api { status, .. } => *status,
            LedgerError::Timeout => None,
        }
    }
}

/// Counters reported by the stats-aware fetch variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub total: usize,
    pub invalid: usize,
    pub multipart: usize,
    pub duration_ms: u64,
}

/// Boundary to the external accounting ledger. Transactions are read on
/// demand and mutated only through `update_transaction`; nothing is ever
/// deleted.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn fetch_transactions(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        page_size: usize,
    ) -> Result<Vec<Transaction>, LedgerError>;

    async fn fetch_transactions_with_stats(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<(Vec<Transaction>, FetchStats), LedgerError>;

    async fn get_transaction(&self, tx_id: i64) -> Result<Transaction, LedgerError>;

    async fn fetch_categories(&self) -> Result<Vec<Category>, LedgerError>;

    async fn update_transaction(
        &self,
        tx_id: i64,
        update: &TransactionUpdate,
    ) -> Result<(), LedgerError>;
}

/// Raised when a ledger call fails; carries the upstream status so callers
/// can tell an auth problem from a flaky upstream.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ServiceError {
    pub message: String,
    pub status: Option<u16>,
    #[source]
    pub source: LedgerError,
}

impl ServiceError {
    fn wrap(message: impl Into<String>, source: LedgerError) -> Self {
        Self {
            message: message.into(),
            status: source.status(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Filtering pipeline shared by enrichment and metrics
// ---------------------------------------------------------------------------

/// Filter transactions by description, optionally excluding matches.
pub fn filter_by_description(
    transactions: Vec<Transaction>,
    description_filter: &str,
    exact_match: bool,
    exclude: bool,
) -> Vec<Transaction> {
    let needle = description_filter.to_lowercase();

    transactions
        .into_iter()
        .filter(|tx| {
            let description = tx.description.to_lowercase();
            let matches = if exact_match {
                description == needle
            } else {
                description.contains(&needle)
            };
            matches != exclude
        })
        .collect()
}

/// Drop transactions that already have a category set. Categorization is
/// the terminal state this workflow feeds into.
pub fn filter_out_categorized(transactions: Vec<Transaction>) -> Vec<Transaction> {
    transactions
        .into_iter()
        .filter(|tx| !tx.is_categorized())
        .collect()
}

/// Drop transactions already carrying `tag`.
pub fn filter_out_by_tag(transactions: Vec<Transaction>, tag: &str) -> Vec<Transaction> {
    transactions
        .into_iter()
        .filter(|tx| !tx.tags.contains(tag))
        .collect()
}

/// Fetch/update wrapper over the ledger client. Converts client failures
/// into `ServiceError` with the failing operation named.
pub struct LedgerService<C> {
    client: Arc<C>,
    page_size: usize,
}

impl<C> Clone for LedgerService<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            page_size: self.page_size,
        }
    }
}

impl<C: LedgerClient> LedgerService<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(client: Arc<C>, page_size: usize) -> Self {
        Self { client, page_size }
    }

    pub async fn fetch_transactions(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        exclude_categorized: bool,
    ) -> Result<Vec<Transaction>, ServiceError> {
        let started = Instant::now();
        let transactions = self
            .client
            .fetch_transactions(start_date, end_date, self.page_size)
            .await
            .map_err(|e| ServiceError::wrap("failed to fetch transactions from ledger", e))?;
        debug!(
            "fetched {} transactions in {:?}",
            transactions.len(),
            started.elapsed()
        );

        if exclude_categorized {
            Ok(filter_out_categorized(transactions))
        } else {
            Ok(transactions)
        }
    }

    pub async fn fetch_with_stats(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<(Vec<Transaction>, FetchStats), ServiceError> {
        let started = Instant::now();
        let (transactions, stats) = self
            .client
            .fetch_transactions_with_stats(start_date, end_date)
            .await
            .map_err(|e| ServiceError::wrap("failed to fetch transactions from ledger", e))?;
        info!(
            "fetched {} of {} transactions in {:?}",
            transactions.len(),
            stats.total,
            started.elapsed()
        );
        Ok((transactions, stats))
    }

    pub async fn get_transaction(&self, tx_id: i64) -> Result<Transaction, ServiceError> {
        self.client
            .get_transaction(tx_id)
            .await
            .map_err(|e| ServiceError::wrap(format!("failed to fetch transaction {}", tx_id), e))
    }

    pub async fn get_categories(&self) -> Result<Vec<Category>, ServiceError> {
        self.client
            .fetch_categories()
            .await
            .map_err(|e| ServiceError::wrap("failed to fetch categories from ledger", e))
    }

    pub async fn update_transaction(
        &self,
        tx: &Transaction,
        update: &TransactionUpdate,
    ) -> Result<(), ServiceError> {
        self.client
            .update_transaction(tx.id, update)
            .await
            .map_err(|e| ServiceError::wrap(format!("failed to update transaction {}", tx.id), e))
    }

    pub async fn apply_category(
        &self,
        tx: &Transaction,
        category_id: i64,
    ) -> Result<(), ServiceError> {
        let update = TransactionUpdate {
            category_id: Some(category_id),
            ..TransactionUpdate::default()
        };
        self.update_transaction(tx, &update).await
    }

    pub async fn apply_category_by_id(
        &self,
        tx_id: i64,
        category_id: i64,
    ) -> Result<(), ServiceError> {
        let tx = self.get_transaction(tx_id).await?;
        self.apply_category(&tx, category_id).await
    }

    pub async fn add_tag(&self, tx: &Transaction, tag: &str) -> Result<(), ServiceError> {
        let tags: Vec<String> = tx
            .tags
            .iter()
            .cloned()
            .chain(std::iter::once(tag.to_owned()))
            .unique()
            .sorted()
            .collect();
        let update = TransactionUpdate {
            tags: Some(tags),
            ..TransactionUpdate::default()
        };
        self.update_transaction(tx, &update).await
    }

    pub async fn add_tag_by_id(&self, tx_id: i64, tag: &str) -> Result<(), ServiceError> {
        let tx = self.get_transaction(tx_id).await?;
        self.add_tag(&tx, tag).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TxTag;
    use crate::testutil::{make_tx, StubLedger};
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn categorized(mut tx: Transaction) -> Transaction {
        tx.category = Some(Category {
            id: 7,
            name: "groceries".into(),
        });
        tx
    }

    #[test]
    fn test_filter_by_description_substring() {
        let txs = vec![
            make_tx(1, day(1), "1.00", "BLIK - payment"),
            make_tx(2, day(1), "1.00", "card payment"),
        ];
        let filtered = filter_by_description(txs, "blik", false, false);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, 1);
    }

    #[test]
    fn test_filter_by_description_exact() {
        let txs = vec![
            make_tx(1, day(1), "1.00", "BLIK"),
            make_tx(2, day(1), "1.00", "BLIK - payment"),
        ];
        let filtered = filter_by_description(txs, "blik", true, false);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, 1);
    }

    #[test]
    fn test_filter_by_description_exclude() {
        let txs = vec![
            make_tx(1, day(1), "1.00", "BLIK"),
            make_tx(2, day(1), "1.00", "card payment"),
        ];
        let filtered = filter_by_description(txs, "BLIK", true, true);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, 2);
    }

    #[test]
    fn test_filter_out_categorized() {
        let txs = vec![
            categorized(make_tx(1, day(1), "1.00", "a")),
            make_tx(2, day(1), "1.00", "b"),
        ];
        let filtered = filter_out_categorized(txs);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, 2);
    }

    #[test]
    fn test_filter_out_by_tag() {
        let mut tagged = make_tx(1, day(1), "1.00", "a");
        tagged.tags.insert(TxTag::BlikDone.as_str().to_owned());
        let txs = vec![tagged, make_tx(2, day(1), "1.00", "b")];
        let filtered = filter_out_by_tag(txs, TxTag::BlikDone.as_str());
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, 2);
    }

    #[tokio::test]
    async fn test_fetch_transactions_excludes_categorized() {
        let stub = StubLedger::with_transactions(vec![
            categorized(make_tx(1, day(1), "1.00", "a")),
            make_tx(2, day(2), "1.00", "b"),
        ]);
        let service = LedgerService::new(Arc::new(stub));

        let txs = service.fetch_transactions(None, None, true).await.unwrap();

        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].id, 2);
    }

    #[tokio::test]
    async fn test_update_failure_becomes_service_error() {
        let stub = StubLedger::with_transactions(vec![make_tx(1, day(1), "1.00", "a")])
            .failing_updates(502);
        let service = LedgerService::new(Arc::new(stub));
        let tx = make_tx(1, day(1), "1.00", "a");

        let err = service
            .update_transaction(&tx, &TransactionUpdate::default())
            .await
            .unwrap_err();

        assert_eq!(err.status, Some(502));
        assert!(err.message.contains("transaction 1"));
    }

    #[tokio::test]
    async fn test_add_tag_by_id_unions_tags() {
        let mut tx = make_tx(5, day(1), "1.00", "a");
        tx.tags.insert("existing".to_owned());
        let stub = StubLedger::with_transactions(vec![tx]);
        let service = LedgerService::new(Arc::new(stub.clone()));

        service.add_tag_by_id(5, "new_tag").await.unwrap();

        let updates = stub.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, 5);
        assert_eq!(
            updates[0].1.tags,
            Some(vec!["existing".to_owned(), "new_tag".to_owned()])
        );
    }
}
