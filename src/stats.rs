use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task;
use tracing::warn;

use crate::ledger::{
    filter_by_description, filter_out_categorized, LedgerClient, LedgerService, ServiceError,
};
use crate::model::{Transaction, TxTag};

/// Bucket transaction dates by calendar month. Plain aggregation, but it can
/// run over thousands of records, so the async wrapper moves it off the
/// scheduler thread.
fn group_by_month_sync(dates: &[NaiveDate]) -> BTreeMap<String, usize> {
    let mut buckets: BTreeMap<String, usize> = BTreeMap::new();
    for date in dates {
        *buckets.entry(date.format("%Y-%m").to_string()).or_insert(0) += 1;
    }
    buckets
}

pub async fn group_by_month(transactions: &[Transaction]) -> BTreeMap<String, usize> {
    let dates: Vec<NaiveDate> = transactions.iter().map(|tx| tx.date).collect();
    task::spawn_blocking(move || group_by_month_sync(&dates))
        .await
        .expect("month bucketing task panicked")
}

// ---------------------------------------------------------------------------
// Metrics snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlikMetrics {
    pub total_transactions: usize,
    pub single_part_transactions: usize,
    pub uncategorized_transactions: usize,
    pub not_processed_transactions: usize,
    pub incomplete_processed_transactions: usize,
    pub not_processed_by_month: BTreeMap<String, usize>,
    pub incomplete_processed_by_month: BTreeMap<String, usize>,
    pub computed_at: DateTime<Utc>,
    pub fetch_duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllegroMetrics {
    pub total_transactions: usize,
    pub allegro_transactions: usize,
    pub not_processed_transactions: usize,
    pub not_processed_by_month: BTreeMap<String, usize>,
    pub computed_at: DateTime<Utc>,
    pub fetch_duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxMetrics {
    pub total_transactions: usize,
    pub single_part_transactions: usize,
    pub uncategorized_transactions: usize,
    pub blik_pending: usize,
    pub action_required: usize,
    pub allegro_pending: usize,
    pub categorizable: usize,
    pub categorizable_by_month: BTreeMap<String, usize>,
    pub computed_at: DateTime<Utc>,
    pub fetch_duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Refresh machinery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsState<T> {
    pub status: JobStatus,
    pub result: Option<T>,
    pub error: Option<String>,
    pub progress: Option<String>,
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl<T> Default for MetricsState<T> {
    fn default() -> Self {
        Self {
            status: JobStatus::Pending,
            result: None,
            error: None,
            progress: None,
            last_updated_at: None,
        }
    }
}

#[async_trait]
pub trait MetricsProvider: Send + Sync + 'static {
    type Metrics: Clone + Send + Sync + 'static;

    async fn fetch_metrics(&self) -> Result<Self::Metrics, ServiceError>;
}

/// Read-through cache for one metrics kind. `get_state` never blocks on a
/// recomputation; `refresh` schedules at most one recomputation at a time
/// and returns immediately, so completion is observed by polling.
pub struct MetricsManager<P: MetricsProvider> {
    provider: Arc<P>,
    state: Arc<Mutex<MetricsState<P::Metrics>>>,
}

impl<P: MetricsProvider> MetricsManager<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            state: Arc::new(Mutex::new(MetricsState::default())),
        }
    }

    pub async fn get_state(&self) -> MetricsState<P::Metrics> {
        self.state.lock().await.clone()
    }

    pub async fn refresh(&self) -> MetricsState<P::Metrics> {
        let mut state = self.state.lock().await;
        if state.status == JobStatus::Running {
            return state.clone();
        }

        // only progress changes here; status is owned by the recompute task
        state.progress = Some("queued".to_owned());
        state.error = None;

        task::spawn(recompute(
            Arc::clone(&self.state),
            Arc::clone(&self.provider),
        ));

        state.clone()
    }
}

async fn recompute<P: MetricsProvider>(
    state: Arc<Mutex<MetricsState<P::Metrics>>>,
    provider: Arc<P>,
) {
    {
        let mut state = state.lock().await;
        state.status = JobStatus::Running;
        state.progress = Some("fetching".to_owned());
        state.error = None;
    }

    match provider.fetch_metrics().await {
        Ok(result) => {
            let mut state = state.lock().await;
            state.result = Some(result);
            state.status = JobStatus::Done;
            state.last_updated_at = Some(Utc::now());
            state.progress = None;
        }
        Err(err) => {
            warn!("metrics recomputation failed: {}", err);
            let mut state = state.lock().await;
            state.status = JobStatus::Failed;
            state.error = Some(err.to_string());
            state.progress = None;
        }
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// BLIK backlog: uncategorized transactions matching the bank's BLIK
/// description that have not been stamped done yet. "Incomplete" widens the
/// description match from exact to substring.
pub struct BlikStatsProvider<C> {
    ledger: LedgerService<C>,
    filter_desc: String,
}

impl<C: LedgerClient> BlikStatsProvider<C> {
    pub fn new(ledger: LedgerService<C>, filter_desc: impl Into<String>) -> Self {
        Self {
            ledger,
            filter_desc: filter_desc.into(),
        }
    }
}

#[async_trait]
impl<C: LedgerClient + 'static> MetricsProvider for BlikStatsProvider<C> {
    type Metrics = BlikMetrics;

    async fn fetch_metrics(&self) -> Result<BlikMetrics, ServiceError> {
        let (transactions, stats) = self.ledger.fetch_with_stats(None, None).await?;
        let single_part = transactions.len();
        let uncategorized = filter_out_categorized(transactions);

        let exact = filter_by_description(uncategorized.clone(), &self.filter_desc, true, false);
        let partial = filter_by_description(uncategorized.clone(), &self.filter_desc, false, false);

        let not_processed: Vec<Transaction> = exact
            .into_iter()
            .filter(|tx| !tx.has_tag(TxTag::BlikDone))
            .collect();
        let incomplete: Vec<Transaction> = partial
            .into_iter()
            .filter(|tx| !tx.has_tag(TxTag::BlikDone))
            .collect();

        let not_processed_by_month = group_by_month(&not_processed).await;
        let incomplete_processed_by_month = group_by_month(&incomplete).await;

        Ok(BlikMetrics {
            total_transactions: stats.total,
            single_part_transactions: single_part,
            uncategorized_transactions: uncategorized.len(),
            not_processed_transactions: not_processed.len(),
            incomplete_processed_transactions: incomplete.len(),
            not_processed_by_month,
            incomplete_processed_by_month,
            computed_at: Utc::now(),
            fetch_duration_ms: stats.duration_ms,
        })
    }
}

/// Marketplace backlog: transactions mentioning the marketplace in their
/// description without the completion tag.
pub struct AllegroStatsProvider<C> {
    ledger: LedgerService<C>,
    filter_desc: String,
}

impl<C: LedgerClient> AllegroStatsProvider<C> {
    pub fn new(ledger: LedgerService<C>, filter_desc: impl Into<String>) -> Self {
        Self {
            ledger,
            filter_desc: filter_desc.into(),
        }
    }
}

#[async_trait]
impl<C: LedgerClient + 'static> MetricsProvider for AllegroStatsProvider<C> {
    type Metrics = AllegroMetrics;

    async fn fetch_metrics(&self) -> Result<AllegroMetrics, ServiceError> {
        let (transactions, stats) = self.ledger.fetch_with_stats(None, None).await?;

        let marketplace = filter_by_description(transactions, &self.filter_desc, false, false);
        let not_processed: Vec<Transaction> = marketplace
            .iter()
            .filter(|tx| !tx.has_tag(TxTag::AllegroDone))
            .cloned()
            .collect();

        let not_processed_by_month = group_by_month(&not_processed).await;

        Ok(AllegroMetrics {
            total_transactions: stats.total,
            allegro_transactions: marketplace.len(),
            not_processed_transactions: not_processed.len(),
            not_processed_by_month,
            computed_at: Utc::now(),
            fetch_duration_ms: stats.duration_ms,
        })
    }
}

/// General categorization backlog: what is left once both payment rails and
/// action-required transactions are set aside.
pub struct TxStatsProvider<C> {
    ledger: LedgerService<C>,
    filter_desc_blik: String,
    filter_desc_allegro: String,
}

impl<C: LedgerClient> TxStatsProvider<C> {
    pub fn new(
        ledger: LedgerService<C>,
        filter_desc_blik: impl Into<String>,
        filter_desc_allegro: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            filter_desc_blik: filter_desc_blik.into(),
            filter_desc_allegro: filter_desc_allegro.into(),
        }
    }

    fn screen(&self, uncategorized: Vec<Transaction>) -> Vec<Transaction> {
        let blik_ok =
            filter_by_description(uncategorized, &self.filter_desc_blik, true, true);
        let action_not_required: Vec<Transaction> = blik_ok
            .into_iter()
            .filter(|tx| !tx.has_tag(TxTag::ActionRequired))
            .collect();
        let allegro_needle = self.filter_desc_allegro.to_lowercase();
        action_not_required
            .into_iter()
            .filter(|tx| {
                !(tx.description.to_lowercase().contains(&allegro_needle)
                    && !tx.has_tag(TxTag::AllegroDone))
            })
            .collect()
    }

    /// Uncategorized transactions that no rail is going to pick up; these
    /// are the ones worth a manual screening pass.
    pub async fn transactions_for_screening(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<Transaction>, ServiceError> {
        let uncategorized = self
            .ledger
            .fetch_transactions(start_date, end_date, true)
            .await?;
        Ok(self.screen(uncategorized))
    }
}

#[async_trait]
impl<C: LedgerClient + 'static> MetricsProvider for TxStatsProvider<C> {
    type Metrics = TxMetrics;

    async fn fetch_metrics(&self) -> Result<TxMetrics, ServiceError> {
        let (transactions, stats) = self.ledger.fetch_with_stats(None, None).await?;
        let single_part = transactions.len();
        let uncategorized = filter_out_categorized(transactions);

        let blik_ok = filter_by_description(
            uncategorized.clone(),
            &self.filter_desc_blik,
            true,
            true,
        );
        let action_not_required: Vec<Transaction> = blik_ok
            .iter()
            .filter(|tx| !tx.has_tag(TxTag::ActionRequired))
            .cloned()
            .collect();
        let allegro_needle = self.filter_desc_allegro.to_lowercase();
        let categorizable: Vec<Transaction> = action_not_required
            .iter()
            .filter(|tx| {
                !(tx.description.to_lowercase().contains(&allegro_needle)
                    && !tx.has_tag(TxTag::AllegroDone))
            })
            .cloned()
            .collect();

        let categorizable_by_month = group_by_month(&categorizable).await;

        Ok(TxMetrics {
            total_transactions: stats.total,
            single_part_transactions: single_part,
            uncategorized_transactions: uncategorized.len(),
            blik_pending: uncategorized.len() - blik_ok.len(),
            action_required: blik_ok.len() - action_not_required.len(),
            allegro_pending: action_not_required.len() - categorizable.len(),
            categorizable: categorizable.len(),
            categorizable_by_month,
            computed_at: Utc::now(),
            fetch_duration_ms: stats.duration_ms,
        })
    }
}
