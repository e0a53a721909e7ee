use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::allegro::{AllegroAccount, AllegroClient, AllegroError, AllegroService};
use crate::apply::{run_apply_job, ApplyJob, ApplyJobRegistry, MatchDecision};
use crate::bank::BankRecord;
use crate::config::Settings;
use crate::enrich::{EnrichError, EnrichmentService};
use crate::ledger::{LedgerClient, LedgerService, ServiceError};
use crate::model::{MatchResult, Transaction, TxTag};
use crate::payment::AllegroOrderPayment;
use crate::stats::{AllegroStatsProvider, BlikStatsProvider, MetricsManager};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("matches have not been computed for this selection")]
    MatchesNotComputed,
    #[error("transaction {0} not found in the computed matches")]
    TransactionNotFound(i64),
    #[error("selected match is not available")]
    InvalidMatchSelection,
    #[error(transparent)]
    Marketplace(#[from] AllegroError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Enrich(#[from] EnrichError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchSummary {
    pub transactions_found: usize,
    pub not_matched: usize,
    pub with_one_match: usize,
    pub with_many_matches: usize,
}

pub fn summarize<T, E>(matches: &[MatchResult<T, E>]) -> MatchSummary {
    MatchSummary {
        transactions_found: matches.len(),
        not_matched: matches.iter().filter(|m| m.is_unmatched()).count(),
        with_one_match: matches.iter().filter(|m| m.is_unambiguous()).count(),
        with_many_matches: matches.iter().filter(|m| m.matches.len() > 1).count(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AllegroPreview {
    pub login: String,
    pub payments_fetched: usize,
    pub summary: MatchSummary,
}

/// BLIK flow state: per-upload match cache plus the rail's metrics manager.
/// All state is owned here and injected into request handlers, never
/// process-global.
pub struct BlikApp<C: LedgerClient + 'static> {
    enrichment: Arc<EnrichmentService<C>>,
    settings: Settings,
    matches: Mutex<HashMap<String, Vec<MatchResult<Transaction, BankRecord>>>>,
    metrics: MetricsManager<BlikStatsProvider<C>>,
}

impl<C: LedgerClient + 'static> BlikApp<C> {
    pub fn new(client: Arc<C>, settings: Settings) -> Self {
        let ledger = LedgerService::with_page_size(client, settings.page_size);
        let metrics = MetricsManager::new(Arc::new(BlikStatsProvider::new(
            ledger.clone(),
            settings.blik_description_filter.clone(),
        )));
        Self {
            enrichment: Arc::new(EnrichmentService::new(ledger)),
            settings,
            matches: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    pub fn metrics(&self) -> &MetricsManager<BlikStatsProvider<C>> {
        &self.metrics
    }

    /// Render uploaded records for a preview surface.
    pub fn preview_records(records: &[BankRecord]) -> Vec<String> {
        records
            .iter()
            .map(|record| record.meaningful_lines().join("\n"))
            .collect()
    }

    /// Match uploaded records against the ledger and cache the result under
    /// the upload id for the later apply step.
    pub async fn preview_matches(
        &self,
        upload_id: &str,
        records: &[BankRecord],
    ) -> Result<MatchSummary, AppError> {
        let matches = self
            .enrichment
            .match_candidates(records, &self.settings.blik_description_filter, TxTag::BlikDone)
            .await?;
        let summary = summarize(&matches);
        info!(
            "blik preview for upload {}: {} transactions, {} unmatched",
            upload_id, summary.transactions_found, summary.not_matched
        );
        self.matches
            .lock()
            .await
            .insert(upload_id.to_owned(), matches);
        Ok(summary)
    }

    /// Apply one record from a previously previewed upload.
    pub async fn apply_selection(
        &self,
        upload_id: &str,
        transaction_id: i64,
        match_index: usize,
    ) -> Result<(), AppError> {
        let cache = self.matches.lock().await;
        let matches = cache.get(upload_id).ok_or(AppError::MatchesNotComputed)?;
        let result = matches
            .iter()
            .find(|m| m.tx.id == transaction_id)
            .ok_or(AppError::TransactionNotFound(transaction_id))?;
        let record = result
            .matches
            .get(match_index)
            .ok_or(AppError::InvalidMatchSelection)?;

        self.enrichment.apply_match(&result.tx, record).await?;
        Ok(())
    }
}

/// Marketplace flow state: per-secret match cache, the apply-job registry
/// and the rail's metrics manager.
pub struct AllegroApp<C: LedgerClient + 'static, A: AllegroClient> {
    enrichment: Arc<EnrichmentService<C>>,
    allegro: AllegroService<A>,
    settings: Settings,
    matches: Mutex<HashMap<Uuid, Vec<MatchResult<Transaction, AllegroOrderPayment>>>>,
    jobs: ApplyJobRegistry,
    metrics: MetricsManager<AllegroStatsProvider<C>>,
}

impl<C: LedgerClient + 'static, A: AllegroClient> AllegroApp<C, A> {
    pub fn new(client: Arc<C>, allegro: AllegroService<A>, settings: Settings) -> Self {
        let ledger = LedgerService::with_page_size(client, settings.page_size);
        let metrics = MetricsManager::new(Arc::new(AllegroStatsProvider::new(
            ledger.clone(),
            settings.allegro_description_filter.clone(),
        )));
        Self {
            enrichment: Arc::new(EnrichmentService::new(ledger)),
            allegro,
            settings,
            matches: Mutex::new(HashMap::new()),
            jobs: ApplyJobRegistry::new(),
            metrics,
        }
    }

    pub fn metrics(&self) -> &MetricsManager<AllegroStatsProvider<C>> {
        &self.metrics
    }

    /// Fetch payments for one account, match them against the ledger and
    /// cache the result under the account's secret id.
    pub async fn preview_matches(
        &self,
        account: &AllegroAccount,
    ) -> Result<AllegroPreview, AppError> {
        let fetched = self.allegro.fetch(account).await?;
        let matches = self
            .enrichment
            .match_candidates(
                &fetched.payments,
                &self.settings.allegro_description_filter,
                TxTag::AllegroDone,
            )
            .await?;

        let login = fetched
            .payments
            .first()
            .map(|p| p.allegro_login.clone())
            .unwrap_or_else(|| "unknown".to_owned());
        let summary = summarize(&matches);

        self.matches.lock().await.insert(account.id, matches);

        Ok(AllegroPreview {
            login,
            payments_fetched: fetched.payments.len(),
            summary,
        })
    }

    /// Kick off a background batch apply over a previously computed
    /// preview. Returns the job in `Pending`; progress is observed by
    /// polling `get_job`.
    pub async fn start_apply_job(
        &self,
        secret_id: Uuid,
        decisions: Vec<MatchDecision>,
    ) -> Result<ApplyJob, AppError> {
        let matches = self
            .matches
            .lock()
            .await
            .get(&secret_id)
            .cloned()
            .filter(|m| !m.is_empty())
            .ok_or(AppError::MatchesNotComputed)?;

        let handle = self.jobs.create(secret_id, decisions.len()).await;
        let snapshot = handle.lock().await.clone();

        tokio::spawn(run_apply_job(
            handle,
            Arc::clone(&self.enrichment),
            decisions,
            matches,
        ));

        Ok(snapshot)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Option<ApplyJob> {
        self.jobs.get(job_id).await
    }
}
