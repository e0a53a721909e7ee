use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::enrich::{EnrichError, EnrichmentService};
use crate::ledger::LedgerClient;
use crate::model::{MatchResult, Transaction};
use crate::payment::AllegroOrderPayment;

/// One caller-approved pairing: apply `payment_short_id` to
/// `transaction_id`. The strategy hint is carried through untouched for the
/// caller's own bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchDecision {
    pub transaction_id: i64,
    pub payment_short_id: String,
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyJobStatus {
    Pending,
    Running,
    Done,
}

/// Durable (for the process lifetime) record of one batch-apply run. There
/// is no failed terminal state for the job itself; individual decision
/// failures only bump the counter.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyJob {
    pub id: Uuid,
    pub secret_id: Uuid,
    pub status: ApplyJobStatus,
    pub total: usize,
    pub applied: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

pub type ApplyJobHandle = Arc<Mutex<ApplyJob>>;

/// In-memory registry of apply jobs, keyed by generated id. No eviction;
/// entries live until process restart.
#[derive(Default)]
pub struct ApplyJobRegistry {
    jobs: Mutex<HashMap<Uuid, ApplyJobHandle>>,
}

impl ApplyJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, secret_id: Uuid, total: usize) -> ApplyJobHandle {
        let job = ApplyJob {
            id: Uuid::new_v4(),
            secret_id,
            status: ApplyJobStatus::Pending,
            total,
            applied: 0,
            failed: 0,
            started_at: Utc::now(),
            finished_at: None,
        };
        let handle = Arc::new(Mutex::new(job.clone()));
        self.jobs.lock().await.insert(job.id, Arc::clone(&handle));
        handle
    }

    pub async fn get(&self, job_id: Uuid) -> Option<ApplyJob> {
        let jobs = self.jobs.lock().await;
        match jobs.get(&job_id) {
            Some(handle) => Some(handle.lock().await.clone()),
            None => None,
        }
    }
}

#[derive(Debug, Error)]
enum DecisionError {
    #[error("transaction {0} not in the computed matches")]
    TransactionNotFound(i64),
    #[error("payment {0} not among the matches for transaction {1}")]
    PaymentNotFound(String, i64),
    #[error(transparent)]
    Enrich(#[from] EnrichError),
}

async fn apply_decision<C: LedgerClient>(
    enrichment: &EnrichmentService<C>,
    index: &HashMap<i64, &MatchResult<Transaction, AllegroOrderPayment>>,
    decision: &MatchDecision,
) -> Result<(), DecisionError> {
    let result = index
        .get(&decision.transaction_id)
        .ok_or(DecisionError::TransactionNotFound(decision.transaction_id))?;

    let payment = result
        .matches
        .iter()
        .find(|p| p.external_short_id == decision.payment_short_id)
        .ok_or_else(|| {
            DecisionError::PaymentNotFound(
                decision.payment_short_id.clone(),
                decision.transaction_id,
            )
        })?;

    enrichment.apply_match(&result.tx, payment).await?;
    Ok(())
}

/// Process approved decisions sequentially. Best effort: a failing decision
/// is counted and the batch moves on, so one bad approval cannot discard
/// the rest.
pub async fn run_apply_job<C: LedgerClient>(
    job: ApplyJobHandle,
    enrichment: Arc<EnrichmentService<C>>,
    decisions: Vec<MatchDecision>,
    matches: Vec<MatchResult<Transaction, AllegroOrderPayment>>,
) {
    {
        job.lock().await.status = ApplyJobStatus::Running;
    }

    let index: HashMap<i64, &MatchResult<Transaction, AllegroOrderPayment>> =
        matches.iter().map(|m| (m.tx.id, m)).collect();

    for decision in &decisions {
        match apply_decision(&enrichment, &index, decision).await {
            Ok(()) => job.lock().await.applied += 1,
            Err(err) => {
                warn!(
                    "apply decision failed for transaction {}: {}",
                    decision.transaction_id, err
                );
                job.lock().await.failed += 1;
            }
        }
    }

    let mut job = job.lock().await;
    job.status = ApplyJobStatus::Done;
    job.finished_at = Some(Utc::now());
    info!(
        "apply job {} finished: {} applied, {} failed",
        job.id, job.applied, job.failed
    );
}
