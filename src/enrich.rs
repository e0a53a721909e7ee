use thiserror::Error;
use tracing::{debug, info};

use crate::ledger::{
    filter_by_description, filter_out_by_tag, LedgerClient, LedgerService, ServiceError,
};
use crate::matcher::match_transactions;
use crate::model::{Evidence, EvidenceError, MatchResult, Matchable, Transaction, TxTag};

/// Failure applying one evidence record to one transaction. The evidence
/// variant means the input was bad; the service variant means the ledger
/// call failed and can be retried later.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error(transparent)]
    Evidence(#[from] EvidenceError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Pairs evidence candidates with ledger transactions and pushes approved
/// updates back. One instance serves every payment rail; the rail picks the
/// description filter and completion tag.
pub struct EnrichmentService<C> {
    ledger: LedgerService<C>,
}

impl<C> Clone for EnrichmentService<C> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
        }
    }
}

impl<C: LedgerClient> EnrichmentService<C> {
    pub fn new(ledger: LedgerService<C>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &LedgerService<C> {
        &self.ledger
    }

    /// Fetch candidate transactions spanning the evidence dates, narrow to
    /// the rail's plausible subset and run the matcher.
    ///
    /// Already-categorized transactions are excluded (categorization is the
    /// terminal state), as are transactions already tagged `tag_done`.
    pub async fn match_candidates<E>(
        &self,
        candidates: &[E],
        filter_text: &str,
        tag_done: TxTag,
    ) -> Result<Vec<MatchResult<Transaction, E>>, ServiceError>
    where
        E: Matchable + Clone,
    {
        let Some(min_date) = candidates.iter().map(|c| c.date()).min() else {
            return Ok(Vec::new());
        };
        let max_date = candidates
            .iter()
            .map(|c| c.date())
            .max()
            .unwrap_or(min_date);

        let transactions = self
            .ledger
            .fetch_transactions(Some(min_date), Some(max_date), true)
            .await?;
        let filtered = filter_by_description(transactions, filter_text, false, false);
        let filtered = filter_out_by_tag(filtered, tag_done.as_str());
        debug!(
            "matching {} candidates against {} transactions",
            candidates.len(),
            filtered.len()
        );

        Ok(match_transactions(filtered, candidates))
    }

    /// Build the update for one approved match and push it to the ledger.
    pub async fn apply_match<E>(&self, tx: &Transaction, evidence: &E) -> Result<(), EnrichError>
    where
        E: Evidence + ?Sized,
    {
        let update = evidence.build_tx_update(tx)?;
        self.ledger.update_transaction(tx, &update).await?;
        info!("enriched transaction {}", tx.id);
        Ok(())
    }
}
