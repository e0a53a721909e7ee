use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;

use crate::model::{
    add_line, contains_ci, tags_with, Evidence, EvidenceError, Matchable, Transaction,
    TransactionUpdate, TxTag,
};

/// One row of a bank account export. `amount` is in the account currency,
/// `operation_amount` in the original transaction currency. Parsed fresh
/// from an uploaded CSV per request and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct BankRecord {
    pub date: NaiveDate,
    pub amount: BigDecimal,
    pub details: String,
    pub recipient: String,
    pub operation_amount: BigDecimal,
    pub sender: String,
    pub operation_currency: String,
    pub account_currency: String,
    pub sender_account: String,
    pub recipient_account: String,
}

impl BankRecord {
    /// Human readable `name: value` lines, skipping empty strings and zero
    /// amounts. Used by preview surfaces.
    pub fn meaningful_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("date: {}", self.date),
            format!("amount: {}", self.amount),
        ];

        let text_fields = [
            ("details", &self.details),
            ("recipient", &self.recipient),
        ];
        for (name, value) in text_fields {
            if !value.trim().is_empty() {
                lines.push(format!("{}: {}", name, value));
            }
        }
        if !self.operation_amount.is_zero() {
            lines.push(format!("operation_amount: {}", self.operation_amount));
        }
        let trailing_fields = [
            ("sender", &self.sender),
            ("operation_currency", &self.operation_currency),
            ("account_currency", &self.account_currency),
            ("sender_account", &self.sender_account),
            ("recipient_account", &self.recipient_account),
        ];
        for (name, value) in trailing_fields {
            if !value.trim().is_empty() {
                lines.push(format!("{}: {}", name, value));
            }
        }

        lines
    }
}

impl Matchable for BankRecord {
    fn date(&self) -> NaiveDate {
        self.date
    }

    fn amount(&self) -> &BigDecimal {
        &self.amount
    }
}

impl Evidence for BankRecord {
    /// Bank records enrich both notes and description. Both appends are
    /// guarded by a case-insensitive substring check, so re-applying the
    /// same record is a no-op apart from the completion tag.
    fn build_tx_update(&self, tx: &Transaction) -> Result<TransactionUpdate, EvidenceError> {
        if self.details.trim().is_empty() {
            return Err(EvidenceError::EmptyDetails);
        }

        let description = if contains_ci(&tx.description, &self.details) {
            None
        } else {
            Some(format!("{};{}", tx.description, self.details))
        };

        let notes = match tx.notes.as_deref() {
            Some(existing) if contains_ci(existing, &self.details) => None,
            existing => Some(add_line(existing, &self.details)),
        };

        Ok(TransactionUpdate {
            description,
            notes,
            tags: Some(tags_with(tx, TxTag::BlikDone)),
            category_id: None,
        })
    }
}
