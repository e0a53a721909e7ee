use bigdecimal::BigDecimal;
use chrono::{Days, NaiveDate};

use crate::model::{
    add_line, contains_ci, tags_with, Evidence, EvidenceError, Matchable, Transaction,
    TransactionUpdate, TxTag,
};
use crate::orders::Payment;

/// Number of days a ledger transaction may settle after the order date and
/// still be considered the same payment.
pub const SETTLEMENT_WINDOW_DAYS: u64 = 6;

/// A marketplace order payment viewed as matchable evidence. `details` is
/// an ordered list of free-text lines rendered by joining with newlines.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderPayment {
    pub date: NaiveDate,
    pub amount: BigDecimal,
    pub details: Vec<String>,
    pub tag_done: TxTag,
}

impl OrderPayment {
    pub fn flatten_details(&self) -> String {
        self.details.join("\n")
    }
}

impl Matchable for OrderPayment {
    fn date(&self) -> NaiveDate {
        self.date
    }

    fn amount(&self) -> &BigDecimal {
        &self.amount
    }

    /// Settlement lags the order date, so the exact-date rule is relaxed to
    /// a forward-only window: the transaction may land on the order date or
    /// up to six days after it, never before.
    fn compare(&self, other: &dyn Matchable) -> bool {
        if self.amount.abs() != other.amount().abs() {
            return false;
        }
        let latest_acceptable = self
            .date
            .checked_add_days(Days::new(SETTLEMENT_WINDOW_DAYS))
            .unwrap_or(NaiveDate::MAX);
        self.date <= other.date() && other.date() <= latest_acceptable
    }
}

impl Evidence for OrderPayment {
    /// Appends the flattened details to the transaction notes unless they
    /// are already present (case-insensitive), and stamps the completion
    /// tag. Description and category are left alone.
    fn build_tx_update(&self, tx: &Transaction) -> Result<TransactionUpdate, EvidenceError> {
        let details = self.flatten_details();
        if details.trim().is_empty() {
            return Err(EvidenceError::EmptyDetails);
        }

        let notes = match tx.notes.as_deref() {
            Some(existing) if contains_ci(existing, &details) => None,
            existing => Some(add_line(existing, &details)),
        };

        Ok(TransactionUpdate {
            description: None,
            notes,
            tags: Some(tags_with(tx, self.tag_done)),
            category_id: None,
        })
    }
}

/// An order payment fetched from the marketplace account, carrying display
/// metadata and the stable external ids used to re-address it between
/// preview and apply.
#[derive(Debug, Clone, PartialEq)]
pub struct AllegroOrderPayment {
    pub payment: OrderPayment,
    pub is_balanced: bool,
    /// Display metadata only, never used for matching identity.
    pub allegro_login: String,
    pub external_id: String,
    pub external_short_id: String,
}

impl AllegroOrderPayment {
    pub fn from_payment(payment: &Payment, login: &str) -> Self {
        let mut details = vec![format!("Buyer: {}", login)];
        details.extend(payment.orders.iter().flat_map(|order| order.offer_lines()));

        Self {
            payment: OrderPayment {
                date: payment.date(),
                amount: payment.amount(),
                details,
                tag_done: TxTag::AllegroDone,
            },
            is_balanced: payment.is_balanced(),
            allegro_login: login.to_owned(),
            external_id: payment.payment_id.clone(),
            external_short_id: payment.short_id(),
        }
    }
}

impl Matchable for AllegroOrderPayment {
    fn date(&self) -> NaiveDate {
        self.payment.date
    }

    fn amount(&self) -> &BigDecimal {
        &self.payment.amount
    }

    fn compare(&self, other: &dyn Matchable) -> bool {
        self.payment.compare(other)
    }
}

impl Evidence for AllegroOrderPayment {
    fn build_tx_update(&self, tx: &Transaction) -> Result<TransactionUpdate, EvidenceError> {
        self.payment.build_tx_update(tx)
    }
}

/// Collection fetched for one or more marketplace accounts.
#[derive(Debug, Clone, Default)]
pub struct AllegroOrderPayments {
    pub payments: Vec<AllegroOrderPayment>,
}
