use std::collections::HashSet;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;

/// Anything that can take part in matching: a calendar date plus a signed
/// decimal amount. Amounts are compared by absolute value because the bank
/// and the ledger disagree on sign conventions; dates are compared exactly
/// unless an implementation overrides `compare` with a tolerance.
pub trait Matchable {
    fn date(&self) -> NaiveDate;

    fn amount(&self) -> &BigDecimal;

    fn compare(&self, other: &dyn Matchable) -> bool {
        self.date() == other.date() && self.amount().abs() == other.amount().abs()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvidenceError {
    #[error("evidence has no details to attach")]
    EmptyDetails,
}

/// A matchable record that can also enrich the transaction it matched.
pub trait Evidence: Matchable {
    fn build_tx_update(&self, tx: &Transaction) -> Result<TransactionUpdate, EvidenceError>;
}

pub fn add_line(existing: Option<&str>, new_line: &str) -> String {
    match existing {
        Some(text) if !text.is_empty() => format!("{}\n{}", text, new_line),
        _ => new_line.to_owned(),
    }
}

pub fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxTag {
    BlikDone,
    AllegroDone,
    RulePotential,
    ActionRequired,
}

impl TxTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxTag::BlikDone => "blik_done",
            TxTag::AllegroDone => "allegro_done",
            TxTag::RulePotential => "rule_potential",
            TxTag::ActionRequired => "action_req",
        }
    }
}

impl std::fmt::Display for TxTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxType {
    Withdrawal,
    Deposit,
    Transfer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Currency {
    pub code: String,
    pub symbol: String,
    pub decimals: u32,
}

/// Original-currency context for foreign transactions. Display only; never
/// consulted during matching.
#[derive(Debug, Clone, PartialEq)]
pub struct FxContext {
    pub original_currency: Currency,
    pub original_amount: BigDecimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: i64,
    pub date: NaiveDate,
    pub amount: BigDecimal,
    pub kind: TxType,
    pub description: String,
    pub tags: HashSet<String>,
    pub notes: Option<String>,
    pub category: Option<Category>,
    pub currency: Currency,
    pub fx: Option<FxContext>,
}

impl Transaction {
    pub fn has_tag(&self, tag: TxTag) -> bool {
        self.tags.contains(tag.as_str())
    }

    pub fn is_categorized(&self) -> bool {
        self.category.is_some()
    }
}

impl Matchable for Transaction {
    fn date(&self) -> NaiveDate {
        self.date
    }

    fn amount(&self) -> &BigDecimal {
        &self.amount
    }
}

/// Sparse patch sent back to the ledger. Only populated fields are applied;
/// this is the sole channel through which ledger state is mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransactionUpdate {
    pub description: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
    pub category_id: Option<i64>,
}

impl TransactionUpdate {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.notes.is_none()
            && self.tags.is_none()
            && self.category_id.is_none()
    }
}

/// Merge `tag` into the transaction's tag set and return the full
/// replacement list, sorted so updates stay deterministic.
pub fn tags_with(tx: &Transaction, tag: TxTag) -> Vec<String> {
    tx.tags
        .iter()
        .cloned()
        .chain(std::iter::once(tag.as_str().to_owned()))
        .unique()
        .sorted()
        .collect()
}

/// One transaction paired with every evidence candidate that compared equal.
/// Empty means unmatched, a singleton can be applied directly, more than one
/// needs the caller to disambiguate.
#[derive(Debug, Clone)]
pub struct MatchResult<T, E> {
    pub tx: T,
    pub matches: Vec<E>,
}

impl<T, E> MatchResult<T, E> {
    pub fn is_unmatched(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn is_unambiguous(&self) -> bool {
        self.matches.len() == 1
    }
}
