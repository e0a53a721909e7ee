//! `ledgermatch`: evidence-to-ledger reconciliation core.
//!
//! Reconciles financial evidence (bank CSV rows, marketplace order
//! payments) against transactions fetched from an external accounting
//! ledger, then writes enrichment (notes, descriptions, completion tags)
//! back onto the matched transactions. Pure library layer: the HTTP
//! surface, auth and storage live elsewhere and talk to this crate through
//! the application contexts in [`app`].

pub mod allegro;
pub mod app;
pub mod apply;
pub mod bank;
pub mod config;
pub mod enrich;
pub mod ledger;
pub mod matcher;
pub mod model;
pub mod orders;
pub mod parsing;
pub mod payment;
pub mod stats;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::Settings;
pub use enrich::EnrichmentService;
pub use ledger::{FetchStats, LedgerClient, LedgerError, LedgerService, ServiceError};
pub use matcher::match_transactions;
pub use model::{
    Evidence, EvidenceError, MatchResult, Matchable, Transaction, TransactionUpdate, TxTag, TxType,
};
