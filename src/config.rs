use std::fs::File;
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

use crate::ledger::DEFAULT_PAGE_SIZE;

/// Runtime settings for the enrichment flows. Each field has a sensible
/// default so embedders can start from `Settings::default()` and override
/// what they need.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Description the bank stamps on BLIK transactions; used verbatim for
    /// exact-match screening and as a substring for enrichment matching.
    pub blik_description_filter: String,
    /// Substring identifying marketplace transactions.
    pub allegro_description_filter: String,
    pub page_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            blik_description_filter: "BLIK - płatność w internecie".to_owned(),
            allegro_description_filter: "allegro".to_owned(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Settings> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}
