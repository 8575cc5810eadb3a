use crate::error::{ReconciliationError, Result};
use crate::schema::{DuplicateReferencePolicy, ReferenceEntry};
use crate::utils::round_to_cents;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Display breakdown of a reference obligation, rounded to cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObligationBreakdown {
    pub year: i32,
    pub month: u32,
    pub base_remuneration: f64,
    pub rate_component: f64,
    pub extraordinary_contribution: f64,
    pub total: f64,
}

/// Immutable (year, month) keyed reference amounts for one run.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    entries: BTreeMap<(i32, u32), ReferenceEntry>,
}

impl ReferenceTable {
    pub fn from_entries(
        entries: impl IntoIterator<Item = ReferenceEntry>,
        policy: DuplicateReferencePolicy,
    ) -> Result<Self> {
        let mut table = BTreeMap::new();

        for entry in entries {
            validate_entry(&entry)?;

            let key = (entry.year, entry.month);
            if table.contains_key(&key) {
                match policy {
                    DuplicateReferencePolicy::Reject => {
                        return Err(ReconciliationError::DuplicateReferenceEntry {
                            year: entry.year,
                            month: entry.month,
                        });
                    }
                    DuplicateReferencePolicy::FirstWins => {
                        warn!(
                            "Ignoring duplicate reference entry for {}-{:02}",
                            entry.year, entry.month
                        );
                        continue;
                    }
                }
            }
            table.insert(key, entry);
        }

        debug!("Reference table loaded with {} months", table.len());
        Ok(Self { entries: table })
    }

    pub fn get(&self, year: i32, month: u32) -> Option<&ReferenceEntry> {
        self.entries.get(&(year, month))
    }

    /// Reference obligation for the month, or `None` when the month is not assessable.
    pub fn obligation(&self, year: i32, month: u32) -> Option<f64> {
        self.get(year, month).map(ReferenceEntry::obligation)
    }

    pub fn breakdown(&self, year: i32, month: u32) -> Option<ObligationBreakdown> {
        self.get(year, month).map(|entry| ObligationBreakdown {
            year: entry.year,
            month: entry.month,
            base_remuneration: entry.base_remuneration,
            rate_component: round_to_cents(entry.rate_component()),
            extraordinary_contribution: entry.extraordinary_contribution,
            total: round_to_cents(entry.obligation()),
        })
    }

    /// Entries in chronological order.
    pub fn entries(&self) -> impl Iterator<Item = &ReferenceEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_entry(entry: &ReferenceEntry) -> Result<()> {
    let invalid = |details: String| ReconciliationError::InvalidReferenceEntry {
        year: entry.year,
        month: entry.month,
        details,
    };

    if !(1..=12).contains(&entry.month) {
        return Err(invalid("month must be between 1 and 12".to_string()));
    }
    if !entry.base_remuneration.is_finite() || entry.base_remuneration < 0.0 {
        return Err(invalid(format!(
            "base remuneration must be non-negative, got {}",
            entry.base_remuneration
        )));
    }
    if !entry.extraordinary_contribution.is_finite() || entry.extraordinary_contribution < 0.0 {
        return Err(invalid(format!(
            "extraordinary contribution must be non-negative, got {}",
            entry.extraordinary_contribution
        )));
    }
    Ok(())
}
