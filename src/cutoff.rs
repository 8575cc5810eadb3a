use crate::error::Result;
use crate::schema::InspectionRecord;
use crate::utils::{lookback_month_start, next_month_start};
use chrono::NaiveDate;
use log::debug;
use std::collections::HashMap;

/// Per-taxpayer first month eligible for assessment.
#[derive(Debug, Clone)]
pub struct InspectionCutoff {
    by_taxpayer: HashMap<String, NaiveDate>,
    default_start: NaiveDate,
}

impl InspectionCutoff {
    /// Builds the cutoff map from inspection rows. Each taxpayer starts on the first
    /// day of the month after its latest inspected period; everyone else starts
    /// `lookback_months` before the month containing `as_of`.
    pub fn resolve(
        records: &[InspectionRecord],
        as_of: NaiveDate,
        lookback_months: u32,
    ) -> Result<Self> {
        let default_start = lookback_month_start(as_of, lookback_months)?;

        let mut latest: HashMap<&str, NaiveDate> = HashMap::new();
        for record in records {
            latest
                .entry(record.taxpayer_id.as_str())
                .and_modify(|end| *end = (*end).max(record.period_end))
                .or_insert(record.period_end);
        }

        let mut by_taxpayer = HashMap::with_capacity(latest.len());
        for (taxpayer_id, period_end) in latest {
            let start = next_month_start(period_end)?;
            debug!(
                "Taxpayer {}: last inspected period {}, assessing from {}",
                taxpayer_id, period_end, start
            );
            by_taxpayer.insert(taxpayer_id.to_string(), start);
        }

        Ok(Self {
            by_taxpayer,
            default_start,
        })
    }

    pub fn start_for(&self, taxpayer_id: &str) -> NaiveDate {
        self.by_taxpayer
            .get(taxpayer_id)
            .copied()
            .unwrap_or(self.default_start)
    }

    pub fn is_inspected(&self, taxpayer_id: &str) -> bool {
        self.by_taxpayer.contains_key(taxpayer_id)
    }

    pub fn default_start(&self) -> NaiveDate {
        self.default_start
    }

    pub fn inspected_count(&self) -> usize {
        self.by_taxpayer.len()
    }
}
