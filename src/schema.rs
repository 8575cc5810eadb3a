use crate::error::{ReconciliationError, Result};
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Fixed share of the base remuneration owed every month.
pub const CONTRIBUTION_RATE: f64 = 0.0255;

pub const DEFAULT_EXTRAORDINARY_CONTRIBUTION: f64 = 85.0;
pub const DEFAULT_LOOKBACK_MONTHS: u32 = 120;
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100;

fn default_extraordinary() -> f64 {
    DEFAULT_EXTRAORDINARY_CONTRIBUTION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReferenceEntry {
    #[schemars(description = "Calendar year of the reference month")]
    pub year: i32,

    #[schemars(description = "Calendar month, 1 = January")]
    pub month: u32,

    #[schemars(description = "Base remuneration the 2.55% component is computed from")]
    pub base_remuneration: f64,

    #[serde(default = "default_extraordinary")]
    #[schemars(description = "Flat extraordinary contribution added on top. Defaults to 85.0.")]
    pub extraordinary_contribution: f64,
}

impl ReferenceEntry {
    pub fn new(
        year: i32,
        month: u32,
        base_remuneration: f64,
        extraordinary_contribution: f64,
    ) -> Self {
        Self {
            year,
            month,
            base_remuneration,
            extraordinary_contribution,
        }
    }

    pub fn rate_component(&self) -> f64 {
        self.base_remuneration * CONTRIBUTION_RATE
    }

    /// Minimum contribution expected for this month.
    pub fn obligation(&self) -> f64 {
        self.rate_component() + self.extraordinary_contribution
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InspectionRecord {
    pub taxpayer_id: String,

    #[schemars(description = "Last day of the period covered by the inspection")]
    pub period_end: NaiveDate,
}

impl InspectionRecord {
    pub fn new(taxpayer_id: impl Into<String>, period_end: NaiveDate) -> Self {
        Self {
            taxpayer_id: taxpayer_id.into(),
            period_end,
        }
    }
}

/// Validated amounts for one calendar month of a contribution row.
/// `None` means the column was missing, empty or not a number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MonthlyAmounts {
    pub remuneration: Option<f64>,
    pub contribution: Option<f64>,
    #[serde(default)]
    pub additional_contribution: Option<f64>,
}

impl MonthlyAmounts {
    pub fn new(remuneration: Option<f64>, contribution: Option<f64>) -> Self {
        Self {
            remuneration,
            contribution,
            additional_contribution: None,
        }
    }

    pub fn with_additional(mut self, additional: Option<f64>) -> Self {
        self.additional_contribution = additional;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContributionRecord {
    pub taxpayer_id: String,
    pub worker_id: String,
    pub year: i32,

    #[schemars(description = "Twelve calendar months, January first")]
    pub months: [MonthlyAmounts; 12],
}

impl ContributionRecord {
    pub fn new(taxpayer_id: impl Into<String>, worker_id: impl Into<String>, year: i32) -> Self {
        Self {
            taxpayer_id: taxpayer_id.into(),
            worker_id: worker_id.into(),
            year,
            months: [MonthlyAmounts::default(); 12],
        }
    }

    /// Sets the amounts for `month` (1-12). Out-of-range months are ignored.
    pub fn with_month(mut self, month: u32, amounts: MonthlyAmounts) -> Self {
        if let Some(slot) = month
            .checked_sub(1)
            .and_then(|idx| self.months.get_mut(idx as usize))
        {
            *slot = amounts;
        }
        self
    }
}

/// One qualifying month of one contribution row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthlyObservation<'a> {
    pub taxpayer_id: &'a str,
    pub worker_id: &'a str,
    pub year: i32,
    pub month: u32,
    pub reported_contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DeficitDetail {
    pub worker_id: String,
    pub year: i32,
    pub deficit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReportEntry {
    pub taxpayer_id: String,

    #[schemars(description = "First month assessed for this taxpayer")]
    pub effective_start_date: NaiveDate,

    #[schemars(description = "Positive deficits per worker and year, ordered by worker then year")]
    pub deficit_details: Vec<DeficitDetail>,

    pub total_deficit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum DuplicateReferencePolicy {
    #[default]
    #[schemars(description = "Two entries for the same year and month abort the load")]
    Reject,

    #[schemars(description = "The first entry in table order wins; later duplicates are ignored")]
    FirstWins,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RunConfig {
    #[schemars(description = "Months to look back for taxpayers without an inspection record")]
    pub lookback_months: u32,

    #[schemars(
        description = "Extraordinary contribution passed to the reference source for rows that leave it empty"
    )]
    pub default_extraordinary_contribution: f64,

    pub duplicate_reference_policy: DuplicateReferencePolicy,

    #[schemars(description = "Emit a progress event every N contribution rows")]
    pub progress_interval: u64,

    #[schemars(description = "Number of taxpayer-keyed shards aggregated in parallel. 1 runs sequentially.")]
    pub shards: usize,

    #[schemars(description = "Add the additional health-insurance contribution to the reported amount")]
    pub include_additional_contribution: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            lookback_months: DEFAULT_LOOKBACK_MONTHS,
            default_extraordinary_contribution: DEFAULT_EXTRAORDINARY_CONTRIBUTION,
            duplicate_reference_policy: DuplicateReferencePolicy::Reject,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            shards: 1,
            include_additional_contribution: true,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lookback_months == 0 {
            return Err(ReconciliationError::InvalidConfig(
                "lookback_months must be at least 1".to_string(),
            ));
        }
        if self.progress_interval == 0 {
            return Err(ReconciliationError::InvalidConfig(
                "progress_interval must be at least 1".to_string(),
            ));
        }
        if self.shards == 0 {
            return Err(ReconciliationError::InvalidConfig(
                "shards must be at least 1".to_string(),
            ));
        }
        if !self.default_extraordinary_contribution.is_finite()
            || self.default_extraordinary_contribution < 0.0
        {
            return Err(ReconciliationError::InvalidConfig(format!(
                "default_extraordinary_contribution must be a non-negative number, got {}",
                self.default_extraordinary_contribution
            )));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn schema_as_json() -> Result<String> {
        let schema = schemars::schema_for!(RunConfig);
        Ok(serde_json::to_string_pretty(&schema)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_obligation() {
        let entry = ReferenceEntry::new(2023, 1, 1000.0, 85.0);
        assert!((entry.rate_component() - 25.5).abs() < 1e-9);
        assert!((entry.obligation() - 110.5).abs() < 1e-9);
    }

    #[test]
    fn test_reference_entry_default_extraordinary() {
        let entry: ReferenceEntry =
            serde_json::from_str(r#"{"year": 2023, "month": 4, "base_remuneration": 2000.0}"#)
                .unwrap();
        assert_eq!(entry.extraordinary_contribution, 85.0);
        assert!((entry.obligation() - 136.0).abs() < 1e-9);
    }

    #[test]
    fn test_config_defaults_from_partial_json() {
        let config = RunConfig::from_json_str(r#"{"lookback_months": 60}"#).unwrap();
        assert_eq!(config.lookback_months, 60);
        assert_eq!(config.progress_interval, 100);
        assert_eq!(config.shards, 1);
        assert_eq!(
            config.duplicate_reference_policy,
            DuplicateReferencePolicy::Reject
        );

        let config =
            RunConfig::from_json_str(r#"{"duplicate_reference_policy": "FirstWins"}"#).unwrap();
        assert_eq!(
            config.duplicate_reference_policy,
            DuplicateReferencePolicy::FirstWins
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(RunConfig::from_json_str(r#"{"shards": 0}"#).is_err());
        assert!(RunConfig::from_json_str(r#"{"progress_interval": 0}"#).is_err());
        assert!(RunConfig::from_json_str(r#"{"lookback_months": 0}"#).is_err());

        let config = RunConfig {
            default_extraordinary_contribution: -1.0,
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ReconciliationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_schema_generation() {
        let schema_json = RunConfig::schema_as_json().unwrap();
        assert!(schema_json.contains("lookback_months"));
        assert!(schema_json.contains("duplicate_reference_policy"));
    }

    #[test]
    fn test_contribution_record_with_month() {
        let record = ContributionRecord::new("T1", "W1", 2023)
            .with_month(3, MonthlyAmounts::new(Some(500.0), Some(10.0)))
            .with_month(13, MonthlyAmounts::new(Some(1.0), Some(1.0)));

        assert_eq!(record.months[2].contribution, Some(10.0));
        assert_eq!(record.months.iter().filter(|m| m.remuneration.is_some()).count(), 1);
    }
}
