use crate::schema::{ContributionRecord, MonthlyAmounts};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A loosely typed cell as delivered by a tabular data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum RawCell {
    Number(f64),
    Text(String),
}

impl RawCell {
    /// Finite numeric value of the cell. Empty or non-numeric text yields `None`.
    pub fn as_amount(&self) -> Option<f64> {
        let value = match self {
            RawCell::Number(n) => *n,
            RawCell::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                trimmed.parse::<f64>().ok()?
            }
        };
        value.is_finite().then_some(value)
    }

    pub fn as_year(&self) -> Option<i32> {
        let value = self.as_amount()?;
        if value.fract() != 0.0 || value < i32::MIN as f64 || value > i32::MAX as f64 {
            return None;
        }
        Some(value as i32)
    }

    /// Trimmed identifier text. Numeric identifiers are rendered without a fraction.
    pub fn as_key(&self) -> Option<String> {
        let key = match self {
            RawCell::Number(n) if n.is_finite() && n.fract() == 0.0 => format!("{}", *n as i64),
            RawCell::Number(n) if n.is_finite() => n.to_string(),
            RawCell::Number(_) => return None,
            RawCell::Text(s) => s.trim().to_string(),
        };
        (!key.is_empty()).then_some(key)
    }
}

impl From<f64> for RawCell {
    fn from(value: f64) -> Self {
        RawCell::Number(value)
    }
}

impl From<&str> for RawCell {
    fn from(value: &str) -> Self {
        RawCell::Text(value.to_string())
    }
}

impl From<String> for RawCell {
    fn from(value: String) -> Self {
        RawCell::Text(value)
    }
}

fn amount(cell: &Option<RawCell>) -> Option<f64> {
    cell.as_ref().and_then(RawCell::as_amount)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawMonth {
    #[serde(default)]
    pub remuneration: Option<RawCell>,
    #[serde(default)]
    pub contribution: Option<RawCell>,
    #[serde(default)]
    pub additional_contribution: Option<RawCell>,
}

impl RawMonth {
    pub fn new(remuneration: impl Into<RawCell>, contribution: impl Into<RawCell>) -> Self {
        Self {
            remuneration: Some(remuneration.into()),
            contribution: Some(contribution.into()),
            additional_contribution: None,
        }
    }

    pub fn with_additional(mut self, additional: impl Into<RawCell>) -> Self {
        self.additional_contribution = Some(additional.into());
        self
    }

    fn validate(&self) -> MonthlyAmounts {
        MonthlyAmounts {
            remuneration: amount(&self.remuneration),
            contribution: amount(&self.contribution),
            additional_contribution: amount(&self.additional_contribution),
        }
    }
}

/// One undecoded contribution row: a taxpayer, a worker, a year and up to twelve
/// monthly column groups (January first). Missing trailing months are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawContributionRow {
    pub taxpayer_id: Option<RawCell>,
    pub worker_id: Option<RawCell>,
    pub year: Option<RawCell>,
    #[serde(default)]
    pub months: Vec<RawMonth>,
}

impl RawContributionRow {
    pub fn new(
        taxpayer_id: impl Into<RawCell>,
        worker_id: impl Into<RawCell>,
        year: impl Into<RawCell>,
    ) -> Self {
        Self {
            taxpayer_id: Some(taxpayer_id.into()),
            worker_id: Some(worker_id.into()),
            year: Some(year.into()),
            months: Vec::new(),
        }
    }

    /// Sets the columns for `month` (1-12), padding earlier months as absent.
    pub fn with_month(mut self, month: u32, raw: RawMonth) -> Self {
        if (1..=12).contains(&month) {
            let idx = month as usize - 1;
            if self.months.len() <= idx {
                self.months.resize(idx + 1, RawMonth::default());
            }
            self.months[idx] = raw;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowRejection {
    MissingTaxpayer,
    MissingWorker,
    InvalidYear,
}

impl fmt::Display for RowRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowRejection::MissingTaxpayer => write!(f, "missing taxpayer identifier"),
            RowRejection::MissingWorker => write!(f, "missing worker identifier"),
            RowRejection::InvalidYear => write!(f, "missing or invalid year"),
        }
    }
}

/// Validates a raw row once at the ingestion boundary. Malformed monthly values
/// become absent months; only unusable key fields reject the whole row.
pub fn validate_row(
    row: &RawContributionRow,
) -> std::result::Result<ContributionRecord, RowRejection> {
    let taxpayer_id = row
        .taxpayer_id
        .as_ref()
        .and_then(RawCell::as_key)
        .ok_or(RowRejection::MissingTaxpayer)?;
    let worker_id = row
        .worker_id
        .as_ref()
        .and_then(RawCell::as_key)
        .ok_or(RowRejection::MissingWorker)?;
    let year = row
        .year
        .as_ref()
        .and_then(RawCell::as_year)
        .ok_or(RowRejection::InvalidYear)?;

    let mut record = ContributionRecord::new(taxpayer_id, worker_id, year);
    for (slot, raw) in record.months.iter_mut().zip(row.months.iter()) {
        *slot = raw.validate();
    }
    Ok(record)
}
