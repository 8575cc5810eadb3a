//! # Contribution Deficit
//!
//! A library for estimating presumptive social-security contribution shortfalls.
//! Reported contributions per taxpayer, worker and month are compared against a
//! table of monthly reference obligations, and the accumulated positive deficit
//! since each taxpayer's last inspection is reported.
//!
//! ## Core Concepts
//!
//! - **Reference Obligation**: `base_remuneration * 0.0255 + extraordinary_contribution` for a calendar month
//! - **Effective Start Date**: the month after a taxpayer's latest inspected period, or a fixed lookback
//! - **Deficit**: the positive shortfall of one month; surplus months never offset deficient ones
//! - **Report**: taxpayers with a positive total, each with deficits grouped by worker and year
//!
//! ## Example
//!
//! ```rust,ignore
//! use contribution_deficit::*;
//! use chrono::NaiveDate;
//!
//! let reference = vec![ReferenceEntry::new(2023, 1, 1000.0, 85.0)];
//! let inspections: Vec<InspectionRecord> = vec![];
//! let rows = vec![RawContributionRow::new("T1", "W1", "2023")
//!     .with_month(1, RawMonth::new("500", "10"))];
//!
//! let outcome = DeficitReconciler::new(RunConfig::default())
//!     .as_of(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
//!     .run(&reference, &inspections, &rows)
//!     .unwrap();
//!
//! assert_eq!(outcome.report[0].total_deficit, 100.5);
//! ```

pub mod cutoff;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod progress;
pub mod reference;
pub mod report;
pub mod scanner;
pub mod schema;
pub mod sources;
pub mod utils;

pub use cutoff::InspectionCutoff;
pub use engine::{
    aggregate_rows, aggregate_sharded, AggregateMap, AggregationContext, AggregationStats,
    CancellationToken, DeficitAggregator, MonthOutcome, TaxpayerAggregate, WorkerYear,
};
pub use error::{ReconciliationError, Result};
pub use ingestion::{validate_row, RawCell, RawContributionRow, RawMonth, RowRejection};
pub use progress::{NoProgress, ProgressEvent, ProgressObserver};
pub use reference::{ObligationBreakdown, ReferenceTable};
pub use report::{compact, report_to_json, verify_report, write_report_csv};
pub use scanner::ContributionScanner;
pub use schema::*;
pub use sources::*;
pub use utils::round_to_cents;

use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub as_of: NaiveDate,
    pub default_start_date: NaiveDate,
    pub reference_months: usize,
    pub inspected_taxpayers: usize,
    pub rows_read: u64,
    pub rows_rejected: u64,
    pub observations: u64,
    pub deficient_months: u64,
    pub compliant_months: u64,
    pub unassessable_months: u64,
    pub taxpayers_seen: usize,
    pub taxpayers_reported: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationOutcome {
    pub report: Vec<ReportEntry>,
    pub summary: RunSummary,
}

/// Runs Resolve, Scan, Aggregate and Compact once, end to end. A failed run
/// yields no partial report.
pub struct DeficitReconciler {
    config: RunConfig,
    as_of: NaiveDate,
    progress: Box<dyn ProgressObserver>,
    cancel: CancellationToken,
}

impl DeficitReconciler {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            as_of: chrono::Local::now().date_naive(),
            progress: Box::new(NoProgress),
            cancel: CancellationToken::new(),
        }
    }

    /// Date the default lookback is measured from.
    pub fn as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = as_of;
        self
    }

    pub fn with_progress(mut self, observer: impl ProgressObserver + 'static) -> Self {
        self.progress = Box::new(observer);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn run<R, I, C>(
        &self,
        reference: &R,
        inspections: &I,
        contributions: &C,
    ) -> Result<ReconciliationOutcome>
    where
        R: ReferenceSource + ?Sized,
        I: InspectionSource + ?Sized,
        C: ContributionSource + ?Sized,
    {
        let result = self.run_inner(reference, inspections, contributions);
        if let Err(e) = &result {
            self.progress.notify(ProgressEvent::new(format!("Error: {}", e)));
        }
        result
    }

    fn run_inner<R, I, C>(
        &self,
        reference: &R,
        inspections: &I,
        contributions: &C,
    ) -> Result<ReconciliationOutcome>
    where
        R: ReferenceSource + ?Sized,
        I: InspectionSource + ?Sized,
        C: ContributionSource + ?Sized,
    {
        self.config.validate()?;
        self.progress
            .notify(ProgressEvent::new("Reading data sources...").with_processed(0));

        let table = ReferenceTable::from_entries(
            reference.read_reference_entries(self.config.default_extraordinary_contribution)?,
            self.config.duplicate_reference_policy,
        )?;

        let inspection_records = inspections.read_inspection_records()?;
        let cutoff = InspectionCutoff::resolve(
            &inspection_records,
            self.as_of,
            self.config.lookback_months,
        )?;
        info!(
            "Default start date ({} months back from {}): {}",
            self.config.lookback_months,
            self.as_of,
            cutoff.default_start()
        );

        let rows = contributions.read_contribution_rows()?;
        info!(
            "Reconciling {} contribution rows against {} reference months ({} inspected taxpayers)",
            rows.len(),
            table.len(),
            cutoff.inspected_count()
        );

        let ctx = AggregationContext {
            reference: &table,
            cutoff: &cutoff,
            config: &self.config,
            progress: self.progress.as_ref(),
            cancel: &self.cancel,
        };
        let (aggregates, stats) = aggregate_sharded(&ctx, &rows)?;

        let report = compact(&aggregates);
        verify_report(&report)?;
        debug!("{} of {} taxpayers carry a deficit", report.len(), aggregates.len());

        let summary = RunSummary {
            as_of: self.as_of,
            default_start_date: cutoff.default_start(),
            reference_months: table.len(),
            inspected_taxpayers: cutoff.inspected_count(),
            rows_read: stats.rows_read,
            rows_rejected: stats.rows_rejected,
            observations: stats.observations,
            deficient_months: stats.deficient_months,
            compliant_months: stats.compliant_months,
            unassessable_months: stats.unassessable_months,
            taxpayers_seen: aggregates.len(),
            taxpayers_reported: report.len(),
        };

        info!(
            "Processing completed: {} rows, {} taxpayers reported",
            summary.rows_read, summary.taxpayers_reported
        );
        self.progress.notify(
            ProgressEvent::new(format!(
                "Processing completed. Total: {} rows processed",
                summary.rows_read
            ))
            .with_processed(summary.rows_read),
        );

        Ok(ReconciliationOutcome { report, summary })
    }
}

/// Runs the full pipeline with `config`, measuring the lookback from `as_of`.
pub fn reconcile_deficits<R, I, C>(
    config: RunConfig,
    as_of: NaiveDate,
    reference: &R,
    inspections: &I,
    contributions: &C,
) -> Result<ReconciliationOutcome>
where
    R: ReferenceSource + ?Sized,
    I: InspectionSource + ?Sized,
    C: ContributionSource + ?Sized,
{
    DeficitReconciler::new(config)
        .as_of(as_of)
        .run(reference, inspections, contributions)
}

/// Aggregates and compacts already validated records in one sequential pass.
pub fn reconcile_records(
    reference: &ReferenceTable,
    cutoff: &InspectionCutoff,
    records: &[ContributionRecord],
    include_additional_contribution: bool,
) -> Vec<ReportEntry> {
    let scanner = ContributionScanner::new(cutoff, include_additional_contribution);
    let mut aggregator = DeficitAggregator::new(reference, cutoff);
    aggregator.observe_all(scanner.scan(records));
    let (aggregates, _) = aggregator.finish();
    compact(&aggregates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn scenario_rows(contribution: &str) -> Vec<RawContributionRow> {
        vec![RawContributionRow::new("T1", "W1", "2023")
            .with_month(1, RawMonth::new("500", contribution))]
    }

    #[test]
    fn test_end_to_end_deficit() {
        let reference = vec![ReferenceEntry::new(2023, 1, 1000.0, 85.0)];
        let inspections: Vec<InspectionRecord> = vec![];

        let outcome = reconcile_deficits(
            RunConfig::default(),
            date(2020, 1, 15),
            &reference,
            &inspections,
            &scenario_rows("10"),
        )
        .unwrap();

        assert_eq!(outcome.report.len(), 1);
        let entry = &outcome.report[0];
        assert_eq!(entry.taxpayer_id, "T1");
        assert_eq!(entry.effective_start_date, date(2010, 1, 1));
        assert_eq!(entry.total_deficit, 100.5);
        assert_eq!(
            entry.deficit_details,
            vec![DeficitDetail {
                worker_id: "W1".to_string(),
                year: 2023,
                deficit: 100.5
            }]
        );
        assert_eq!(outcome.summary.deficient_months, 1);
        assert_eq!(outcome.summary.taxpayers_reported, 1);
    }

    #[test]
    fn test_compliant_taxpayer_excluded() {
        let reference = vec![ReferenceEntry::new(2023, 1, 1000.0, 85.0)];
        let inspections: Vec<InspectionRecord> = vec![];

        let outcome = reconcile_deficits(
            RunConfig::default(),
            date(2020, 1, 15),
            &reference,
            &inspections,
            &scenario_rows("200"),
        )
        .unwrap();

        assert!(outcome.report.is_empty());
        assert_eq!(outcome.summary.taxpayers_seen, 1);
        assert_eq!(outcome.summary.compliant_months, 1);
    }

    #[test]
    fn test_progress_events_emitted() {
        let reference = vec![ReferenceEntry::new(2023, 1, 1000.0, 85.0)];
        let inspections: Vec<InspectionRecord> = vec![];
        let rows: Vec<RawContributionRow> = (0..5)
            .map(|i| {
                RawContributionRow::new("T1", format!("W{}", i), "2023")
                    .with_month(1, RawMonth::new("500", "10"))
            })
            .collect();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let config = RunConfig {
            progress_interval: 2,
            ..RunConfig::default()
        };

        DeficitReconciler::new(config)
            .as_of(date(2024, 1, 1))
            .with_progress(move |event: ProgressEvent| sink.lock().unwrap().push(event))
            .run(&reference, &inspections, &rows)
            .unwrap();

        let events = events.lock().unwrap();
        let counts: Vec<Option<u64>> = events.iter().map(|e| e.processed).collect();
        assert_eq!(counts, vec![Some(0), Some(2), Some(4), Some(5)]);
        assert_eq!(events[1].taxpayer_id.as_deref(), Some("T1"));
        assert!(events[3].message.starts_with("Processing completed"));
    }

    #[test]
    fn test_duplicate_reference_aborts_run() {
        let reference = vec![
            ReferenceEntry::new(2023, 1, 1000.0, 85.0),
            ReferenceEntry::new(2023, 1, 1200.0, 85.0),
        ];
        let inspections: Vec<InspectionRecord> = vec![];

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let result = DeficitReconciler::new(RunConfig::default())
            .as_of(date(2024, 1, 1))
            .with_progress(move |event: ProgressEvent| sink.lock().unwrap().push(event.message))
            .run(&reference, &inspections, &scenario_rows("10"));

        assert!(matches!(
            result,
            Err(ReconciliationError::DuplicateReferenceEntry { .. })
        ));
        assert!(errors.lock().unwrap().last().unwrap().starts_with("Error:"));
    }

    #[test]
    fn test_reconcile_records_directly() {
        let table = ReferenceTable::from_entries(
            vec![ReferenceEntry::new(2023, 1, 1000.0, 85.0)],
            DuplicateReferencePolicy::Reject,
        )
        .unwrap();
        let cutoff = InspectionCutoff::resolve(&[], date(2024, 1, 1), 120).unwrap();
        let records = vec![ContributionRecord::new("T1", "W1", 2023)
            .with_month(1, MonthlyAmounts::new(Some(500.0), Some(10.0)))];

        let report = reconcile_records(&table, &cutoff, &records, true);
        assert_eq!(report[0].total_deficit, 100.5);
    }
}
