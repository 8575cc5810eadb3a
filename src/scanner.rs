use crate::cutoff::InspectionCutoff;
use crate::schema::{ContributionRecord, MonthlyAmounts, MonthlyObservation};
use crate::utils::first_day_of_month;
use chrono::NaiveDate;

/// Turns validated contribution records into per-month observations, gated by
/// each taxpayer's effective start date.
#[derive(Debug, Clone, Copy)]
pub struct ContributionScanner<'a> {
    cutoff: &'a InspectionCutoff,
    include_additional: bool,
}

impl<'a> ContributionScanner<'a> {
    pub fn new(cutoff: &'a InspectionCutoff, include_additional: bool) -> Self {
        Self {
            cutoff,
            include_additional,
        }
    }

    /// Observations of a single row, January first. Each month yields at most one.
    pub fn observations<'r>(
        &self,
        record: &'r ContributionRecord,
    ) -> impl Iterator<Item = MonthlyObservation<'r>> + 'r {
        let start = self.cutoff.start_for(&record.taxpayer_id);
        let include_additional = self.include_additional;

        record
            .months
            .iter()
            .zip(1u32..)
            .filter_map(move |(amounts, month)| {
                observe_month(record, month, amounts, start, include_additional)
            })
    }

    /// Lazy single pass over `records`; the cutoff is looked up per row.
    pub fn scan<'r, I>(&self, records: I) -> impl Iterator<Item = MonthlyObservation<'r>> + 'r
    where
        I: IntoIterator<Item = &'r ContributionRecord>,
        I::IntoIter: 'r,
        'a: 'r,
    {
        let cutoff: &'r InspectionCutoff = self.cutoff;
        let scanner = ContributionScanner::new(cutoff, self.include_additional);
        records
            .into_iter()
            .flat_map(move |record| scanner.observations(record))
    }
}

fn observe_month<'r>(
    record: &'r ContributionRecord,
    month: u32,
    amounts: &MonthlyAmounts,
    start: NaiveDate,
    include_additional: bool,
) -> Option<MonthlyObservation<'r>> {
    let period = first_day_of_month(record.year, month).ok()?;
    if period < start {
        return None;
    }

    let remuneration = amounts.remuneration?;
    if remuneration <= 0.0 {
        return None;
    }
    let contribution = amounts.contribution?;

    let additional = if include_additional {
        amounts.additional_contribution.unwrap_or(0.0)
    } else {
        0.0
    };

    Some(MonthlyObservation {
        taxpayer_id: &record.taxpayer_id,
        worker_id: &record.worker_id,
        year: record.year,
        month,
        reported_contribution: contribution + additional,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::InspectionRecord;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn full_year(taxpayer: &str, year: i32) -> ContributionRecord {
        let mut record = ContributionRecord::new(taxpayer, "W1", year);
        for month in 1..=12 {
            record = record.with_month(month, MonthlyAmounts::new(Some(500.0), Some(10.0)));
        }
        record
    }

    #[test]
    fn test_months_before_cutoff_are_skipped() {
        let inspections = vec![InspectionRecord::new("T1", date(2023, 6, 30))];
        let cutoff = InspectionCutoff::resolve(&inspections, date(2026, 10, 14), 120).unwrap();
        let scanner = ContributionScanner::new(&cutoff, true);

        let record = full_year("T1", 2023);
        let months: Vec<u32> = scanner.observations(&record).map(|o| o.month).collect();
        assert_eq!(months, vec![7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_default_cutoff_for_unknown_taxpayer() {
        let cutoff = InspectionCutoff::resolve(&[], date(2026, 10, 14), 120).unwrap();
        let scanner = ContributionScanner::new(&cutoff, true);

        let record = full_year("T9", 2016);
        let months: Vec<u32> = scanner.observations(&record).map(|o| o.month).collect();
        assert_eq!(months, vec![10, 11, 12]);
    }

    #[test]
    fn test_presence_rules() {
        let cutoff = InspectionCutoff::resolve(&[], date(2024, 1, 1), 120).unwrap();
        let scanner = ContributionScanner::new(&cutoff, true);

        let record = ContributionRecord::new("T1", "W1", 2023)
            .with_month(1, MonthlyAmounts::new(Some(500.0), Some(10.0)))
            .with_month(2, MonthlyAmounts::new(None, Some(10.0)))
            .with_month(3, MonthlyAmounts::new(Some(0.0), Some(10.0)))
            .with_month(4, MonthlyAmounts::new(Some(-20.0), Some(10.0)))
            .with_month(5, MonthlyAmounts::new(Some(500.0), None))
            .with_month(6, MonthlyAmounts::new(Some(500.0), Some(0.0)));

        let observations: Vec<_> = scanner.observations(&record).collect();
        let months: Vec<u32> = observations.iter().map(|o| o.month).collect();
        assert_eq!(months, vec![1, 6]);
        assert_eq!(observations[1].reported_contribution, 0.0);
    }

    #[test]
    fn test_additional_contribution_is_added() {
        let cutoff = InspectionCutoff::resolve(&[], date(2024, 1, 1), 120).unwrap();
        let record = ContributionRecord::new("T1", "W1", 2023).with_month(
            2,
            MonthlyAmounts::new(Some(500.0), Some(10.0)).with_additional(Some(4.5)),
        );

        let with: Vec<_> = ContributionScanner::new(&cutoff, true)
            .observations(&record)
            .collect();
        assert!((with[0].reported_contribution - 14.5).abs() < 1e-9);

        let without: Vec<_> = ContributionScanner::new(&cutoff, false)
            .observations(&record)
            .collect();
        assert!((without[0].reported_contribution - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_scan_is_lazy_over_rows() {
        let cutoff = InspectionCutoff::resolve(&[], date(2024, 1, 1), 120).unwrap();
        let scanner = ContributionScanner::new(&cutoff, true);
        let records = vec![full_year("T1", 2022), full_year("T2", 2023)];

        let mut scan = scanner.scan(&records);
        let first = scan.next().unwrap();
        assert_eq!((first.taxpayer_id, first.year, first.month), ("T1", 2022, 1));
        assert_eq!(scan.count(), 23);
    }
}
