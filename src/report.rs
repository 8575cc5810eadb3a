use crate::engine::{AggregateMap, TaxpayerAggregate};
use crate::error::{ReconciliationError, Result};
use crate::schema::{DeficitDetail, ReportEntry};
use crate::utils::round_to_cents;
use serde::Serialize;
use std::collections::HashSet;
use std::io::Write;

/// Flattens aggregates into the taxpayer-ordered report. Only strictly positive
/// amounts survive, and rounding happens here, on the unrounded sums.
pub fn compact(aggregates: &AggregateMap) -> Vec<ReportEntry> {
    aggregates.values().filter_map(compact_taxpayer).collect()
}

fn compact_taxpayer(aggregate: &TaxpayerAggregate) -> Option<ReportEntry> {
    debug_assert!(
        aggregate.total_deficit >= 0.0,
        "negative total deficit for {}",
        aggregate.taxpayer_id
    );

    let total_deficit = round_to_cents(aggregate.total_deficit);
    if aggregate.total_deficit <= 0.0 || total_deficit <= 0.0 {
        return None;
    }

    debug_assert!(
        (aggregate.total_deficit - aggregate.per_worker_year.values().sum::<f64>()).abs()
            <= 1e-6 * aggregate.total_deficit.max(1.0),
        "total deficit diverged from bucket sum for {}",
        aggregate.taxpayer_id
    );

    let deficit_details: Vec<DeficitDetail> = aggregate
        .per_worker_year
        .iter()
        .filter(|(_, deficit)| **deficit > 0.0)
        .filter_map(|(key, deficit)| {
            let deficit = round_to_cents(*deficit);
            (deficit > 0.0).then(|| DeficitDetail {
                worker_id: key.worker_id.clone(),
                year: key.year,
                deficit,
            })
        })
        .collect();

    // Sub-cent buckets can sum to a reportable total with nothing left to list
    if deficit_details.is_empty() {
        return None;
    }

    Some(ReportEntry {
        taxpayer_id: aggregate.taxpayer_id.clone(),
        effective_start_date: aggregate.effective_start_date,
        deficit_details,
        total_deficit,
    })
}

/// Re-checks the output invariants of a compacted report.
pub fn verify_report(report: &[ReportEntry]) -> Result<()> {
    for pair in report.windows(2) {
        if pair[0].taxpayer_id >= pair[1].taxpayer_id {
            return Err(ReconciliationError::InvariantViolation(format!(
                "taxpayers out of order: {} before {}",
                pair[0].taxpayer_id, pair[1].taxpayer_id
            )));
        }
    }

    for entry in report {
        if entry.deficit_details.is_empty() {
            return Err(ReconciliationError::InvariantViolation(format!(
                "taxpayer {} reported without deficit details",
                entry.taxpayer_id
            )));
        }
        if entry.total_deficit <= 0.0 {
            return Err(ReconciliationError::InvariantViolation(format!(
                "taxpayer {} reported with non-positive total {}",
                entry.taxpayer_id, entry.total_deficit
            )));
        }

        let mut seen = HashSet::new();
        for detail in &entry.deficit_details {
            if detail.deficit <= 0.0 {
                return Err(ReconciliationError::InvariantViolation(format!(
                    "taxpayer {} worker {} year {} has non-positive deficit {}",
                    entry.taxpayer_id, detail.worker_id, detail.year, detail.deficit
                )));
            }
            if !seen.insert((detail.worker_id.as_str(), detail.year)) {
                return Err(ReconciliationError::InvariantViolation(format!(
                    "taxpayer {} repeats bucket {}/{}",
                    entry.taxpayer_id, detail.worker_id, detail.year
                )));
            }
        }

        // Each rounded bucket may be up to half a cent above its exact value
        let detail_sum: f64 = entry.deficit_details.iter().map(|d| d.deficit).sum();
        let slack = 0.005 * (entry.deficit_details.len() as f64 + 1.0) + 1e-9;
        if entry.total_deficit + slack < detail_sum {
            return Err(ReconciliationError::InvariantViolation(format!(
                "taxpayer {} total {} is below its details sum {}",
                entry.taxpayer_id, entry.total_deficit, detail_sum
            )));
        }
    }

    Ok(())
}

pub fn report_to_json(report: &[ReportEntry]) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

#[derive(Serialize)]
struct ReportCsvRow<'a> {
    taxpayer_id: &'a str,
    effective_start_date: String,
    worker_id: &'a str,
    year: i32,
    deficit: String,
    total_deficit: String,
}

/// Writes one CSV row per taxpayer, worker and year.
pub fn write_report_csv<W: Write>(report: &[ReportEntry], writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);

    for entry in report {
        for detail in &entry.deficit_details {
            csv.serialize(ReportCsvRow {
                taxpayer_id: &entry.taxpayer_id,
                effective_start_date: entry.effective_start_date.format("%Y-%m-%d").to_string(),
                worker_id: &detail.worker_id,
                year: detail.year,
                deficit: format!("{:.2}", detail.deficit),
                total_deficit: format!("{:.2}", entry.total_deficit),
            })?;
        }
    }

    csv.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2014, 1, 1).unwrap()
    }

    fn aggregate(taxpayer: &str, buckets: &[(&str, i32, f64)]) -> TaxpayerAggregate {
        let mut aggregate = TaxpayerAggregate::new(taxpayer, start());
        for (worker, year, amount) in buckets {
            aggregate.add_deficit(worker, *year, *amount);
        }
        aggregate
    }

    #[test]
    fn test_zero_total_taxpayers_are_excluded() {
        let mut aggregates = AggregateMap::new();
        aggregates.insert("T2".to_string(), aggregate("T2", &[("W1", 2023, 100.5)]));
        aggregates.insert("T1".to_string(), aggregate("T1", &[]));

        let report = compact(&aggregates);
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].taxpayer_id, "T2");
        assert_eq!(report[0].total_deficit, 100.5);
        verify_report(&report).unwrap();
    }

    #[test]
    fn test_total_rounds_unrounded_sum() {
        let mut aggregates = AggregateMap::new();
        aggregates.insert(
            "T1".to_string(),
            aggregate("T1", &[("W1", 2023, 0.006), ("W2", 2023, 0.006)]),
        );

        let report = compact(&aggregates);
        let entry = &report[0];
        let detail_sum: f64 = entry.deficit_details.iter().map(|d| d.deficit).sum();
        assert_eq!(entry.total_deficit, 0.01);
        assert!((detail_sum - 0.02).abs() < 1e-9);
        verify_report(&report).unwrap();
    }

    #[test]
    fn test_sub_cent_buckets_are_dropped() {
        let mut aggregates = AggregateMap::new();
        aggregates.insert(
            "T1".to_string(),
            aggregate("T1", &[("W1", 2022, 0.004), ("W1", 2023, 12.343)]),
        );
        aggregates.insert("T2".to_string(), aggregate("T2", &[("W1", 2023, 0.001)]));

        let report = compact(&aggregates);
        assert_eq!(report.len(), 1);
        assert_eq!(
            report[0].deficit_details,
            vec![DeficitDetail {
                worker_id: "W1".to_string(),
                year: 2023,
                deficit: 12.34
            }]
        );
        assert_eq!(report[0].total_deficit, 12.35);
    }

    #[test]
    fn test_taxpayer_without_listable_buckets_is_dropped() {
        let mut aggregates = AggregateMap::new();
        aggregates.insert(
            "T1".to_string(),
            aggregate("T1", &[("W1", 2023, 0.003), ("W2", 2023, 0.003)]),
        );
        assert_eq!(round_to_cents(aggregates["T1"].total_deficit), 0.01);

        assert!(compact(&aggregates).is_empty());
    }

    #[test]
    fn test_verify_report_detects_violations() {
        let entry = ReportEntry {
            taxpayer_id: "T1".to_string(),
            effective_start_date: start(),
            deficit_details: vec![DeficitDetail {
                worker_id: "W1".to_string(),
                year: 2023,
                deficit: 5.0,
            }],
            total_deficit: 5.0,
        };
        verify_report(std::slice::from_ref(&entry)).unwrap();

        let unordered = vec![entry.clone(), entry.clone()];
        assert!(verify_report(&unordered).is_err());

        let mut zero = entry.clone();
        zero.total_deficit = 0.0;
        assert!(verify_report(&[zero]).is_err());

        let mut repeated = entry.clone();
        repeated.deficit_details.push(repeated.deficit_details[0].clone());
        repeated.total_deficit = 10.0;
        assert!(verify_report(&[repeated]).is_err());

        let mut short = entry.clone();
        short.total_deficit = 1.0;
        assert!(verify_report(&[short]).is_err());

        let mut empty = entry;
        empty.deficit_details.clear();
        assert!(matches!(
            verify_report(&[empty]),
            Err(ReconciliationError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_csv_export() {
        let mut aggregates = AggregateMap::new();
        aggregates.insert(
            "T1".to_string(),
            aggregate("T1", &[("W1", 2023, 100.5), ("W2", 2022, 3.333)]),
        );
        let report = compact(&aggregates);

        let mut buffer = Vec::new();
        write_report_csv(&report, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "taxpayer_id,effective_start_date,worker_id,year,deficit,total_deficit"
        );
        assert_eq!(lines[1], "T1,2014-01-01,W1,2023,100.50,103.83");
        assert_eq!(lines[2], "T1,2014-01-01,W2,2022,3.33,103.83");
    }

    #[test]
    fn test_json_export() {
        let mut aggregates = AggregateMap::new();
        aggregates.insert("T1".to_string(), aggregate("T1", &[("W1", 2023, 100.5)]));
        let json = report_to_json(&compact(&aggregates)).unwrap();
        assert!(json.contains("\"taxpayer_id\": \"T1\""));
        assert!(json.contains("\"effective_start_date\": \"2014-01-01\""));
    }
}
