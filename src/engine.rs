use crate::cutoff::InspectionCutoff;
use crate::error::{ReconciliationError, Result};
use crate::ingestion::{validate_row, RawContributionRow};
use crate::progress::{ProgressEvent, ProgressObserver};
use crate::reference::ReferenceTable;
use crate::scanner::ContributionScanner;
use crate::schema::{MonthlyObservation, RunConfig};
use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerYear {
    pub worker_id: String,
    pub year: i32,
}

/// Accumulated deficits of one taxpayer. `total_deficit` is maintained
/// incrementally and always equals the sum of the buckets.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxpayerAggregate {
    pub taxpayer_id: String,
    pub effective_start_date: NaiveDate,
    pub per_worker_year: BTreeMap<WorkerYear, f64>,
    pub total_deficit: f64,
}

impl TaxpayerAggregate {
    pub fn new(taxpayer_id: impl Into<String>, effective_start_date: NaiveDate) -> Self {
        Self {
            taxpayer_id: taxpayer_id.into(),
            effective_start_date,
            per_worker_year: BTreeMap::new(),
            total_deficit: 0.0,
        }
    }

    pub fn add_deficit(&mut self, worker_id: &str, year: i32, amount: f64) {
        debug_assert!(amount > 0.0, "deficits are strictly positive, got {}", amount);

        let key = WorkerYear {
            worker_id: worker_id.to_string(),
            year,
        };
        *self.per_worker_year.entry(key).or_insert(0.0) += amount;
        self.total_deficit += amount;
    }
}

pub type AggregateMap = BTreeMap<String, TaxpayerAggregate>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationStats {
    pub rows_read: u64,
    pub rows_rejected: u64,
    pub observations: u64,
    pub deficient_months: u64,
    pub compliant_months: u64,
    pub unassessable_months: u64,
}

impl AggregationStats {
    fn merge(&mut self, other: &AggregationStats) {
        self.rows_read += other.rows_read;
        self.rows_rejected += other.rows_rejected;
        self.observations += other.observations;
        self.deficient_months += other.deficient_months;
        self.compliant_months += other.compliant_months;
        self.unassessable_months += other.unassessable_months;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MonthOutcome {
    Deficient(f64),
    Compliant,
    /// No reference entry exists for the month.
    Unassessable,
}

/// Compares observations against the reference table and accumulates the
/// positive differences per taxpayer. Performs no I/O.
pub struct DeficitAggregator<'a> {
    reference: &'a ReferenceTable,
    cutoff: &'a InspectionCutoff,
    aggregates: AggregateMap,
    stats: AggregationStats,
}

impl<'a> DeficitAggregator<'a> {
    pub fn new(reference: &'a ReferenceTable, cutoff: &'a InspectionCutoff) -> Self {
        Self {
            reference,
            cutoff,
            aggregates: BTreeMap::new(),
            stats: AggregationStats::default(),
        }
    }

    pub fn observe(&mut self, observation: &MonthlyObservation<'_>) -> MonthOutcome {
        self.stats.observations += 1;

        let aggregate = self
            .aggregates
            .entry(observation.taxpayer_id.to_string())
            .or_insert_with(|| {
                TaxpayerAggregate::new(
                    observation.taxpayer_id,
                    self.cutoff.start_for(observation.taxpayer_id),
                )
            });

        let Some(obligation) = self.reference.obligation(observation.year, observation.month)
        else {
            self.stats.unassessable_months += 1;
            return MonthOutcome::Unassessable;
        };

        // Months are floored at zero individually, never netted against surplus months
        let difference = obligation - observation.reported_contribution;
        if difference <= 0.0 {
            self.stats.compliant_months += 1;
            return MonthOutcome::Compliant;
        }

        debug!(
            "Deficit found - taxpayer: {}, worker: {}, period: {:02}/{}, reported: {}, reference: {}, difference: {}",
            observation.taxpayer_id,
            observation.worker_id,
            observation.month,
            observation.year,
            observation.reported_contribution,
            obligation,
            difference
        );
        aggregate.add_deficit(observation.worker_id, observation.year, difference);
        self.stats.deficient_months += 1;
        MonthOutcome::Deficient(difference)
    }

    pub fn observe_all<'o>(
        &mut self,
        observations: impl IntoIterator<Item = MonthlyObservation<'o>>,
    ) {
        for observation in observations {
            self.observe(&observation);
        }
    }

    pub fn stats(&self) -> &AggregationStats {
        &self.stats
    }

    pub fn finish(self) -> (AggregateMap, AggregationStats) {
        (self.aggregates, self.stats)
    }
}

/// Shared flag checked between rows. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Everything one aggregation pass needs besides the rows themselves.
pub struct AggregationContext<'a> {
    pub reference: &'a ReferenceTable,
    pub cutoff: &'a InspectionCutoff,
    pub config: &'a RunConfig,
    pub progress: &'a dyn ProgressObserver,
    pub cancel: &'a CancellationToken,
}

/// Validates, scans and aggregates rows in order. Malformed rows are skipped.
pub fn aggregate_rows<'r>(
    ctx: &AggregationContext<'_>,
    rows: impl IntoIterator<Item = &'r RawContributionRow>,
) -> Result<(AggregateMap, AggregationStats)> {
    aggregate_partition(ctx, rows, None)
}

/// Row loop shared by the sequential and sharded drivers. Progress counts are
/// local to the partition and tagged with `shard` when one is given.
fn aggregate_partition<'r>(
    ctx: &AggregationContext<'_>,
    rows: impl IntoIterator<Item = &'r RawContributionRow>,
    shard: Option<usize>,
) -> Result<(AggregateMap, AggregationStats)> {
    let scanner = ContributionScanner::new(ctx.cutoff, ctx.config.include_additional_contribution);
    let mut aggregator = DeficitAggregator::new(ctx.reference, ctx.cutoff);
    let mut rows_read: u64 = 0;
    let mut rows_rejected: u64 = 0;

    for row in rows {
        if ctx.cancel.is_cancelled() {
            return Err(ReconciliationError::Cancelled {
                processed: rows_read,
            });
        }
        rows_read += 1;

        let taxpayer_id = match validate_row(row) {
            Ok(record) => {
                aggregator.observe_all(scanner.observations(&record));
                Some(record.taxpayer_id)
            }
            Err(reason) => {
                rows_rejected += 1;
                warn!("Skipping contribution row {}: {}", rows_read, reason);
                None
            }
        };

        if rows_read % ctx.config.progress_interval == 0 {
            let mut event = ProgressEvent::new(format!("Processing rows... {}", rows_read))
                .with_processed(rows_read);
            if let Some(taxpayer_id) = taxpayer_id {
                event = event.with_taxpayer(taxpayer_id);
            }
            if let Some(shard) = shard {
                event = event.with_shard(shard);
            }
            ctx.progress.notify(event);
        }
    }

    let (aggregates, mut stats) = aggregator.finish();
    stats.rows_read = rows_read;
    stats.rows_rejected = rows_rejected;
    Ok((aggregates, stats))
}

fn shard_of(row: &RawContributionRow, shards: usize) -> usize {
    let Some(key) = row.taxpayer_id.as_ref().and_then(|cell| cell.as_key()) else {
        return 0;
    };
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

/// Splits rows into taxpayer-keyed shards, aggregates each on its own thread and
/// merges the disjoint results. Falls back to [`aggregate_rows`] for one shard.
/// Progress events from shards carry per-shard counts and their shard index.
pub fn aggregate_sharded(
    ctx: &AggregationContext<'_>,
    rows: &[RawContributionRow],
) -> Result<(AggregateMap, AggregationStats)> {
    let shards = ctx.config.shards.max(1);
    if shards == 1 {
        return aggregate_rows(ctx, rows);
    }

    let mut partitions: Vec<Vec<&RawContributionRow>> = vec![Vec::new(); shards];
    for row in rows {
        partitions[shard_of(row, shards)].push(row);
    }

    let results: Vec<Result<(AggregateMap, AggregationStats)>> = std::thread::scope(|scope| {
        let handles: Vec<_> = partitions
            .iter()
            .enumerate()
            .map(|(shard, partition)| {
                let rows = partition.iter().copied();
                scope.spawn(move || aggregate_partition(ctx, rows, Some(shard)))
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    Err(ReconciliationError::InvariantViolation(
                        "aggregation shard panicked".to_string(),
                    ))
                })
            })
            .collect()
    });

    let mut merged = BTreeMap::new();
    let mut stats = AggregationStats::default();
    for result in results {
        let (aggregates, shard_stats) = result?;
        for (taxpayer_id, aggregate) in aggregates {
            if merged.insert(taxpayer_id.clone(), aggregate).is_some() {
                return Err(ReconciliationError::InvariantViolation(format!(
                    "taxpayer {} aggregated in more than one shard",
                    taxpayer_id
                )));
            }
        }
        stats.merge(&shard_stats);
    }

    Ok((merged, stats))
}
