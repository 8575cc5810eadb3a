//! Data providers feeding a reconciliation run.
//!
//! Each source performs one bulk read. A failed read is a precondition failure
//! and aborts the run before any aggregation starts.

use crate::error::{ReconciliationError, Result};
use crate::ingestion::{RawCell, RawContributionRow, RawMonth};
use crate::schema::{InspectionRecord, ReferenceEntry};
use crate::utils::{parse_month_code, parse_period_date, MONTH_NAMES};
use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, warn};
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;

pub trait ReferenceSource {
    /// `default_extraordinary` fills rows that leave the extraordinary amount empty.
    fn read_reference_entries(&self, default_extraordinary: f64) -> Result<Vec<ReferenceEntry>>;
}

pub trait InspectionSource {
    fn read_inspection_records(&self) -> Result<Vec<InspectionRecord>>;
}

pub trait ContributionSource {
    fn read_contribution_rows(&self) -> Result<Vec<RawContributionRow>>;
}

impl ReferenceSource for Vec<ReferenceEntry> {
    fn read_reference_entries(
        &self,
        _default_extraordinary: f64,
    ) -> Result<Vec<ReferenceEntry>> {
        Ok(self.clone())
    }
}

impl InspectionSource for Vec<InspectionRecord> {
    fn read_inspection_records(&self) -> Result<Vec<InspectionRecord>> {
        Ok(self.clone())
    }
}

impl ContributionSource for Vec<RawContributionRow> {
    fn read_contribution_rows(&self) -> Result<Vec<RawContributionRow>> {
        Ok(self.clone())
    }
}

#[derive(Debug, Clone)]
enum CsvInput {
    Path(PathBuf),
    Inline(String),
}

impl CsvInput {
    fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut contents = String::new();
        reader.read_to_string(&mut contents)?;
        Ok(CsvInput::Inline(contents))
    }

    fn describe(&self) -> String {
        match self {
            CsvInput::Path(path) => path.display().to_string(),
            CsvInput::Inline(_) => "<inline csv>".to_string(),
        }
    }

    /// Reads the header index and every record. Any failure is reported as an
    /// unavailable source.
    fn read_all(&self) -> Result<(HeaderIndex, Vec<StringRecord>)> {
        let unavailable = |e: csv::Error| ReconciliationError::unavailable(self.describe(), e);

        let mut builder = ReaderBuilder::new();
        builder.trim(Trim::All).flexible(true);

        let (headers, records) = match self {
            CsvInput::Path(path) => {
                let mut reader = builder.from_path(path).map_err(unavailable)?;
                let headers = reader.headers().map_err(unavailable)?.clone();
                let records = reader
                    .records()
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(unavailable)?;
                (headers, records)
            }
            CsvInput::Inline(contents) => {
                let mut reader = builder.from_reader(contents.as_bytes());
                let headers = reader.headers().map_err(unavailable)?.clone();
                let records = reader
                    .records()
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(unavailable)?;
                (headers, records)
            }
        };

        debug!("Read {} rows from {}", records.len(), self.describe());
        Ok((HeaderIndex::new(&headers), records))
    }
}

/// Case-insensitive column lookup.
struct HeaderIndex {
    columns: HashMap<String, usize>,
}

impl HeaderIndex {
    fn new(headers: &StringRecord) -> Self {
        let columns = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.trim().to_ascii_uppercase(), idx))
            .collect();
        Self { columns }
    }

    fn has(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    fn require(&self, column: &str, source: &CsvInput) -> Result<()> {
        if self.has(column) {
            Ok(())
        } else {
            Err(ReconciliationError::unavailable(
                source.describe(),
                format!("missing required column {}", column),
            ))
        }
    }

    fn text<'r>(&self, record: &'r StringRecord, column: &str) -> Option<&'r str> {
        self.columns
            .get(column)
            .and_then(|idx| record.get(*idx))
            .filter(|value| !value.is_empty())
    }

    fn cell(&self, record: &StringRecord, column: &str) -> Option<RawCell> {
        self.text(record, column).map(RawCell::from)
    }
}

/// Reference amounts keyed either by `ANIO` + `MES` or by an `ANIO_MES` code.
#[derive(Debug, Clone)]
pub struct CsvReferenceSource {
    input: CsvInput,
}

impl CsvReferenceSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            input: CsvInput::Path(path.into()),
        }
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(Self {
            input: CsvInput::from_reader(reader)?,
        })
    }
}

impl ReferenceSource for CsvReferenceSource {
    fn read_reference_entries(&self, default_extraordinary: f64) -> Result<Vec<ReferenceEntry>> {
        let (index, records) = self.input.read_all()?;
        index.require("REMUNERACION", &self.input)?;
        let by_code = index.has("ANIO_MES");
        if !by_code {
            index.require("ANIO", &self.input)?;
            index.require("MES", &self.input)?;
        }

        let mut entries = Vec::with_capacity(records.len());
        for (row, record) in records.iter().enumerate() {
            let malformed = |details: String| ReconciliationError::MalformedReferenceRow {
                row: row + 1,
                details,
            };

            let (year, month) = if by_code {
                let code = index
                    .text(record, "ANIO_MES")
                    .ok_or_else(|| malformed("empty ANIO_MES".to_string()))?;
                parse_month_code(code).map_err(|e| malformed(e.to_string()))?
            } else {
                let year = index
                    .cell(record, "ANIO")
                    .and_then(|c| c.as_year())
                    .ok_or_else(|| malformed("missing or invalid ANIO".to_string()))?;
                let month = index
                    .cell(record, "MES")
                    .and_then(|c| c.as_year())
                    .and_then(|m| u32::try_from(m).ok())
                    .ok_or_else(|| malformed("missing or invalid MES".to_string()))?;
                (year, month)
            };

            let base_remuneration = index
                .cell(record, "REMUNERACION")
                .and_then(|c| c.as_amount())
                .ok_or_else(|| malformed("missing or invalid REMUNERACION".to_string()))?;

            let extraordinary_contribution = match index.text(record, "AP_EXTRAORDINARIO") {
                None => default_extraordinary,
                Some(text) => RawCell::from(text)
                    .as_amount()
                    .ok_or_else(|| malformed(format!("invalid AP_EXTRAORDINARIO '{}'", text)))?,
            };

            entries.push(ReferenceEntry::new(
                year,
                month,
                base_remuneration,
                extraordinary_contribution,
            ));
        }

        Ok(entries)
    }
}

/// Inspection records with `CUIT` and `PERIODO_HASTA` columns.
#[derive(Debug, Clone)]
pub struct CsvInspectionSource {
    input: CsvInput,
}

impl CsvInspectionSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            input: CsvInput::Path(path.into()),
        }
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(Self {
            input: CsvInput::from_reader(reader)?,
        })
    }
}

impl InspectionSource for CsvInspectionSource {
    fn read_inspection_records(&self) -> Result<Vec<InspectionRecord>> {
        let (index, records) = self.input.read_all()?;
        index.require("CUIT", &self.input)?;
        index.require("PERIODO_HASTA", &self.input)?;

        let mut inspections = Vec::with_capacity(records.len());
        for (row, record) in records.iter().enumerate() {
            let taxpayer = index.cell(record, "CUIT").and_then(|c| c.as_key());
            let period_end = index
                .text(record, "PERIODO_HASTA")
                .and_then(|text| parse_period_date(text).ok());

            match (taxpayer, period_end) {
                (Some(taxpayer_id), Some(period_end)) => {
                    inspections.push(InspectionRecord::new(taxpayer_id, period_end));
                }
                _ => warn!("Skipping inspection row {}: missing taxpayer or period", row + 1),
            }
        }

        Ok(inspections)
    }
}

/// Column names of the yearly contribution listing.
#[derive(Debug, Clone)]
pub struct ContributionColumns {
    pub taxpayer: String,
    pub worker: String,
    pub year: String,
    pub remuneration_prefix: String,
    pub contribution_prefix: String,
    pub additional_prefix: String,
}

impl Default for ContributionColumns {
    fn default() -> Self {
        Self {
            taxpayer: "CUIT".to_string(),
            worker: "CUIL".to_string(),
            year: "ANIO".to_string(),
            remuneration_prefix: "REMUNERACION_".to_string(),
            contribution_prefix: "APORTE_".to_string(),
            additional_prefix: "APORTE_ADIC_OS_".to_string(),
        }
    }
}

/// One row per taxpayer, worker and year with twelve monthly column groups.
#[derive(Debug, Clone)]
pub struct CsvContributionSource {
    input: CsvInput,
    columns: ContributionColumns,
}

impl CsvContributionSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            input: CsvInput::Path(path.into()),
            columns: ContributionColumns::default(),
        }
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(Self {
            input: CsvInput::from_reader(reader)?,
            columns: ContributionColumns::default(),
        })
    }

    pub fn with_columns(mut self, columns: ContributionColumns) -> Self {
        self.columns = columns;
        self
    }
}

impl ContributionSource for CsvContributionSource {
    fn read_contribution_rows(&self) -> Result<Vec<RawContributionRow>> {
        let (index, records) = self.input.read_all()?;
        let cols = &self.columns;
        let taxpayer_col = cols.taxpayer.to_ascii_uppercase();
        let worker_col = cols.worker.to_ascii_uppercase();
        let year_col = cols.year.to_ascii_uppercase();
        index.require(&taxpayer_col, &self.input)?;
        index.require(&worker_col, &self.input)?;
        index.require(&year_col, &self.input)?;

        let month_columns: Vec<[String; 3]> = MONTH_NAMES
            .iter()
            .map(|name| {
                [
                    format!("{}{}", cols.remuneration_prefix, name).to_ascii_uppercase(),
                    format!("{}{}", cols.contribution_prefix, name).to_ascii_uppercase(),
                    format!("{}{}", cols.additional_prefix, name).to_ascii_uppercase(),
                ]
            })
            .collect();

        let rows = records
            .iter()
            .map(|record| RawContributionRow {
                taxpayer_id: index.cell(record, &taxpayer_col),
                worker_id: index.cell(record, &worker_col),
                year: index.cell(record, &year_col),
                months: month_columns
                    .iter()
                    .map(|[remuneration, contribution, additional]| RawMonth {
                        remuneration: index.cell(record, remuneration),
                        contribution: index.cell(record, contribution),
                        additional_contribution: index.cell(record, additional),
                    })
                    .collect(),
            })
            .collect();

        Ok(rows)
    }
}
