use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{DatasetDescriptor, RawRecord, Scalar, TransformVariant};
use crate::error::EtlError;
use crate::frame::Frame;
use crate::gate::{Stage, StageResult, gate};
use crate::staging::{STAGING_ID_COLUMN, StagingStore};
use crate::warehouse::RelationalStore;

pub const COUNT_COLUMN: &str = "count";
pub const YEAR_COLUMN: &str = "year";
pub const QUARTER_NUMBER_COLUMN: &str = "quarter_number";

const DIVISION_PERIOD_COLUMN: &str = "Quarter";

static YEAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})").expect("year pattern is valid"));
static QUARTER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(Q[1-4])").expect("quarter pattern is valid"));

impl TransformVariant {
    /// Source column → canonical column. Every source column must be present.
    pub fn rename_table(self) -> &'static [(&'static str, &'static str)] {
        match self {
            TransformVariant::OffenceByDivision => &[
                ("Quarter", "quarter"),
                ("Garda Division", "garda_division"),
                ("Type of Offence", "offence_type"),
                ("value", "count"),
                ("STATISTIC", "statistic"),
            ],
            TransformVariant::OffenceByAge => &[
                ("Statistic", "statistic"),
                ("Year", "year"),
                ("Offence Group", "offence_group"),
                (
                    "Age of Suspected Offender at Time of Offence",
                    "suspected_offender_age",
                ),
                ("value", "count"),
            ],
        }
    }

    /// Column layout of the cleaned table.
    pub fn schema(self) -> &'static [&'static str] {
        match self {
            TransformVariant::OffenceByDivision => &[
                "statistic",
                "quarter",
                YEAR_COLUMN,
                QUARTER_NUMBER_COLUMN,
                "garda_division",
                "offence_type",
                COUNT_COLUMN,
            ],
            TransformVariant::OffenceByAge => &[
                "statistic",
                YEAR_COLUMN,
                "offence_group",
                "suspected_offender_age",
                COUNT_COLUMN,
            ],
        }
    }

    /// Value that replaces a missing cell in `column`.
    pub fn fill_value(self, column: &str) -> Scalar {
        match column {
            COUNT_COLUMN | YEAR_COLUMN => Scalar::Integer(0),
            _ => Scalar::Text(String::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cleaned {
    pub frame: Frame,
    pub filled: usize,
    pub dropped: usize,
    pub duplicates: usize,
}

/// Reshapes staged records into the variant's fixed schema.
///
/// Missing cells are zero-filled, `count` is coerced to a number and rows whose
/// count is non-numeric or negative are dropped. Exact duplicates are removed
/// last so the output never holds two identical rows.
pub fn clean(variant: TransformVariant, records: &[RawRecord]) -> Result<Cleaned, EtlError> {
    let mut frame = Frame::from_records(records);
    frame.drop_column(STAGING_ID_COLUMN);

    if variant == TransformVariant::OffenceByDivision {
        derive_period_fields(&mut frame)?;
    }

    for (from, to) in variant.rename_table() {
        frame.rename_column(from, to)?;
    }

    if variant == TransformVariant::OffenceByAge {
        frame.map_column(YEAR_COLUMN, |value| Ok(parse_year(value)))?;
    }

    let extra: Vec<String> = frame
        .columns()
        .iter()
        .filter(|column| !variant.schema().contains(&column.as_str()))
        .cloned()
        .collect();
    if !extra.is_empty() {
        debug!(%variant, columns = ?extra, "dropping columns outside the schema");
    }
    frame.select(variant.schema())?;

    let filled = frame.fill_nulls(|column| variant.fill_value(column));

    frame.map_column(COUNT_COLUMN, |value| {
        Ok(value.to_number().unwrap_or(Scalar::Null))
    })?;
    let count_index = frame.require_column(COUNT_COLUMN)?;
    let dropped = frame.retain_rows(|row| {
        row[count_index]
            .as_f64()
            .is_some_and(|count| count >= 0.0)
    });

    let duplicates = frame.dedup_rows();

    Ok(Cleaned {
        frame,
        filled,
        dropped,
        duplicates,
    })
}

/// Adds `year` and `quarter_number` parsed from the combined period column
/// (e.g. `2021Q3`) and orders rows chronologically.
fn derive_period_fields(frame: &mut Frame) -> Result<(), EtlError> {
    let period = frame.require_column(DIVISION_PERIOD_COLUMN)?;
    frame.derive_column(YEAR_COLUMN, |_, row| {
        extract_year(DIVISION_PERIOD_COLUMN, &row[period])
    })?;
    frame.derive_column(QUARTER_NUMBER_COLUMN, |_, row| {
        Ok(match &row[period] {
            Scalar::Null => Scalar::Null,
            value => QUARTER_PATTERN
                .captures(&value.to_string())
                .map(|caps| Scalar::Text(caps[1].to_string()))
                .unwrap_or(Scalar::Null),
        })
    })?;
    frame.sort_by_columns(&[YEAR_COLUMN, QUARTER_NUMBER_COLUMN])
}

/// Null when the cell holds no four-digit year, so the fill step zeroes it.
fn parse_year(value: &Scalar) -> Scalar {
    match value {
        Scalar::Null => Scalar::Null,
        other => YEAR_PATTERN
            .captures(&other.to_string())
            .and_then(|caps| caps[1].parse::<i64>().ok())
            .map(Scalar::Integer)
            .unwrap_or(Scalar::Null),
    }
}

fn extract_year(field: &str, value: &Scalar) -> Result<Scalar, EtlError> {
    let text = match value {
        Scalar::Null => String::new(),
        other => other.to_string(),
    };
    YEAR_PATTERN
        .captures(&text)
        .and_then(|caps| caps[1].parse::<i64>().ok())
        .map(Scalar::Integer)
        .ok_or_else(|| EtlError::Derivation {
            field: format!("year ({field})"),
            value: text,
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformSummary {
    pub target_table: String,
    pub staged: usize,
    pub rows: usize,
}

pub struct TransformStage<'a> {
    staging: &'a dyn StagingStore,
    warehouse: &'a dyn RelationalStore,
}

impl<'a> TransformStage<'a> {
    pub fn new(staging: &'a dyn StagingStore, warehouse: &'a dyn RelationalStore) -> Self {
        Self { staging, warehouse }
    }

    pub fn run(&self, descriptor: &DatasetDescriptor, upstream: StageResult) -> StageResult {
        StageResult::from_outcome(
            Stage::Transform,
            descriptor.staging_key(),
            self.try_run(descriptor, upstream),
        )
    }

    pub fn try_run(
        &self,
        descriptor: &DatasetDescriptor,
        upstream: StageResult,
    ) -> Result<TransformSummary, EtlError> {
        let key = descriptor.staging_key();
        let table = descriptor.target_table();
        gate(upstream, Stage::Transform, key)?;

        let records = self.staging.find_all(key)?;
        info!(staging_key = key, table, records = records.len(), variant = %descriptor.variant(), "starting transformations");

        let cleaned = clean(descriptor.variant(), &records)?;
        info!(
            table,
            rows = cleaned.frame.len(),
            filled = cleaned.filled,
            dropped = cleaned.dropped,
            duplicates = cleaned.duplicates,
            "finished cleaning"
        );

        self.warehouse.replace_table(table, &cleaned.frame)?;
        info!(table, rows = cleaned.frame.len(), "stored cleaned table");

        Ok(TransformSummary {
            target_table: table.to_string(),
            staged: records.len(),
            rows: cleaned.frame.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn division(quarter: &str, division: &str, value: Scalar) -> RawRecord {
        [
            ("STATISTIC", Scalar::from("Recorded crime incidents")),
            ("Quarter", Scalar::from(quarter)),
            ("Garda Division", Scalar::from(division)),
            ("Type of Offence", Scalar::from("Burglary")),
            ("value", value),
            (STAGING_ID_COLUMN, Scalar::from("k:0")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn division_rows_are_sorted_by_period() {
        let records = vec![
            division("2021Q3", "Cork City", Scalar::Integer(4)),
            division("2003Q2", "Galway", Scalar::Integer(2)),
            division("2021Q1", "Cork City", Scalar::Integer(3)),
            division("2003Q1", "Galway", Scalar::Integer(1)),
        ];
        let cleaned = clean(TransformVariant::OffenceByDivision, &records).unwrap();
        let frame = cleaned.frame;
        assert_eq!(frame.columns(), TransformVariant::OffenceByDivision.schema());
        let counts: Vec<&Scalar> = frame.column_values(COUNT_COLUMN).unwrap().collect();
        assert_eq!(
            counts,
            vec![
                &Scalar::Integer(1),
                &Scalar::Integer(2),
                &Scalar::Integer(3),
                &Scalar::Integer(4)
            ]
        );
    }

    #[test]
    fn nulls_are_zero_filled_and_invalid_counts_dropped() {
        let records = vec![
            division("2021Q1", "Cork City", Scalar::Null),
            division("2021Q1", "Galway", Scalar::from("n/a")),
            division("2021Q1", "Mayo", Scalar::Integer(-2)),
            division("2021Q1", "Kerry", Scalar::from("12")),
        ];
        let cleaned = clean(TransformVariant::OffenceByDivision, &records).unwrap();
        assert_eq!(cleaned.frame.len(), 2);
        assert_eq!(cleaned.dropped, 2);
        let counts: Vec<&Scalar> = cleaned.frame.column_values(COUNT_COLUMN).unwrap().collect();
        assert_eq!(counts, vec![&Scalar::Integer(0), &Scalar::Integer(12)]);
    }

    #[test]
    fn duplicates_after_coercion_are_removed() {
        let records = vec![
            division("2021Q1", "Cork City", Scalar::from("5")),
            division("2021Q1", "Cork City", Scalar::Integer(5)),
            division("2021Q1", "Cork City", Scalar::Float(5.0)),
        ];
        let cleaned = clean(TransformVariant::OffenceByDivision, &records).unwrap();
        assert_eq!(cleaned.frame.len(), 1);
        assert_eq!(cleaned.duplicates, 2);
    }

    #[test]
    fn period_without_year_is_an_error() {
        let records = vec![division("unknown", "Cork City", Scalar::Integer(1))];
        assert_matches!(
            clean(TransformVariant::OffenceByDivision, &records),
            Err(EtlError::Derivation { .. })
        );
    }

    fn age(year: Scalar, group: &str, value: i64) -> RawRecord {
        [
            ("Statistic", Scalar::from("Suspected offenders")),
            ("Year", year),
            ("Offence Group", Scalar::from(group)),
            (
                "Age of Suspected Offender at Time of Offence",
                Scalar::from("18 - 24 years"),
            ),
            ("value", Scalar::Integer(value)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn age_years_without_digits_are_zero_filled() {
        let records = vec![
            age(Scalar::Null, "Theft", 1),
            age(Scalar::from("All years"), "Fraud", 2),
            age(Scalar::from("2020"), "Theft", 3),
        ];
        let cleaned = clean(TransformVariant::OffenceByAge, &records).unwrap();
        assert_eq!(cleaned.frame.len(), 3);
        let years: Vec<&Scalar> = cleaned.frame.column_values(YEAR_COLUMN).unwrap().collect();
        assert_eq!(
            years,
            vec![&Scalar::Integer(0), &Scalar::Integer(0), &Scalar::Integer(2020)]
        );
        assert_eq!(cleaned.filled, 2);
    }

    #[test]
    fn age_variant_requires_its_columns() {
        let records = vec![division("2021Q1", "Cork City", Scalar::Integer(1))];
        assert_matches!(
            clean(TransformVariant::OffenceByAge, &records),
            Err(EtlError::MissingColumn(column)) if column == "Statistic"
        );
        assert_matches!(
            clean(TransformVariant::OffenceByAge, &[]),
            Err(EtlError::MissingColumn(_))
        );
    }
}
