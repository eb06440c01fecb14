use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::{RawRecord, Scalar};
use crate::error::EtlError;

/// A small column-oriented-by-name, row-stored table of scalars.
///
/// Transform loads staged records into a frame, reshapes it in place and the
/// relational store persists it as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Scalar>>,
}

impl Frame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Columns are the union of all record columns in first-seen order; cells
    /// a record does not provide are null.
    pub fn from_records(records: &[RawRecord]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            for column in record.columns() {
                if !columns.iter().any(|existing| existing == column) {
                    columns.push(column.to_string());
                }
            }
        }
        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|column| record.get(column).cloned().unwrap_or(Scalar::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Scalar>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: Vec<Scalar>) -> Result<(), EtlError> {
        if row.len() != self.columns.len() {
            return Err(EtlError::Warehouse(format!(
                "row has {} cells, frame has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize, EtlError> {
        self.column_index(name)
            .ok_or_else(|| EtlError::MissingColumn(name.to_string()))
    }

    pub fn column_values(&self, name: &str) -> Result<impl Iterator<Item = &Scalar>, EtlError> {
        let index = self.require_column(name)?;
        Ok(self.rows.iter().map(move |row| &row[index]))
    }

    /// Returns whether the column existed.
    pub fn drop_column(&mut self, name: &str) -> bool {
        let Some(index) = self.column_index(name) else {
            return false;
        };
        self.columns.remove(index);
        for row in &mut self.rows {
            row.remove(index);
        }
        true
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<(), EtlError> {
        let index = self.require_column(from)?;
        self.columns[index] = to.to_string();
        Ok(())
    }

    /// Appends a column computed from each row. Fails on the first row the
    /// derivation rejects.
    pub fn derive_column<F>(&mut self, name: &str, mut derive: F) -> Result<(), EtlError>
    where
        F: FnMut(&[String], &[Scalar]) -> Result<Scalar, EtlError>,
    {
        let mut values = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            values.push(derive(&self.columns, row)?);
        }
        self.columns.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    pub fn map_column<F>(&mut self, name: &str, mut map: F) -> Result<(), EtlError>
    where
        F: FnMut(&Scalar) -> Result<Scalar, EtlError>,
    {
        let index = self.require_column(name)?;
        for row in &mut self.rows {
            row[index] = map(&row[index])?;
        }
        Ok(())
    }

    /// Stable sort on the given columns, ascending, nulls last.
    pub fn sort_by_columns(&mut self, names: &[&str]) -> Result<(), EtlError> {
        let indices = names
            .iter()
            .map(|name| self.require_column(name))
            .collect::<Result<Vec<_>, EtlError>>()?;
        self.rows.sort_by(|left, right| {
            indices
                .iter()
                .map(|&index| left[index].sort_cmp(&right[index]))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(())
    }

    /// Keeps the first occurrence of every exact-duplicate row. Returns the
    /// number of rows removed.
    pub fn dedup_rows(&mut self) -> usize {
        let before = self.rows.len();
        let mut seen: HashSet<Vec<Scalar>> = HashSet::with_capacity(before);
        self.rows.retain(|row| seen.insert(row.clone()));
        before - self.rows.len()
    }

    /// Replaces every null with the default chosen for its column.
    pub fn fill_nulls<F>(&mut self, default_for: F) -> usize
    where
        F: Fn(&str) -> Scalar,
    {
        let defaults: Vec<Scalar> = self.columns.iter().map(|c| default_for(c)).collect();
        let mut filled = 0;
        for row in &mut self.rows {
            for (cell, default) in row.iter_mut().zip(&defaults) {
                if cell.is_null() {
                    *cell = default.clone();
                    filled += 1;
                }
            }
        }
        filled
    }

    /// Returns the number of rows removed.
    pub fn retain_rows<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&[Scalar]) -> bool,
    {
        let before = self.rows.len();
        self.rows.retain(|row| keep(row));
        before - self.rows.len()
    }

    /// Reorders to exactly `names`; other columns are discarded.
    pub fn select(&mut self, names: &[&str]) -> Result<(), EtlError> {
        let indices = names
            .iter()
            .map(|name| self.require_column(name))
            .collect::<Result<Vec<_>, EtlError>>()?;
        self.rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&index| row[index].clone()).collect())
            .collect();
        self.columns = names.iter().map(|name| name.to_string()).collect();
        Ok(())
    }

    pub fn to_records(&self) -> Vec<RawRecord> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(column, value)| (column.clone(), value.clone()))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn record(fields: &[(&str, Scalar)]) -> RawRecord {
        fields.iter().cloned().collect()
    }

    #[test]
    fn union_of_columns_fills_missing_cells_with_null() {
        let frame = Frame::from_records(&[
            record(&[("a", Scalar::Integer(1))]),
            record(&[("b", Scalar::from("x")), ("a", Scalar::Integer(2))]),
        ]);
        assert_eq!(frame.columns(), &["a".to_string(), "b".to_string()]);
        assert_eq!(frame.rows()[0], vec![Scalar::Integer(1), Scalar::Null]);
        assert_eq!(frame.rows()[1], vec![Scalar::Integer(2), Scalar::from("x")]);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let mut frame = Frame::from_records(&[
            record(&[("a", Scalar::Integer(1)), ("b", Scalar::from("x"))]),
            record(&[("a", Scalar::Integer(2)), ("b", Scalar::from("y"))]),
            record(&[("a", Scalar::Integer(1)), ("b", Scalar::from("x"))]),
        ]);
        assert_eq!(frame.dedup_rows(), 1);
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.rows()[1][0], Scalar::Integer(2));
    }

    #[test]
    fn sort_is_stable_across_keys() {
        let mut frame = Frame::from_records(&[
            record(&[("y", Scalar::Integer(2021)), ("q", Scalar::from("Q2")), ("n", Scalar::Integer(1))]),
            record(&[("y", Scalar::Integer(2020)), ("q", Scalar::from("Q4")), ("n", Scalar::Integer(2))]),
            record(&[("y", Scalar::Integer(2021)), ("q", Scalar::from("Q1")), ("n", Scalar::Integer(3))]),
            record(&[("y", Scalar::Integer(2021)), ("q", Scalar::from("Q1")), ("n", Scalar::Integer(4))]),
        ]);
        frame.sort_by_columns(&["y", "q"]).unwrap();
        let order: Vec<&Scalar> = frame.column_values("n").unwrap().collect();
        assert_eq!(
            order,
            vec![
                &Scalar::Integer(2),
                &Scalar::Integer(3),
                &Scalar::Integer(4),
                &Scalar::Integer(1)
            ]
        );
    }

    #[test]
    fn rename_and_select_report_missing_columns() {
        let mut frame = Frame::from_records(&[record(&[("a", Scalar::Integer(1))])]);
        assert_matches!(frame.rename_column("zz", "b"), Err(EtlError::MissingColumn(_)));
        assert_matches!(frame.select(&["a", "b"]), Err(EtlError::MissingColumn(_)));
        assert!(frame.drop_column("a"));
        assert!(!frame.drop_column("a"));
    }
}
