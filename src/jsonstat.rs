//! Decoding of JSON-stat 2.0 `dataset` documents into flat records.
//!
//! A dataset is a cube: `id` lists the dimensions in storage order, `size`
//! their category counts and `value` the observations in row-major order (the
//! last dimension varies fastest). Flattening emits one record per cell with a
//! column per dimension (named by its label) plus a `value` column.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::domain::{RawRecord, Scalar};
use crate::error::EtlError;

pub const VALUE_COLUMN: &str = "value";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub id: String,
    pub label: String,
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonStatDataset {
    pub label: Option<String>,
    pub updated: Option<String>,
    pub dimensions: Vec<Dimension>,
    pub values: Vec<Scalar>,
}

#[derive(Debug, Deserialize)]
struct RawDataset {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    updated: Option<String>,
    id: Vec<String>,
    size: Vec<usize>,
    dimension: HashMap<String, RawDimension>,
    value: RawValues,
}

#[derive(Debug, Deserialize)]
struct RawDimension {
    #[serde(default)]
    label: Option<String>,
    category: RawCategory,
}

#[derive(Debug, Deserialize)]
struct RawCategory {
    #[serde(default)]
    index: Option<RawIndex>,
    #[serde(default)]
    label: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawIndex {
    Ordered(Vec<String>),
    Positioned(HashMap<String, usize>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawValues {
    Dense(Vec<Scalar>),
    Sparse(HashMap<String, Scalar>),
}

impl JsonStatDataset {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EtlError> {
        let raw: RawDataset =
            serde_json::from_slice(bytes).map_err(|err| EtlError::JsonStat(err.to_string()))?;
        Self::from_raw(raw)
    }

    pub fn from_value(document: Value) -> Result<Self, EtlError> {
        let raw: RawDataset =
            serde_json::from_value(document).map_err(|err| EtlError::JsonStat(err.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(mut raw: RawDataset) -> Result<Self, EtlError> {
        if let Some(class) = raw.class.as_deref() {
            if class != "dataset" {
                return Err(EtlError::JsonStat(format!(
                    "unsupported class {class:?}, expected \"dataset\""
                )));
            }
        }
        if let Some(version) = raw.version.as_deref() {
            if version != "2.0" {
                return Err(EtlError::JsonStat(format!(
                    "unsupported version {version:?}, expected \"2.0\""
                )));
            }
        }
        if raw.id.len() != raw.size.len() {
            return Err(EtlError::JsonStat(format!(
                "id lists {} dimensions but size lists {}",
                raw.id.len(),
                raw.size.len()
            )));
        }

        let mut dimensions = Vec::with_capacity(raw.id.len());
        for (dim_id, &size) in raw.id.iter().zip(&raw.size) {
            let dimension = raw
                .dimension
                .remove(dim_id)
                .ok_or_else(|| EtlError::JsonStat(format!("dimension {dim_id:?} is not defined")))?;
            let categories = resolve_categories(dim_id, dimension.category)?;
            if categories.len() != size {
                return Err(EtlError::JsonStat(format!(
                    "dimension {dim_id:?} has {} categories but size says {size}",
                    categories.len()
                )));
            }
            dimensions.push(Dimension {
                id: dim_id.clone(),
                label: dimension.label.unwrap_or_else(|| dim_id.clone()),
                categories,
            });
        }

        let total = raw
            .size
            .iter()
            .try_fold(1usize, |acc, &size| acc.checked_mul(size))
            .ok_or_else(|| EtlError::JsonStat("cube size overflows".to_string()))?;

        let values = match raw.value {
            RawValues::Dense(values) => {
                if values.len() != total {
                    return Err(EtlError::JsonStat(format!(
                        "expected {total} values, found {}",
                        values.len()
                    )));
                }
                values
            }
            RawValues::Sparse(cells) => {
                let mut values = vec![Scalar::Null; total];
                for (key, value) in cells {
                    let position = key
                        .parse::<usize>()
                        .ok()
                        .filter(|position| *position < total)
                        .ok_or_else(|| {
                            EtlError::JsonStat(format!("value index {key:?} is out of range"))
                        })?;
                    values[position] = value;
                }
                values
            }
        };

        Ok(Self {
            label: raw.label,
            updated: raw.updated,
            dimensions,
            values,
        })
    }

    pub fn row_count(&self) -> usize {
        self.values.len()
    }

    /// Flattens the cube, one record per cell.
    pub fn to_records(&self) -> Vec<RawRecord> {
        let sizes: Vec<usize> = self
            .dimensions
            .iter()
            .map(|dimension| dimension.categories.len())
            .collect();
        let mut coords = vec![0usize; sizes.len()];
        let mut records = Vec::with_capacity(self.values.len());

        for value in &self.values {
            let mut record = RawRecord::new();
            for (dimension, &position) in self.dimensions.iter().zip(&coords) {
                record.insert(
                    dimension.label.clone(),
                    Scalar::Text(dimension.categories[position].label.clone()),
                );
            }
            record.insert(VALUE_COLUMN, value.clone());
            records.push(record);

            for axis in (0..coords.len()).rev() {
                coords[axis] += 1;
                if coords[axis] < sizes[axis] {
                    break;
                }
                coords[axis] = 0;
            }
        }
        records
    }
}

fn resolve_categories(dim_id: &str, category: RawCategory) -> Result<Vec<Category>, EtlError> {
    let labels = category.label.unwrap_or_default();
    let ids: Vec<String> = match category.index {
        Some(RawIndex::Ordered(ids)) => ids,
        Some(RawIndex::Positioned(positions)) => {
            let mut pairs: Vec<(String, usize)> = positions.into_iter().collect();
            pairs.sort_by_key(|(_, position)| *position);
            if pairs
                .iter()
                .enumerate()
                .any(|(expected, (_, position))| *position != expected)
            {
                return Err(EtlError::JsonStat(format!(
                    "dimension {dim_id:?} has non-contiguous category positions"
                )));
            }
            pairs.into_iter().map(|(id, _)| id).collect()
        }
        None if labels.len() == 1 => labels.keys().cloned().collect(),
        None => {
            return Err(EtlError::JsonStat(format!(
                "dimension {dim_id:?} has no category index"
            )));
        }
    };

    Ok(ids
        .into_iter()
        .map(|id| Category {
            label: labels.get(&id).cloned().unwrap_or_else(|| id.clone()),
            id,
        })
        .collect())
}
