use std::collections::HashSet;

use serde::Serialize;

use crate::domain::{DatasetDescriptor, TransformVariant};
use crate::error::EtlError;

pub const CSO_API_BASE: &str =
    "https://ws.cso.ie/public/api.restful/PxStat.Data.Cube_API.ReadDataset";

/// Built-in series: (PxStat table code, target table, variant).
const BUILTIN_SERIES: &[(&str, &str, TransformVariant)] = &[
    (
        "CJQ06",
        "crime_offence_garda",
        TransformVariant::OffenceByDivision,
    ),
    ("RCD09", "crime_offence_age", TransformVariant::OffenceByAge),
];

/// JSON-stat 2.0 endpoint for a PxStat table code.
pub fn cso_dataset_url(code: &str) -> String {
    format!("{CSO_API_BASE}/{code}/JSON-stat/2.0/en")
}

/// The registered datasets, in run order. Staging keys and target tables are
/// unique across the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DatasetRegistry {
    datasets: Vec<DatasetDescriptor>,
}

impl DatasetRegistry {
    pub fn new(datasets: Vec<DatasetDescriptor>) -> Result<Self, EtlError> {
        let mut keys = HashSet::new();
        let mut tables = HashSet::new();
        for descriptor in &datasets {
            if !keys.insert(descriptor.staging_key()) {
                return Err(EtlError::InvalidDataset(format!(
                    "duplicate staging key {}",
                    descriptor.staging_key()
                )));
            }
            if !tables.insert(descriptor.target_table()) {
                return Err(EtlError::InvalidDataset(format!(
                    "duplicate target table {}",
                    descriptor.target_table()
                )));
            }
        }
        Ok(Self { datasets })
    }

    pub fn builtin() -> Self {
        let datasets = BUILTIN_SERIES
            .iter()
            .map(|(code, table, variant)| builtin_descriptor(code, table, *variant))
            .collect();
        Self { datasets }
    }

    /// Built-in descriptor for a table name, if there is one.
    pub fn builtin_for_table(table: &str) -> Option<DatasetDescriptor> {
        BUILTIN_SERIES
            .iter()
            .find(|(_, name, _)| *name == table)
            .map(|(code, table, variant)| builtin_descriptor(code, table, *variant))
    }

    /// Restricts the registry to `keys`, keeping registry order.
    pub fn select(&self, keys: &[String]) -> Result<Self, EtlError> {
        if let Some(unknown) = keys.iter().find(|key| self.get(key).is_none()) {
            return Err(EtlError::DatasetNotFound(unknown.clone()));
        }
        Ok(Self {
            datasets: self
                .datasets
                .iter()
                .filter(|descriptor| keys.iter().any(|key| key == descriptor.staging_key()))
                .cloned()
                .collect(),
        })
    }

    pub fn get(&self, staging_key: &str) -> Option<&DatasetDescriptor> {
        self.datasets
            .iter()
            .find(|descriptor| descriptor.staging_key() == staging_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatasetDescriptor> {
        self.datasets.iter()
    }

    pub fn as_slice(&self) -> &[DatasetDescriptor] {
        &self.datasets
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

fn builtin_descriptor(code: &str, table: &str, variant: TransformVariant) -> DatasetDescriptor {
    DatasetDescriptor::new(cso_dataset_url(code), table, variant)
        .expect("built-in dataset descriptors are valid")
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn builtin_registry_order() {
        let registry = DatasetRegistry::builtin();
        let keys: Vec<&str> = registry.iter().map(|d| d.staging_key()).collect();
        assert_eq!(keys, vec!["crime_offence_garda", "crime_offence_age"]);
        assert_eq!(
            registry.get("crime_offence_garda").unwrap().source_url(),
            "https://ws.cso.ie/public/api.restful/PxStat.Data.Cube_API.ReadDataset/CJQ06/JSON-stat/2.0/en"
        );
    }

    #[test]
    fn rejects_duplicate_keys() {
        let descriptor = DatasetRegistry::builtin_for_table("crime_offence_age").unwrap();
        let err = DatasetRegistry::new(vec![descriptor.clone(), descriptor]).unwrap_err();
        assert_matches!(err, EtlError::InvalidDataset(_));
    }

    #[test]
    fn select_keeps_registry_order() {
        let registry = DatasetRegistry::builtin();
        let selected = registry
            .select(&["crime_offence_age".to_string()])
            .unwrap();
        assert_eq!(selected.len(), 1);
        assert_matches!(
            registry.select(&["nope".to_string()]),
            Err(EtlError::DatasetNotFound(_))
        );
    }
}
