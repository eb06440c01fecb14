use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use clap::ValueEnum;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EtlError;

/// A single cell value, either staged or cleaned.
///
/// Floats compare and hash by their bit pattern so that rows holding them can
/// be de-duplicated exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Integer(value) => Some(*value as f64),
            Scalar::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Numeric coercion: numbers pass through, text is parsed, anything else
    /// (including NaN and unparsable text) is missing. Integral values are
    /// normalised to `Integer`.
    pub fn to_number(&self) -> Option<Scalar> {
        match self {
            Scalar::Null => None,
            Scalar::Integer(value) => Some(Scalar::Integer(*value)),
            Scalar::Float(value) => normalise_float(*value),
            Scalar::Text(value) => {
                let trimmed = value.trim();
                if let Ok(parsed) = trimmed.parse::<i64>() {
                    return Some(Scalar::Integer(parsed));
                }
                trimmed.parse::<f64>().ok().and_then(normalise_float)
            }
        }
    }

    /// Ordering used when sorting frames: numbers before text, nulls last.
    pub fn sort_cmp(&self, other: &Scalar) -> Ordering {
        fn rank(value: &Scalar) -> u8 {
            match value {
                Scalar::Integer(_) | Scalar::Float(_) => 0,
                Scalar::Text(_) => 1,
                Scalar::Null => 2,
            }
        }
        match (self, other) {
            (Scalar::Integer(a), Scalar::Integer(b)) => a.cmp(b),
            (Scalar::Text(a), Scalar::Text(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => rank(a).cmp(&rank(b)),
            },
        }
    }
}

fn normalise_float(value: f64) -> Option<Scalar> {
    if !value.is_finite() {
        return None;
    }
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 {
        return Some(Scalar::Integer(value as i64));
    }
    Some(Scalar::Float(value))
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => true,
            (Scalar::Integer(a), Scalar::Integer(b)) => a == b,
            (Scalar::Float(a), Scalar::Float(b)) => a.to_bits() == b.to_bits(),
            (Scalar::Text(a), Scalar::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Scalar::Null => {}
            Scalar::Integer(value) => value.hash(state),
            Scalar::Float(value) => value.to_bits().hash(state),
            Scalar::Text(value) => value.hash(state),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Integer(value) => write!(f, "{value}"),
            Scalar::Float(value) => write!(f, "{value}"),
            Scalar::Text(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

/// One staged row: an ordered mapping of column name to scalar whose shape is
/// whatever the source payload provided.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    fields: Vec<(String, Scalar)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Sets `column`, keeping its position if it already exists.
    pub fn insert(&mut self, column: impl Into<String>, value: Scalar) {
        let column = column.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn remove(&mut self, column: &str) -> Option<Scalar> {
        let position = self.fields.iter().position(|(name, _)| name == column)?;
        Some(self.fields.remove(position).1)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Scalar)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, Scalar)>>(iter: I) -> Self {
        let mut record = RawRecord::new();
        for (column, value) in iter {
            record.insert(column, value);
        }
        record
    }
}

impl Serialize for RawRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (column, value) in &self.fields {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RawRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = RawRecord;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a flat mapping of column names to scalars")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<RawRecord, A::Error> {
                let mut record = RawRecord::new();
                while let Some((column, value)) = access.next_entry::<String, Scalar>()? {
                    record.insert(column, value);
                }
                Ok(record)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

/// The closed set of reshaping rule sets a dataset can be cleaned with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TransformVariant {
    OffenceByDivision,
    OffenceByAge,
}

impl TransformVariant {
    /// Variant for the two table names the published registry uses.
    pub fn infer_from_table(table: &str) -> Option<Self> {
        match table {
            "crime_offence_garda" => Some(TransformVariant::OffenceByDivision),
            "crime_offence_age" => Some(TransformVariant::OffenceByAge),
            _ => None,
        }
    }
}

impl fmt::Display for TransformVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformVariant::OffenceByDivision => write!(f, "offence-by-division"),
            TransformVariant::OffenceByAge => write!(f, "offence-by-age"),
        }
    }
}

impl FromStr for TransformVariant {
    type Err = EtlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "offence-by-division" => Ok(TransformVariant::OffenceByDivision),
            "offence-by-age" => Ok(TransformVariant::OffenceByAge),
            _ => Err(EtlError::UnknownVariant(value.to_string())),
        }
    }
}

/// One statistical series: where it comes from, where it is staged and which
/// table the cleaned rows end up in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetDescriptor {
    source_url: String,
    staging_key: String,
    target_table: String,
    variant: TransformVariant,
}

impl DatasetDescriptor {
    /// The staging key defaults to the target table name.
    pub fn new(
        source_url: impl Into<String>,
        target_table: impl Into<String>,
        variant: TransformVariant,
    ) -> Result<Self, EtlError> {
        let source_url = source_url.into();
        let target_table = target_table.into();
        if source_url.trim().is_empty() {
            return Err(EtlError::InvalidDataset(format!(
                "{target_table}: empty source url"
            )));
        }
        validate_identifier(&target_table)?;
        Ok(Self {
            source_url,
            staging_key: target_table.clone(),
            target_table,
            variant,
        })
    }

    pub fn with_staging_key(mut self, staging_key: impl Into<String>) -> Result<Self, EtlError> {
        let staging_key = staging_key.into();
        validate_identifier(&staging_key)?;
        self.staging_key = staging_key;
        Ok(self)
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn staging_key(&self) -> &str {
        &self.staging_key
    }

    pub fn target_table(&self) -> &str {
        &self.target_table
    }

    pub fn variant(&self) -> TransformVariant {
        self.variant
    }
}

/// Staging keys and table names double as file names in the file adapters.
pub fn validate_identifier(value: &str) -> Result<(), EtlError> {
    let is_valid = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
    if !is_valid {
        return Err(EtlError::InvalidDataset(format!(
            "invalid key or table name: {value:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn coerces_text_to_numbers() {
        assert_eq!(Scalar::from("42").to_number(), Some(Scalar::Integer(42)));
        assert_eq!(Scalar::from(" -5 ").to_number(), Some(Scalar::Integer(-5)));
        assert_eq!(Scalar::from("2.5").to_number(), Some(Scalar::Float(2.5)));
        assert_eq!(Scalar::Float(7.0).to_number(), Some(Scalar::Integer(7)));
        assert_eq!(Scalar::from("n/a").to_number(), None);
        assert_eq!(Scalar::Float(f64::NAN).to_number(), None);
        assert_eq!(Scalar::Null.to_number(), None);
    }

    #[test]
    fn sorts_nulls_last() {
        let mut values = vec![
            Scalar::Null,
            Scalar::from("Q2"),
            Scalar::Integer(3),
            Scalar::Float(1.5),
        ];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            values,
            vec![
                Scalar::Float(1.5),
                Scalar::Integer(3),
                Scalar::from("Q2"),
                Scalar::Null
            ]
        );
    }

    #[test]
    fn record_keeps_column_order_through_json() {
        let record: RawRecord = [
            ("Quarter", Scalar::from("2021Q3")),
            ("Garda Division", Scalar::from("Cork City")),
            ("value", Scalar::Integer(42)),
            ("note", Scalar::Null),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"Quarter":"2021Q3","Garda Division":"Cork City","value":42,"note":null}"#
        );
        let back: RawRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn variant_parsing_and_inference() {
        assert_eq!(
            "offence-by-age".parse::<TransformVariant>().unwrap(),
            TransformVariant::OffenceByAge
        );
        assert_matches!(
            "by-county".parse::<TransformVariant>(),
            Err(EtlError::UnknownVariant(_))
        );
        assert_eq!(
            TransformVariant::infer_from_table("crime_offence_garda"),
            Some(TransformVariant::OffenceByDivision)
        );
        assert_eq!(TransformVariant::infer_from_table("other"), None);
    }

    #[test]
    fn descriptor_defaults_staging_key_to_table() {
        let descriptor = DatasetDescriptor::new(
            "https://example.org/data",
            "crime_offence_age",
            TransformVariant::OffenceByAge,
        )
        .unwrap();
        assert_eq!(descriptor.staging_key(), "crime_offence_age");

        let err = DatasetDescriptor::new("https://example.org", "../etc", TransformVariant::OffenceByAge)
            .unwrap_err();
        assert_matches!(err, EtlError::InvalidDataset(_));
    }
}
