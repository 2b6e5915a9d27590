//! Logical schema types. Pure data; no engine dependency here.
//!
//! Engine adapters (pandas/Polars/Arrow/SQL) map their native dtypes onto
//! `DataType` before a dataset reaches the hasher.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Binary,
    /// Signed microseconds since the Unix epoch (UTC).
    Timestamp,
}

impl DataType {
    /// Stable dtype label used in schema hashes and diffs.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Boolean => "bool",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Utf8 => "utf8",
            DataType::Binary => "binary",
            DataType::Timestamp => "timestamp_us",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn data_type_of(&self, name: &str) -> Option<DataType> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.data_type)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// `(name, dtype)` pairs sorted by column name; the schema's identity for hashing.
    pub fn sorted_pairs(&self) -> Vec<(&str, DataType)> {
        let mut pairs: Vec<(&str, DataType)> = self
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.data_type))
            .collect();
        pairs.sort();
        pairs
    }

    /// Resolve column names to indices, failing on the first missing column.
    pub fn indices_of(&self, names: &[String]) -> Result<Vec<usize>> {
        let missing: Vec<&str> = names
            .iter()
            .filter(|n| self.index_of(n).is_none())
            .map(|n| n.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(Error::Schema(format!(
                "declared columns missing from dataset: {missing:?}"
            )));
        }
        Ok(names.iter().filter_map(|n| self.index_of(n)).collect())
    }

    /// Column names must be unique for canonical ordering to be well-defined.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.fields.len());
        for f in &self.fields {
            if !seen.insert(f.name.as_str()) {
                return Err(Error::Schema(format!("duplicate column name '{}'", f.name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("score", DataType::Float64, true),
            Field::new("id", DataType::Int64, false),
        ])
    }

    #[test]
    fn sorted_pairs_ignore_declaration_order() {
        let a = schema();
        let mut b = schema();
        b.fields.reverse();
        assert_eq!(a.sorted_pairs(), b.sorted_pairs());
        assert_eq!(a.sorted_pairs()[0], ("id", DataType::Int64));
    }

    #[test]
    fn indices_of_reports_missing_columns() {
        let err = schema()
            .indices_of(&["id".to_string(), "nope".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn duplicate_columns_rejected() {
        let s = Schema::new(vec![
            Field::new("a", DataType::Int64, false),
            Field::new("a", DataType::Utf8, false),
        ]);
        assert!(s.validate().is_err());
    }
}
