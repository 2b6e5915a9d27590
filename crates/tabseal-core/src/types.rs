//! Scalar values, columnar batches, and the narrow dataset adapter.
//!
//! Engine-native frames never reach the hasher. Adapters expose a dataset as
//! `{ schema, rows }` through the `Dataset` trait; `Table` is the in-crate
//! implementation used for snapshots, samples, and tests.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{DataType, Schema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(#[serde(with = "float_repr::single")] f32),
    F64(#[serde(with = "float_repr")] f64),
    Str(String),
    Bin(Vec<u8>),
    /// Microseconds since the Unix epoch.
    Timestamp(i64),
}

/// JSON has no NaN or infinity. Non-finite floats travel as the strings
/// `"NaN"`, `"inf"` and `"-inf"`; finite ones stay plain numbers.
mod float_repr {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Num(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(x: &f64, s: S) -> Result<S::Ok, S::Error> {
        if x.is_nan() {
            s.serialize_str("NaN")
        } else if x.is_infinite() {
            s.serialize_str(if *x > 0.0 { "inf" } else { "-inf" })
        } else {
            s.serialize_f64(*x)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Num(x) => Ok(x),
            Repr::Text(t) => match t.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("invalid float '{other}'"))),
            },
        }
    }

    pub mod single {
        use serde::{Deserializer, Serializer};

        pub fn serialize<S: Serializer>(x: &f32, s: S) -> Result<S::Ok, S::Error> {
            if x.is_finite() {
                s.serialize_f32(*x)
            } else {
                super::serialize(&f64::from(*x), s)
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f32, D::Error> {
            super::deserialize(d).map(|x| x as f32)
        }
    }
}

impl Scalar {
    /// Natural dtype of a non-null value.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Scalar::Null => None,
            Scalar::Bool(_) => Some(DataType::Boolean),
            Scalar::I32(_) => Some(DataType::Int32),
            Scalar::I64(_) => Some(DataType::Int64),
            Scalar::F32(_) => Some(DataType::Float32),
            Scalar::F64(_) => Some(DataType::Float64),
            Scalar::Str(_) => Some(DataType::Utf8),
            Scalar::Bin(_) => Some(DataType::Binary),
            Scalar::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Rough in-memory footprint, used for snapshot size estimates.
    pub fn estimated_bytes(&self) -> u64 {
        match self {
            Scalar::Null | Scalar::Bool(_) => 1,
            Scalar::I32(_) | Scalar::F32(_) => 4,
            Scalar::I64(_) | Scalar::F64(_) | Scalar::Timestamp(_) => 8,
            Scalar::Str(s) => 24 + s.len() as u64,
            Scalar::Bin(b) => 24 + b.len() as u64,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::I32(i) => write!(f, "{i}"),
            Scalar::I64(i) => write!(f, "{i}"),
            Scalar::F32(x) => write!(f, "{x}"),
            Scalar::F64(x) => write!(f, "{x}"),
            Scalar::Str(s) => f.write_str(s),
            Scalar::Bin(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Scalar::Timestamp(us) => write!(f, "{us}"),
        }
    }
}

/// Primary-key value of one row, rendered as text.
///
/// Multi-column keys join their parts with `|`; `|` and `\` inside a part are
/// backslash-escaped so distinct tuples never render identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowKey(pub String);

impl RowKey {
    pub fn from_scalars<'a>(parts: impl IntoIterator<Item = &'a Scalar>) -> Result<Self> {
        let mut out = String::new();
        for (i, s) in parts.into_iter().enumerate() {
            if s.is_null() {
                return Err(Error::Schema("null value in primary key column".into()));
            }
            if i > 0 {
                out.push('|');
            }
            for ch in s.to_string().chars() {
                if ch == '|' || ch == '\\' {
                    out.push('\\');
                }
                out.push(ch);
            }
        }
        Ok(RowKey(out))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowKey {
    fn from(s: &str) -> Self {
        RowKey(s.to_string())
    }
}

/// Capability every engine adapter provides: a fixed schema plus a row iterator.
///
/// Rows are yielded as scalars aligned to `schema().fields`.
pub trait Dataset: Send + Sync {
    fn schema(&self) -> &Schema;

    fn num_rows(&self) -> usize;

    fn rows(&self) -> Box<dyn Iterator<Item = Vec<Scalar>> + '_>;

    /// Cheap size estimate consulted before any snapshot is serialized.
    fn estimated_bytes(&self) -> u64 {
        self.rows()
            .map(|r| r.iter().map(Scalar::estimated_bytes).sum::<u64>())
            .sum()
    }
}

/// Minimal column representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Scalar>,
}

impl Column {
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Columnar batch of rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowBatch {
    pub columns: Vec<Column>,
}

impl RowBatch {
    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn row(&self, idx: usize) -> Vec<Scalar> {
        self.columns
            .iter()
            .map(|c| c.values.get(idx).cloned().unwrap_or(Scalar::Null))
            .collect()
    }
}

/// A schema-checked, fully materialized dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub schema: Schema,
    pub batch: RowBatch,
}

impl Table {
    /// Build a table, checking column names, lengths, and value types against the schema.
    pub fn try_new(schema: Schema, batch: RowBatch) -> Result<Self> {
        schema.validate()?;
        if schema.len() != batch.columns.len() {
            return Err(Error::Schema(format!(
                "schema has {} fields but batch has {} columns",
                schema.len(),
                batch.columns.len()
            )));
        }
        let n = batch.num_rows();
        for (field, col) in schema.fields.iter().zip(&batch.columns) {
            if field.name != col.name {
                return Err(Error::Schema(format!(
                    "column '{}' does not match schema field '{}'",
                    col.name, field.name
                )));
            }
            if col.len() != n {
                return Err(Error::Schema(format!(
                    "column '{}' has {} values, expected {n}",
                    col.name,
                    col.len()
                )));
            }
            for v in &col.values {
                match v.data_type() {
                    None if !field.nullable => {
                        return Err(Error::Schema(format!(
                            "null in non-nullable column '{}'",
                            field.name
                        )))
                    }
                    Some(dt) if dt != field.data_type => {
                        return Err(Error::Schema(format!(
                            "column '{}' declared {} but holds {dt}",
                            field.name, field.data_type
                        )))
                    }
                    _ => {}
                }
            }
        }
        Ok(Self { schema, batch })
    }

    /// Build a table from row-major values.
    pub fn from_rows(schema: Schema, rows: Vec<Vec<Scalar>>) -> Result<Self> {
        let mut columns: Vec<Column> = schema
            .fields
            .iter()
            .map(|f| Column {
                name: f.name.clone(),
                values: Vec::with_capacity(rows.len()),
            })
            .collect();
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(Error::Schema(format!(
                    "row {i} has {} values, expected {}",
                    row.len(),
                    columns.len()
                )));
            }
            for (col, v) in columns.iter_mut().zip(row) {
                col.values.push(v);
            }
        }
        Self::try_new(schema, RowBatch { columns })
    }

    /// Materialize any dataset, keeping at most `max_rows` rows and `max_cols` columns
    /// (`0` means unlimited).
    pub fn head_of(ds: &dyn Dataset, max_rows: usize, max_cols: usize) -> Self {
        let src = ds.schema();
        let ncols = if max_cols == 0 {
            src.len()
        } else {
            max_cols.min(src.len())
        };
        let schema = Schema::new(src.fields[..ncols].to_vec());
        let take = if max_rows == 0 {
            ds.num_rows()
        } else {
            max_rows.min(ds.num_rows())
        };
        let mut columns: Vec<Column> = schema
            .fields
            .iter()
            .map(|f| Column {
                name: f.name.clone(),
                values: Vec::with_capacity(take),
            })
            .collect();
        for row in ds.rows().take(take) {
            for (col, v) in columns.iter_mut().zip(row) {
                col.values.push(v);
            }
        }
        Self {
            schema,
            batch: RowBatch { columns },
        }
    }
}

impl Dataset for Table {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    fn rows(&self) -> Box<dyn Iterator<Item = Vec<Scalar>> + '_> {
        Box::new((0..self.batch.num_rows()).map(move |i| self.batch.row(i)))
    }

    fn estimated_bytes(&self) -> u64 {
        self.batch
            .columns
            .iter()
            .flat_map(|c| c.values.iter())
            .map(Scalar::estimated_bytes)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ])
    }

    #[test]
    fn from_rows_checks_types() {
        let err = Table::from_rows(
            schema(),
            vec![vec![Scalar::I64(1), Scalar::I64(2)]],
        )
        .unwrap_err();
        assert!(err.to_string().contains("declared utf8"));
    }

    #[test]
    fn from_rows_rejects_null_in_required_column() {
        let err = Table::from_rows(schema(), vec![vec![Scalar::Null, Scalar::Null]]).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn rows_iterate_in_schema_order() {
        let t = Table::from_rows(
            schema(),
            vec![
                vec![Scalar::I64(1), Scalar::Str("a".into())],
                vec![Scalar::I64(2), Scalar::Null],
            ],
        )
        .unwrap();
        let rows: Vec<Vec<Scalar>> = t.rows().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec![Scalar::I64(2), Scalar::Null]);
    }

    #[test]
    fn head_of_caps_rows_and_columns() {
        let t = Table::from_rows(
            schema(),
            (0..10)
                .map(|i| vec![Scalar::I64(i), Scalar::Str(format!("n{i}"))])
                .collect(),
        )
        .unwrap();
        let h = Table::head_of(&t, 3, 1);
        assert_eq!(h.num_rows(), 3);
        assert_eq!(h.schema.column_names(), vec!["id".to_string()]);
    }

    #[test]
    fn row_key_escapes_separators() {
        let a = RowKey::from_scalars(&[Scalar::Str("a|b".into()), Scalar::Str("c".into())]).unwrap();
        let b = RowKey::from_scalars(&[Scalar::Str("a".into()), Scalar::Str("b|c".into())]).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "a\\|b|c");
    }

    #[test]
    fn non_finite_floats_survive_json() {
        let values = vec![
            Scalar::F64(f64::NAN),
            Scalar::F64(f64::INFINITY),
            Scalar::F64(f64::NEG_INFINITY),
            Scalar::F32(f32::NAN),
            Scalar::F64(2.5),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert!(json.contains("\"inf\"") && json.contains("\"-inf\""));
        assert!(json.contains("2.5"));
        let back: Vec<Scalar> = serde_json::from_str(&json).unwrap();
        assert!(matches!(back[0], Scalar::F64(x) if x.is_nan()));
        assert_eq!(back[1], Scalar::F64(f64::INFINITY));
        assert_eq!(back[2], Scalar::F64(f64::NEG_INFINITY));
        assert!(matches!(back[3], Scalar::F32(x) if x.is_nan()));
        assert_eq!(back[4], Scalar::F64(2.5));

        let err = serde_json::from_str::<Scalar>(r#"{"F64":"infinity"}"#).unwrap_err();
        assert!(err.to_string().contains("invalid float"));
    }

    #[test]
    fn row_key_rejects_null() {
        assert!(RowKey::from_scalars(&[Scalar::Null]).is_err());
    }
}
