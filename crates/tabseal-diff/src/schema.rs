use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tabseal_core::schema::{DataType, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtypeChange {
    pub from: DataType,
    pub to: DataType,
}

/// Column-level differences, all lists sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub added_columns: Vec<String>,
    pub removed_columns: Vec<String>,
    pub dtype_changed: BTreeMap<String, DtypeChange>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.added_columns.is_empty()
            && self.removed_columns.is_empty()
            && self.dtype_changed.is_empty()
    }

    /// Columns were added or removed (dtype-only changes excluded).
    pub fn has_add_remove(&self) -> bool {
        !self.added_columns.is_empty() || !self.removed_columns.is_empty()
    }
}

pub fn schema_diff(before: &Schema, after: &Schema) -> SchemaDiff {
    let a: BTreeMap<&str, DataType> = before.sorted_pairs().into_iter().collect();
    let b: BTreeMap<&str, DataType> = after.sorted_pairs().into_iter().collect();

    let added_columns = b
        .keys()
        .filter(|k| !a.contains_key(*k))
        .map(|k| k.to_string())
        .collect();
    let removed_columns = a
        .keys()
        .filter(|k| !b.contains_key(*k))
        .map(|k| k.to_string())
        .collect();
    let dtype_changed = a
        .iter()
        .filter_map(|(name, from)| match b.get(name) {
            Some(to) if to != from => Some((
                name.to_string(),
                DtypeChange {
                    from: *from,
                    to: *to,
                },
            )),
            _ => None,
        })
        .collect();

    SchemaDiff {
        added_columns,
        removed_columns,
        dtype_changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabseal_core::schema::Field;

    #[test]
    fn detects_add_remove_and_dtype_change() {
        let a = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("score", DataType::Int64, true),
            Field::new("old", DataType::Utf8, true),
        ]);
        let b = Schema::new(vec![
            Field::new("score", DataType::Float64, true),
            Field::new("id", DataType::Int64, false),
            Field::new("new", DataType::Boolean, true),
        ]);
        let d = schema_diff(&a, &b);
        assert_eq!(d.added_columns, vec!["new".to_string()]);
        assert_eq!(d.removed_columns, vec!["old".to_string()]);
        assert_eq!(
            d.dtype_changed.get("score"),
            Some(&DtypeChange {
                from: DataType::Int64,
                to: DataType::Float64
            })
        );
        assert!(d.has_add_remove());
    }

    #[test]
    fn column_order_alone_is_no_change() {
        let a = Schema::new(vec![
            Field::new("x", DataType::Int64, false),
            Field::new("y", DataType::Int64, false),
        ]);
        let mut b = a.clone();
        b.fields.reverse();
        assert!(schema_diff(&a, &b).is_empty());
    }
}
