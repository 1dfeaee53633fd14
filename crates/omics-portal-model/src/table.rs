// SPDX-License-Identifier: Apache-2.0

//! Backend table encodings and their conversion into row records.
//!
//! The backend emits tables either in pandas `split` orientation
//! (`{"index": [...], "columns": [...], "data": [[...], ...]}`) or column-oriented
//! (`{"col": [v0, v1, ...], ...}`). Both are normalised into [`Table`] here so the
//! cache layer only stores typed rows.

use crate::dataset::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub type TableRow = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Table {
    pub index: Vec<String>,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitTable {
    #[serde(default)]
    pub index: Vec<Value>,
    pub columns: Vec<String>,
    pub data: Vec<Vec<Value>>,
}

impl Table {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn from_split(split: SplitTable) -> Result<Self, ValidationError> {
        if !split.index.is_empty() && split.index.len() != split.data.len() {
            return Err(ValidationError(format!(
                "split table index has {} entries but data has {} rows",
                split.index.len(),
                split.data.len()
            )));
        }
        let mut rows = Vec::with_capacity(split.data.len());
        for (i, values) in split.data.into_iter().enumerate() {
            if values.len() != split.columns.len() {
                return Err(ValidationError(format!(
                    "split table row {i} has {} values for {} columns",
                    values.len(),
                    split.columns.len()
                )));
            }
            rows.push(split.columns.iter().cloned().zip(values).collect());
        }
        let index = if split.index.is_empty() {
            (0..rows.len()).map(|i| i.to_string()).collect()
        } else {
            split.index.iter().map(value_label).collect()
        };
        Ok(Self { index, rows })
    }

    /// Column-oriented object to rows. Every column must have the same length.
    pub fn from_columns(columns: Map<String, Value>) -> Result<Self, ValidationError> {
        let mut arrays = Vec::with_capacity(columns.len());
        for (name, value) in columns {
            match value {
                Value::Array(items) => arrays.push((name, items)),
                other => {
                    return Err(ValidationError(format!(
                        "column `{name}` must be an array, got {}",
                        json_type(&other)
                    )))
                }
            }
        }
        let len = arrays.first().map_or(0, |(_, items)| items.len());
        if let Some((name, items)) = arrays.iter().find(|(_, items)| items.len() != len) {
            return Err(ValidationError(format!(
                "column `{name}` has {} values, expected {len}",
                items.len()
            )));
        }
        let mut rows: Vec<TableRow> = (0..len).map(|_| TableRow::new()).collect();
        for (name, items) in arrays {
            for (row, value) in rows.iter_mut().zip(items) {
                row.insert(name.clone(), value);
            }
        }
        Ok(Self {
            index: (0..len).map(|i| i.to_string()).collect(),
            rows,
        })
    }

    /// Accepts either encoding; `split` wins when the object carries `columns` + `data`.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(map) if map.contains_key("columns") && map.contains_key("data") => {
                let split: SplitTable = serde_json::from_value(Value::Object(map))
                    .map_err(|e| ValidationError(format!("split table decode failed: {e}")))?;
                Self::from_split(split)
            }
            Value::Object(map) => Self::from_columns(map),
            Value::Array(items) => {
                let mut rows = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    match item {
                        Value::Object(obj) => rows.push(obj.into_iter().collect()),
                        other => {
                            return Err(ValidationError(format!(
                                "row {i} must be an object, got {}",
                                json_type(&other)
                            )))
                        }
                    }
                }
                Ok(Self {
                    index: (0..rows.len()).map(|i| i.to_string()).collect(),
                    rows,
                })
            }
            other => Err(ValidationError(format!(
                "table must be an object or array, got {}",
                json_type(&other)
            ))),
        }
    }
}

/// First present column among `names`, as a string.
#[must_use]
pub fn row_str(row: &TableRow, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match row.get(*name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First present column among `names`, as a float. Numeric strings are accepted.
#[must_use]
pub fn row_f64(row: &TableRow, names: &[&str]) -> Option<f64> {
    names.iter().find_map(|name| match row.get(*name)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

#[must_use]
pub fn row_u64(row: &TableRow, names: &[&str]) -> Option<u64> {
    names.iter().find_map(|name| match row.get(*name)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    })
}

fn value_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
