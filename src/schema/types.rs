// src/schema/types.rs

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt};

/// Inferred type of a CSV column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Integer,
    Float,
    Text,
}

impl ScalarType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScalarType::Integer => "integer",
            ScalarType::Float => "float",
            ScalarType::Text => "text",
        }
    }

    /// Lenient name lookup used when reading hand-edited schema files.
    /// Accepts our own names plus the NumPy dtype names; anything else is text.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" | "int64" | "int32" | "bigint" => ScalarType::Integer,
            "float" | "float64" | "float32" | "double" | "real" => ScalarType::Float,
            _ => ScalarType::Text,
        }
    }

    /// Smallest type that can hold both `self` and `other`.
    pub fn widen(self, other: ScalarType) -> ScalarType {
        use ScalarType::*;
        match (self, other) {
            (Text, _) | (_, Text) => Text,
            (Float, _) | (_, Float) => Float,
            (Integer, Integer) => Integer,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type", deserialize_with = "lenient_type")]
    pub ty: ScalarType,
}

fn lenient_type<'de, D>(de: D) -> std::result::Result<ScalarType, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(de)?;
    Ok(ScalarType::from_name(&raw))
}

/// Ordered column name → type mapping with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Column>", into = "Vec<Column>")]
pub struct ColumnSchema {
    columns: Vec<Column>,
}

impl ColumnSchema {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(columns.len());
        for col in &columns {
            if col.name.is_empty() {
                bail!("column name must not be empty");
            }
            if !seen.insert(col.name.as_str()) {
                bail!("duplicate column name `{}`", col.name);
            }
        }
        Ok(Self { columns })
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<ScalarType> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.ty)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

impl TryFrom<Vec<Column>> for ColumnSchema {
    type Error = anyhow::Error;

    fn try_from(columns: Vec<Column>) -> Result<Self> {
        ColumnSchema::new(columns)
    }
}

impl From<ColumnSchema> for Vec<Column> {
    fn from(schema: ColumnSchema) -> Self {
        schema.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, ty: ScalarType) -> Column {
        Column {
            name: name.into(),
            ty,
        }
    }

    #[test]
    fn widen_is_a_lattice() {
        use ScalarType::*;
        assert_eq!(Integer.widen(Integer), Integer);
        assert_eq!(Integer.widen(Float), Float);
        assert_eq!(Float.widen(Integer), Float);
        assert_eq!(Float.widen(Text), Text);
        assert_eq!(Text.widen(Integer), Text);
    }

    #[test]
    fn from_name_falls_back_to_text() {
        assert_eq!(ScalarType::from_name("int64"), ScalarType::Integer);
        assert_eq!(ScalarType::from_name("Float32"), ScalarType::Float);
        assert_eq!(ScalarType::from_name("O"), ScalarType::Text);
        assert_eq!(ScalarType::from_name("datetime64[ns]"), ScalarType::Text);
    }

    #[test]
    fn schema_rejects_duplicates() {
        let err = ColumnSchema::new(vec![
            col("id", ScalarType::Integer),
            col("id", ScalarType::Text),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn schema_keeps_order_and_lookup() {
        let schema = ColumnSchema::new(vec![
            col("b", ScalarType::Text),
            col("a", ScalarType::Float),
        ])
        .unwrap();
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(schema.get("a"), Some(ScalarType::Float));
        assert!(!schema.contains("c"));
    }
}
