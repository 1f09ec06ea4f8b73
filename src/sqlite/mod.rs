// src/sqlite/mod.rs

//! Embedded SQLite output for flattened timestep records.
//!
//! One table per input log with a fixed, hand-maintained column set and a
//! `(t, id)` primary key. All rows of a file are written in a single
//! transaction, so a failing row leaves the table as it was before the run.

use anyhow::{anyhow, Context, Result};
use rusqlite::{params_from_iter, types::Value, Connection};
use std::{
    collections::BTreeSet,
    path::Path,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    sql::{join_idents, SqlIdent},
    sumo::{parse_file, Record, TIME_KEY},
};

pub const DEFAULT_OUTPUT: &str = "SQLiteFromXML.db3";

/// Entity attribute → SQLite column type. `t FLOAT` is prepended.
pub const FIELD_TYPES: &[(&str, &str)] = &[
    ("id", "TEXT"),
    ("type", "TEXT"),
    ("x", "FLOAT"),
    ("y", "FLOAT"),
    ("z", "FLOAT"),
    ("pos", "FLOAT"),
    ("angle", "FLOAT"),
    ("speed", "FLOAT"),
    ("lane", "TEXT"),
    ("slope", "FLOAT"),
    ("edge", "INTEGER"),
];

const TIME_TYPE: &str = "FLOAT";

fn column_type(name: &str) -> Option<&'static str> {
    if name == TIME_KEY {
        return Some(TIME_TYPE);
    }
    FIELD_TYPES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, ty)| *ty)
}

/// Table name for an input log: file name up to the first `.`, `-` → `__`.
pub fn table_name_for(input: &Path) -> Result<SqlIdent> {
    let file_name = input
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("cannot derive a table name from {}", input.display()))?;
    let stem = file_name.split('.').next().unwrap_or(file_name);
    SqlIdent::new(stem.replace('-', "__"))
        .with_context(|| format!("deriving table name from {}", input.display()))
}

pub fn create_table_sql(table: &SqlIdent) -> Result<String> {
    let mut defs = Vec::with_capacity(FIELD_TYPES.len() + 2);
    defs.push(format!("    {} {}", SqlIdent::new(TIME_KEY)?, TIME_TYPE));
    for (name, ty) in FIELD_TYPES {
        defs.push(format!("    {} {}", SqlIdent::new(*name)?, ty));
    }
    defs.push("    PRIMARY KEY (\"t\", \"id\")".to_string());
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
        table,
        defs.join(",\n")
    ))
}

/// Bind a raw attribute as the column's storage class when it parses.
fn typed_value(ty: &str, raw: &str) -> Value {
    match ty {
        "FLOAT" => raw
            .trim()
            .parse::<f64>()
            .map(Value::Real)
            .unwrap_or_else(|_| Value::Text(raw.to_string())),
        "INTEGER" => raw
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .unwrap_or_else(|_| Value::Text(raw.to_string())),
        _ => Value::Text(raw.to_string()),
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InsertReport {
    pub rows: usize,
    /// Attribute names that have no column and were left out.
    pub dropped: BTreeSet<String>,
}

pub struct SqliteWriter {
    conn: Connection,
}

impl SqliteWriter {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("opening SQLite database {}", path.display()))?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory().context("opening in-memory SQLite")?,
        })
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn table_exists(&self, table: &SqlIdent) -> Result<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table.as_str()],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    /// Create the log table unless it exists. Returns `true` when created.
    pub fn ensure_table(&self, table: &SqlIdent) -> Result<bool> {
        if self.table_exists(table)? {
            info!(%table, "table exists, appending");
            return Ok(false);
        }
        self.conn
            .execute_batch(&create_table_sql(table)?)
            .with_context(|| format!("creating table {}", table))?;
        info!(%table, "table created");
        Ok(true)
    }

    /// Insert every record in one transaction; any failure rolls all back.
    pub fn insert_records(&mut self, table: &SqlIdent, records: &[Record]) -> Result<InsertReport> {
        let mut report = InsertReport::default();
        let tx = self.conn.transaction().context("beginning transaction")?;
        {
            for (i, rec) in records.iter().enumerate() {
                let mut cols = Vec::with_capacity(rec.fields.len());
                let mut values = Vec::with_capacity(rec.fields.len());
                for (key, raw) in &rec.fields {
                    match column_type(key) {
                        Some(ty) => {
                            cols.push(SqlIdent::new(key.as_str())?);
                            values.push(typed_value(ty, raw));
                        }
                        None => {
                            if report.dropped.insert(key.clone()) {
                                warn!(attribute = %key, kind = %rec.kind, "no column for attribute, dropping it");
                            }
                        }
                    }
                }

                let placeholders = (1..=cols.len())
                    .map(|n| format!("?{}", n))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table,
                    join_idents(&cols),
                    placeholders
                );
                let mut stmt = tx.prepare_cached(&sql)?;
                stmt.execute(params_from_iter(values.iter()))
                    .with_context(|| format!("inserting record {} ({:?})", i, rec.get("id")))?;
                report.rows += 1;
            }
        }
        tx.commit().context("committing records")?;
        debug!(rows = report.rows, "inserted records");
        Ok(report)
    }
}

#[derive(Debug, Clone)]
pub struct ConvertReport {
    pub table: SqlIdent,
    pub created: bool,
    pub insert: InsertReport,
    pub elapsed: Duration,
}

/// Parse `input` and write its records into `output`.
#[tracing::instrument(level = "info", skip_all, fields(input = %input.display(), output = %output.display()))]
pub fn convert_file(input: &Path, output: &Path) -> Result<ConvertReport> {
    let start = Instant::now();
    let table = table_name_for(input)?;
    let records = parse_file(input)?;

    let mut writer = SqliteWriter::open(output)?;
    let created = writer.ensure_table(&table)?;
    let insert = writer.insert_records(&table, &records)?;

    let elapsed = start.elapsed();
    info!(%table, rows = insert.rows, elapsed = ?elapsed, "conversion finished");
    Ok(ConvertReport {
        table,
        created,
        insert,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sumo::parse_timesteps;
    use std::fs;
    use tempfile::tempdir;

    const LOG: &str = r#"<fcd-export>
  <timestep time="0.00">
    <vehicle id="v0" x="1.0" y="2.0" angle="90" type="car" speed="3.5" pos="4" lane="e_0" slope="0" odometer="12"/>
    <vehicle id="v1" x="1.5" y="2.0" angle="90" type="car" speed="0.0" pos="1" lane="e_1" slope="0"/>
    <person id="p0" x="0.0" y="0.0" angle="0" speed="1.2" pos="0" edge="17" slope="0"/>
  </timestep>
  <timestep time="1.00">
    <vehicle id="v0" x="4.5" y="2.0" angle="90" type="car" speed="3.5" pos="7.5" lane="e_0" slope="0"/>
    <vehicle id="v1" x="1.5" y="2.0" angle="90" type="car" speed="0.0" pos="1" lane="e_1" slope="0"/>
    <person id="p0" x="1.2" y="0.0" angle="0" speed="1.2" pos="1.2" edge="17" slope="0"/>
  </timestep>
</fcd-export>"#;

    #[test]
    fn table_names_from_file_names() -> Result<()> {
        assert_eq!(table_name_for(Path::new("/data/fcd-out.xml"))?.as_str(), "fcd__out");
        assert_eq!(table_name_for(Path::new("run-1.fcd.xml"))?.as_str(), "run__1");
        assert_eq!(table_name_for(Path::new("a-b-c.xml"))?.as_str(), "a__b__c");
        assert!(table_name_for(Path::new("/")).is_err());
        Ok(())
    }

    #[test]
    fn create_statement_has_fixed_columns_and_key() -> Result<()> {
        let sql = create_table_sql(&SqlIdent::new("fcd")?)?;
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"fcd\" (\n    \"t\" FLOAT,\n    \"id\" TEXT,"));
        assert!(sql.contains("\"edge\" INTEGER"));
        assert!(sql.trim_end().ends_with("PRIMARY KEY (\"t\", \"id\")\n);"));
        Ok(())
    }

    #[test]
    fn inserts_typed_rows_in_one_transaction() -> Result<()> {
        let records = parse_timesteps(LOG.as_bytes())?;
        let mut writer = SqliteWriter::open_in_memory()?;
        let table = SqlIdent::new("fcd")?;
        assert!(writer.ensure_table(&table)?);
        assert!(!writer.ensure_table(&table)?);

        let report = writer.insert_records(&table, &records)?;
        assert_eq!(report.rows, 6);
        assert_eq!(report.dropped.iter().collect::<Vec<_>>(), vec!["odometer"]);

        let conn = writer.connection();
        let n: i64 = conn.query_row("SELECT count(*) FROM \"fcd\"", [], |r| r.get(0))?;
        assert_eq!(n, 6);

        let (ty, speed, kind): (String, String, String) = conn.query_row(
            "SELECT type, typeof(speed), typeof(t) FROM \"fcd\" WHERE id = 'p0' AND t = 1.0",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;
        assert_eq!(ty, "person");
        assert_eq!(speed, "real");
        assert_eq!(kind, "real");

        let edge: i64 = conn.query_row("SELECT edge FROM \"fcd\" WHERE id = 'p0' AND t = 0", [], |r| r.get(0))?;
        assert_eq!(edge, 17);
        Ok(())
    }

    #[test]
    fn duplicate_key_rolls_back_the_whole_file() -> Result<()> {
        let records = parse_timesteps(LOG.as_bytes())?;
        let mut writer = SqliteWriter::open_in_memory()?;
        let table = SqlIdent::new("fcd")?;
        writer.ensure_table(&table)?;

        let mut doubled = records.clone();
        doubled.push(records[0].clone());
        assert!(writer.insert_records(&table, &doubled).is_err());

        let n: i64 = writer
            .connection()
            .query_row("SELECT count(*) FROM \"fcd\"", [], |r| r.get(0))?;
        assert_eq!(n, 0);
        Ok(())
    }

    #[test]
    fn convert_file_end_to_end() -> Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("sim-run.xml");
        let output = dir.path().join("out.db3");
        fs::write(&input, LOG)?;

        let report = convert_file(&input, &output)?;
        assert_eq!(report.table.as_str(), "sim__run");
        assert!(report.created);
        assert_eq!(report.insert.rows, 6);

        // a second run hits the primary key and changes nothing
        assert!(convert_file(&input, &output).is_err());
        let writer = SqliteWriter::open(&output)?;
        let n: i64 = writer
            .connection()
            .query_row("SELECT count(*) FROM \"sim__run\"", [], |r| r.get(0))?;
        assert_eq!(n, 6);
        Ok(())
    }
}
