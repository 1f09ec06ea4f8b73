// src/psql/load.rs

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::{fs::File, path::Path};
use tracing::info;

use super::session::PgSession;
use crate::{
    config::ConfigError,
    schema::derive::DEFAULT_DELIMITER,
    sql::{join_idents, quote_literal, SqlIdent},
};

#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub delimiter: u8,
    /// Unquoted field value stored as NULL.
    pub null_marker: String,
    pub has_headers: bool,
    /// Target columns in file order. Required when the file has no header.
    pub columns: Option<Vec<String>>,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            null_marker: String::new(),
            has_headers: true,
            columns: None,
        }
    }
}

/// Column names from the first record of `path`, trimmed.
pub fn header_columns(path: &Path, delimiter: u8) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(file);
    let headers = rdr
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?;
    Ok(headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { h };
            h.trim().to_string()
        })
        .collect())
}

/// Resolve the ordered column list the COPY targets.
pub fn target_columns(path: &Path, opts: &CopyOptions) -> Result<Vec<SqlIdent>> {
    let names = match (&opts.columns, opts.has_headers) {
        (Some(cols), _) => cols.clone(),
        (None, true) => header_columns(path, opts.delimiter)?,
        (None, false) => {
            return Err(ConfigError::Argument(
                "a header-less CSV needs an explicit column list".into(),
            )
            .into())
        }
    };
    names.into_iter().map(SqlIdent::new).collect()
}

pub fn copy_statement(table: &SqlIdent, columns: &[SqlIdent], opts: &CopyOptions) -> Result<String> {
    if !opts.delimiter.is_ascii() {
        return Err(ConfigError::Argument(format!(
            "COPY delimiter must be a single ASCII character, got byte {:#04x}",
            opts.delimiter
        ))
        .into());
    }
    let delimiter = (opts.delimiter as char).to_string();
    Ok(format!(
        "copy {} ({}) from stdin with (format csv, delimiter {}, null {}, header {})",
        table,
        join_idents(columns),
        quote_literal(&delimiter),
        quote_literal(&opts.null_marker),
        opts.has_headers
    ))
}

/// Bulk-load every data row of `path` into `table` through COPY.
///
/// Any row the server rejects fails the whole COPY; there is no per-row
/// recovery. Returns the number of rows stored.
#[tracing::instrument(level = "info", skip_all, fields(table = %table, path = %path.display()))]
pub async fn load_table_from_csv<S: PgSession>(
    session: &mut S,
    table: &SqlIdent,
    path: &Path,
    opts: &CopyOptions,
) -> Result<u64> {
    let columns = target_columns(path, opts)?;
    let sql = copy_statement(table, &columns, opts)?;

    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let rows = session
        .copy_from_reader(&sql, file)
        .await
        .with_context(|| format!("bulk loading {} into {}", path.display(), table))?;
    info!(rows, "bulk load finished");
    Ok(rows)
}
