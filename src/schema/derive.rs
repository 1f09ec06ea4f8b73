// src/schema/derive.rs

use anyhow::{anyhow, bail, Context, Result};
use csv::{ReaderBuilder, StringRecord};
use std::{fs::File, io::Read, path::Path};
use tracing::{debug, info};

use super::{Column, ColumnSchema, ScalarType};

/// Default delimiter of SUMO's CSV exports.
pub const DEFAULT_DELIMITER: u8 = b';';
pub const DEFAULT_SAMPLE_ROWS: usize = 1_000;
pub const DEFAULT_RESCAN_CHUNK: usize = 5_000;

#[derive(Debug, Clone)]
pub struct InferenceOptions {
    pub delimiter: u8,
    /// Data rows read for the initial sample (header excluded).
    pub sample_rows: usize,
    pub has_headers: bool,
    /// Column names for header-less files. Ignored when `has_headers` is set.
    pub column_names: Option<Vec<String>>,
    /// Cell value that counts as null. Compared untrimmed, the way COPY does.
    pub null_marker: String,
    /// Keep reading past the sample for columns that were null throughout it.
    pub rescan_nulls: bool,
    pub rescan_chunk: usize,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            sample_rows: DEFAULT_SAMPLE_ROWS,
            has_headers: true,
            column_names: None,
            null_marker: String::new(),
            rescan_nulls: false,
            rescan_chunk: DEFAULT_RESCAN_CHUNK,
        }
    }
}

/// Infer a column schema from the CSV at `path`.
///
/// Only the first `sample_rows` data rows are looked at unless
/// `rescan_nulls` is set; a column with no non-null cell in what was read is
/// typed as text. Malformed CSV is returned as an error.
#[tracing::instrument(level = "info", skip(path, opts), fields(path = %path.display()))]
pub fn infer_columns(path: &Path, opts: &InferenceOptions) -> Result<ColumnSchema> {
    let file =
        File::open(path).with_context(|| format!("opening CSV file {}", path.display()))?;
    let schema = infer_from_reader(file, opts)
        .with_context(|| format!("inferring column types of {}", path.display()))?;
    info!(columns = schema.len(), "inferred CSV schema");
    Ok(schema)
}

pub fn infer_from_reader<R: Read>(reader: R, opts: &InferenceOptions) -> Result<ColumnSchema> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(opts.delimiter)
        .has_headers(opts.has_headers)
        .from_reader(reader);

    let names = column_names(&mut rdr, opts)?;
    let null_marker = opts.null_marker.as_str();
    let mut types: Vec<Option<ScalarType>> = vec![None; names.len()];
    let mut records = rdr.records();

    // 1) initial sample
    let mut sampled = 0usize;
    for result in records.by_ref().take(opts.sample_rows) {
        let record = result.with_context(|| format!("CSV parse error in sample row {}", sampled))?;
        check_width(&record, names.len(), sampled)?;
        for (idx, slot) in types.iter_mut().enumerate() {
            observe(slot, &record[idx], null_marker);
        }
        sampled += 1;
    }
    debug!(rows = sampled, "sampled CSV rows");

    // 2) optional chunked rescan for columns still without a value
    if opts.rescan_nulls {
        let chunk = opts.rescan_chunk.max(1);
        let mut row = sampled;
        let mut pending: Vec<usize> = (0..names.len()).filter(|&i| types[i].is_none()).collect();

        while !pending.is_empty() {
            let mut chunk_types: Vec<Option<ScalarType>> = vec![None; pending.len()];
            let mut read = 0usize;
            for result in records.by_ref().take(chunk) {
                let record = result.with_context(|| format!("CSV parse error in row {}", row))?;
                check_width(&record, names.len(), row)?;
                for (slot, &idx) in chunk_types.iter_mut().zip(&pending) {
                    observe(slot, &record[idx], null_marker);
                }
                read += 1;
                row += 1;
            }
            if read == 0 {
                break;
            }

            // a chunk that produced a value fixes that column's type
            let mut still = Vec::with_capacity(pending.len());
            for (found, idx) in chunk_types.into_iter().zip(pending) {
                match found {
                    Some(ty) => {
                        debug!(column = %names[idx], %ty, row, "typed by rescan");
                        types[idx] = Some(ty);
                    }
                    None => still.push(idx),
                }
            }
            pending = still;
        }
    }

    let columns = names
        .into_iter()
        .zip(types)
        .map(|(name, ty)| {
            let ty = ty.unwrap_or_else(|| {
                debug!(column = %name, "no non-null samples, defaulting to text");
                ScalarType::Text
            });
            Column { name, ty }
        })
        .collect();
    ColumnSchema::new(columns)
}

fn column_names<R: Read>(rdr: &mut csv::Reader<R>, opts: &InferenceOptions) -> Result<Vec<String>> {
    let names: Vec<String> = if opts.has_headers {
        rdr.headers()
            .context("reading CSV header")?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { h };
                h.trim().to_string()
            })
            .collect()
    } else {
        opts.column_names
            .clone()
            .ok_or_else(|| anyhow!("CSV has no header row and no column names were supplied"))?
    };

    if names.is_empty() {
        bail!("CSV has no columns");
    }
    if let Some(idx) = names.iter().position(|n| n.is_empty()) {
        bail!("column name at index {} is empty", idx);
    }
    Ok(names)
}

fn check_width(record: &StringRecord, expected: usize, row: usize) -> Result<()> {
    if record.len() != expected {
        bail!(
            "row {} has {} fields, expected {}",
            row,
            record.len(),
            expected
        );
    }
    Ok(())
}

/// Only a cell equal to `null_marker` is null. Anything else, including an
/// empty or blank cell under another marker, reaches the table as a value.
fn observe(slot: &mut Option<ScalarType>, raw: &str, null_marker: &str) {
    if raw == null_marker {
        return;
    }
    let cell = raw.trim();
    let ty = if cell.is_empty() {
        ScalarType::Text
    } else {
        classify(cell)
    };
    *slot = Some(match *slot {
        Some(prev) => prev.widen(ty),
        None => ty,
    });
}

fn classify(cell: &str) -> ScalarType {
    if cell.parse::<i64>().is_ok() {
        ScalarType::Integer
    } else if cell.parse::<f64>().is_ok() {
        ScalarType::Float
    } else {
        ScalarType::Text
    }
}
