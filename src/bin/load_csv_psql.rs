use anyhow::{bail, Context, Result};
use clap::Parser;
use std::{collections::BTreeMap, path::PathBuf};
use std_traffic::{
    config::{DbArgs, DbConfig},
    logging,
    psql::{self, CopyOptions, IndexSpec, LoadJob, SchemaSource},
    schema::{derive::DEFAULT_SAMPLE_ROWS, read_schema, InferenceOptions},
    sql::SqlIdent,
};
use tracing::info;

/// Create a PostgreSQL table shaped after a CSV file (if missing) and bulk-load the file into it.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// CSV file to load
    file: PathBuf,

    /// Target database
    database: String,

    /// Target table
    table: String,

    /// Whether the first line of the file is a header
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    headers: bool,

    /// Comma-separated column names (required without a header)
    #[arg(long, value_delimiter = ',')]
    columns: Option<Vec<String>>,

    /// Field delimiter (single ASCII character)
    #[arg(long, default_value = ";")]
    delim: String,

    /// Cell value that stands for NULL
    #[arg(long, default_value = "")]
    null: String,

    /// Data rows sampled for type inference
    #[arg(long, default_value_t = DEFAULT_SAMPLE_ROWS)]
    sample_rows: usize,

    /// Keep scanning past the sample for columns that were all null in it
    #[arg(long)]
    rescan_nulls: bool,

    /// Index to create with a new table, as `name=col1,col2` (repeatable)
    #[arg(long = "index")]
    indexes: Vec<String>,

    /// Write the schema used for a new table to this JSON file
    #[arg(long)]
    schema_out: Option<PathBuf>,

    /// Use this JSON schema instead of inferring one
    #[arg(long)]
    schema_in: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    password: Option<String>,

    #[arg(long)]
    port: Option<u16>,
}

fn parse_delimiter(raw: &str) -> Result<u8> {
    match raw.as_bytes() {
        [b] if b.is_ascii() => Ok(*b),
        _ => bail!("delimiter must be a single ASCII character, got {:?}", raw),
    }
}

fn parse_indexes(raw: &[String]) -> Result<IndexSpec> {
    let mut indexes = BTreeMap::new();
    for spec in raw {
        let (name, cols) = spec
            .split_once('=')
            .with_context(|| format!("index {:?} is not of the form name=col1,col2", spec))?;
        let cols: Vec<String> = cols
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if name.trim().is_empty() || cols.is_empty() {
            bail!("index {:?} needs a name and at least one column", spec);
        }
        if indexes.insert(name.trim().to_string(), cols).is_some() {
            bail!("index {:?} given twice", name);
        }
    }
    Ok(indexes)
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("info,std_traffic=info");
    let args = Args::parse();

    let delimiter = parse_delimiter(&args.delim)?;
    let indexes = parse_indexes(&args.indexes)?;
    let table = SqlIdent::new(args.table.as_str())?;

    let schema = match &args.schema_in {
        Some(path) => SchemaSource::Given(read_schema(path)?),
        None => SchemaSource::Infer(InferenceOptions {
            delimiter,
            sample_rows: args.sample_rows,
            has_headers: args.headers,
            column_names: args.columns.clone(),
            null_marker: args.null.clone(),
            rescan_nulls: args.rescan_nulls,
            ..Default::default()
        }),
    };

    let job = LoadJob {
        table,
        csv_path: args.file.clone(),
        schema,
        copy: CopyOptions {
            delimiter,
            null_marker: args.null.clone(),
            has_headers: args.headers,
            columns: args.columns.clone(),
        },
        indexes,
        schema_out: args.schema_out.clone(),
    };

    let cfg = DbConfig::from_args(DbArgs {
        database: args.database,
        host: args.host,
        user: args.user,
        password: args.password,
        port: args.port,
    })?;

    let mut client = psql::connect(&cfg).await?;
    let report = psql::run_load(&mut client, &job).await?;
    info!(rows = report.rows, created = report.created, "load finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_must_be_one_ascii_byte() {
        assert_eq!(parse_delimiter(";").unwrap(), b';');
        assert_eq!(parse_delimiter("\t").unwrap(), b'\t');
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter(";;").is_err());
        assert!(parse_delimiter("é").is_err());
    }

    #[test]
    fn index_specs() {
        let got = parse_indexes(&["by_time=t".to_string(), "by_veh=id, t".to_string()]).unwrap();
        assert_eq!(got["by_time"], vec!["t"]);
        assert_eq!(got["by_veh"], vec!["id", "t"]);

        assert!(parse_indexes(&["no_columns=".to_string()]).is_err());
        assert!(parse_indexes(&["missing_equals".to_string()]).is_err());
        assert!(parse_indexes(&["a=x".to_string(), "a=y".to_string()]).is_err());
    }
}
