// src/psql/mod.rs

//! PostgreSQL side of the CSV loader: connection setup, idempotent table
//! provisioning and COPY-based bulk loading.

pub mod load;
pub mod provision;
pub mod session;
pub mod types;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

use crate::{
    config::DbConfig,
    schema::{infer_columns, write_schema, ColumnSchema, InferenceOptions},
    sql::SqlIdent,
};

pub use load::{load_table_from_csv, CopyOptions};
pub use provision::{provision_table, IndexSpec};
pub use session::PgSession;
pub use types::pg_type;

/// Open a connection and drive it on the current tokio runtime.
///
/// The connection lives as long as the returned `Client`.
pub async fn connect(cfg: &DbConfig) -> Result<Client> {
    let mut pg = tokio_postgres::Config::new();
    pg.host(&cfg.host)
        .port(cfg.port)
        .user(&cfg.user)
        .password(&cfg.password)
        .dbname(&cfg.database)
        .application_name("std-traffic");

    let (client, connection) = pg.connect(NoTls).await.with_context(|| {
        format!(
            "connecting to postgres at {}:{}/{}",
            cfg.host, cfg.port, cfg.database
        )
    })?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, "postgres connection error");
        }
    });
    info!(host = %cfg.host, port = cfg.port, database = %cfg.database, "connected");
    Ok(client)
}

/// Where the column schema for a new table comes from.
#[derive(Debug, Clone)]
pub enum SchemaSource {
    /// Sample the CSV itself.
    Infer(InferenceOptions),
    /// Use a schema loaded up front (e.g. from `--schema-in`).
    Given(ColumnSchema),
}

#[derive(Debug, Clone)]
pub struct LoadJob {
    pub table: SqlIdent,
    pub csv_path: PathBuf,
    pub schema: SchemaSource,
    pub copy: CopyOptions,
    pub indexes: IndexSpec,
    /// Write the schema used for a newly created table here.
    pub schema_out: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub created: bool,
    pub rows: u64,
}

/// Provision the target table, then bulk-load the CSV into it.
///
/// Provisioning and loading commit in separate transactions: a table created
/// by a run whose COPY later fails stays in place (empty), matching a rerun.
#[tracing::instrument(level = "info", skip_all, fields(table = %job.table, path = %job.csv_path.display()))]
pub async fn run_load(client: &mut Client, job: &LoadJob) -> Result<LoadReport> {
    // ─── 1) provision ────────────────────────────────────────────────
    let mut tx = client.transaction().await.context("opening transaction")?;
    let created = provision_table(&mut tx, &job.table, &job.indexes, || {
        let schema = match &job.schema {
            SchemaSource::Infer(opts) => infer_columns(&job.csv_path, opts)?,
            SchemaSource::Given(schema) => schema.clone(),
        };
        if let Some(out) = &job.schema_out {
            write_schema(out, &schema)?;
            info!(path = %out.display(), "wrote schema");
        }
        Ok(schema)
    })
    .await?;
    tx.commit().await.context("committing table provisioning")?;
    if created {
        info!("New table created");
    } else {
        info!("Table existed");
    }

    // ─── 2) bulk copy ────────────────────────────────────────────────
    let mut tx = client.transaction().await.context("opening transaction")?;
    let rows = load_table_from_csv(&mut tx, &job.table, &job.csv_path, &job.copy).await?;
    tx.commit().await.context("committing bulk load")?;

    Ok(LoadReport { created, rows })
}
