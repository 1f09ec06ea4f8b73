// src/psql/session.rs

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{pin_mut, SinkExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_postgres::Transaction;
use tracing::trace;

use crate::sql::SqlIdent;

/// Bytes handed to the server per COPY message.
pub const COPY_CHUNK_BYTES: usize = 64 * 1024;

const TABLE_EXISTS_SQL: &str = "select exists (
    select 1 from information_schema.tables
    where table_schema = current_schema() and table_name = $1::text)";

/// The handful of database operations provisioning and loading need.
///
/// Implemented for a live `tokio_postgres::Transaction`; tests substitute an
/// in-memory catalog.
#[allow(async_fn_in_trait)]
pub trait PgSession {
    /// Whether `table` exists in the current schema. The raw name is bound
    /// as a parameter, never formatted into the statement.
    async fn table_exists(&mut self, table: &SqlIdent) -> Result<bool>;

    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Run a `COPY ... FROM STDIN` statement, streaming `reader` to the
    /// server. Returns the row count reported by the server.
    async fn copy_from_reader<R>(&mut self, sql: &str, reader: R) -> Result<u64>
    where
        R: AsyncRead + Unpin;
}

impl PgSession for Transaction<'_> {
    async fn table_exists(&mut self, table: &SqlIdent) -> Result<bool> {
        let row = self
            .query_one(TABLE_EXISTS_SQL, &[&table.as_str()])
            .await
            .with_context(|| format!("checking whether table {} exists", table))?;
        Ok(row.get::<_, bool>(0))
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        trace!(sql, "execute");
        Transaction::execute(self, sql, &[])
            .await
            .with_context(|| format!("executing `{}`", sql))?;
        Ok(())
    }

    async fn copy_from_reader<R>(&mut self, sql: &str, mut reader: R) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let sink = Transaction::copy_in::<str, Bytes>(self, sql)
            .await
            .with_context(|| format!("starting `{}`", sql))?;
        pin_mut!(sink);

        let mut buf = vec![0u8; COPY_CHUNK_BYTES];
        loop {
            let n = reader.read(&mut buf).await.context("reading COPY input")?;
            if n == 0 {
                break;
            }
            sink.send(Bytes::copy_from_slice(&buf[..n]))
                .await
                .context("sending COPY data")?;
        }
        let rows = sink.finish().await.context("finishing COPY")?;
        Ok(rows)
    }
}
