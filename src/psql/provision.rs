// src/psql/provision.rs

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{session::PgSession, types::pg_type};
use crate::{
    schema::ColumnSchema,
    sql::{join_idents, SqlIdent},
};

/// Index name → ordered column names. Only used when a table is created.
pub type IndexSpec = BTreeMap<String, Vec<String>>;

/// DDL that creates `table` from nothing: an empty shell, one
/// `add column` per schema entry, then the secondary indexes.
pub fn create_statements(
    table: &SqlIdent,
    schema: &ColumnSchema,
    indexes: &IndexSpec,
) -> Result<Vec<String>> {
    if schema.is_empty() {
        bail!("refusing to create {} without columns", table);
    }

    let mut stmts = Vec::with_capacity(1 + schema.len() + indexes.len());
    stmts.push(format!("create table if not exists {} ()", table));
    for col in schema.iter() {
        let ident = SqlIdent::new(col.name.as_str())?;
        stmts.push(format!(
            "alter table {} add column {} {}",
            table,
            ident,
            pg_type(col.ty)
        ));
    }

    for (name, cols) in indexes {
        if cols.is_empty() {
            bail!("index `{}` lists no columns", name);
        }
        let mut idents = Vec::with_capacity(cols.len());
        for c in cols {
            if !schema.contains(c) {
                bail!("index `{}` references unknown column `{}`", name, c);
            }
            idents.push(SqlIdent::new(c.as_str())?);
        }
        stmts.push(format!(
            "create index {} on {} ({})",
            SqlIdent::new(name.as_str())?,
            table,
            join_idents(&idents)
        ));
    }
    Ok(stmts)
}

/// Create `table` if and only if it does not exist yet.
///
/// `schema` is only evaluated when the table is absent, so callers can defer
/// the CSV scan. Returns `true` when the table was created. Nothing is
/// committed here; a failed statement leaves the surrounding transaction to
/// be rolled back by the caller.
pub async fn provision_table<S, F>(
    session: &mut S,
    table: &SqlIdent,
    indexes: &IndexSpec,
    schema: F,
) -> Result<bool>
where
    S: PgSession,
    F: FnOnce() -> Result<ColumnSchema>,
{
    if session.table_exists(table).await? {
        debug!(%table, "table already exists, skipping provisioning");
        return Ok(false);
    }

    let schema = schema()?;
    let stmts = create_statements(table, &schema, indexes)?;
    for sql in &stmts {
        session
            .execute(sql)
            .await
            .with_context(|| format!("provisioning {}", table))?;
    }
    info!(%table, columns = schema.len(), indexes = indexes.len(), "created table");
    Ok(true)
}
