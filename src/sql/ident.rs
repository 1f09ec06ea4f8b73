// src/sql/ident.rs

use anyhow::{bail, Result};
use std::fmt;

/// A caller-supplied table, column or index name.
///
/// The raw name is kept as-is; its `Display` form is always the double-quoted
/// SQL identifier with embedded quotes doubled, so formatting an `SqlIdent`
/// into a statement can never produce anything but a single identifier token.
/// Both PostgreSQL and SQLite accept this quoting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SqlIdent(String);

impl SqlIdent {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            bail!("SQL identifier must not be empty");
        }
        if raw.contains('\0') {
            bail!("SQL identifier {:?} contains a NUL byte", raw);
        }
        Ok(Self(raw))
    }

    /// The unquoted name, e.g. for catalog lookups bound as a parameter.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0.replace('"', "\"\""))
    }
}

impl fmt::Display for SqlIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.quoted())
    }
}

/// Comma-separated list of quoted identifiers.
pub fn join_idents<'a, I>(idents: I) -> String
where
    I: IntoIterator<Item = &'a SqlIdent>,
{
    idents
        .into_iter()
        .map(SqlIdent::quoted)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Single-quoted string literal for statement options that cannot be bound
/// as parameters (e.g. `COPY ... WITH (DELIMITER ';')`).
pub fn quote_literal(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}
