// src/schema/store.rs

use anyhow::{Context, Result};
use std::{
    fs,
    io::{BufReader, Write},
    path::Path,
};

use super::ColumnSchema;

/// Persist `schema` as a pretty JSON array of `{"name", "type"}` objects.
///
/// Written to a dot-prefixed temp file next to `path` first, then renamed over it.
pub fn write_schema(path: &Path, schema: &ColumnSchema) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = dir {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "schema.json".into());
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let mut tmp = fs::File::create(&tmp_path)
        .with_context(|| format!("creating {}", tmp_path.display()))?;
    serde_json::to_writer_pretty(&mut tmp, schema).context("serializing schema JSON")?;
    tmp.write_all(b"\n")?;
    tmp.sync_all()?;

    fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {} -> {}", tmp_path.display(), path.display()))?;
    Ok(())
}

/// Load a schema file. Unknown type names are read as text.
pub fn read_schema(path: &Path) -> Result<ColumnSchema> {
    let f = fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(f))
        .with_context(|| format!("parsing schema JSON {}", path.display()))
}
