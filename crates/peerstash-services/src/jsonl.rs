//! JSON-lines persistence: one serde record per line.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Replace `path` with one line per record. Atomic via tmp + rename.
pub fn write_all<'a, T, I>(path: &Path, records: I) -> Result<()>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, record).context("failed to serialize record")?;
        out.push(b'\n');
    }

    let tmp_path = path.with_extension("jsonl.tmp");
    {
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;
        file.write_all(&out)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        file.sync_all().context("failed to sync")?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename {} to {}", tmp_path.display(), path.display()))
}

/// Read every parseable record. Missing file = empty. Bad lines are skipped.
pub fn read_all<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };

    let mut records = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    line = line_no + 1,
                    "skipping unreadable record"
                );
            }
        }
    }
    Ok(records)
}
