//! Append-only history of stage invocations.
//!
//! History is an audit trail; failing to append is logged, never fatal.
use super::{HistoryEntry, RunPaths};
use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Append a history entry as JSONL.
pub fn append_history(run_root: &Path, entry: &HistoryEntry) -> Result<()> {
    let path = RunPaths::new(run_root.to_path_buf()).history_path();
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open {}", path.display()))?;
    let line = serde_json::to_string(entry).context("serialize history entry")?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("write {}", path.display()))?;
    file.write_all(b"\n")
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Read all history entries; unparseable lines are skipped.
pub fn read_history(run_root: &Path) -> Result<Vec<HistoryEntry>> {
    let path = RunPaths::new(run_root.to_path_buf()).history_path();
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
