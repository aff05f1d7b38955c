// ABOUTME: Durable single-value watermark cursor stored as a plain integer file
// ABOUTME: Atomic replace on write so a crash can never leave a torn cursor

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Persists the highest successfully synced `order_log_id` between runs.
///
/// This file is the only crash-recovery state in the whole system: its value
/// decides where the next cycle resumes. A missing file means "never synced"
/// and reads as 0; an unreadable or unparsable file is a hard error, because
/// silently defaulting to 0 would reprocess the entire source history.
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location under the user's home directory, next to the other
    /// replicator state.
    pub fn default_path() -> Result<PathBuf> {
        let home_dir =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home_dir.join(".events-replicator").join("last_sync_id"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last committed cursor. Returns 0 only when the file does not
    /// exist yet; any other failure surfaces loudly.
    pub fn get(&self) -> Result<u64> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read watermark from {}", self.path.display())
                })
            }
        };

        contents.trim().parse::<u64>().with_context(|| {
            format!(
                "Corrupt watermark file {}: expected a single non-negative integer, found {:?}",
                self.path.display(),
                contents.trim()
            )
        })
    }

    /// Durably persist the new cursor with write-temp + fsync + rename, so a
    /// crash mid-write leaves either the old value or the new one, never a
    /// partial file.
    pub fn set(&self, id: u64) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
        write!(tmp, "{}", id).context("Failed to write watermark to temp file")?;
        tmp.as_file()
            .sync_all()
            .context("Failed to sync watermark temp file")?;
        tmp.persist(&self.path).with_context(|| {
            format!("Failed to persist watermark to {}", self.path.display())
        })?;

        tracing::debug!("Committed watermark {} to {}", id, self.path.display());
        Ok(())
    }
}
