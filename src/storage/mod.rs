use crate::models::{RecencyVerdict, ResultSet};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ── Atomic JSON writes ────────────────────────────────────────────────────────

/// Write-to-temp then rename, so readers never see a half-written file.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }

    let json = serde_json::to_string_pretty(value).context("Failed to serialise JSON")?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to move {:?} into place", path))?;
    Ok(())
}

// ── Result sink ───────────────────────────────────────────────────────────────

/// Accumulates verdicts and keeps the results file current.
pub struct ResultsWriter {
    path: PathBuf,
    incremental: bool,
    results: ResultSet,
}

impl ResultsWriter {
    /// Fails early when the output location is unusable, before any lookup.
    pub fn create(path: &Path, incremental: bool) -> Result<Self> {
        let writer = Self {
            path: path.to_path_buf(),
            incremental,
            results: ResultSet::new(),
        };
        writer.flush().context("Output file is not writable")?;
        Ok(writer)
    }

    pub fn record(&mut self, verdict: RecencyVerdict) {
        self.results.insert(verdict);
        if self.incremental {
            if let Err(e) = self.flush() {
                warn!("Could not update {:?}: {:#}", self.path, e);
            }
        }
    }

    pub fn flush(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.results)
    }

    pub fn finish(self) -> Result<ResultSet> {
        self.flush()?;
        info!("Results saved to: {}", self.path.display());
        Ok(self.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VerdictStatus;

    fn verdict(name: &str) -> RecencyVerdict {
        RecencyVerdict {
            username: name.into(),
            hashtag: format!("t_{}", name),
            posts_seen: 0,
            dates_found: 0,
            most_recent_instant: None,
            most_recent_display: None,
            status: VerdictStatus::NoPosts,
            error_detail: None,
        }
    }

    fn read(path: &Path) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_incremental_writes_keep_file_current() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/results.json");

        let mut writer = ResultsWriter::create(&path, true).unwrap();
        assert_eq!(read(&path), serde_json::json!({}));

        writer.record(verdict("alice"));
        assert_eq!(read(&path)["alice"]["status"], "no_posts");

        writer.record(verdict("bob"));
        let set = writer.finish().unwrap();
        assert_eq!(set.len(), 2);
        assert!(read(&path).get("bob").is_some());
        assert!(!dir.path().join("out/results.json.tmp").exists());
    }

    #[test]
    fn test_deferred_mode_writes_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");

        let mut writer = ResultsWriter::create(&path, false).unwrap();
        writer.record(verdict("alice"));
        assert_eq!(read(&path), serde_json::json!({}));
        writer.finish().unwrap();
        assert!(read(&path).get("alice").is_some());
    }
}
