use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

/// One teacher rating of a graded paper. Field names follow the existing
/// `grading_results.json` consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LedgerEntry {
    pub(crate) timestamp: String,
    #[serde(rename = "telegram_id")]
    pub(crate) user_id: i64,
    #[serde(rename = "teacher_phone")]
    pub(crate) teacher_contact: String,
    pub(crate) task_id: String,
    pub(crate) grade: Value,
    pub(crate) feedback: String,
    pub(crate) teacher_rating: String,
    #[serde(rename = "student_answer_b64")]
    pub(crate) student_image_b64: String,
    #[serde(rename = "ai_graded_b64")]
    pub(crate) annotated_image_b64: Option<String>,
}

/// JSON-array file rewritten in full on every append, behind one writer lock.
#[derive(Debug)]
pub(crate) struct ResultLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ResultLedger {
    /// Opens the ledger, creating an empty array file when none exists.
    pub(crate) async fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create ledger directory {}", parent.display()))?;
        }

        if tokio::fs::metadata(&path).await.is_err() {
            tokio::fs::write(&path, b"[]")
                .await
                .with_context(|| format!("Failed to create ledger {}", path.display()))?;
        }

        Ok(Self { path, write_lock: Mutex::new(()) })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) async fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self.read_all().await?;
        entries.push(serde_json::to_value(entry).context("Failed to encode ledger entry")?);

        let encoded =
            serde_json::to_vec_pretty(&entries).context("Failed to encode ledger contents")?;
        let staging = self.staging_path();
        tokio::fs::write(&staging, &encoded)
            .await
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        tracing::debug!(task_id = %entry.task_id, entries = entries.len(), "Ledger entry appended");
        Ok(())
    }

    /// Existing entries are kept as raw JSON so unknown fields survive rewrites.
    pub(crate) async fn read_all(&self) -> Result<Vec<Value>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(anyhow!(err).context(format!("Failed to read {}", self.path.display())))
            }
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        serde_json::from_slice(&raw)
            .with_context(|| format!("Ledger {} is not a JSON array", self.path.display()))
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
