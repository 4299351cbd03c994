use crate::core::record::AnalysisRecord;
use crate::core::video;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs as std_fs;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

const DATASETS_DIR: &str = "datasets";
const REPORTS_DIR: &str = "reports";
const RECORD_PREFIX: &str = "record_";
const RECORD_SUFFIX: &str = ".json";
const REPORT_PREFIX: &str = "report_";
const REPORT_SUFFIX: &str = ".md";

/// Destination for finished records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Returns a human-readable description of where the record went.
    async fn publish(&self, record: &AnalysisRecord) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: PathBuf,
    pub name: String,
    pub file_type: FileType,
    pub size: u64,
    pub modified: std::time::SystemTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FileType {
    Record,
    Report,
}

/// Records stored as JSON under `datasets/`, with a Markdown rendering under
/// `reports/`, both relative to `root`.
#[derive(Debug, Clone)]
pub struct LocalDataset {
    root: PathBuf,
}

impl LocalDataset {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn datasets_dir(&self) -> PathBuf {
        self.root.join(DATASETS_DIR)
    }

    fn reports_dir(&self) -> PathBuf {
        self.root.join(REPORTS_DIR)
    }

    fn ensure_directories(&self) -> Result<()> {
        ensure_directory(&self.datasets_dir())?;
        ensure_directory(&self.reports_dir())?;
        Ok(())
    }

    fn record_name(record: &AnalysisRecord) -> Result<String> {
        let id = match &record.video_id {
            Some(id) => video::sanitize_video_id(id)?,
            None => video::file_stem_for(&record.video_url),
        };
        Ok(format!(
            "{id}_{}",
            record.analyzed_at.format("%Y%m%dT%H%M%S")
        ))
    }

    pub async fn save(&self, record: &AnalysisRecord) -> Result<(PathBuf, PathBuf)> {
        self.ensure_directories()?;
        let name = Self::record_name(record)?;

        let record_path = self
            .datasets_dir()
            .join(format!("{RECORD_PREFIX}{name}{RECORD_SUFFIX}"));
        let report_path = self
            .reports_dir()
            .join(format!("{REPORT_PREFIX}{name}{REPORT_SUFFIX}"));

        fs::write(&record_path, serde_json::to_vec_pretty(record)?).await?;
        fs::write(&report_path, record.to_markdown()).await?;

        Ok((record_path, report_path))
    }

    pub fn list_files(&self) -> Result<Vec<FileEntry>> {
        self.ensure_directories()?;
        let mut files = Vec::new();

        collect_entries(
            &self.datasets_dir(),
            RECORD_PREFIX,
            RECORD_SUFFIX,
            FileType::Record,
            &mut files,
        )?;
        collect_entries(
            &self.reports_dir(),
            REPORT_PREFIX,
            REPORT_SUFFIX,
            FileType::Report,
            &mut files,
        )?;

        // Sort by modification time (newest first)
        files.sort_by(|a, b| b.modified.cmp(&a.modified));

        Ok(files)
    }
}

#[async_trait]
impl RecordSink for LocalDataset {
    async fn publish(&self, record: &AnalysisRecord) -> Result<String> {
        let (record_path, report_path) = self
            .save(record)
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;
        info!(
            record = %record_path.display(),
            report = %report_path.display(),
            "Record saved locally"
        );
        Ok(record_path.display().to_string())
    }
}

fn collect_entries(
    dir: &Path,
    prefix: &str,
    suffix: &str,
    file_type: FileType,
    files: &mut Vec<FileEntry>,
) -> Result<()> {
    let Ok(entries) = std_fs::read_dir(dir) else {
        return Ok(());
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();

        if let Some(name) = path.file_name().and_then(|n| n.to_str())
            && name.starts_with(prefix)
            && name.ends_with(suffix)
        {
            let metadata = entry.metadata()?;
            files.push(FileEntry {
                path: path.clone(),
                name: name.to_string(),
                file_type: file_type.clone(),
                size: metadata.len(),
                modified: metadata.modified()?,
            });
        }
    }

    Ok(())
}

fn ensure_directory(path: &Path) -> Result<()> {
    std_fs::create_dir_all(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = std_fs::metadata(path)?;
        let mut permissions = metadata.permissions();
        if permissions.mode() & 0o777 != 0o700 {
            permissions.set_mode(0o700);
            std_fs::set_permissions(path, permissions)?;
        }
    }

    Ok(())
}
