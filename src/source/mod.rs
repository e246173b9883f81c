//! Report file discovery and row parsing.
//!
//! The job only needs two things from the outside world: "give me today's
//! report file, if any" and "turn that file into rows". Both are traits so
//! the pipeline can run against fixtures in tests.

pub mod csv_rows;

pub use csv_rows::CsvRowParser;

use crate::models::RawRecord;
use chrono::{DateTime, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Errors from locating the report file.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("inbox directory not found: {0}")]
    MissingInbox(PathBuf),
    #[error("failed to list inbox {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Errors from reading rows out of a report file.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed report {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("report {path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },
}

/// A report file picked for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Identity used for duplicate suppression.
    pub id: String,
    /// File name without directory.
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

impl SourceFile {
    /// Build a file record; the id covers name, size, and mtime so a
    /// refreshed export under the same name is seen as new data.
    pub fn new(path: PathBuf, size: u64, modified: DateTime<Utc>) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let id = format!("{}:{}:{}", name, size, modified.timestamp());
        Self {
            id,
            name,
            path,
            size,
            modified,
        }
    }
}

/// Where today's report comes from.
pub trait FileSource: Send + Sync {
    fn fetch_today(&self, day: NaiveDate) -> Result<Option<SourceFile>, SourceError>;
}

/// Turns a report file into rows.
pub trait RowParser: Send + Sync {
    fn parse_rows(&self, file: &SourceFile) -> Result<Vec<RawRecord>, ParseError>;
}

/// Configuration for inbox scanning.
#[derive(Debug, Clone)]
pub struct InboxConfig {
    pub dir: PathBuf,
    /// Allowed extensions, compared case-insensitively.
    pub extensions: Vec<String>,
    /// strftime pattern of the date embedded in report names.
    pub date_pattern: String,
    /// Use the newest file when none matches today.
    pub fallback_to_latest: bool,
}

impl From<&crate::config::SourceConfig> for InboxConfig {
    fn from(config: &crate::config::SourceConfig) -> Self {
        Self {
            dir: PathBuf::from(&config.inbox),
            extensions: config.extensions.clone(),
            date_pattern: config.date_pattern.clone(),
            fallback_to_latest: config.fallback_to_latest,
        }
    }
}

/// Picks the report from a local directory the transfer job drops files into.
pub struct InboxSource {
    config: InboxConfig,
}

impl InboxSource {
    pub fn new(config: InboxConfig) -> Self {
        Self { config }
    }

    /// All report candidates in the inbox, newest first.
    pub fn scan(&self) -> Result<Vec<SourceFile>, SourceError> {
        let dir = &self.config.dir;
        if !dir.is_dir() {
            return Err(SourceError::MissingInbox(dir.clone()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|source| SourceError::List {
                path: dir.clone(),
                source,
            })?;

            if !entry.file_type().is_file() || !self.matches(entry.path()) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    debug!("Cannot stat {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            let modified = modified_time(entry.path(), metadata.modified());

            files.push(SourceFile::new(
                entry.path().to_path_buf(),
                metadata.len(),
                modified,
            ));
        }

        files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        Ok(files)
    }

    fn matches(&self, path: &Path) -> bool {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.starts_with('.') {
            return false;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        self.config
            .extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
    }
}

/// Modification time, or the Unix epoch when the filesystem cannot report
/// one. The fallback must be stable so the file id stays the same.
fn modified_time(path: &Path, modified: std::io::Result<SystemTime>) -> DateTime<Utc> {
    match modified {
        Ok(time) => DateTime::<Utc>::from(time),
        Err(e) => {
            debug!("No mtime for {}: {}", path.display(), e);
            DateTime::<Utc>::from(SystemTime::UNIX_EPOCH)
        }
    }
}

impl FileSource for InboxSource {
    fn fetch_today(&self, day: NaiveDate) -> Result<Option<SourceFile>, SourceError> {
        let files = self.scan()?;
        let pattern = day.format(&self.config.date_pattern).to_string();
        debug!("Looking for '{}' among {} files", pattern, files.len());

        if let Some(today) = files.iter().find(|f| f.name.contains(&pattern)) {
            info!("Found today's report: {}", today.name);
            return Ok(Some(today.clone()));
        }

        if self.config.fallback_to_latest {
            if let Some(latest) = files.into_iter().next() {
                warn!(
                    "No report matching '{}'; using latest file {}",
                    pattern, latest.name
                );
                return Ok(Some(latest));
            }
        }

        Ok(None)
    }
}
