//! Persisted project collection (`projects-data.js`).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use folio_core::{sort_collection, ProjectRecord};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::write_atomic;

const GENERATED_BANNER: &str = "// Auto-generated by folio-sync. Do not edit manually.";
const COLLECTION_BINDING: &str = "export const projectsData";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not a valid project data file: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
    #[error("refusing to persist duplicate project name `{0}`")]
    DuplicateName(String),
    #[error("serializing project collection: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenCollection {
    pub path: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub records: usize,
    pub bytes: usize,
}

/// Sole writer of the persisted collection; the website only reads it.
#[derive(Debug, Clone)]
pub struct DataStore {
    path: PathBuf,
}

impl DataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".backup");
        self.path.with_file_name(name)
    }

    /// Reads the persisted collection. A missing file is an empty collection.
    pub async fn load(&self) -> Result<Vec<ProjectRecord>, StoreError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no persisted collection yet");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        parse_collection(&text).map_err(|reason| StoreError::Malformed {
            path: self.path.clone(),
            reason,
        })
    }

    /// Sorts `records` into display order and replaces the persisted file.
    ///
    /// The new content is fully rendered before anything touches disk; the
    /// previous file is copied to the `.backup` sibling and then atomically
    /// replaced.
    pub async fn write(
        &self,
        records: &mut [ProjectRecord],
    ) -> Result<WrittenCollection, StoreError> {
        let mut seen = HashSet::new();
        for record in records.iter() {
            if !seen.insert(record.name.as_str()) {
                return Err(StoreError::DuplicateName(record.name.clone()));
            }
        }

        sort_collection(records);
        let content = render_collection(records, Utc::now())?;

        let backup_path = match fs::try_exists(&self.path).await {
            Ok(true) => {
                let backup = self.backup_path();
                fs::copy(&self.path, &backup)
                    .await
                    .map_err(|source| StoreError::Io {
                        path: backup.clone(),
                        source,
                    })?;
                Some(backup)
            }
            Ok(false) => None,
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        write_atomic(&self.path, content.as_bytes())
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;

        info!(
            path = %self.path.display(),
            records = records.len(),
            "persisted project collection"
        );
        Ok(WrittenCollection {
            path: self.path.clone(),
            backup_path,
            records: records.len(),
            bytes: content.len(),
        })
    }
}

pub fn render_collection(
    records: &[ProjectRecord],
    generated_at: DateTime<Utc>,
) -> Result<String, serde_json::Error> {
    let body = serde_json::to_string_pretty(records)?;
    Ok(format!(
        "{GENERATED_BANNER}\n// Generated: {}\n// Total projects: {}\n\n\
         {COLLECTION_BINDING} = {body};\n",
        generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        records.len(),
    ))
}

/// Structured read of a file produced by [`render_collection`].
pub fn parse_collection(text: &str) -> Result<Vec<ProjectRecord>, String> {
    let binding = text
        .find(COLLECTION_BINDING)
        .ok_or_else(|| format!("missing `{COLLECTION_BINDING}` binding"))?;
    let after = &text[binding + COLLECTION_BINDING.len()..];
    let start = after
        .find('[')
        .ok_or_else(|| "missing collection literal".to_string())?;
    let end = after
        .rfind(']')
        .ok_or_else(|| "unterminated collection literal".to_string())?;
    if end < start {
        return Err("unterminated collection literal".to_string());
    }
    serde_json::from_str(&after[start..=end]).map_err(|err| err.to_string())
}
