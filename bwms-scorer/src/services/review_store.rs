//! Review corpus store
//!
//! One JSON file per review under `<corpus_root>/<showId>/<name>.json`. The
//! review id is the path relative to the root without the extension.
//! Writes go through a temp file and rename so a killed process never leaves
//! a half-written review.

use bwms_common::{Error, Result};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::models::rescore_run::RunSelector;
use crate::models::review::{ReviewId, ReviewRecord};

/// Corpus load result
#[derive(Debug, Default)]
pub struct CorpusLoad {
    pub records: Vec<ReviewRecord>,
    /// Files that could not be read or parsed (path, error)
    pub errors: Vec<(PathBuf, String)>,
}

/// File-backed review store
#[derive(Debug, Clone)]
pub struct ReviewStore {
    root: PathBuf,
}

impl ReviewStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for a review id
    ///
    /// # Errors
    /// `InvalidInput` when the id would escape the corpus root.
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        let relative = Path::new(id);
        let escapes = id.trim().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(Error::InvalidInput(format!("Invalid review id: {}", id)));
        }
        Ok(self.root.join(format!("{}.json", id)))
    }

    fn id_for(&self, path: &Path) -> Option<ReviewId> {
        let relative = path.strip_prefix(&self.root).ok()?.with_extension("");
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }

    fn should_process_entry(entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        // Hidden files, temp files from interrupted writes
        !(entry.depth() > 0 && name.starts_with('.')) && !name.ends_with(".tmp")
    }

    /// Every review file path under the root, sorted
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Err(Error::NotFound(format!(
                "Corpus root not found: {}",
                self.root.display()
            )));
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(Self::should_process_entry)
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("Error accessing corpus entry: {}", e);
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(DirEntry::into_path)
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        Ok(files)
    }

    async fn read_path(&self, path: &Path) -> Result<ReviewRecord> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut record: ReviewRecord = serde_json::from_str(&content)?;
        record.id = self
            .id_for(path)
            .ok_or_else(|| Error::InvalidInput(format!("Unusable review path: {}", path.display())))?;
        Ok(record)
    }

    /// Load every review; unreadable files are reported, not fatal
    pub async fn load_all(&self) -> Result<CorpusLoad> {
        let mut load = CorpusLoad::default();
        for path in self.discover()? {
            match self.read_path(&path).await {
                Ok(record) => load.records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable review file");
                    load.errors.push((path, e.to_string()));
                }
            }
        }
        tracing::debug!(
            reviews = load.records.len(),
            errors = load.errors.len(),
            "Corpus loaded"
        );
        Ok(load)
    }

    pub async fn load(&self, id: &str) -> Result<ReviewRecord> {
        let path = self.path_for(id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::NotFound(format!("Review not found: {}", id)));
        }
        self.read_path(&path).await
    }

    /// Atomically write a review back to its file
    pub async fn save(&self, record: &ReviewRecord) -> Result<()> {
        let path = self.path_for(&record.id)?;
        let mut content = serde_json::to_string_pretty(record)?;
        content.push('\n');

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    /// Review ids covered by a selector, sorted
    pub async fn select(&self, selector: &RunSelector, prompt_version: &str) -> Result<Vec<ReviewId>> {
        let load = self.load_all().await?;
        let shows: Option<BTreeSet<&str>> = match selector {
            RunSelector::Shows { show_ids } => Some(show_ids.iter().map(String::as_str).collect()),
            _ => None,
        };

        let mut ids: Vec<ReviewId> = load
            .records
            .iter()
            .filter(|r| match selector {
                RunSelector::All => true,
                RunSelector::Outdated => is_outdated(r, prompt_version),
                RunSelector::Shows { .. } => shows
                    .as_ref()
                    .is_some_and(|s| s.contains(r.show_id.as_str())),
            })
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Never scored under `prompt_version`, or explicitly flagged for rescoring
pub fn is_outdated(record: &ReviewRecord, prompt_version: &str) -> bool {
    if record.needs_rescore {
        return true;
    }
    match (&record.scoring, &record.quality.rejection) {
        (Some(scoring), _) => scoring.prompt_version != prompt_version,
        (None, Some(rejection)) => rejection.prompt_version != prompt_version,
        (None, None) => true,
    }
}
