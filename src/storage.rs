//! Artifact storage in the data directory.
//!
//! Every file belonging to a task is named `<id>_<purpose>[_<suffix>].<ext>`
//! directly under the data root:
//!
//! - `7_settings.json`: merged render settings
//! - `7_content.jpg` / `7_style.png`: uploaded inputs (`.jpg` or `.png`)
//! - `7_output.png`: final render
//! - `7_output_300.png`: checkpoint saved at iteration 300
//!
//! Files are served to clients under `/data/<filename>`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::core::{RenderSettings, TaskId};
use crate::error::{Error, Result};

const IMAGE_EXTENSIONS: [&str; 2] = ["jpg", "png"];
const URL_PREFIX: &str = "/data";

/// What an artifact is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Settings,
    Content,
    Style,
    Output,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Settings => "settings",
            Purpose::Content => "content",
            Purpose::Style => "style",
            Purpose::Output => "output",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "settings" => Some(Purpose::Settings),
            "content" => Some(Purpose::Content),
            "style" => Some(Purpose::Style),
            "output" => Some(Purpose::Output),
            _ => None,
        }
    }
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A data-directory file name split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub id: TaskId,
    pub purpose: Purpose,
    /// Third `_`-separated part, e.g. the iteration of a checkpoint.
    pub suffix: Option<String>,
    pub extension: String,
}

impl ArtifactName {
    /// Parse a file name. Returns `None` for anything that does not belong
    /// to a valid task id and a known purpose.
    pub fn parse(file_name: &str) -> Option<Self> {
        let path = Path::new(file_name);
        let stem = path.file_stem()?.to_str()?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let mut parts = stem.split('_');
        let id = TaskId::parse(parts.next()?).ok()?;
        let purpose = Purpose::parse(parts.next()?)?;
        let suffix = parts.next().map(str::to_string);
        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            id,
            purpose,
            suffix,
            extension,
        })
    }

    pub fn is_settings(&self) -> bool {
        self.purpose == Purpose::Settings && self.suffix.is_none() && self.extension == "json"
    }

    pub fn is_input_image(&self, purpose: Purpose) -> bool {
        self.purpose == purpose
            && self.suffix.is_none()
            && IMAGE_EXTENSIONS.contains(&self.extension.as_str())
    }

    pub fn is_final_output(&self) -> bool {
        self.purpose == Purpose::Output && self.suffix.is_none()
    }

    /// Iteration of a checkpoint image, if this is one.
    pub fn checkpoint_iteration(&self) -> Option<u32> {
        if self.purpose != Purpose::Output {
            return None;
        }
        self.suffix.as_deref()?.parse().ok()
    }
}

/// A file found while enumerating the data directory.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: ArtifactName,
    pub path: PathBuf,
}

/// Path resolution and persistence over the data directory.
#[derive(Debug, Clone)]
pub struct DataStore {
    root: PathBuf,
}

impl DataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_path(&self, id: &TaskId) -> PathBuf {
        self.root.join(format!("{}_{}.json", id, Purpose::Settings))
    }

    /// Path without extension, e.g. `<root>/7_content`.
    pub fn image_path_prefix(&self, id: &TaskId, purpose: Purpose) -> PathBuf {
        self.root.join(format!("{}_{}", id, purpose))
    }

    pub fn output_path(&self, id: &TaskId) -> PathBuf {
        self.root.join(format!("{}_{}.png", id, Purpose::Output))
    }

    pub fn checkpoint_path(&self, id: &TaskId, iteration: u32) -> PathBuf {
        self.root
            .join(format!("{}_{}_{}.png", id, Purpose::Output, iteration))
    }

    /// Locate an uploaded image, trying `.jpg` then `.png`.
    pub async fn find_image(&self, id: &TaskId, purpose: Purpose) -> Result<PathBuf> {
        let prefix = self.image_path_prefix(id, purpose);
        for ext in IMAGE_EXTENSIONS {
            let candidate = prefix.with_extension(ext);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Ok(candidate);
            }
        }
        Err(Error::MissingImage {
            id: id.to_string(),
            purpose: purpose.to_string(),
        })
    }

    pub async fn save_settings(&self, id: &TaskId, settings: &RenderSettings) -> Result<()> {
        let json = serde_json::to_vec(settings)?;
        tokio::fs::write(self.settings_path(id), json).await?;
        Ok(())
    }

    /// Read a settings record. Fields missing on disk take their defaults.
    pub async fn load_settings(&self, path: &Path) -> Result<RenderSettings> {
        let data = tokio::fs::read(path).await?;
        let settings: RenderSettings = serde_json::from_slice(&data)?;
        Ok(settings)
    }

    pub async fn modified_at(&self, path: &Path) -> Result<DateTime<Utc>> {
        let modified = tokio::fs::metadata(path).await?.modified()?;
        Ok(DateTime::<Utc>::from(modified))
    }

    /// Enumerate every task artifact in the data directory.
    ///
    /// Files whose names do not parse are skipped.
    pub async fn list(&self) -> Result<Vec<Artifact>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut artifacts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(ArtifactName::parse) else {
                continue;
            };
            artifacts.push(Artifact {
                name,
                path: entry.path(),
            });
        }
        Ok(artifacts)
    }

    /// Public URL of a data-directory file.
    pub fn path_to_url(path: &Path) -> String {
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}/{}", URL_PREFIX, file_name)
    }
}
