//! Artifact store: the per-document cache of crops, descriptions and
//! Markdown snapshots.
//!
//! Every artifact is keyed by `(document name, figure index)` and lands at a
//! fixed path under the output folder:
//!
//! ```text
//! {folder}/{doc}_init.md                  analyzer text before reconciliation
//! {folder}/{doc}.md                       reconciled text
//! {folder}/{doc}_cropped_image_{idx}.png  first region crop
//! {folder}/{doc}_cropped_image_{idx}_{r}.png  additional region r ≥ 1
//! {folder}/{doc}_cropped_image_{idx}.txt  accumulated description
//! ```
//!
//! The resolver only talks to [`ArtifactStore`], so tests can swap the
//! file system for anything else.

use crate::error::FigChunkError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A figure previously resolved and persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFigure {
    pub description: String,
    /// `(path, png bytes)` per region, in region order.
    pub crops: Vec<(PathBuf, Vec<u8>)>,
}

/// Which Markdown snapshot to persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkdownStage {
    /// Analyzer content as received.
    Initial,
    /// Content after figure substitution.
    Final,
}

/// Cache capability injected into the figure resolver.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Cached crop(s) and description for a figure; `None` when incomplete.
    async fn load_figure(
        &self,
        doc: &str,
        figure: usize,
    ) -> Result<Option<CachedFigure>, FigChunkError>;

    /// Persist region crops, invalidating any earlier description; returns
    /// the crop paths.
    async fn save_crops(
        &self,
        doc: &str,
        figure: usize,
        crops: &[Vec<u8>],
    ) -> Result<Vec<PathBuf>, FigChunkError>;

    /// Persist the description, completing the figure's cache entry.
    async fn save_description(
        &self,
        doc: &str,
        figure: usize,
        description: &str,
    ) -> Result<PathBuf, FigChunkError>;

    /// Persist a Markdown snapshot of the whole document.
    async fn save_markdown(
        &self,
        doc: &str,
        stage: MarkdownStage,
        text: &str,
    ) -> Result<PathBuf, FigChunkError>;
}

/// [`ArtifactStore`] rooted at a folder on the local file system.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of region `region` of figure `figure`.
    pub fn crop_path(&self, doc: &str, figure: usize, region: usize) -> PathBuf {
        if region == 0 {
            self.root.join(format!("{doc}_cropped_image_{figure}.png"))
        } else {
            self.root.join(format!("{doc}_cropped_image_{figure}_{region}.png"))
        }
    }

    pub fn description_path(&self, doc: &str, figure: usize) -> PathBuf {
        self.root.join(format!("{doc}_cropped_image_{figure}.txt"))
    }

    pub fn markdown_path(&self, doc: &str, stage: MarkdownStage) -> PathBuf {
        match stage {
            MarkdownStage::Initial => self.root.join(format!("{doc}_init.md")),
            MarkdownStage::Final => self.root.join(format!("{doc}.md")),
        }
    }

    async fn ensure_root(&self) -> Result<(), FigChunkError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> FigChunkError {
    FigChunkError::ArtifactIo {
        path: path.to_path_buf(),
        source,
    }
}

async fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>, FigChunkError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path, e)),
    }
}

/// `Ok(true)` when a file was removed, `Ok(false)` when there was none.
async fn remove_if_exists(path: &Path) -> Result<bool, FigChunkError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error(path, e)),
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn load_figure(
        &self,
        doc: &str,
        figure: usize,
    ) -> Result<Option<CachedFigure>, FigChunkError> {
        let txt_path = self.description_path(doc, figure);
        let Some(txt) = read_if_exists(&txt_path).await? else {
            return Ok(None);
        };

        let mut crops = Vec::new();
        for region in 0.. {
            let path = self.crop_path(doc, figure, region);
            match read_if_exists(&path).await? {
                Some(bytes) => crops.push((path, bytes)),
                None => break,
            }
        }
        if crops.is_empty() {
            debug!("Description for {doc}#{figure} cached without crop, ignoring");
            return Ok(None);
        }

        Ok(Some(CachedFigure {
            description: String::from_utf8_lossy(&txt).into_owned(),
            crops,
        }))
    }

    async fn save_crops(
        &self,
        doc: &str,
        figure: usize,
        crops: &[Vec<u8>],
    ) -> Result<Vec<PathBuf>, FigChunkError> {
        self.ensure_root().await?;

        // The description marks a complete entry; drop it until the new one lands.
        remove_if_exists(&self.description_path(doc, figure)).await?;

        let mut paths = Vec::with_capacity(crops.len());
        for (region, png) in crops.iter().enumerate() {
            let path = self.crop_path(doc, figure, region);
            tokio::fs::write(&path, png).await.map_err(|e| io_error(&path, e))?;
            paths.push(path);
        }

        // Drop stale extra regions from an earlier run with more regions.
        let mut region = crops.len().max(1);
        while remove_if_exists(&self.crop_path(doc, figure, region)).await? {
            region += 1;
        }

        debug!("Saved {} crop(s) for {doc}#{figure}", paths.len());
        Ok(paths)
    }

    async fn save_description(
        &self,
        doc: &str,
        figure: usize,
        description: &str,
    ) -> Result<PathBuf, FigChunkError> {
        self.ensure_root().await?;
        let path = self.description_path(doc, figure);
        tokio::fs::write(&path, description)
            .await
            .map_err(|e| io_error(&path, e))?;
        Ok(path)
    }

    async fn save_markdown(
        &self,
        doc: &str,
        stage: MarkdownStage,
        text: &str,
    ) -> Result<PathBuf, FigChunkError> {
        self.ensure_root().await?;
        let path = self.markdown_path(doc, stage);
        tokio::fs::write(&path, text).await.map_err(|e| io_error(&path, e))?;
        Ok(path)
    }
}
