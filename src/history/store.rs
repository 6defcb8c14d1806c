//! File-backed history store.
//!
//! Every artifact is written as `<Prefix>_<key>.<ext>` beside a
//! `<Prefix>_<key>.json` metadata file.  On startup [`HistoryStore::initialize`]
//! loads the newest `max_items` entries whose media file still exists.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use image::{GrayImage, RgbImage, RgbaImage};
use thiserror::Error;
use uuid::Uuid;

use crate::audio::{write_wav, AudioError};
use crate::tensor::{AudioTensor, ImageTensor};

use super::item::{HistoryDetails, HistoryItem, MediaType};
use super::History;

// ---------------------------------------------------------------------------
// HistoryError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("History metadata error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image encoding failed: {0}")]
    Image(String),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("Background task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for HistoryError {
    fn from(e: tokio::task::JoinError) -> Self {
        HistoryError::Join(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// HistoryStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct HistoryStore {
    dir: PathBuf,
    max_items: usize,
    /// Newest first.
    items: Mutex<Vec<HistoryItem>>,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>, max_items: usize) -> Self {
        Self {
            dir: dir.into(),
            max_items,
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load existing entries from disk, replacing the in-memory list.
    ///
    /// Returns the number of entries loaded.
    pub async fn initialize(&self) -> Result<usize, HistoryError> {
        let dir = self.dir.clone();
        let max_items = self.max_items;
        let loaded = tokio::task::spawn_blocking(move || scan(&dir, max_items)).await??;
        let count = loaded.len();
        *self.lock_items() = loaded;
        log::info!("history: loaded {count} items from {}", self.dir.display());
        Ok(count)
    }

    /// Snapshot of all entries, newest first.
    pub fn items(&self) -> Vec<HistoryItem> {
        self.lock_items().clone()
    }

    pub fn get(&self, id: Uuid) -> Option<HistoryItem> {
        self.lock_items().iter().find(|i| i.id == id).cloned()
    }

    /// Remove an entry from the list and delete its files.
    ///
    /// Returns `false` when `id` is unknown.
    pub async fn delete(&self, id: Uuid) -> Result<bool, HistoryError> {
        let Some(item) = self.take(|i| i.id == id).pop() else {
            return Ok(false);
        };
        tokio::task::spawn_blocking(move || delete_files(&item)).await??;
        Ok(true)
    }

    /// Remove an entry from the list, keeping its files.
    pub fn remove(&self, id: Uuid) -> bool {
        !self.take(|i| i.id == id).is_empty()
    }

    /// Delete every entry of `media_type` (all entries when `None`).
    pub async fn delete_media_type(&self, media_type: Option<MediaType>) -> Result<usize, HistoryError> {
        let removed = self.take(|i| media_type.map_or(true, |m| i.media_type == m));
        let count = removed.len();
        tokio::task::spawn_blocking(move || removed.iter().try_for_each(delete_files)).await??;
        log::info!("history: deleted {count} items");
        Ok(count)
    }

    /// Drop every entry of `media_type` (all when `None`) from the list only.
    pub fn remove_media_type(&self, media_type: Option<MediaType>) -> usize {
        self.take(|i| media_type.map_or(true, |m| i.media_type == m)).len()
    }

    fn lock_items(&self) -> MutexGuard<'_, Vec<HistoryItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, pred: impl Fn(&HistoryItem) -> bool) -> Vec<HistoryItem> {
        let mut items = self.lock_items();
        let (taken, kept): (Vec<_>, Vec<_>) = items.drain(..).partition(|i| pred(i));
        *items = kept;
        taken
    }

    fn paths(&self, item: &mut HistoryItem) {
        let stem = item.file_stem();
        item.media_path = self.dir.join(format!("{stem}.{}", item.media_type.extension()));
        item.metadata_path = self.dir.join(format!("{stem}.json"));
    }

    async fn add<W>(&self, model: &str, details: HistoryDetails, write_media: W) -> Result<HistoryItem, HistoryError>
    where
        W: FnOnce(&Path) -> Result<(), HistoryError> + Send + 'static,
    {
        let mut item = HistoryItem::new(model, details);
        self.paths(&mut item);

        let dir = self.dir.clone();
        let to_write = item.clone();
        tokio::task::spawn_blocking(move || -> Result<(), HistoryError> {
            std::fs::create_dir_all(&dir)?;
            write_media(&to_write.media_path)?;
            let json = serde_json::to_string_pretty(&to_write)?;
            std::fs::write(&to_write.metadata_path, json)?;
            Ok(())
        })
        .await??;

        log::debug!("history: saved {}", item.media_path.display());
        let mut items = self.lock_items();
        items.insert(0, item.clone());
        items.truncate(self.max_items);
        Ok(item)
    }
}

#[async_trait]
impl History for HistoryStore {
    async fn add_image(
        &self,
        model: &str,
        image: &ImageTensor,
        details: HistoryDetails,
    ) -> Result<HistoryItem, HistoryError> {
        let image = image.clone();
        self.add(model, details, move |path| write_png(path, &image)).await
    }

    async fn add_audio(
        &self,
        model: &str,
        audio: &AudioTensor,
        details: HistoryDetails,
    ) -> Result<HistoryItem, HistoryError> {
        let audio = audio.clone();
        self.add(model, details, move |path| Ok(write_wav(path, &audio)?)).await
    }

    async fn add_text(
        &self,
        model: &str,
        text: &str,
        details: HistoryDetails,
    ) -> Result<HistoryItem, HistoryError> {
        let text = text.to_string();
        self.add(model, details, move |path| Ok(std::fs::write(path, text)?)).await
    }
}

// ---------------------------------------------------------------------------
// Blocking helpers
// ---------------------------------------------------------------------------

fn scan(dir: &Path, max_items: usize) -> Result<Vec<HistoryItem>, HistoryError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut items = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let mut item: HistoryItem = match std::fs::read_to_string(&path)
            .map_err(HistoryError::from)
            .and_then(|s| serde_json::from_str(&s).map_err(HistoryError::from))
        {
            Ok(item) => item,
            Err(e) => {
                log::warn!("history: skipping {}: {e}", path.display());
                continue;
            }
        };
        item.media_path = path.with_extension(item.media_type.extension());
        item.metadata_path = path;
        if !item.media_path.exists() {
            log::debug!("history: media missing for {}", item.metadata_path.display());
            continue;
        }
        items.push(item);
    }

    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    items.truncate(max_items);
    Ok(items)
}

fn delete_files(item: &HistoryItem) -> Result<(), HistoryError> {
    for path in [&item.media_path, &item.metadata_path] {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn write_png(path: &Path, image: &ImageTensor) -> Result<(), HistoryError> {
    if !image.is_consistent() {
        return Err(HistoryError::Image(format!(
            "{}x{}x{} tensor holds {} values",
            image.width,
            image.height,
            image.channels,
            image.data.len()
        )));
    }
    let pixels = image.to_u8();
    let (w, h) = (image.width, image.height);
    let result = match image.channels {
        1 => GrayImage::from_raw(w, h, pixels).map(|img| img.save(path)),
        3 => RgbImage::from_raw(w, h, pixels).map(|img| img.save(path)),
        4 => RgbaImage::from_raw(w, h, pixels).map(|img| img.save(path)),
        n => return Err(HistoryError::Image(format!("unsupported channel count {n}"))),
    };
    match result {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => Err(HistoryError::Image(e.to_string())),
        None => Err(HistoryError::Image("pixel buffer size mismatch".into())),
    }
}
