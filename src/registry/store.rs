//! In-memory image registry.
//!
//! The registry is the only mutable state shared between requests. It maps
//! opaque ids to filesystem paths and never touches the files themselves:
//!
//! ```text
//!   store(path) ──▶ img_3f2a9c01b7de ──▶ ImageEntity { path, format, ... }
//!                          │
//!   delete(id) ────────────┘  (entry removed, file left on disk)
//! ```
//!
//! File existence is not checked on `store`; consumers check lazily when
//! they resolve an id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::analysis::PixelSpacing;

use super::entity::{ImageEntity, ImageFormat};

/// Prefix of every generated image id.
pub const ID_PREFIX: &str = "img_";

/// Number of hex characters following [`ID_PREFIX`].
pub const ID_HEX_LEN: usize = 12;

// =============================================================================
// ImageRegistry
// =============================================================================

/// Registry of images known to one orchestrator.
///
/// Reads take a shared lock; `store`, `delete` and `clear` take the write
/// lock, so the id → entity map is never observed half-updated.
#[derive(Debug, Default)]
pub struct ImageRegistry {
    entries: RwLock<HashMap<String, ImageEntity>>,
}

impl ImageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a path and return its new entity.
    ///
    /// Every call yields a fresh id, even for a path that is already
    /// registered.
    pub async fn store(&self, path: impl AsRef<Path>) -> ImageEntity {
        self.insert(path.as_ref().to_path_buf(), None).await
    }

    /// Register a path together with its known pixel spacing.
    pub async fn store_with_spacing(
        &self,
        path: impl AsRef<Path>,
        pixel_spacing: Option<PixelSpacing>,
    ) -> ImageEntity {
        self.insert(path.as_ref().to_path_buf(), pixel_spacing).await
    }

    async fn insert(&self, path: PathBuf, pixel_spacing: Option<PixelSpacing>) -> ImageEntity {
        let mut entries = self.entries.write().await;

        let id = loop {
            let candidate = generate_id();
            if !entries.contains_key(&candidate) {
                break candidate;
            }
        };

        let entity = ImageEntity {
            id: id.clone(),
            format: ImageFormat::from_path(&path),
            path,
            created_at: Utc::now(),
            pixel_spacing,
        };
        entries.insert(id, entity.clone());

        debug!(
            image_id = %entity.id,
            path = %entity.path.display(),
            format = %entity.format,
            "Registered image"
        );
        entity
    }

    pub async fn get(&self, id: &str) -> Option<ImageEntity> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn get_path(&self, id: &str) -> Option<PathBuf> {
        self.entries.read().await.get(id).map(|e| e.path.clone())
    }

    /// Remove an entry. Returns `true` only if the id was registered.
    pub async fn delete(&self, id: &str) -> bool {
        let removed = self.entries.write().await.remove(id).is_some();
        if removed {
            debug!(image_id = %id, "Deleted image entry");
        }
        removed
    }

    /// All registered ids, oldest first.
    pub async fn list_all(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut all: Vec<&ImageEntity> = entries.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all.into_iter().map(|e| e.id.clone()).collect()
    }

    /// Remove every entry and return how many were removed.
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        count
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn generate_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}{}", ID_PREFIX, &hex[..ID_HEX_LEN])
}

/// Whether a string has the shape of a generated image id.
pub fn is_valid_id(id: &str) -> bool {
    id.strip_prefix(ID_PREFIX).is_some_and(|hex| {
        hex.len() == ID_HEX_LEN && hex.chars().all(|c| c.is_ascii_hexdigit())
    })
}

// =============================================================================
// Tests
// =============================================================================
