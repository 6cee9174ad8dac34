//! Persistence of rendered QR codes.
//!
//! Artifacts are keyed by [`ArtifactKey`], derived from the encoded target:
//! the URL-safe, unpadded base64 form of the target's UTF-8 bytes. The
//! derivation is reversible, so distinct targets never share a key, and it is
//! stable across restarts, so generating the same target again overwrites the
//! previous file instead of adding a new one.
//!
//! On disk a key lives under the `v1` namespace directory. Keys longer than
//! 128 characters are split into 128-character directory levels so no single
//! path component exceeds common file name limits; the last component gets a
//! `.png` suffix.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use tokio::{fs, sync::Mutex};

use crate::error::{QrApiError, Result};

/// Namespace directory for the current key derivation.
pub const NAMESPACE: &str = "v1";

const SEGMENT_LEN: usize = 128;

/// Storage key of the artifact generated for a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    /// Derives the key for `target`.
    pub fn from_target(target: &str) -> Self {
        Self(URL_SAFE_NO_PAD.encode(target.as_bytes()))
    }

    /// The encoded key, without namespace or suffix.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recovers the target the key was derived from.
    pub fn decode(&self) -> Option<String> {
        let bytes = URL_SAFE_NO_PAD.decode(&self.0).ok()?;
        String::from_utf8(bytes).ok()
    }

    /// Path of the artifact relative to the store root.
    pub fn relative_path(&self) -> PathBuf {
        let mut path = PathBuf::from(NAMESPACE);
        // The base64 alphabet is ASCII, so every index is a char boundary.
        let mut rest = self.0.as_str();
        while rest.len() > SEGMENT_LEN {
            let (head, tail) = rest.split_at(SEGMENT_LEN);
            path.push(head);
            rest = tail;
        }
        path.push(format!("{rest}.png"));
        path
    }
}

/// Keyed, overwrite-on-write storage for rendered images.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Writes `image` under the key derived from `target`, replacing any
    /// previous artifact for the same target.
    async fn store(&self, target: &str, image: &[u8]) -> Result<()>;
}

/// Stores artifacts as files below a root directory.
///
/// Concurrent writes for the same target race, but carry identical bytes, so
/// whichever lands last leaves the same content.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Creates a store rooted at `root`. Nothing is created until the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory the artifacts live under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of the artifact for `target`.
    pub fn path_for(&self, target: &str) -> PathBuf {
        self.root.join(ArtifactKey::from_target(target).relative_path())
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    #[tracing::instrument(skip(self, image), fields(bytes = image.len()))]
    async fn store(&self, target: &str, image: &[u8]) -> Result<()> {
        let path = self.path_for(target);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| QrApiError::io(parent, e))?;
        }
        fs::write(&path, image).await.map_err(|e| QrApiError::io(&path, e))?;
        tracing::debug!(path = %path.display(), "artifact written");
        Ok(())
    }
}

/// In-memory artifact store.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<HashMap<ArtifactKey, Vec<u8>>>,
}

impl MemoryArtifactStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, target: &str) -> Option<Vec<u8>> {
        self.artifacts.lock().await.get(&ArtifactKey::from_target(target)).cloned()
    }

    pub async fn len(&self) -> usize {
        self.artifacts.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.artifacts.lock().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn store(&self, target: &str, image: &[u8]) -> Result<()> {
        self.artifacts.lock().await.insert(ArtifactKey::from_target(target), image.to_vec());
        Ok(())
    }
}
