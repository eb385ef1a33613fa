use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::atomic::write_atomic;
use super::error::StoreError;
use crate::feed::{decode, encode, encode_xml, resolve};
use crate::model::{Channel, Episode, Podcast, ValidationError};

// ============================================================================
// FeedStore
// ============================================================================

/// The single authority for podcast state.
///
/// Cloning is cheap and every clone shares the same state, so one store is
/// built at startup and handed to each collaborator. Reads share a lock;
/// mutations hold it exclusively across both the change and the write to
/// disk, so a mutation that returns `Ok` is already durable when the next
/// caller looks.
///
/// Mutations are applied to a working copy that only replaces the live state
/// once it has been persisted. If the write fails, the store keeps the
/// previous state, which is also what is still on disk.
#[derive(Clone)]
pub struct FeedStore {
    inner: Arc<Inner>,
}

struct Inner {
    podcast: RwLock<Podcast>,
    path: PathBuf,
    base_url: String,
}

impl FeedStore {
    /// Loads the feed at `path`, creating and persisting a default podcast
    /// if there is no file yet.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidBaseUrl` if relative references cannot be
    /// resolved against `base_url`; `StoreError::Io` if the file exists but
    /// cannot be read, or the default cannot be written; `StoreError::Parse`
    /// if it is not a feed.
    pub async fn load(
        path: impl Into<PathBuf>,
        base_url: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let base_url = base_url.into();
        resolve(&base_url, "/").map_err(StoreError::InvalidBaseUrl)?;

        let podcast = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let podcast = decode(&bytes)?;
                tracing::info!(
                    path = %path.display(),
                    episodes = podcast.episodes.len(),
                    "Loaded podcast feed"
                );
                podcast
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| StoreError::io(parent, e))?;
                }
                let podcast = Podcast::new_default();
                persist(&path, &base_url, &podcast).await?;
                tracing::info!(path = %path.display(), "No feed file found, created default podcast");
                podcast
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                podcast: RwLock::new(podcast),
                path,
                base_url,
            }),
        })
    }

    /// Path of the canonical feed file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Base URL used to absolutize references when serving.
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Returns an independent deep copy of the current podcast.
    ///
    /// Changing the copy, including its episode list, never affects the store.
    pub async fn snapshot(&self) -> Podcast {
        self.inner.podcast.read().await.clone()
    }

    /// Appends an episode and persists.
    ///
    /// Advances the podcast publication date when the episode is newer.
    ///
    /// # Errors
    ///
    /// `StoreError::Validation` for an empty or already used id, or an audio
    /// URL that cannot be resolved and so could not be written to the feed
    /// (nothing changes); `StoreError::Io`/`Encode` if persisting fails (the
    /// store keeps its previous state).
    pub async fn add_episode(&self, episode: Episode) -> Result<(), StoreError> {
        if !episode.audio_url.is_empty() {
            resolve(&self.inner.base_url, &episode.audio_url).map_err(|e| {
                ValidationError::InvalidAudioUrl {
                    url: episode.audio_url.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        let id = episode.id.clone();
        self.mutate(|podcast| Ok(podcast.push_episode(episode)?))
            .await?;
        tracing::info!(episode = %id, "Episode added");
        Ok(())
    }

    /// Removes the episode with `id`, persists, and returns what was removed
    /// so the caller can clean up its media.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` when no episode has `id` (nothing changes).
    pub async fn delete_episode(&self, id: &str) -> Result<Episode, StoreError> {
        let removed = self
            .mutate(|podcast| {
                podcast
                    .remove_episode(id)
                    .ok_or_else(|| StoreError::NotFound(id.to_string()))
            })
            .await?;
        tracing::info!(episode = %id, "Episode deleted");
        Ok(removed)
    }

    /// Replaces all channel metadata, keeping the episode list as it is.
    ///
    /// # Errors
    ///
    /// `StoreError::Validation` if the channel is missing required fields,
    /// has a malformed link or language, or an image URL that cannot be
    /// resolved (nothing changes).
    pub async fn update_podcast(&self, channel: Channel) -> Result<(), StoreError> {
        channel.validate()?;
        if !channel.image_url.is_empty() {
            resolve(&self.inner.base_url, &channel.image_url).map_err(|e| {
                ValidationError::InvalidImageUrl {
                    url: channel.image_url.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        self.mutate(|podcast| {
            podcast.channel = channel;
            Ok(())
        })
        .await?;
        tracing::info!("Podcast settings updated");
        Ok(())
    }

    /// Regenerates the feed from current state. Never writes to disk.
    pub async fn serve_xml(&self) -> Result<Vec<u8>, StoreError> {
        let podcast = self.inner.podcast.read().await;
        let feed = encode(&podcast, &self.inner.base_url)?;
        if !feed.skipped.is_empty() {
            tracing::debug!(skipped = feed.skipped.len(), "Served feed without some episodes");
        }
        Ok(feed.xml)
    }

    /// Runs `change` on a copy of the state under the write lock, persists the
    /// copy, then installs it.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Podcast) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut current = self.inner.podcast.write().await;
        let mut next = current.clone();
        let output = change(&mut next)?;

        if let Err(e) = persist(&self.inner.path, &self.inner.base_url, &next).await {
            tracing::error!(path = %self.inner.path.display(), error = %e, "Failed to persist feed, change discarded");
            return Err(e);
        }

        *current = next;
        Ok(output)
    }
}

async fn persist(path: &Path, base_url: &str, podcast: &Podcast) -> Result<(), StoreError> {
    let xml = encode_xml(podcast, base_url)?;
    write_atomic(path, &xml)
        .await
        .map_err(|e| StoreError::io(path, e))
}
