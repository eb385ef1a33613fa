//! Placement of uploaded audio and artwork files.
//!
//! Files are copied into a media directory under a sanitized, timestamped
//! name. The returned [`PlacedFile`] is owned by the caller: if the store
//! then rejects the episode or settings that reference it, the caller must
//! call [`PlacedFile::discard`].

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

const MAX_STEM_LEN: usize = 50;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Unsupported file type '{found}' (allowed: {allowed})")]
    UnsupportedType { found: String, allowed: String },

    #[error("File too large: {size} bytes (max {max} bytes)")]
    TooLarge { size: u64, max: u64 },

    #[error("Media file I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MediaError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MediaError::Io {
            path: path.into(),
            source,
        }
    }
}

/// What kind of upload is being placed; decides accepted extensions and MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Artwork,
}

impl MediaKind {
    fn allowed_extensions(self) -> &'static [&'static str] {
        match self {
            MediaKind::Audio => &["mp3"],
            MediaKind::Artwork => &["jpg", "jpeg", "png"],
        }
    }

    fn mime_type(self, extension: &str) -> &'static str {
        match (self, extension) {
            (MediaKind::Audio, _) => "audio/mpeg",
            (MediaKind::Artwork, "png") => "image/png",
            (MediaKind::Artwork, _) => "image/jpeg",
        }
    }
}

/// A media file copied into place but not yet referenced by committed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedFile {
    /// Name inside the media directory.
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub mime_type: &'static str,
}

impl PlacedFile {
    /// Compensating action: removes the file after the operation that was
    /// meant to reference it failed. Failure to remove is logged only.
    pub async fn discard(self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::info!(path = %self.path.display(), "Discarded unreferenced media file"),
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to discard unreferenced media file"
            ),
        }
    }
}

/// Copies an `.mp3` into `dir`.
pub async fn place_audio(src: &Path, dir: &Path, max_bytes: u64) -> Result<PlacedFile, MediaError> {
    place(MediaKind::Audio, src, dir, max_bytes).await
}

/// Copies a `.jpg`, `.jpeg` or `.png` into `dir`.
pub async fn place_artwork(
    src: &Path,
    dir: &Path,
    max_bytes: u64,
) -> Result<PlacedFile, MediaError> {
    place(MediaKind::Artwork, src, dir, max_bytes).await
}

/// Copies `src` into `dir` under a unique sanitized name.
///
/// # Errors
///
/// - [`MediaError::UnsupportedType`] when the extension is not allowed for `kind`
/// - [`MediaError::TooLarge`] when `src` exceeds `max_bytes`
/// - [`MediaError::Io`] for any filesystem failure, including a name collision
pub async fn place(
    kind: MediaKind,
    src: &Path,
    dir: &Path,
    max_bytes: u64,
) -> Result<PlacedFile, MediaError> {
    let extension = src
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if !kind.allowed_extensions().contains(&extension.as_str()) {
        return Err(MediaError::UnsupportedType {
            found: src.display().to_string(),
            allowed: kind.allowed_extensions().join(", "),
        });
    }

    let size = tokio::fs::metadata(src)
        .await
        .map_err(|e| MediaError::io(src, e))?
        .len();
    if size > max_bytes {
        return Err(MediaError::TooLarge {
            size,
            max: max_bytes,
        });
    }

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| MediaError::io(dir, e))?;

    let original = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let filename = unique_filename(&original, Utc::now());
    let path = dir.join(&filename);

    copy_new(src, &path).await?;

    tracing::info!(path = %path.display(), size, "Placed media file");
    Ok(PlacedFile {
        filename,
        path,
        size,
        mime_type: kind.mime_type(&extension),
    })
}

/// Copies into a file that must not exist yet; a partial copy is removed.
async fn copy_new(src: &Path, dst: &Path) -> Result<(), MediaError> {
    let mut input = tokio::fs::File::open(src)
        .await
        .map_err(|e| MediaError::io(src, e))?;
    let mut output = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dst)
        .await
        .map_err(|e| MediaError::io(dst, e))?;

    let copied = async {
        tokio::io::copy(&mut input, &mut output).await?;
        output.flush().await?;
        output.sync_all().await
    }
    .await;
    drop(output);

    if let Err(e) = copied {
        let _ = tokio::fs::remove_file(dst).await;
        return Err(MediaError::io(dst, e));
    }
    Ok(())
}

/// Deletes a stored media file, e.g. after its episode was removed.
pub async fn remove_media(dir: &Path, filename: &str) -> Result<(), MediaError> {
    // Stored names never contain separators; refuse anything that would escape `dir`.
    if filename.is_empty() || filename.contains(['/', '\\']) || filename == ".." {
        return Err(MediaError::io(
            dir.join(filename),
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a stored media filename"),
        ));
    }
    let path = dir.join(filename);
    tokio::fs::remove_file(&path)
        .await
        .map_err(|e| MediaError::io(path, e))
}

/// `<stem>-<YYYYMMDD-HHMMSS><.ext>`, with the stem reduced to `[A-Za-z0-9_-]`.
pub fn unique_filename(original: &str, now: DateTime<Utc>) -> String {
    let path = Path::new(original);
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let sanitized: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let mut sanitized = sanitized.trim_matches('-').to_string();
    sanitized.truncate(MAX_STEM_LEN);
    if sanitized.is_empty() {
        sanitized = "upload".to_string();
    }

    format!("{}-{}{}", sanitized, now.format("%Y%m%d-%H%M%S"), extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 7, 8, 9, 10).unwrap()
    }

    #[test]
    fn test_unique_filename_sanitizes() {
        assert_eq!(
            unique_filename("My Episode (final).mp3", now()),
            "My-Episode--final-20240607-080910.mp3"
        );
        assert_eq!(
            unique_filename("../../etc/passwd.mp3", now()),
            "passwd-20240607-080910.mp3"
        );
        assert_eq!(unique_filename("???.png", now()), "upload-20240607-080910.png");
    }

    #[test]
    fn test_unique_filename_truncates_stem() {
        let name = unique_filename(&format!("{}.mp3", "x".repeat(120)), now());
        assert_eq!(name, format!("{}-20240607-080910.mp3", "x".repeat(50)));
    }

    #[tokio::test]
    async fn test_place_audio_then_discard() {
        let src_dir = tempfile::tempdir().unwrap();
        let media_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("Show 1.mp3");
        std::fs::write(&src, b"ID3 fake audio").unwrap();

        let placed = place_audio(&src, media_dir.path(), 1024).await.unwrap();
        assert!(placed.filename.starts_with("Show-1-"));
        assert!(placed.filename.ends_with(".mp3"));
        assert_eq!(placed.size, 14);
        assert_eq!(placed.mime_type, "audio/mpeg");
        assert_eq!(std::fs::read(&placed.path).unwrap(), b"ID3 fake audio");

        let path = placed.path.clone();
        placed.discard().await;
        assert!(!path.exists());
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_place_rejects_wrong_extension() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("song.wav");
        std::fs::write(&src, b"RIFF").unwrap();

        let err = place_audio(&src, dir.path(), 1024).await.unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedType { .. }));

        let art = dir.path().join("cover.PNG");
        std::fs::write(&art, b"png").unwrap();
        let placed = place_artwork(&art, &dir.path().join("art"), 1024)
            .await
            .unwrap();
        assert_eq!(placed.mime_type, "image/png");
    }

    #[tokio::test]
    async fn test_place_rejects_oversized() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("big.mp3");
        std::fs::write(&src, vec![0u8; 2048]).unwrap();

        let err = place_audio(&src, &dir.path().join("media"), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::TooLarge { size: 2048, max: 1024 }));
        assert!(!dir.path().join("media").exists());
    }

    #[tokio::test]
    async fn test_remove_media_refuses_paths() {
        let dir = tempfile::tempdir().unwrap();
        assert!(remove_media(dir.path(), "../escape.mp3").await.is_err());
        assert!(remove_media(dir.path(), "").await.is_err());

        std::fs::write(dir.path().join("a.mp3"), b"x").unwrap();
        remove_media(dir.path(), "a.mp3").await.unwrap();
        assert!(!dir.path().join("a.mp3").exists());
    }
}
