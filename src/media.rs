//! Storage of uploaded images under the media root.

use std::path::PathBuf;

use rand::RngCore;

use crate::config::Media;
use crate::error::{Result, ServerError};
use crate::user::DocumentKind;

/// Accepted image formats, detected on their leading bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    WebP,
}

impl ImageFormat {
    /// Detect the format from magic bytes.
    pub fn sniff(buffer: &[u8]) -> Option<Self> {
        match buffer {
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(Self::Png),
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(Self::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::WebP),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::WebP => "webp",
        }
    }
}

/// A file written under the media root.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    /// Relative to the media root.
    pub path: String,
    pub content_type: &'static str,
}

/// Write uploaded images on disk.
#[derive(Debug, Clone)]
pub struct MediaStorage {
    root: PathBuf,
    url: String,
    max_upload_size: usize,
}

impl MediaStorage {
    /// Create a new [`MediaStorage`].
    pub fn new(config: &Media) -> Self {
        Self {
            root: config.root.clone(),
            url: config.url.clone(),
            max_upload_size: config.max_upload_size,
        }
    }

    /// Public prefix of stored files, ending with `/`.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn max_upload_size(&self) -> usize {
        self.max_upload_size
    }

    /// Check and write an image for the `kind` slot.
    pub async fn store(&self, kind: DocumentKind, buffer: &[u8]) -> Result<StoredFile> {
        if buffer.is_empty() {
            return Err(ServerError::field(
                "file",
                "empty",
                "The submitted file is empty.",
            ));
        }
        if buffer.len() > self.max_upload_size {
            return Err(ServerError::field(
                "file",
                "size",
                &format!(
                    "The submitted file is larger than {} bytes.",
                    self.max_upload_size
                ),
            ));
        }
        let Some(format) = ImageFormat::sniff(buffer) else {
            return Err(ServerError::field(
                "file",
                "invalid_image",
                "Upload a valid image. The file you uploaded was either not an image or a corrupted image.",
            ));
        };

        let mut name = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut name);
        let path = format!(
            "{}/{}.{}",
            kind.upload_to(),
            hex::encode(name),
            format.extension()
        );

        let target = self.root.join(&path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, buffer).await?;

        tracing::debug!(%path, size = buffer.len(), "media stored");

        Ok(StoredFile {
            path,
            content_type: format.content_type(),
        })
    }

    /// Delete a file written by [`MediaStorage::store`].
    pub async fn remove(&self, path: &str) {
        if let Err(err) = tokio::fs::remove_file(self.root.join(path)).await {
            tracing::warn!(error = %err, %path, "media file not removed");
        }
    }

    #[cfg(test)]
    pub(crate) fn root(&self) -> &std::path::Path {
        &self.root
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Smallest header recognized as PNG.
    pub const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    pub fn storage() -> MediaStorage {
        let mut root = std::env::temp_dir();
        let mut suffix = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut suffix);
        root.push(format!("portal-media-{}", hex::encode(suffix)));

        MediaStorage::new(&Media {
            root,
            url: "/media/".into(),
            max_upload_size: 1024,
        })
    }

    #[test]
    fn test_sniff() {
        assert_eq!(ImageFormat::sniff(PNG), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::sniff(b"GIF89a...."), Some(ImageFormat::Gif));
        assert_eq!(ImageFormat::sniff(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageFormat::WebP));
        assert_eq!(ImageFormat::sniff(b"RIFF\0\0\0\0WAVEfmt "), None);
        assert_eq!(ImageFormat::sniff(b"%PDF-1.7"), None);
    }

    #[tokio::test]
    async fn test_store() {
        let storage = storage();
        let file = storage
            .store(DocumentKind::IdentityDocumentBack, PNG)
            .await
            .unwrap();

        assert!(file.path.starts_with("documents/identity/"));
        assert!(file.path.ends_with(".png"));
        assert_eq!(file.content_type, "image/png");

        let written = tokio::fs::read(storage.root.join(&file.path)).await.unwrap();
        assert_eq!(written, PNG);
    }

    #[tokio::test]
    async fn test_store_rejects() {
        let storage = storage();

        let cases: [&[u8]; 3] = [b"", b"plain text", &[0x89; 2048]];
        for buffer in cases {
            assert!(matches!(
                storage.store(DocumentKind::ProfilePicture, buffer).await,
                Err(ServerError::Validation(_))
            ));
        }
    }
}
