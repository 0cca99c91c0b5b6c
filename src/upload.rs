use std::path::{Path, PathBuf};

use axum::extract::Multipart;
use image::ImageFormat;
use tempfile::NamedTempFile;
use tokio::{io::AsyncWriteExt, task::spawn_blocking};

use crate::error::{AppError, AppResult};

pub const IMAGE_FIELD: &str = "image";

/// Formats the label service accepts.
const SUPPORTED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Gif,
    ImageFormat::WebP,
    ImageFormat::Bmp,
    ImageFormat::Ico,
    ImageFormat::Tiff,
];

/// An uploaded file parked in the upload directory.
///
/// The backing file is removed when this value is dropped, whichever way the
/// request ends.
#[derive(Debug)]
pub struct UploadedImage {
    file: NamedTempFile,
    declared_mime: Option<String>,
    size: usize,
}

impl UploadedImage {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn declared_mime(&self) -> Option<&str> {
        self.declared_mime.as_deref()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Reads the stored bytes and sniffs the real format from them.
    pub async fn read(&self) -> AppResult<StoredImage> {
        let bytes = tokio::fs::read(self.path()).await?;
        let format = image::guess_format(&bytes).map_err(|_| AppError::UnsupportedImage)?;
        if !SUPPORTED_FORMATS.contains(&format) {
            return Err(AppError::UnsupportedImage);
        }
        Ok(StoredImage {
            bytes,
            mime: format.to_mime_type().to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Pulls the `image` part out of a multipart form into a temp file.
pub async fn receive_image(
    mut multipart: Multipart,
    upload_dir: &Path,
    max_bytes: usize,
) -> AppResult<UploadedImage> {
    while let Some(mut field) = multipart.next_field().await? {
        // a plain text field named `image` is not a file
        if field.name() != Some(IMAGE_FIELD) || field.file_name().is_none() {
            continue;
        }

        let declared_mime = field.content_type().map(str::to_owned);
        tracing::debug!(
            file_name = ?field.file_name(),
            mime = ?declared_mime,
            "receiving upload"
        );

        let dir = upload_dir.to_path_buf();
        let (file, std_file) = spawn_blocking(move || create_temp(dir)).await??;
        let mut out = tokio::fs::File::from_std(std_file);

        let mut size = 0usize;
        while let Some(chunk) = field.chunk().await? {
            size += chunk.len();
            if size > max_bytes {
                return Err(AppError::TooLarge { limit: max_bytes });
            }
            out.write_all(&chunk).await?;
        }
        out.flush().await?;

        if size == 0 {
            return Err(AppError::MissingImage);
        }

        tracing::info!(size, path = %file.path().display(), "stored upload");
        return Ok(UploadedImage {
            file,
            declared_mime,
            size,
        });
    }

    Err(AppError::MissingImage)
}

fn create_temp(dir: PathBuf) -> std::io::Result<(NamedTempFile, std::fs::File)> {
    let file = tempfile::Builder::new()
        .prefix("upload-")
        .tempfile_in(dir)?;
    let handle = file.reopen()?;
    Ok((file, handle))
}
