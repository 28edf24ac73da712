//! Image ingestion and normalization
//!
//! Converts user-supplied files, data URLs, or remote images into the canonical
//! payload the backend expects: base64-encoded bytes with the MIME type tracked
//! separately. The wire format never carries a `data:` URL prefix; the prefix is
//! re-added only when a payload is rendered locally.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// Maximum accepted upload size (5 MiB)
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Errors that can occur while normalizing an image
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("unsupported file type \"{0}\" (expected image/*)")]
    InvalidType(String),

    #[error("image is {0} bytes, which exceeds the 5 MiB upload limit")]
    TooLarge(usize),

    #[error("invalid base64 image data: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("failed to read image file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to fetch image: {0}")]
    Fetch(#[from] reqwest::Error),
}

/// A normalized image ready for transmission or display.
///
/// `data` is always raw base64 with no data-URL header. Payloads are replaced
/// wholesale on each new upload; nothing is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    mime: String,
    data: String,
    byte_len: usize,
}

impl ImagePayload {
    /// Normalize raw bytes with a caller-supplied MIME type.
    ///
    /// Zero-byte inputs are rejected as invalid rather than oversized, matching
    /// the upload widget behavior this replaces.
    pub fn from_bytes(mime: &str, bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::InvalidType("empty file".to_string()));
        }
        if !mime.starts_with("image/") {
            return Err(ImageError::InvalidType(mime.to_string()));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(ImageError::TooLarge(bytes.len()));
        }
        Ok(Self {
            mime: mime.to_string(),
            data: BASE64.encode(bytes),
            byte_len: bytes.len(),
        })
    }

    /// Normalize a file on disk. The MIME type is inferred from the file
    /// extension only; content is not sniffed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let mime = mime_from_extension(path)
            .ok_or_else(|| ImageError::InvalidType(path.display().to_string()))?;
        let bytes = std::fs::read(path)?;
        Self::from_bytes(mime, &bytes)
    }

    /// Normalize a `data:image/...;base64,` URL or a bare base64 string.
    ///
    /// Bare strings are assumed to be PNG, the backend's default output format.
    pub fn from_data_url(input: &str) -> Result<Self, ImageError> {
        let (mime, encoded) = match input.strip_prefix("data:") {
            Some(rest) => {
                let (header, data) = rest
                    .split_once(',')
                    .ok_or_else(|| ImageError::InvalidType(input.to_string()))?;
                let mime = header.trim_end_matches(";base64");
                (mime.to_string(), data)
            }
            None => ("image/png".to_string(), input),
        };
        let bytes = BASE64.decode(encoded)?;
        Self::from_bytes(&mime, &bytes)
    }

    /// Fetch a remote image (sample inputs, precomputed assets) and normalize
    /// it. The MIME type comes from the Content-Type header.
    pub async fn from_url(client: &reqwest::Client, url: &str) -> Result<Self, ImageError> {
        let response = client.get(url).send().await?.error_for_status()?;
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "image/jpeg".to_string());
        let bytes = response.bytes().await?;
        Self::from_bytes(&mime, &bytes)
    }

    /// MIME type of the payload
    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Decoded size in bytes
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Base64 data as sent to the backend: no data-URL prefix.
    pub fn wire_format(&self) -> &str {
        &self.data
    }

    /// Renderable data URL for local display.
    pub fn display_format(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.data)
    }

    /// Decode back to raw bytes (download helpers, resize).
    pub fn decode_bytes(&self) -> Result<Vec<u8>, ImageError> {
        Ok(BASE64.decode(&self.data)?)
    }

    /// Write the decoded image to disk.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ImageError> {
        let bytes = self.decode_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Proportionally downscale so neither dimension exceeds the given bounds.
    ///
    /// Images already within bounds are returned unchanged. The result is
    /// re-encoded as JPEG; this payload is for transport and preview only, so
    /// lossless re-encoding is not required.
    pub fn resize(&self, max_width: u32, max_height: u32) -> Result<Self, ImageError> {
        let bytes = self.decode_bytes()?;
        let img = image::load_from_memory(&bytes)?;
        if img.width() <= max_width && img.height() <= max_height {
            return Ok(self.clone());
        }

        let scaled = img.thumbnail(max_width, max_height);
        let mut buf = Vec::new();
        scaled.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)?;
        Self::from_bytes("image/jpeg", &buf)
    }
}

fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}
