//! Proof-of-delivery photo capture.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use std::{io::ErrorKind, path::PathBuf};

use crate::error::{AgentError, Capability, Result};

/// One captured still image, held in memory until verification.
#[derive(Clone, PartialEq, Eq)]
pub struct ProofPhoto {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ProofPhoto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofPhoto")
            .field("file_name", &self.file_name)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ProofPhoto {
    /// Wrap raw image bytes; the file name is derived from the content hash.
    pub fn new(bytes: Vec<u8>, mime: &str) -> Self {
        let ext = match mime {
            "image/png" => "png",
            "image/heic" => "heic",
            "image/webp" => "webp",
            _ => "jpg",
        };
        let mut photo = Self {
            file_name: String::new(),
            mime: mime.to_string(),
            bytes,
        };
        photo.file_name = format!("proof-{}.{ext}", &photo.fingerprint()[..16]);
        photo
    }

    /// Stable hash of the image content.
    pub fn fingerprint(&self) -> String {
        let hash = Sha256::digest(&self.bytes);
        URL_SAFE_NO_PAD.encode(hash)
    }
}

/// Camera or gallery picker.
#[async_trait]
pub trait ProofCapture: Send + Sync {
    /// `Ok(None)` when the operator dismissed the picker.
    async fn capture(&self) -> Result<Option<ProofPhoto>>;
}

/// Picks an existing image file from disk.
#[derive(Clone, Debug)]
pub struct FileProofCapture {
    path: PathBuf,
}

impl FileProofCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn mime(&self) -> &'static str {
        let ext = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("png") => "image/png",
            Some("heic") => "image/heic",
            Some("webp") => "image/webp",
            _ => "image/jpeg",
        }
    }
}

#[async_trait]
impl ProofCapture for FileProofCapture {
    async fn capture(&self) -> Result<Option<ProofPhoto>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(ProofPhoto::new(bytes, self.mime()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                Err(AgentError::PermissionDenied(Capability::Camera))
            }
            Err(e) => Err(AgentError::Storage(e.to_string())),
        }
    }
}
