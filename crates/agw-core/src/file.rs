// SPDX-License-Identifier: MIT OR Apache-2.0
//! File payloads embedded in inputs and outputs.
//!
//! A file is a URL, base64 data, or both, plus a content type. The format is
//! inferred from the content type when absent. During persistence inline data
//! is hoisted to object storage and replaced by a `storage_url`.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, GatewayError};

/// Broad classification of a file payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Raster image.
    Image,
    /// Audio clip.
    Audio,
    /// PDF document.
    Pdf,
    /// Anything else.
    Document,
}

impl FileKind {
    /// The canonical `$defs` name for this kind.
    #[must_use]
    pub fn ref_name(&self) -> &'static str {
        match self {
            Self::Image => "Image",
            Self::Audio => "Audio",
            Self::Pdf => "PDF",
            Self::Document => "File",
        }
    }
}

/// A file referenced by URL and/or carried inline as base64 data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct File {
    /// Remote location, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Base64-encoded bytes, when inline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Mime type, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Object-storage location set during persistence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_url: Option<String>,
    /// Declared format; inferred from the content type when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<FileKind>,
}

impl File {
    /// Infer the broad kind from the declared format or the content type.
    #[must_use]
    pub fn kind(&self) -> FileKind {
        if let Some(format) = self.format {
            return format;
        }
        match self.content_type.as_deref() {
            Some(ct) if ct.starts_with("image/") => FileKind::Image,
            Some(ct) if ct.starts_with("audio/") => FileKind::Audio,
            Some("application/pdf") => FileKind::Pdf,
            _ => FileKind::Document,
        }
    }

    /// Returns `true` when the payload is an image.
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.kind() == FileKind::Image
    }

    /// Returns `true` when the payload is audio.
    #[must_use]
    pub fn is_audio(&self) -> bool {
        self.kind() == FileKind::Audio
    }

    /// Returns `true` when the payload is a PDF.
    #[must_use]
    pub fn is_pdf(&self) -> bool {
        self.kind() == FileKind::Pdf
    }

    /// A URL usable in a provider request: the remote URL when present,
    /// otherwise a data URL built from the inline bytes.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::InvalidFile`] when neither URL nor data is set.
    pub fn to_url(&self, default_content_type: &str) -> Result<String, GatewayError> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        if let Some(data) = &self.data {
            let ct = self.content_type.as_deref().unwrap_or(default_content_type);
            return Ok(format!("data:{ct};base64,{data}"));
        }
        Err(GatewayError::new(
            ErrorKind::InvalidFile,
            "file has neither url nor data",
        ))
    }

    /// Parse a `data:<ct>;base64,<payload>` URL into a file.
    #[must_use]
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (ct, payload) = rest.split_once(";base64,")?;
        Some(Self {
            url: None,
            data: Some(payload.to_string()),
            content_type: if ct.is_empty() { None } else { Some(ct.to_string()) },
            storage_url: None,
            format: None,
        })
    }

    /// The stable contribution of this file to an input fingerprint: the
    /// storage URL, the remote URL, or a sha256 of the inline data. Raw bytes
    /// never enter the digest.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        if let Some(url) = self.storage_url.as_ref().or(self.url.as_ref()) {
            return url.clone();
        }
        if let Some(data) = &self.data {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(data.as_bytes());
            return format!("sha256:{:x}", hasher.finalize());
        }
        String::new()
    }
}

/// A file found inside a payload, remembering where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileWithKeyPath {
    /// The file payload.
    #[serde(flatten)]
    pub file: File,
    /// Path of keys and array indices from the payload root.
    pub key_path: Vec<serde_json::Value>,
}
