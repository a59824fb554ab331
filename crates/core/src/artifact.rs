//! Artifact identifiers and the persisted artifact record.

use crate::upload::UploadId;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for a stored artifact.
///
/// Accepts hyphenated or simple UUID text. Displays as 32 lowercase hex
/// characters, the same text an [`UploadId`] uses, so a completed upload and the
/// artifact describing it share one directory name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    /// Generate a new random artifact ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidArtifactId(format!("{s:?}: {e}")))
    }

    /// Parse only the canonical form (what [`fmt::Display`] produces).
    ///
    /// Used when scanning directories so a file is only ever addressed by the
    /// exact name it was written under.
    pub fn parse_canonical(s: &str) -> Option<Self> {
        let id = Self::parse(s).ok()?;
        (id.to_string() == s).then_some(id)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&UploadId> for ArtifactId {
    fn from(id: &UploadId) -> Self {
        // An UploadId is always 32 hex characters, which is a valid simple UUID.
        Self(Uuid::parse_str(id.as_str()).unwrap_or_default())
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<ArtifactId> for String {
    fn from(id: ArtifactId) -> Self {
        id.to_string()
    }
}

impl fmt::Debug for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactId({})", self.0.simple())
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Optional extra encryption layer. Stored verbatim, never validated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordProtection {
    pub data: String,
    pub iv: String,
    pub salt: String,
}

/// Which representation an artifact record carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Ciphertext is inline in the record.
    Text,
    /// Ciphertext is a merged upload file on disk.
    File,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
        }
    }
}

/// Why a record is no longer readable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpiryReason {
    /// `expiresAt` has passed.
    Primary,
    /// `accessWindowEndsAt` has passed.
    AccessWindow,
}

impl fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary expiry"),
            Self::AccessWindow => f.write_str("access window"),
        }
    }
}

/// The two deadlines of a record, readable without the rest of the payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryFields {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub access_window_ends_at: Option<OffsetDateTime>,
}

impl ExpiryFields {
    /// Check both deadlines. An instant equal to a deadline is not yet expired.
    pub fn expired_at(&self, now: OffsetDateTime) -> Option<ExpiryReason> {
        if self.expires_at.is_some_and(|t| now > t) {
            return Some(ExpiryReason::Primary);
        }
        if self.access_window_ends_at.is_some_and(|t| now > t) {
            return Some(ExpiryReason::AccessWindow);
        }
        None
    }
}

/// One artifact's metadata document.
///
/// Exactly one of `encrypted_data` (text) or `original_filename` (file) is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_data: Option<String>,
    pub iv: String,
    pub salt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_protection: Option<PasswordProtection>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub access_window_ends_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub file_size: u64,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub first_accessed_time: Option<OffsetDateTime>,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl ArtifactRecord {
    /// New text-mode record. Content type defaults to `text/plain`.
    pub fn text(
        encrypted_data: String,
        iv: String,
        salt: String,
        content_type: Option<String>,
        password_protection: Option<PasswordProtection>,
        expires_at: OffsetDateTime,
    ) -> Self {
        let content_type = content_type
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| crate::DEFAULT_TEXT_CONTENT_TYPE.to_string());

        Self {
            encrypted_data: Some(encrypted_data),
            iv,
            salt,
            original_filename: None,
            password_protection,
            expires_at: Some(expires_at),
            access_window_ends_at: None,
            content_type: Some(content_type),
            file_size: 0,
            first_accessed_time: None,
        }
    }

    /// New file-mode record describing a merged upload.
    pub fn file(
        original_filename: String,
        file_size: u64,
        iv: String,
        salt: String,
        content_type: String,
        password_protection: Option<PasswordProtection>,
        expires_at: OffsetDateTime,
    ) -> Self {
        Self {
            encrypted_data: None,
            iv,
            salt,
            original_filename: Some(original_filename),
            password_protection,
            expires_at: Some(expires_at),
            access_window_ends_at: None,
            content_type: Some(content_type),
            file_size,
            first_accessed_time: None,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        match self.original_filename.as_deref() {
            Some(name) if !name.is_empty() => ArtifactKind::File,
            _ => ArtifactKind::Text,
        }
    }

    /// Lowercase extension of the original file name, without the dot.
    pub fn extension(&self) -> Option<String> {
        let name = self.original_filename.as_deref()?;
        let (_, ext) = name.rsplit_once('.')?;
        (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
    }

    /// File size in MiB.
    pub fn size_mb(&self) -> f64 {
        self.file_size as f64 / (1024.0 * 1024.0)
    }

    pub fn expiry(&self) -> ExpiryFields {
        ExpiryFields {
            expires_at: self.expires_at,
            access_window_ends_at: self.access_window_ends_at,
        }
    }

    pub fn expired_at(&self, now: OffsetDateTime) -> Option<ExpiryReason> {
        self.expiry().expired_at(now)
    }

    pub fn needs_password(&self) -> bool {
        self.password_protection.is_some()
    }
}
