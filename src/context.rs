//! Per-session WOPI context
//!
//! A [`WopiContext`] is reconstructed from the `access_token` on every
//! request and never persisted server-side. All fields are set atomically
//! from a single verified token; a partially trusted context never exists.

use serde::{Deserialize, Serialize};

/// Identifies exactly one object at the storage back end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    #[serde(rename = "storageId")]
    pub storage_id: String,
    #[serde(rename = "spaceId")]
    pub space_id: String,
    #[serde(rename = "opaqueId")]
    pub opaque_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl FileReference {
    pub fn new(
        storage_id: impl Into<String>,
        space_id: impl Into<String>,
        opaque_id: impl Into<String>,
    ) -> Self {
        FileReference {
            storage_id: storage_id.into(),
            space_id: space_id.into(),
            opaque_id: opaque_id.into(),
            path: String::new(),
        }
    }
}

/// Identity of the editing user, absent for anonymous/guest sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Identity provider that issued the user id
    pub idp: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

/// How the editing application may interact with the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewMode {
    /// Full editing rights
    #[serde(rename = "VIEW_MODE_READ_WRITE")]
    ReadWrite,
    /// Open in the editor UI but reject writes
    #[serde(rename = "VIEW_MODE_READ_ONLY")]
    ReadOnly,
    /// Preview only, download/export disabled, alternate credential used
    #[serde(rename = "VIEW_MODE_VIEW_ONLY")]
    ViewOnly,
}

/// The unit of session state carried inside the access token.
///
/// Immutable once constructed. The `storage_access_token` travels encrypted
/// inside the signed session token and is only ever decrypted after the
/// token signature and expiry have been verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WopiContext {
    #[serde(rename = "storageAccessToken")]
    pub storage_access_token: String,

    /// Alternate credential used only in view-only mode
    #[serde(
        rename = "viewOnlyAccessToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub view_only_access_token: Option<String>,

    #[serde(rename = "fileReference")]
    pub file_reference: FileReference,

    /// Second reference used only when creating a new file from a template
    #[serde(
        rename = "templateReference",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub template_reference: Option<FileReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,

    #[serde(rename = "viewMode")]
    pub view_mode: ViewMode,

    /// Pre-resolved URL the UI navigates to for editing
    #[serde(rename = "editAppUrl", default, skip_serializing_if = "String::is_empty")]
    pub edit_app_url: String,

    /// Pre-resolved URL the UI navigates to for viewing
    #[serde(rename = "viewAppUrl", default, skip_serializing_if = "String::is_empty")]
    pub view_app_url: String,
}

impl WopiContext {
    /// The credential content transfer should present for downloads:
    /// the view-only token when present in view-only mode, the regular
    /// storage token otherwise.
    pub fn download_token(&self) -> &str {
        if self.view_mode == ViewMode::ViewOnly {
            if let Some(token) = &self.view_only_access_token {
                return token;
            }
        }
        &self.storage_access_token
    }

    /// True when the session may write file content and locks.
    pub fn can_write(&self) -> bool {
        self.view_mode == ViewMode::ReadWrite
    }
}
