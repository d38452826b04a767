//! CheckFileInfo property bags
//!
//! The three supported editor families expect near-identical but not
//! identical CheckFileInfo shapes. Rather than three duplicate structs (or
//! reflection), one carrier holds a property bag and each application style
//! pins an explicit table of the property names it may carry; `set_by_name`
//! rejects anything outside the active table.

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::context::{ViewMode, WopiContext};
use crate::storage::StatInfo;

#[derive(Debug, Error)]
pub enum FileInfoError {
    #[error("property {property:?} is not part of the {style:?} file info shape")]
    UnknownProperty { property: String, style: AppStyle },
}

/// Which editor family the CheckFileInfo response is shaped for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStyle {
    Microsoft,
    Collabora,
    OnlyOffice,
}

impl AppStyle {
    /// The explicit field table backing this variant's property bag.
    fn field_table(self) -> &'static [&'static str] {
        match self {
            AppStyle::Microsoft => &[
                "BaseFileName",
                "OwnerId",
                "Size",
                "UserId",
                "Version",
                "BreadcrumbDocName",
                "HostEditUrl",
                "HostViewUrl",
                "SupportsExtendedLockLength",
                "SupportsGetLock",
                "SupportsLocks",
                "SupportsUpdate",
                "UserCanNotWriteRelative",
                "IsAnonymousUser",
                "UserFriendlyName",
                "UserCanWrite",
                "ReadOnly",
                "RestrictedWebViewOnly",
            ],
            AppStyle::Collabora => &[
                "BaseFileName",
                "OwnerId",
                "Size",
                "UserId",
                "Version",
                "HostEditUrl",
                "HostViewUrl",
                "SupportsExtendedLockLength",
                "SupportsGetLock",
                "SupportsLocks",
                "SupportsUpdate",
                "UserCanNotWriteRelative",
                "UserFriendlyName",
                "UserCanWrite",
                "PostMessageOrigin",
                "EnableOwnerTermination",
                "DisableExport",
                "DisableCopy",
                "DisablePrint",
                "WatermarkText",
            ],
            AppStyle::OnlyOffice => &[
                "BaseFileName",
                "OwnerId",
                "Size",
                "UserId",
                "Version",
                "HostEditUrl",
                "HostViewUrl",
                "SupportsExtendedLockLength",
                "SupportsGetLock",
                "SupportsLocks",
                "SupportsUpdate",
                "UserCanNotWriteRelative",
                "UserFriendlyName",
                "UserCanWrite",
                "PostMessageOrigin",
                "ClosePostMessage",
                "EditModePostMessage",
                "EditNotificationPostMessage",
                "FileSharingPostMessage",
                "FileVersionPostMessage",
            ],
        }
    }

    fn canonical(self, property: &str) -> Option<&'static str> {
        self.field_table().iter().copied().find(|p| *p == property)
    }
}

/// Shared property bag with a per-application serialization shape.
#[derive(Debug, Clone)]
pub struct FileInfo {
    style: AppStyle,
    props: BTreeMap<&'static str, Value>,
}

impl FileInfo {
    pub fn new(style: AppStyle) -> Self {
        FileInfo {
            style,
            props: BTreeMap::new(),
        }
    }

    pub fn style(&self) -> AppStyle {
        self.style
    }

    /// Set a property by its wire name. Fails when the active style's field
    /// table does not carry the property.
    pub fn set_by_name(
        &mut self,
        property: &str,
        value: impl Into<Value>,
    ) -> Result<(), FileInfoError> {
        let canonical = self
            .style
            .canonical(property)
            .ok_or_else(|| FileInfoError::UnknownProperty {
                property: property.to_string(),
                style: self.style,
            })?;
        self.props.insert(canonical, value.into());
        Ok(())
    }

    pub fn get(&self, property: &str) -> Option<&Value> {
        self.props.get(property)
    }

    /// Serialize the bag into the CheckFileInfo JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.props
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        )
    }
}

/// Assemble the standard CheckFileInfo response for a session.
///
/// Style-specific extras (post-message origins, watermark text) are left to
/// the caller via [`FileInfo::set_by_name`].
pub fn populate(
    style: AppStyle,
    ctx: &WopiContext,
    stat: &StatInfo,
) -> Result<FileInfo, FileInfoError> {
    let mut info = FileInfo::new(style);

    let base_name = stat
        .path
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("document");

    info.set_by_name("BaseFileName", base_name)?;
    info.set_by_name("OwnerId", stat.owner.as_str())?;
    info.set_by_name("Size", stat.size)?;
    info.set_by_name("Version", stat.etag.as_str())?;

    match &ctx.user {
        Some(user) => {
            info.set_by_name("UserId", user.id.as_str())?;
            info.set_by_name("UserFriendlyName", user.display_name.as_str())?;
            if style == AppStyle::Microsoft {
                info.set_by_name("IsAnonymousUser", false)?;
            }
        }
        None => {
            info.set_by_name("UserId", "guest")?;
            info.set_by_name("UserFriendlyName", "Guest User")?;
            if style == AppStyle::Microsoft {
                info.set_by_name("IsAnonymousUser", true)?;
            }
        }
    }

    info.set_by_name("SupportsLocks", true)?;
    info.set_by_name("SupportsGetLock", true)?;
    info.set_by_name("SupportsExtendedLockLength", true)?;
    info.set_by_name("SupportsUpdate", true)?;
    // PutRelativeFile is not implemented by this host.
    info.set_by_name("UserCanNotWriteRelative", true)?;

    info.set_by_name("UserCanWrite", ctx.can_write())?;

    if !ctx.edit_app_url.is_empty() {
        info.set_by_name("HostEditUrl", ctx.edit_app_url.as_str())?;
    }
    if !ctx.view_app_url.is_empty() {
        info.set_by_name("HostViewUrl", ctx.view_app_url.as_str())?;
    }

    match style {
        AppStyle::Microsoft => {
            info.set_by_name("BreadcrumbDocName", base_name)?;
            info.set_by_name("ReadOnly", !ctx.can_write())?;
            info.set_by_name(
                "RestrictedWebViewOnly",
                ctx.view_mode == ViewMode::ViewOnly,
            )?;
        }
        AppStyle::Collabora => {
            let restricted = ctx.view_mode == ViewMode::ViewOnly;
            info.set_by_name("DisableExport", restricted)?;
            info.set_by_name("DisableCopy", restricted)?;
            info.set_by_name("DisablePrint", restricted)?;
            info.set_by_name("EnableOwnerTermination", true)?;
        }
        AppStyle::OnlyOffice => {}
    }

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FileReference, User};

    fn sample_context(view_mode: ViewMode) -> WopiContext {
        WopiContext {
            storage_access_token: "t".to_string(),
            view_only_access_token: None,
            file_reference: FileReference::new("s", "sp", "o"),
            template_reference: None,
            user: Some(User {
                id: "u1".to_string(),
                idp: "https://idp.example.org".to_string(),
                display_name: "Ada Lovelace".to_string(),
            }),
            view_mode,
            edit_app_url: "https://office.example.org/edit".to_string(),
            view_app_url: "https://office.example.org/view".to_string(),
        }
    }

    fn sample_stat() -> StatInfo {
        StatInfo {
            lock: None,
            size: 1234,
            etag: "\"rev-7\"".to_string(),
            mtime: 1_700_000_000,
            path: "/spaces/project/budget.xlsx".to_string(),
            owner: "owner-1".to_string(),
        }
    }

    #[test]
    fn test_set_by_name_enforces_field_table() {
        let mut info = FileInfo::new(AppStyle::Microsoft);
        assert!(info.set_by_name("BaseFileName", "a.docx").is_ok());
        assert!(matches!(
            info.set_by_name("WatermarkText", "nope"),
            Err(FileInfoError::UnknownProperty { .. })
        ));

        let mut info = FileInfo::new(AppStyle::Collabora);
        assert!(info.set_by_name("WatermarkText", "draft").is_ok());
        assert!(info.set_by_name("RestrictedWebViewOnly", true).is_err());
    }

    #[test]
    fn test_populate_microsoft_shape() {
        let info = populate(
            AppStyle::Microsoft,
            &sample_context(ViewMode::ReadWrite),
            &sample_stat(),
        )
        .unwrap();
        let json = info.to_json();

        assert_eq!(json["BaseFileName"], "budget.xlsx");
        assert_eq!(json["Size"], 1234);
        assert_eq!(json["UserId"], "u1");
        assert_eq!(json["UserCanWrite"], true);
        assert_eq!(json["ReadOnly"], false);
        assert_eq!(json["IsAnonymousUser"], false);
        assert_eq!(json["UserCanNotWriteRelative"], true);
        assert!(json.get("DisableExport").is_none());
    }

    #[test]
    fn test_populate_view_only_restrictions() {
        let mut ctx = sample_context(ViewMode::ViewOnly);
        ctx.user = None;

        let info = populate(AppStyle::Collabora, &ctx, &sample_stat()).unwrap();
        let json = info.to_json();
        assert_eq!(json["DisableExport"], true);
        assert_eq!(json["DisableCopy"], true);
        assert_eq!(json["UserCanWrite"], false);
        assert_eq!(json["UserId"], "guest");

        let info = populate(AppStyle::Microsoft, &ctx, &sample_stat()).unwrap();
        let json = info.to_json();
        assert_eq!(json["RestrictedWebViewOnly"], true);
        assert_eq!(json["IsAnonymousUser"], true);
    }

    #[test]
    fn test_populate_only_office_has_no_microsoft_extras() {
        let info = populate(
            AppStyle::OnlyOffice,
            &sample_context(ViewMode::ReadOnly),
            &sample_stat(),
        )
        .unwrap();
        let json = info.to_json();
        assert!(json.get("ReadOnly").is_none());
        assert!(json.get("BreadcrumbDocName").is_none());
        assert_eq!(json["UserCanWrite"], false);
    }
}
