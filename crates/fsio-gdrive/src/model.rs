//! Wire types for the Drive v3 and Directory v1 REST APIs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub modified_time: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub sha256_checksum: Option<String>,
    #[serde(default)]
    pub export_links: Option<HashMap<String, String>>,
    #[serde(default)]
    pub shortcut_details: Option<ShortcutDetails>,
}

impl DriveFile {
    /// `modifiedTime` as a timestamp; the epoch when absent or malformed.
    pub fn mod_time(&self) -> DateTime<Utc> {
        self.modified_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default()
    }

    /// Size in bytes. Google-native documents have none and report zero.
    pub fn size(&self) -> u64 {
        self.size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutDetails {
    #[serde(default)]
    pub target_id: String,
    #[serde(default)]
    pub target_mime_type: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub files: Vec<DriveFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SharedDrive {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveList {
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub drives: Vec<SharedDrive>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct About {
    #[serde(default)]
    pub export_formats: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub domain_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DomainList {
    #[serde(default)]
    pub domains: Vec<Domain>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub primary_email: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserList {
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub users: Vec<User>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_list_parses_drive_response() {
        let list: FileList = serde_json::from_str(
            r#"{
                "nextPageToken": "p2",
                "files": [
                    {"id": "1", "name": "a.txt", "mimeType": "text/plain",
                     "modifiedTime": "2024-05-06T07:08:09.123Z", "size": "42"},
                    {"id": "2", "name": "Doc", "mimeType": "application/vnd.google-apps.document"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(list.next_page_token.as_deref(), Some("p2"));
        assert_eq!(list.files[0].size(), 42);
        assert_eq!(
            list.files[0].mod_time().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            "2024-05-06T07:08:09Z"
        );
        assert_eq!(list.files[1].size(), 0);
        assert_eq!(list.files[1].mod_time().timestamp(), 0);
    }
}
