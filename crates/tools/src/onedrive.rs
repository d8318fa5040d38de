//! Built-in OneDrive tools backed by the Microsoft Graph API.
//!
//! Registered under the `onedrive` server id whenever an access token is
//! configured, so the model can browse and read drive files without an
//! external tool server.

use async_trait::async_trait;
use powernode_config::OneDriveConfig;
use powernode_core::catalog::BuiltinTool;
use powernode_core::error::ToolError;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Server id the built-in tools are registered under.
pub const SERVER_ID: &str = "onedrive";

const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com";

/// Shared Graph API access for the OneDrive tools.
#[derive(Clone)]
pub struct OneDriveClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    drive_id: Option<String>,
}

impl OneDriveClient {
    /// Build a client when the config carries an access token.
    pub fn from_config(http: reqwest::Client, config: &OneDriveConfig) -> Option<Self> {
        let access_token = config.access_token.clone()?;
        let base_url = config
            .graph_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.into())
            .trim_end_matches('/')
            .to_string();

        Some(Self {
            http,
            base_url,
            access_token,
            drive_id: config.drive_id.clone(),
        })
    }

    /// API prefix for the configured drive.
    fn drive_url(&self) -> String {
        match &self.drive_id {
            Some(id) => format!("{}/v1.0/drives/{id}", self.base_url),
            None => format!("{}/v1.0/me/drive", self.base_url),
        }
    }

    fn children_url(&self, folder_path: Option<&str>) -> String {
        match folder_path.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
            Some(path) => format!("{}/root:/{path}:/children", self.drive_url()),
            None => format!("{}/root/children", self.drive_url()),
        }
    }

    fn content_url(&self, file_id: &str) -> String {
        format!("{}/items/{file_id}/content", self.drive_url())
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, String> {
        debug!(%url, "OneDrive Graph request");
        let response = self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .send()
            .await
            .map_err(|e| format!("OneDrive request failed: {e}"))?;

        let status = response.status().as_u16();
        match status {
            200..=299 => Ok(response),
            401 | 403 => Err(format!(
                "OneDrive authentication failed (HTTP {status}): access token expired or invalid"
            )),
            404 => Err("OneDrive item not found (HTTP 404)".into()),
            _ => {
                let body = response.text().await.unwrap_or_default();
                let snippet: String = body.chars().take(200).collect();
                Err(format!("OneDrive request failed (HTTP {status}): {snippet}"))
            }
        }
    }

    async fn list_children(&self, folder_path: Option<&str>) -> Result<Vec<DriveItem>, String> {
        let url = format!(
            "{}?$top=200&$select=id,name,size,folder,file,lastModifiedDateTime",
            self.children_url(folder_path)
        );
        let response = self.get(&url).await?;
        let listing: DriveChildren = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse OneDrive listing: {e}"))?;
        Ok(listing.value)
    }

    async fn download_text(&self, file_id: &str) -> Result<String, String> {
        let response = self.get(&self.content_url(file_id)).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| format!("Failed to download OneDrive file: {e}"))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[derive(Debug, Deserialize)]
struct DriveChildren {
    #[serde(default)]
    value: Vec<DriveItem>,
}

#[derive(Debug, Deserialize)]
struct DriveItem {
    id: String,
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    folder: Option<serde_json::Value>,
    #[serde(rename = "lastModifiedDateTime", default)]
    last_modified: Option<String>,
}

impl DriveItem {
    fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "type": if self.folder.is_some() { "folder" } else { "file" },
            "size": self.size,
            "modified": self.last_modified,
        })
    }
}

/// Lists files and folders in a OneDrive folder.
pub struct OneDriveListTool {
    client: OneDriveClient,
}

#[async_trait]
impl BuiltinTool for OneDriveListTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and folders in the user's OneDrive. Returns each item's id, name, type, \
         size and last modified time. Use the returned id with read_file to read a file."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "folder_path": {
                    "type": "string",
                    "description": "Folder path relative to the drive root (e.g. 'Documents/Reports'). Omit for the root folder."
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let folder_path = arguments["folder_path"].as_str();

        let items = self
            .client
            .list_children(folder_path)
            .await
            .map_err(|reason| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason,
            })?;

        let listing = serde_json::json!({
            "folder": folder_path.unwrap_or("/"),
            "count": items.len(),
            "items": items.iter().map(DriveItem::summary).collect::<Vec<_>>(),
        });

        serde_json::to_string_pretty(&listing).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: e.to_string(),
        })
    }
}

/// Reads a OneDrive file's content by item id.
pub struct OneDriveReadTool {
    client: OneDriveClient,
}

#[async_trait]
impl BuiltinTool for OneDriveReadTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the user's OneDrive by its item id (from list_files). \
         Returns the file content as text."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_id": {
                    "type": "string",
                    "description": "The OneDrive item id of the file to read"
                }
            },
            "required": ["file_id"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let file_id = arguments["file_id"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'file_id' argument".into()))?;

        self.client
            .download_text(file_id)
            .await
            .map_err(|reason| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason,
            })
    }
}

/// Build the OneDrive built-in tools, or none when unconfigured.
pub fn onedrive_builtins(http: &reqwest::Client, config: &OneDriveConfig) -> Vec<Arc<dyn BuiltinTool>> {
    match OneDriveClient::from_config(http.clone(), config) {
        Some(client) => vec![
            Arc::new(OneDriveListTool {
                client: client.clone(),
            }),
            Arc::new(OneDriveReadTool { client }),
        ],
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> OneDriveConfig {
        OneDriveConfig {
            access_token: Some("graph-token".into()),
            drive_id: None,
            graph_base_url: None,
        }
    }

    fn client(config: &OneDriveConfig) -> OneDriveClient {
        OneDriveClient::from_config(reqwest::Client::new(), config).expect("configured")
    }

    #[test]
    fn unconfigured_yields_no_tools() {
        let tools = onedrive_builtins(&reqwest::Client::new(), &OneDriveConfig::default());
        assert!(tools.is_empty());
    }

    #[test]
    fn configured_yields_list_and_read() {
        let tools = onedrive_builtins(&reqwest::Client::new(), &configured());
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["list_files", "read_file"]);
    }

    #[test]
    fn default_drive_urls() {
        let c = client(&configured());
        assert_eq!(c.drive_url(), "https://graph.microsoft.com/v1.0/me/drive");
        assert_eq!(
            c.children_url(None),
            "https://graph.microsoft.com/v1.0/me/drive/root/children"
        );
        assert_eq!(
            c.children_url(Some("/Documents/Reports/")),
            "https://graph.microsoft.com/v1.0/me/drive/root:/Documents/Reports:/children"
        );
        assert_eq!(
            c.content_url("ITEM01"),
            "https://graph.microsoft.com/v1.0/me/drive/items/ITEM01/content"
        );
    }

    #[test]
    fn explicit_drive_id_changes_prefix() {
        let config = OneDriveConfig {
            drive_id: Some("b!abc123".into()),
            graph_base_url: Some("https://graph.custom.test/".into()),
            ..configured()
        };
        let c = client(&config);
        assert_eq!(c.drive_url(), "https://graph.custom.test/v1.0/drives/b!abc123");
    }

    #[test]
    fn blank_folder_path_means_root() {
        let c = client(&configured());
        assert_eq!(c.children_url(Some("")), c.children_url(None));
        assert_eq!(c.children_url(Some("/")), c.children_url(None));
    }

    #[tokio::test]
    async fn read_without_file_id_is_invalid() {
        let tool = OneDriveReadTool {
            client: client(&configured()),
        };
        let err = tool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn drive_item_summary_marks_folders() {
        let item: DriveItem = serde_json::from_str(
            r#"{"id": "A1", "name": "Reports", "folder": {"childCount": 3}, "lastModifiedDateTime": "2025-01-07T10:00:00Z"}"#,
        )
        .unwrap();
        let summary = item.summary();
        assert_eq!(summary["type"], "folder");
        assert_eq!(summary["name"], "Reports");

        let file: DriveItem =
            serde_json::from_str(r#"{"id": "B2", "name": "q3.xlsx", "size": 48211, "file": {}}"#).unwrap();
        assert_eq!(file.summary()["type"], "file");
        assert_eq!(file.summary()["size"], 48211);
    }
}
