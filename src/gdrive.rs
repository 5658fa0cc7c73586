//! Google Drive/Docs provisioner.
//!
//! Folders and documents are addressed by (name, parent, MIME type);
//! find-or-create makes provisioning idempotent from the caller's side.
//! Document writes go through a single batchUpdate whose indices are
//! UTF-16 code units, the Docs API's unit of text addressing.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{AppError, Result};

pub const MIME_FOLDER: &str = "application/vnd.google-apps.folder";
pub const MIME_DOC: &str = "application/vnd.google-apps.document";

const DRIVE_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_BASE_URL: &str = "https://www.googleapis.com/upload/drive/v3";
const DOCS_BASE_URL: &str = "https://docs.googleapis.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderInfo {
    pub id: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocInfo {
    pub id: String,
    pub title: String,
    pub url: String,
}

/// A substring of a message body to style as a hyperlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocLink {
    pub text: String,
    pub url: String,
}

/// An image to embed inline after a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocImage {
    pub url: String,
}

/// One rendered message, ready for insertion into a daily document.
#[derive(Debug, Clone, Default)]
pub struct MessageBlock {
    pub sender_name: String,
    pub timestamp: String,
    pub content: String,
    pub links: Vec<DocLink>,
    pub images: Vec<DocImage>,
}

impl MessageBlock {
    fn header(&self) -> String {
        format!("{}  {}\n", self.sender_name, self.timestamp)
    }

    fn body(&self) -> String {
        format!("{}\n\n", self.content)
    }

    fn full_text(&self) -> String {
        let mut text = self.header();
        text.push_str(&self.body());
        text
    }
}

/// The Drive/Docs surface the orchestrator depends on.
#[async_trait]
pub trait DriveApi: Send + Sync {
    async fn create_folder(&self, name: &str, parent: &str) -> Result<FolderInfo>;

    async fn find_folder(&self, name: &str, parent: &str) -> Result<Option<FolderInfo>>;

    async fn get_folder(&self, folder_id: &str) -> Result<FolderInfo>;

    async fn create_document(&self, title: &str, folder_id: &str) -> Result<DocInfo>;

    async fn find_document(&self, title: &str, folder_id: &str) -> Result<Option<DocInfo>>;

    /// Append message blocks in one batchUpdate call.
    async fn batch_append(&self, doc_id: &str, blocks: &[MessageBlock]) -> Result<()>;

    async fn upload_file(
        &self,
        name: &str,
        mime_type: &str,
        data: Vec<u8>,
        parent: &str,
    ) -> Result<String>;

    /// Grant anyone-with-link read access.
    async fn make_public(&self, file_id: &str) -> Result<()>;

    /// Grant one user read access, optionally sending the notification
    /// email.
    async fn share_with_user(&self, file_id: &str, email: &str, notify: bool) -> Result<()>;

    async fn web_content_link(&self, file_id: &str) -> Result<String>;

    async fn find_or_create_folder(&self, name: &str, parent: &str) -> Result<FolderInfo> {
        if let Some(folder) = self.find_folder(name, parent).await? {
            return Ok(folder);
        }
        self.create_folder(name, parent).await
    }

    async fn find_or_create_document(&self, title: &str, folder_id: &str) -> Result<DocInfo> {
        if let Some(doc) = self.find_document(title, folder_id).await? {
            return Ok(doc);
        }
        self.create_document(title, folder_id).await
    }
}

/// Supplies a bearer token for Google API calls. The OAuth flow that
/// produces and refreshes it lives outside the core.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

pub struct StaticTokenProvider(String);

impl StaticTokenProvider {
    pub fn new(token: &str) -> Self {
        Self(token.to_string())
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Deserialize)]
struct DriveFile {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default, rename = "webViewLink")]
    web_view_link: String,
    #[serde(default, rename = "webContentLink")]
    web_content_link: String,
    #[serde(default, rename = "mimeType")]
    mime_type: String,
}

#[derive(Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
}

pub struct DriveClient {
    http: reqwest::Client,
    tokens: Box<dyn AccessTokenProvider>,
    drive_base: String,
    upload_base: String,
    docs_base: String,
}

impl DriveClient {
    pub fn new(tokens: Box<dyn AccessTokenProvider>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            tokens,
            drive_base: DRIVE_BASE_URL.to_string(),
            upload_base: UPLOAD_BASE_URL.to_string(),
            docs_base: DOCS_BASE_URL.to_string(),
        })
    }

    pub fn with_base_urls(mut self, drive: &str, upload: &str, docs: &str) -> Self {
        self.drive_base = drive.trim_end_matches('/').to_string();
        self.upload_base = upload.trim_end_matches('/').to_string();
        self.docs_base = docs.trim_end_matches('/').to_string();
        self
    }

    async fn check<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(AppError::DriveApi(format!(
                "HTTP {}: {}",
                status,
                String::from_utf8_lossy(&body)
            )));
        }
        serde_json::from_slice(&body).map_err(|e| AppError::JsonParse(e.to_string()))
    }

    async fn create_file(&self, name: &str, mime_type: &str, parent: &str) -> Result<DriveFile> {
        let token = self.tokens.access_token().await?;
        let mut metadata = json!({"name": name, "mimeType": mime_type});
        if !parent.is_empty() {
            metadata["parents"] = json!([parent]);
        }
        let resp = self
            .http
            .post(format!("{}/files", self.drive_base))
            .bearer_auth(token)
            .query(&[("fields", "id,name,webViewLink")])
            .json(&metadata)
            .send()
            .await?;
        Self::check(resp).await
    }

    async fn find_file(
        &self,
        name: &str,
        mime_type: &str,
        parent: &str,
    ) -> Result<Option<DriveFile>> {
        let token = self.tokens.access_token().await?;
        let mut query = format!(
            "name = '{}' and mimeType = '{}' and trashed = false",
            escape_query_name(name),
            mime_type
        );
        if !parent.is_empty() {
            query.push_str(&format!(" and '{}' in parents", parent));
        }
        let resp = self
            .http
            .get(format!("{}/files", self.drive_base))
            .bearer_auth(token)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id,name,webViewLink)"),
                ("pageSize", "1"),
            ])
            .send()
            .await?;
        let mut listing: FileListResponse = Self::check(resp).await?;
        if listing.files.is_empty() {
            return Ok(None);
        }
        Ok(Some(listing.files.remove(0)))
    }

    /// Index just before the implicit trailing newline of the document body.
    async fn end_index(&self, doc_id: &str) -> Result<i64> {
        #[derive(Deserialize)]
        struct Element {
            #[serde(default, rename = "endIndex")]
            end_index: i64,
        }
        #[derive(Deserialize, Default)]
        struct Body {
            #[serde(default)]
            content: Vec<Element>,
        }
        #[derive(Deserialize)]
        struct Document {
            #[serde(default)]
            body: Option<Body>,
        }

        let token = self.tokens.access_token().await?;
        let resp = self
            .http
            .get(format!("{}/documents/{}", self.docs_base, doc_id))
            .bearer_auth(token)
            .query(&[("fields", "body(content(endIndex))")])
            .send()
            .await?;
        let doc: Document = Self::check(resp).await?;
        let end = doc
            .body
            .and_then(|b| b.content.last().map(|e| e.end_index - 1))
            .unwrap_or(1);
        Ok(end.max(1))
    }
}

#[async_trait]
impl DriveApi for DriveClient {
    async fn create_folder(&self, name: &str, parent: &str) -> Result<FolderInfo> {
        let file = self.create_file(name, MIME_FOLDER, parent).await?;
        debug!(name, id = %file.id, "created folder");
        Ok(FolderInfo {
            id: file.id,
            name: file.name,
            url: file.web_view_link,
        })
    }

    async fn find_folder(&self, name: &str, parent: &str) -> Result<Option<FolderInfo>> {
        Ok(self
            .find_file(name, MIME_FOLDER, parent)
            .await?
            .map(|f| FolderInfo {
                id: f.id,
                name: f.name,
                url: f.web_view_link,
            }))
    }

    async fn get_folder(&self, folder_id: &str) -> Result<FolderInfo> {
        let token = self.tokens.access_token().await?;
        let resp = self
            .http
            .get(format!("{}/files/{}", self.drive_base, folder_id))
            .bearer_auth(token)
            .query(&[("fields", "id,name,webViewLink,mimeType")])
            .send()
            .await?;
        let file: DriveFile = Self::check(resp).await?;
        if file.mime_type != MIME_FOLDER {
            return Err(AppError::DriveApi(format!(
                "{} is not a folder (type: {})",
                folder_id, file.mime_type
            )));
        }
        Ok(FolderInfo {
            id: file.id,
            name: file.name,
            url: file.web_view_link,
        })
    }

    async fn create_document(&self, title: &str, folder_id: &str) -> Result<DocInfo> {
        let file = self.create_file(title, MIME_DOC, folder_id).await?;
        debug!(title, id = %file.id, "created document");
        Ok(DocInfo {
            id: file.id,
            title: file.name,
            url: file.web_view_link,
        })
    }

    async fn find_document(&self, title: &str, folder_id: &str) -> Result<Option<DocInfo>> {
        Ok(self
            .find_file(title, MIME_DOC, folder_id)
            .await?
            .map(|f| DocInfo {
                id: f.id,
                title: f.name,
                url: f.web_view_link,
            }))
    }

    async fn batch_append(&self, doc_id: &str, blocks: &[MessageBlock]) -> Result<()> {
        if blocks.is_empty() {
            return Ok(());
        }
        let end = self.end_index(doc_id).await?;
        let requests = build_append_requests(end, blocks);

        let token = self.tokens.access_token().await?;
        let resp = self
            .http
            .post(format!("{}/documents/{}:batchUpdate", self.docs_base, doc_id))
            .bearer_auth(token)
            .json(&json!({ "requests": requests }))
            .send()
            .await?;
        let _: serde_json::Value = Self::check(resp).await?;
        Ok(())
    }

    async fn upload_file(
        &self,
        name: &str,
        mime_type: &str,
        data: Vec<u8>,
        parent: &str,
    ) -> Result<String> {
        let token = self.tokens.access_token().await?;
        let mut metadata = json!({"name": name});
        if !parent.is_empty() {
            metadata["parents"] = json!([parent]);
        }

        let meta_part = reqwest::multipart::Part::text(metadata.to_string())
            .mime_str("application/json")
            .map_err(|e| AppError::DriveApi(e.to_string()))?;
        let media_part = reqwest::multipart::Part::bytes(data)
            .mime_str(mime_type)
            .map_err(|e| AppError::DriveApi(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("metadata", meta_part)
            .part("media", media_part);

        let resp = self
            .http
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(token)
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .multipart(form)
            .send()
            .await?;
        let file: DriveFile = Self::check(resp).await?;
        Ok(file.id)
    }

    async fn make_public(&self, file_id: &str) -> Result<()> {
        let token = self.tokens.access_token().await?;
        let resp = self
            .http
            .post(format!("{}/files/{}/permissions", self.drive_base, file_id))
            .bearer_auth(token)
            .json(&json!({"type": "anyone", "role": "reader"}))
            .send()
            .await?;
        let _: serde_json::Value = Self::check(resp).await?;
        Ok(())
    }

    async fn share_with_user(&self, file_id: &str, email: &str, notify: bool) -> Result<()> {
        let token = self.tokens.access_token().await?;
        let resp = self
            .http
            .post(format!("{}/files/{}/permissions", self.drive_base, file_id))
            .bearer_auth(token)
            .query(&[("sendNotificationEmail", if notify { "true" } else { "false" })])
            .json(&json!({"type": "user", "role": "reader", "emailAddress": email}))
            .send()
            .await?;
        let _: serde_json::Value = Self::check(resp).await?;
        Ok(())
    }

    async fn web_content_link(&self, file_id: &str) -> Result<String> {
        let token = self.tokens.access_token().await?;
        let resp = self
            .http
            .get(format!("{}/files/{}", self.drive_base, file_id))
            .bearer_auth(token)
            .query(&[("fields", "webContentLink")])
            .send()
            .await?;
        let file: DriveFile = Self::check(resp).await?;
        Ok(file.web_content_link)
    }
}

/// Build the batchUpdate request list for appending `blocks` at `start`.
///
/// Text inserts are emitted in reverse block order, all at `start`, so each
/// insertion's index is unaffected by the ones already emitted. Style and
/// image requests follow, addressed by forward cumulative offsets that are
/// valid once every insert has run. All offsets are UTF-16 code units.
fn build_append_requests(start: i64, blocks: &[MessageBlock]) -> Vec<serde_json::Value> {
    let mut requests = Vec::new();

    for block in blocks.iter().rev() {
        requests.push(json!({
            "insertText": {
                "location": {"index": start},
                "text": block.full_text(),
            }
        }));
    }

    let mut offset = start;
    let mut image_inserts: Vec<(i64, &DocImage)> = Vec::new();
    for block in blocks {
        let header_len = utf16_len(&block.header());
        let content_len = utf16_len(&block.content);

        let sender_len = utf16_len(&block.sender_name);
        if sender_len > 0 {
            requests.push(json!({
                "updateTextStyle": {
                    "range": {"startIndex": offset, "endIndex": offset + sender_len},
                    "textStyle": {"bold": true},
                    "fields": "bold",
                }
            }));
        }

        let content_start = offset + header_len;
        for link in &block.links {
            if let Some(byte_pos) = block.content.find(&link.text) {
                let link_start = content_start + utf16_len(&block.content[..byte_pos]);
                let link_end = link_start + utf16_len(&link.text);
                requests.push(json!({
                    "updateTextStyle": {
                        "range": {"startIndex": link_start, "endIndex": link_end},
                        "textStyle": {"link": {"url": link.url}},
                        "fields": "link",
                    }
                }));
            }
        }

        let body_end = content_start + content_len;
        for image in &block.images {
            image_inserts.push((body_end, image));
        }

        offset += utf16_len(&block.full_text());
    }

    // Inline images add one index unit each; inserting back-to-front keeps
    // every position valid.
    for (index, image) in image_inserts.into_iter().rev() {
        requests.push(json!({
            "insertInlineImage": {
                "location": {"index": index},
                "uri": image.url,
            }
        }));
    }

    requests
}

/// UTF-16 code units in `s`; supplementary-plane characters count as two.
fn utf16_len(s: &str) -> i64 {
    s.encode_utf16().count() as i64
}

/// Single quotes must be escaped inside Drive query string literals.
fn escape_query_name(name: &str) -> String {
    name.replace('\'', "\\'")
}
