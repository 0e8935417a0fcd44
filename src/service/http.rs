//! HTTP binding for the rendering service.

use super::{RenderService, UploadFile};
use crate::config::ClientConfig;
use crate::error::ServiceError;
use crate::model::{ColumnMetadata, ExportResult, FileSession, PreviewResult, SheetSniff};
use crate::normalize::RenderRequest;
use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;

const UPLOAD_PATH: &str = "/api/excel/upload";
const COLUMNS_PATH: &str = "/api/excel/columns";
const PREVIEW_PATH: &str = "/api/plot/preview";
const EXPORT_PATH: &str = "/api/plot/export";

#[derive(Debug, Deserialize)]
struct UploadReply {
    ok: bool,
    msg: Option<String>,
    #[serde(default)]
    file_id: String,
    #[serde(default)]
    sheets: Vec<String>,
    #[serde(default)]
    sniff: Option<BTreeMap<String, SheetSniff>>,
}

#[derive(Debug, Deserialize)]
struct ColumnsReply {
    ok: bool,
    msg: Option<String>,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    time_candidates: Vec<String>,
    #[serde(default)]
    numeric_cols: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PreviewReply {
    ok: bool,
    msg: Option<String>,
    preview_data_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExportReply {
    ok: bool,
    msg: Option<String>,
    #[serde(default)]
    files: Vec<String>,
    zip: Option<String>,
    preview_data_url: Option<String>,
}

pub struct HttpRenderService {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpRenderService {
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid base URL {:?}", cfg.base_url))?;
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .build()
            .context("build HTTP client")?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("build URL for {path}"))
    }

    /// Fetch an exported file or archive by the reference the service returned.
    pub async fn download(&self, file_ref: &str) -> Result<Bytes> {
        let url = self.endpoint(file_ref)?;
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("GET {url}: HTTP {status}");
        }
        resp.bytes().await.with_context(|| format!("read body of {url}"))
    }
}

/// Decode a reply body. Error statuses still carry the JSON envelope, so the
/// status only matters when the body does not parse.
async fn read_reply<T: DeserializeOwned>(resp: reqwest::Response, what: &str) -> Result<T> {
    let status = resp.status();
    let body = resp
        .bytes()
        .await
        .with_context(|| format!("{what}: read reply body"))?;
    serde_json::from_slice(&body)
        .with_context(|| format!("{what}: unexpected reply (HTTP {status})"))
}

fn check(ok: bool, msg: Option<String>) -> Result<(), ServiceError> {
    if ok {
        Ok(())
    } else {
        Err(ServiceError::rejected(msg))
    }
}

impl HttpRenderService {
    async fn post_render<T: DeserializeOwned>(
        &self,
        path: &str,
        request: &RenderRequest,
    ) -> Result<T> {
        let url = self.endpoint(path)?;
        let resp = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("POST {path}"))?;
        read_reply(resp, path).await
    }
}

impl RenderService for HttpRenderService {
    async fn upload(&self, file: &UploadFile) -> Result<FileSession, ServiceError> {
        let url = self.endpoint(UPLOAD_PATH)?;
        let part = Part::bytes(file.bytes.to_vec()).file_name(file.file_name.clone());
        let form = Form::new().part("file", part);
        let resp = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("POST {UPLOAD_PATH}"))?;
        let reply: UploadReply = read_reply(resp, UPLOAD_PATH).await?;
        check(reply.ok, reply.msg)?;
        Ok(FileSession {
            session_id: reply.file_id,
            sheets: reply.sheets,
            parse_hints: reply.sniff,
        })
    }

    async fn columns(&self, session_id: &str, sheet: &str) -> Result<ColumnMetadata, ServiceError> {
        let mut url = self.endpoint(COLUMNS_PATH)?;
        url.query_pairs_mut()
            .append_pair("file_id", session_id)
            .append_pair("sheet", sheet);
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {COLUMNS_PATH}"))?;
        let reply: ColumnsReply = read_reply(resp, COLUMNS_PATH).await?;
        check(reply.ok, reply.msg)?;
        Ok(ColumnMetadata {
            session_id: session_id.to_string(),
            sheet: sheet.to_string(),
            columns: reply.columns,
            time_candidates: reply.time_candidates,
            numeric: reply.numeric_cols,
        })
    }

    async fn preview(&self, request: &RenderRequest) -> Result<PreviewResult, ServiceError> {
        let reply: PreviewReply = self.post_render(PREVIEW_PATH, request).await?;
        check(reply.ok, reply.msg)?;
        let image_ref = reply
            .preview_data_url
            .context("preview reply has no image")?;
        Ok(PreviewResult { image_ref })
    }

    async fn export(&self, request: &RenderRequest) -> Result<ExportResult, ServiceError> {
        let reply: ExportReply = self.post_render(EXPORT_PATH, request).await?;
        check(reply.ok, reply.msg)?;
        Ok(ExportResult {
            image_ref: reply.preview_data_url,
            file_refs: reply.files,
            archive_ref: reply.zip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_reply_without_message() {
        let reply: PreviewReply = serde_json::from_str(r#"{"ok": false}"#).unwrap();
        let err = check(reply.ok, reply.msg).unwrap_err();
        assert!(matches!(err, ServiceError::Rejected { message: None }));
    }

    #[test]
    fn upload_reply_parses_sniff() {
        let reply: UploadReply = serde_json::from_str(
            r#"{"ok": true, "file_id": "abc", "sheets": ["S1", "S2"],
                "sniff": {"S1": {"columns": ["t", "a"], "head": [["0", "1.5"]]}}}"#,
        )
        .unwrap();
        assert!(reply.ok);
        assert_eq!(reply.sheets, vec!["S1", "S2"]);
        let sniff = reply.sniff.unwrap();
        assert_eq!(sniff["S1"].columns, vec!["t", "a"]);
    }

    #[test]
    fn export_reply_tolerates_missing_archive() {
        let reply: ExportReply = serde_json::from_str(
            r#"{"ok": true, "files": ["/download?path=/x/a.png"]}"#,
        )
        .unwrap();
        assert_eq!(reply.files.len(), 1);
        assert!(reply.zip.is_none());
        assert!(reply.preview_data_url.is_none());
    }

    #[test]
    fn endpoints_join_base_url() {
        let cfg = ClientConfig {
            base_url: "http://127.0.0.1:5000".into(),
            ..ClientConfig::default()
        };
        let svc = HttpRenderService::new(&cfg).unwrap();
        assert_eq!(
            svc.endpoint(COLUMNS_PATH).unwrap().as_str(),
            "http://127.0.0.1:5000/api/excel/columns"
        );
        assert_eq!(
            svc.endpoint("/download?path=/srv/out/a.png").unwrap().as_str(),
            "http://127.0.0.1:5000/download?path=/srv/out/a.png"
        );
    }

    #[test]
    fn bad_base_url_is_reported() {
        let cfg = ClientConfig {
            base_url: "not a url".into(),
            ..ClientConfig::default()
        };
        assert!(HttpRenderService::new(&cfg).is_err());
    }
}
