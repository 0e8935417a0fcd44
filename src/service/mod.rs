//! Port to the external rendering service.
//!
//! The workflow only depends on [`RenderService`]; [`http::HttpRenderService`]
//! is the production binding.

pub mod http;

use crate::error::ServiceError;
use crate::model::{ColumnMetadata, ExportResult, FileSession, PreviewResult};
use crate::normalize::RenderRequest;
use bytes::Bytes;
use std::future::Future;

pub use http::HttpRenderService;

/// A workbook picked by the user, ready to upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }
}

/// The four request/response operations the workflow sequences.
pub trait RenderService: Send + Sync + 'static {
    fn upload(
        &self,
        file: &UploadFile,
    ) -> impl Future<Output = Result<FileSession, ServiceError>> + Send;

    fn columns(
        &self,
        session_id: &str,
        sheet: &str,
    ) -> impl Future<Output = Result<ColumnMetadata, ServiceError>> + Send;

    fn preview(
        &self,
        request: &RenderRequest,
    ) -> impl Future<Output = Result<PreviewResult, ServiceError>> + Send;

    fn export(
        &self,
        request: &RenderRequest,
    ) -> impl Future<Output = Result<ExportResult, ServiceError>> + Send;
}
