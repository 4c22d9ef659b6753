//! `upload-file`: persist a base64-encoded upload in blob storage.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use docket_core::{Job, JobError};
use docket_infra::jobs::{decode_payload, JobContext, JobHandler};
use docket_infra::blob::BlobStore;

use crate::{blob_error, decode_base64};

const UNASSIGNED_PROJECT: &str = "unassigned";
const MAX_NAME_LEN: usize = 120;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    file_base64: String,
    file_name: String,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
}

/// Reduce a client-supplied name to a safe single path segment.
pub fn sanitize_file_name(raw: &str) -> String {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();

    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            c
        } else {
            '_'
        };
        if !(c == '_' && out.ends_with('_')) {
            out.push(c);
        }
    }

    // Leading dots and underscores go, the extension stays.
    let (stem, ext) = match out.rfind('.') {
        Some(dot) if dot > 0 => out.split_at(dot),
        _ => (out.as_str(), ""),
    };
    let stem = stem.trim_start_matches(['.', '_']);
    let name = match (stem.is_empty(), ext.len() > 1) {
        (false, _) => format!("{stem}{ext}"),
        (true, true) => format!("file{ext}"),
        (true, false) => "file".to_string(),
    };
    name.chars().take(MAX_NAME_LEN).collect()
}

pub fn guess_content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "dwg" => "image/vnd.dwg",
        "dxf" => "image/vnd.dxf",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xls" => "application/vnd.ms-excel",
        "csv" => "text/csv",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

pub struct UploadFile {
    blobs: Arc<dyn BlobStore>,
}

impl UploadFile {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }
}

#[async_trait::async_trait]
impl JobHandler for UploadFile {
    async fn handle(&self, job: &Job, _ctx: &JobContext) -> Result<JsonValue, JobError> {
        let payload: Payload = decode_payload(job)?;
        if payload.file_name.trim().is_empty() {
            return Err(JobError::invalid_payload("fileName must not be blank"));
        }
        let bytes = decode_base64("fileBase64", &payload.file_base64)?;

        let name = sanitize_file_name(&payload.file_name);
        let project = payload
            .project_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(sanitize_file_name)
            .unwrap_or_else(|| UNASSIGNED_PROJECT.to_string());
        let content_type = payload
            .content_type
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| guess_content_type(&name).to_string());

        let sha256 = hex::encode(Sha256::digest(&bytes));
        let size = bytes.len();
        let key = format!("uploads/{project}/{}-{name}", Uuid::now_v7());

        self.blobs.put(&key, bytes).await.map_err(blob_error)?;
        info!(job_id = %job.id, key = %key, size, "upload stored");

        Ok(json!({
            "key": key,
            "size": size,
            "sha256": sha256,
            "contentType": content_type,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docket_core::{JobId, NewJob};
    use docket_infra::blob::InMemoryBlobStore;
    use docket_infra::jobs::InMemoryJobStore;

    #[test]
    fn sanitises_names() {
        assert_eq!(sanitize_file_name("C:\\temp\\Plan A (rev 2).pdf"), "Plan_A_rev_2_.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("..."), "file");
        assert_eq!(sanitize_file_name("日本.pdf"), "file.pdf");
        assert_eq!(sanitize_file_name(".env"), "env");
        assert_eq!(sanitize_file_name("__init__.py"), "init__.py");
    }

    #[tokio::test]
    async fn stores_upload_with_digest() {
        let blobs = InMemoryBlobStore::arc();
        let handler = UploadFile::new(blobs.clone());
        let job = NewJob::new(
            "upload-file",
            json!({"fileBase64": "aGVsbG8=", "fileName": "notes.txt", "projectId": "p-7"}),
        )
        .unwrap()
        .into_job(JobId::new(1), Utc::now());
        let ctx = JobContext::new(job.id, 1, InMemoryJobStore::arc());

        let out = handler.handle(&job, &ctx).await.unwrap();
        let key = out["key"].as_str().unwrap();

        assert!(key.starts_with("uploads/p-7/"));
        assert!(key.ends_with("-notes.txt"));
        assert_eq!(out["size"], 5);
        assert_eq!(
            out["sha256"],
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(out["contentType"], "text/plain");
        assert_eq!(blobs.get(key).await.unwrap(), b"hello");
    }
}
