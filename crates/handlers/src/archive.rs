//! `generate-archive`: bundle stored files into one zip.

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::info;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use docket_core::{Job, JobError};
use docket_infra::blob::{basename, BlobStore};
use docket_infra::jobs::{decode_payload, JobContext, JobHandler, Recorded};

use crate::blob_error;
use crate::upload::sanitize_file_name;

pub const DEFAULT_ARCHIVE_NAME: &str = "archive.zip";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    keys: Vec<String>,
    #[serde(default)]
    archive_name: Option<String>,
}

/// Entry names for `keys`: the basename, with `-1`, `-2`, ... before the
/// extension on repeats.
pub fn entry_names(keys: &[String]) -> Vec<String> {
    let mut used = HashSet::new();
    keys.iter()
        .map(|key| {
            let name = basename(key);
            let (stem, ext) = match name.rfind('.') {
                Some(dot) if dot > 0 => name.split_at(dot),
                _ => (name, ""),
            };
            let mut candidate = name.to_string();
            let mut n = 1;
            while !used.insert(candidate.clone()) {
                candidate = format!("{stem}-{n}{ext}");
                n += 1;
            }
            candidate
        })
        .collect()
}

fn archive_file_name(requested: Option<&str>) -> String {
    let name = match requested.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => sanitize_file_name(n),
        None => return DEFAULT_ARCHIVE_NAME.to_string(),
    };
    if name.to_ascii_lowercase().ends_with(".zip") {
        name
    } else {
        format!("{name}.zip")
    }
}

fn build_zip(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>, JobError> {
    let zip_error = |e: zip::result::ZipError| JobError::failed(format!("zip: {e}"));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        writer.start_file(name.as_str(), options).map_err(zip_error)?;
        writer
            .write_all(bytes)
            .map_err(|e| JobError::failed(format!("zip: {e}")))?;
    }
    Ok(writer.finish().map_err(zip_error)?.into_inner())
}

pub struct GenerateArchive {
    blobs: Arc<dyn BlobStore>,
}

impl GenerateArchive {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }
}

#[async_trait::async_trait]
impl JobHandler for GenerateArchive {
    async fn handle(&self, job: &Job, ctx: &JobContext) -> Result<JsonValue, JobError> {
        let payload: Payload = decode_payload(job)?;
        if payload.keys.is_empty() {
            return Err(JobError::invalid_payload("keys must not be empty"));
        }

        let names = entry_names(&payload.keys);
        let total = payload.keys.len();
        let mut entries = Vec::with_capacity(total);

        for (i, (key, name)) in payload.keys.iter().zip(names).enumerate() {
            let bytes = self.blobs.get(key).await.map_err(blob_error)?;
            entries.push((name, bytes));

            // Leave the last few percent for writing the archive itself.
            let pct = ((i + 1) * 90 / total) as u8;
            if let Ok(Recorded::Superseded) = ctx.report_progress(pct).await {
                return Err(JobError::failed("archive abandoned: job no longer owned"));
            }
        }

        let archive = build_zip(&entries)?;
        let size = archive.len();
        let archive_key = format!(
            "archives/{}/{}",
            Uuid::now_v7(),
            archive_file_name(payload.archive_name.as_deref())
        );
        self.blobs
            .put(&archive_key, archive)
            .await
            .map_err(blob_error)?;

        info!(
            job_id = %ctx.job_id(),
            attempt = ctx.attempt(),
            archive_key = %archive_key,
            files = total,
            bytes = size,
            "archive stored"
        );

        Ok(json!({
            "archiveKey": archive_key,
            "fileCount": total,
            "bytes": size,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_basenames_get_suffixes() {
        let keys: Vec<String> = ["a/plan.pdf", "b/plan.pdf", "c/plan.pdf", "d/README", "e/README"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            entry_names(&keys),
            vec!["plan.pdf", "plan-1.pdf", "plan-2.pdf", "README", "README-1"]
        );
    }

    #[test]
    fn archive_names() {
        assert_eq!(archive_file_name(None), "archive.zip");
        assert_eq!(archive_file_name(Some("  ")), "archive.zip");
        assert_eq!(archive_file_name(Some("Issue 4")), "Issue_4.zip");
        assert_eq!(archive_file_name(Some("set.ZIP")), "set.ZIP");
    }

    #[test]
    fn zip_contains_every_entry() {
        let bytes = build_zip(&[
            ("a.txt".to_string(), b"alpha".to_vec()),
            ("b.txt".to_string(), b"bravo".to_vec()),
        ])
        .unwrap();

        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<_> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }
}
