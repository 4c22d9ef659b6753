//! Job handlers for the document-management workflows.
//!
//! Each handler decodes its own payload, talks to collaborators through the
//! traits in `docket-infra` (blob storage, notifications) and `sheet`, and
//! returns a JSON result. None of them touch job status.

pub mod archive;
pub mod conflicts;
pub mod publish;
pub mod sheet;
pub mod spreadsheet;
pub mod upload;

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use docket_core::JobError;
use docket_infra::blob::{BlobError, BlobStore};
use docket_infra::jobs::HandlerRegistry;
use docket_infra::notify::Notifier;

pub use archive::GenerateArchive;
pub use conflicts::{compare_revisions, normalize_drawing_key, ValidateConflicts};
pub use publish::Publish;
pub use sheet::{DefaultSheetReader, SheetError, SheetReader};
pub use spreadsheet::ParseSpreadsheet;
pub use upload::UploadFile;

pub const PARSE_SPREADSHEET: &str = "parse-spreadsheet";
pub const VALIDATE_CONFLICTS: &str = "validate-conflicts";
pub const GENERATE_ARCHIVE: &str = "generate-archive";
pub const PUBLISH: &str = "publish";
pub const UPLOAD_FILE: &str = "upload-file";

/// Collaborators shared by the built-in handlers.
#[derive(Clone)]
pub struct HandlerDeps {
    pub blobs: Arc<dyn BlobStore>,
    pub notifier: Arc<dyn Notifier>,
    pub sheets: Arc<dyn SheetReader>,
}

impl HandlerDeps {
    pub fn new(blobs: Arc<dyn BlobStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            blobs,
            notifier,
            sheets: Arc::new(DefaultSheetReader),
        }
    }

    pub fn with_sheet_reader(mut self, sheets: Arc<dyn SheetReader>) -> Self {
        self.sheets = sheets;
        self
    }
}

/// Registry with every built-in job type.
pub fn default_registry(deps: HandlerDeps) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register(PARSE_SPREADSHEET, ParseSpreadsheet::new(deps.sheets.clone()))
        .register(VALIDATE_CONFLICTS, ValidateConflicts)
        .register(GENERATE_ARCHIVE, GenerateArchive::new(deps.blobs.clone()))
        .register(PUBLISH, Publish::new(deps.blobs.clone(), deps.notifier.clone()))
        .register(UPLOAD_FILE, UploadFile::new(deps.blobs));
    registry
}

pub(crate) fn blob_error(err: BlobError) -> JobError {
    match err {
        BlobError::InvalidKey(key) => JobError::invalid_payload(format!("invalid blob key: {key}")),
        other => JobError::collaborator(other.to_string()),
    }
}

pub(crate) fn decode_base64(field: &str, encoded: &str) -> Result<Vec<u8>, JobError> {
    // Tolerate data URLs ("data:...;base64,") and line-wrapped input.
    let body = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| JobError::invalid_payload(format!("{field} is not valid base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_infra::blob::InMemoryBlobStore;
    use docket_infra::notify::RecordingNotifier;

    #[test]
    fn registers_every_builtin_type() {
        let deps = HandlerDeps::new(InMemoryBlobStore::arc(), Arc::new(RecordingNotifier::new()));
        let registry = default_registry(deps);
        assert_eq!(
            registry.job_types(),
            vec![
                GENERATE_ARCHIVE,
                PARSE_SPREADSHEET,
                PUBLISH,
                UPLOAD_FILE,
                VALIDATE_CONFLICTS
            ]
        );
    }

    #[test]
    fn base64_accepts_data_urls_and_wrapping() {
        assert_eq!(decode_base64("f", "aGVs\nbG8=").unwrap(), b"hello");
        assert_eq!(
            decode_base64("f", "data:text/csv;base64,aGVsbG8=").unwrap(),
            b"hello"
        );
        assert!(matches!(
            decode_base64("fileBase64", "%%%"),
            Err(JobError::InvalidPayload(msg)) if msg.starts_with("fileBase64")
        ));
    }
}
