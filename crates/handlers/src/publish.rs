//! `publish`: copy files into a project's published area and tell people.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info};

use docket_core::{Job, JobError};
use docket_infra::blob::{basename, BlobStore};
use docket_infra::jobs::{decode_payload, JobContext, JobHandler};
use docket_infra::notify::{Notification, Notifier};

use crate::archive::entry_names;
use crate::blob_error;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    project_id: String,
    keys: Vec<String>,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    notify: Vec<String>,
}

pub struct Publish {
    blobs: Arc<dyn BlobStore>,
    notifier: Arc<dyn Notifier>,
}

impl Publish {
    pub fn new(blobs: Arc<dyn BlobStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { blobs, notifier }
    }
}

fn notification(recipient: &str, project_id: &str, published: &[String], note: Option<&str>) -> Notification {
    let mut body = format!("{} file(s) published to project {project_id}:\n", published.len());
    for key in published {
        body.push_str("  ");
        body.push_str(basename(key));
        body.push('\n');
    }
    if let Some(note) = note {
        body.push('\n');
        body.push_str(note);
    }
    Notification {
        recipient: recipient.trim().to_string(),
        subject: format!("Drawings published: {project_id}"),
        body,
    }
}

#[async_trait::async_trait]
impl JobHandler for Publish {
    async fn handle(&self, job: &Job, ctx: &JobContext) -> Result<JsonValue, JobError> {
        let payload: Payload = decode_payload(job)?;
        let project_id = payload.project_id.trim();
        if project_id.is_empty() || project_id.contains(['/', '\\']) || project_id == ".." {
            return Err(JobError::invalid_payload(format!(
                "invalid projectId: {:?}",
                payload.project_id
            )));
        }
        if payload.keys.is_empty() {
            return Err(JobError::invalid_payload("keys must not be empty"));
        }

        // Copies are idempotent, so a retried publish simply overwrites.
        let names = entry_names(&payload.keys);
        let mut published = Vec::with_capacity(payload.keys.len());
        for (i, (key, name)) in payload.keys.iter().zip(names).enumerate() {
            if name != basename(key) {
                debug!(job_id = %ctx.job_id(), key = %key, name = %name, "renamed repeated basename");
            }
            let target = format!("published/{project_id}/{name}");
            self.blobs.copy(key, &target).await.map_err(blob_error)?;
            published.push(target);
            let pct = ((i + 1) * 90 / payload.keys.len()) as u8;
            ctx.report_progress_lossy(pct).await;
        }

        let mut notified = 0;
        for recipient in payload.notify.iter().filter(|r| !r.trim().is_empty()) {
            let note = notification(recipient, project_id, &published, payload.note.as_deref());
            self.notifier
                .send(note)
                .await
                .map_err(|e| JobError::collaborator(e.to_string()))?;
            notified += 1;
        }

        info!(
            job_id = %ctx.job_id(),
            attempt = ctx.attempt(),
            project_id = %project_id,
            files = published.len(),
            notified,
            "published"
        );

        Ok(json!({
            "projectId": project_id,
            "published": published,
            "notified": notified,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_lists_files_and_note() {
        let published = vec!["published/p-1/AR-101.pdf".to_string()];
        let n = notification(" pm@example.com ", "p-1", &published, Some("For tender"));
        assert_eq!(n.recipient, "pm@example.com");
        assert_eq!(n.subject, "Drawings published: p-1");
        assert!(n.body.contains("AR-101.pdf"));
        assert!(n.body.ends_with("For tender"));
    }
}
