use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use docket_core::{DomainError, Job, JobFilter, JobId, JobStatus, NewJob};

/// Payload/result documents larger than this are summarised in list views.
pub const MAX_INLINE_JSON_BYTES: usize = 2048;
pub const PREVIEW_CHARS: usize = 256;

pub const DEFAULT_LIST_LIMIT: u32 = 50;
pub const MAX_LIST_LIMIT: u32 = 200;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    #[serde(default)]
    pub payload: Option<JsonValue>,
    pub max_attempts: Option<i64>,
}

impl CreateJobRequest {
    pub fn into_new_job(self) -> Result<NewJob, DomainError> {
        let job_type = self
            .job_type
            .ok_or_else(|| DomainError::validation("type is required"))?;
        let new_job = NewJob::new(job_type, self.payload.unwrap_or_else(|| json!({})))?;

        match self.max_attempts {
            None => Ok(new_job),
            Some(n) if n < 1 => Err(DomainError::validation("maxAttempts must be at least 1")),
            Some(n) => {
                let n = u32::try_from(n)
                    .map_err(|_| DomainError::validation("maxAttempts is too large"))?;
                new_job.with_max_attempts(n)
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListJobsQuery {
    pub fn filter(&self) -> Result<JobFilter, DomainError> {
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => Some(s.parse::<JobStatus>()?),
        };
        let job_type = self
            .job_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        Ok(JobFilter { status, job_type })
    }

    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }

    pub fn offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct CreatedJob {
    pub id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct JobPage {
    pub jobs: Vec<JsonValue>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

/// Replace an oversized JSON document by a short summary.
pub fn truncate_large(value: JsonValue) -> JsonValue {
    let serialized = value.to_string();
    if serialized.len() <= MAX_INLINE_JSON_BYTES {
        return value;
    }
    let preview: String = serialized.chars().take(PREVIEW_CHARS).collect();
    json!({
        "truncated": true,
        "bytes": serialized.len(),
        "preview": preview,
    })
}

/// List-view representation of a job.
pub fn job_summary(job: Job) -> JsonValue {
    let payload = truncate_large(job.payload.clone());
    let result = job.result.clone().map(truncate_large);

    let mut value = serde_json::to_value(&job).unwrap_or_else(|_| json!({ "id": job.id }));
    if let Some(obj) = value.as_object_mut() {
        obj.insert("payload".to_string(), payload);
        obj.insert("result".to_string(), result.unwrap_or(JsonValue::Null));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn request(body: JsonValue) -> CreateJobRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn create_request_validation() {
        assert!(request(json!({})).into_new_job().is_err());
        assert!(request(json!({"type": "  "})).into_new_job().is_err());
        assert!(request(json!({"type": "publish", "maxAttempts": 0})).into_new_job().is_err());
        assert!(request(json!({"type": "publish", "maxAttempts": -3})).into_new_job().is_err());

        let job = request(json!({"type": "publish", "maxAttempts": 2}))
            .into_new_job()
            .unwrap();
        assert_eq!(job.max_attempts(), 2);
        assert_eq!(job.payload(), &json!({}));
    }

    #[test]
    fn list_query_limits() {
        let q = ListJobsQuery::default();
        assert_eq!((q.limit(), q.offset()), (50, 0));

        let q = ListJobsQuery {
            limit: Some(5_000),
            ..Default::default()
        };
        assert_eq!(q.limit(), 200);

        let q = ListJobsQuery {
            status: Some("paused".to_string()),
            ..Default::default()
        };
        assert!(q.filter().is_err());
    }

    #[test]
    fn large_documents_are_summarised() {
        let small = json!({"keys": ["a", "b"]});
        assert_eq!(truncate_large(small.clone()), small);

        let big = json!({"fileBase64": "A".repeat(5_000)});
        let out = truncate_large(big);
        assert_eq!(out["truncated"], true);
        assert!(out["bytes"].as_u64().unwrap() > 5_000);
        assert_eq!(out["preview"].as_str().unwrap().chars().count(), PREVIEW_CHARS);
    }

    #[test]
    fn summary_keeps_the_record_shape() {
        let job = NewJob::new("upload-file", json!({"fileBase64": "A".repeat(4_000)}))
            .unwrap()
            .into_job(JobId::new(9), Utc::now());
        let summary = job_summary(job);
        assert_eq!(summary["id"], 9);
        assert_eq!(summary["type"], "upload-file");
        assert_eq!(summary["payload"]["truncated"], true);
        assert_eq!(summary["result"], JsonValue::Null);
    }
}
