//! Enqueue, inspect, retry and cancel jobs.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::info;

use docket_core::JobId;
use docket_infra::jobs::JobStore;

use crate::app::dto::{self, CreateJobRequest, CreatedJob, JobPage, ListJobsQuery};
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_job).get(list_jobs))
        .route("/stats", get(job_stats))
        .route("/:id", get(get_job))
        .route("/:id/retry", post(retry_job))
        .route("/:id/cancel", post(cancel_job))
}

fn parse_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse::<JobId>()
        .map_err(errors::domain_error_to_response)
}

/// POST /jobs `{type, payload?, maxAttempts?}`
pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<CreateJobRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                rejection.body_text(),
            );
        }
    };

    let new_job = match body.into_new_job() {
        Ok(job) => job,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.store().create(new_job).await {
        Ok(job) => {
            info!(job_id = %job.id, job_type = %job.job_type, "job enqueued");
            (
                StatusCode::CREATED,
                Json(CreatedJob {
                    id: job.id,
                    status: job.status,
                }),
            )
                .into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /jobs?status=&type=&limit=&offset=
///
/// Newest first. Large payload/result documents are summarised.
pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                rejection.body_text(),
            );
        }
    };

    let filter = match query.filter() {
        Ok(f) => f,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let (limit, offset) = (query.limit(), query.offset());

    let store = services.store();
    let jobs = match store.list(&filter, limit, offset).await {
        Ok(jobs) => jobs,
        Err(e) => return errors::store_error_to_response(e),
    };
    let total = match store.count(&filter).await {
        Ok(n) => n,
        Err(e) => return errors::store_error_to_response(e),
    };

    Json(JobPage {
        jobs: jobs.into_iter().map(dto::job_summary).collect(),
        total,
        limit,
        offset,
    })
    .into_response()
}

/// GET /jobs/stats
pub async fn job_stats(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.store().stats().await {
        Ok(stats) => Json(serde_json::json!({
            "queued": stats.queued,
            "running": stats.running,
            "succeeded": stats.succeeded,
            "failed": stats.failed,
            "total": stats.total(),
        }))
        .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /jobs/:id
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.store().find_by_id(id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found")),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// POST /jobs/:id/retry
pub async fn retry_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.store().retry(id).await {
        Ok(job) => {
            info!(job_id = %job.id, attempts = job.attempts, "job retried");
            Json(job).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

/// POST /jobs/:id/cancel
pub async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.store().cancel(id).await {
        Ok(job) => {
            info!(job_id = %job.id, "job cancelled");
            Json(job).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}
