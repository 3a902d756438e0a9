use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tasksvc_core::Document;
use tasksvc_infra::jobs::SubmitJob;
use tasksvc_jobs::{Job, JobStatus};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(rename = "type", default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub payload: Option<Document>,
    #[serde(rename = "idempotencyKey", default)]
    pub idempotency_key: Option<String>,
}

impl SubmitJobRequest {
    /// A missing type becomes an empty tag, which the registry rejects.
    pub fn into_submission(self) -> SubmitJob {
        SubmitJob {
            job_type: self.job_type.unwrap_or_default(),
            payload: self.payload.unwrap_or_default(),
            idempotency_key: self.idempotency_key,
        }
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compensation_error: Option<String>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            job_type: job.job_type.clone(),
            status: job.status,
            attempts: job.attempts,
            last_error: job.last_error.clone(),
            started_at: job.started_at,
            completed_at: job.completed_at,
            created_at: job.created_at,
            result: job.result.clone(),
            compensation_error: job.compensation_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_accepts_wire_names_and_defaults() {
        let req: SubmitJobRequest =
            serde_json::from_value(json!({"type": "hash", "idempotencyKey": "k1"})).unwrap();
        let submission = req.into_submission();
        assert_eq!(submission.job_type, "hash");
        assert!(submission.payload.is_empty());
        assert_eq!(submission.idempotency_key.as_deref(), Some("k1"));

        let req: SubmitJobRequest = serde_json::from_value(json!({"payload": null})).unwrap();
        assert_eq!(req.into_submission().job_type, "");
    }

    #[test]
    fn view_uses_camel_case_and_omits_absent_result() {
        let job = Job::new("hash", Document::new(), None);
        let value = serde_json::to_value(JobView::from(&job)).unwrap();

        assert_eq!(value["id"], job.id.to_string());
        assert_eq!(value["type"], "hash");
        assert_eq!(value["status"], "QUEUED");
        assert_eq!(value["attempts"], 0);
        assert!(value["lastError"].is_null());
        assert!(value["startedAt"].is_null());
        assert!(value.get("createdAt").is_some());
        assert!(value.get("result").is_none());
        assert!(value.get("compensationError").is_none());
    }
}
