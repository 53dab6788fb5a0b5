use std::collections::{HashMap, VecDeque};

use actix_web::{get, post, web, HttpResponse};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::configuration::Settings;
use crate::domain::startup_profile::StartupProfile;
use crate::services::AnalysisPipeline;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Complete,
    Error,
}

#[derive(Debug, Clone)]
pub struct JobStatus {
    pub state: JobState,
    pub competitor_count: Option<usize>,
    pub error: Option<String>,
}

impl JobStatus {
    fn pending() -> Self {
        JobStatus {
            state: JobState::Pending,
            competitor_count: None,
            error: None,
        }
    }
}

const MAX_TRACKED_JOBS: usize = 256;

/// In-memory job bookkeeping for background analysis runs. Bounded: once
/// the cap is reached, the oldest tracked job is evicted on each new
/// submission.
pub struct JobStore {
    jobs: RwLock<TrackedJobs>,
}

struct TrackedJobs {
    by_id: HashMap<Uuid, JobStatus>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl Default for JobStore {
    fn default() -> Self {
        JobStore::with_capacity(MAX_TRACKED_JOBS)
    }
}

impl JobStore {
    pub fn with_capacity(capacity: usize) -> Self {
        JobStore {
            jobs: RwLock::new(TrackedJobs {
                by_id: HashMap::new(),
                order: VecDeque::new(),
                capacity,
            }),
        }
    }

    pub async fn set(&self, id: Uuid, status: JobStatus) {
        let mut jobs = self.jobs.write().await;
        if jobs.by_id.insert(id, status).is_some() {
            return;
        }
        jobs.order.push_back(id);
        if jobs.order.len() > jobs.capacity {
            if let Some(evicted) = jobs.order.pop_front() {
                jobs.by_id.remove(&evicted);
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<JobStatus> {
        self.jobs.read().await.by_id.get(&id).cloned()
    }
}

#[post("")]
async fn submit_analysis(
    profile: web::Json<StartupProfile>,
    pipeline: web::Data<AnalysisPipeline>,
    jobs: web::Data<JobStore>,
) -> HttpResponse {
    let job_id = Uuid::new_v4();
    jobs.set(job_id, JobStatus::pending()).await;

    let profile = profile.into_inner();
    let jobs = jobs.clone();
    tokio::spawn(async move {
        let status = match pipeline.run(profile).await {
            Ok(summary) => {
                log::info!(
                    "Analysis job {} complete with {} competitors",
                    job_id,
                    summary.competitor_count
                );
                JobStatus {
                    state: JobState::Complete,
                    competitor_count: Some(summary.competitor_count),
                    error: None,
                }
            }
            Err(e) => {
                log::error!("Analysis job {} failed: {:?}", job_id, e);
                JobStatus {
                    state: JobState::Error,
                    competitor_count: None,
                    error: Some(format!("{:#}", e)),
                }
            }
        };
        jobs.set(job_id, status).await;
    });

    HttpResponse::Accepted().json(json!({ "job_id": job_id }))
}

#[get("/{job_id}")]
async fn analysis_status(
    job_id: web::Path<Uuid>,
    jobs: web::Data<JobStore>,
    configuration: web::Data<Settings>,
) -> HttpResponse {
    let Some(status) = jobs.get(*job_id).await else {
        return HttpResponse::NotFound().json(json!({ "error": "unknown job id" }));
    };

    match status.state {
        JobState::Pending => HttpResponse::Ok().json(json!({ "status": JobState::Pending })),
        JobState::Error => HttpResponse::Ok().json(json!({
            "status": JobState::Error,
            "error": status.error,
        })),
        JobState::Complete => {
            // The final artifact is always well-formed on completion: either
            // a ranked array or the explicit no-competitors object.
            let result =
                read_final_artifact(&configuration.artifacts.final_output_path).await;
            HttpResponse::Ok().json(json!({
                "status": JobState::Complete,
                "competitor_count": status.competitor_count,
                "result": result,
            }))
        }
    }
}

async fn read_final_artifact(path: &str) -> Value {
    match tokio::fs::read_to_string(path).await {
        Ok(body) => match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(e) => {
                log::error!("Final artifact is not valid JSON: {:?}", e);
                json!({ "message": "Result artifact could not be read" })
            }
        },
        Err(e) => {
            log::error!("Failed to read final artifact: {:?}", e);
            json!({ "message": "Result artifact could not be read" })
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{JobState, JobStatus, JobStore};

    #[tokio::test]
    async fn oldest_job_is_evicted_beyond_capacity() {
        let store = JobStore::with_capacity(2);
        let (first, second, third) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        store.set(first, JobStatus::pending()).await;
        store.set(second, JobStatus::pending()).await;
        store.set(third, JobStatus::pending()).await;

        assert!(store.get(first).await.is_none());
        assert!(store.get(second).await.is_some());
        assert!(store.get(third).await.is_some());
    }

    #[tokio::test]
    async fn status_update_does_not_count_as_a_new_job() {
        let store = JobStore::with_capacity(2);
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

        store.set(first, JobStatus::pending()).await;
        store.set(second, JobStatus::pending()).await;
        store
            .set(
                first,
                JobStatus {
                    state: JobState::Complete,
                    competitor_count: Some(3),
                    error: None,
                },
            )
            .await;

        assert_eq!(store.get(first).await.unwrap().state, JobState::Complete);
        assert!(store.get(second).await.is_some());
    }
}
