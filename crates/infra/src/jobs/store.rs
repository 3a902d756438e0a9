//! Job record storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use tasksvc_core::JobId;
use tasksvc_jobs::Job;

/// Persistence for job records.
///
/// Implementations must enforce idempotency-key uniqueness atomically in
/// `create`: two concurrent creates with the same key must not both succeed.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new record.
    async fn create(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Get a record by ID.
    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Get the record that was created with `key`, if any.
    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Job>, JobStoreError>;

    /// Overwrite an existing record.
    async fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Records ordered by creation time, most recent first.
    async fn list_recent(&self, limit: Option<usize>) -> Result<Vec<Job>, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("idempotency key already used: {0}")]
    DuplicateIdempotencyKey(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
impl<T> JobStore for Arc<T>
where
    T: JobStore + ?Sized,
{
    async fn create(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).create(job).await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(id).await
    }

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Job>, JobStoreError> {
        (**self).get_by_idempotency_key(key).await
    }

    async fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).update(job).await
    }

    async fn list_recent(&self, limit: Option<usize>) -> Result<Vec<Job>, JobStoreError> {
        (**self).list_recent(limit).await
    }
}

#[derive(Debug, Default)]
struct Records {
    jobs: HashMap<JobId, Job>,
    by_key: HashMap<String, JobId>,
    /// Insertion order, used to break `created_at` ties.
    order: Vec<JobId>,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    records: RwLock<Records>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> JobStoreError {
    JobStoreError::Storage("job store lock poisoned".into())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        if records.jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        if let Some(key) = &job.idempotency_key {
            if records.by_key.contains_key(key) {
                return Err(JobStoreError::DuplicateIdempotencyKey(key.clone()));
            }
            records.by_key.insert(key.clone(), job.id);
        }
        records.order.push(job.id);
        records.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.jobs.get(&id).cloned())
    }

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Job>, JobStoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .by_key
            .get(key)
            .and_then(|id| records.jobs.get(id))
            .cloned())
    }

    async fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        match records.jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(JobStoreError::NotFound(job.id)),
        }
    }

    async fn list_recent(&self, limit: Option<usize>) -> Result<Vec<Job>, JobStoreError> {
        let records = self.records.read().map_err(poisoned)?;
        let mut ordered: Vec<(usize, &Job)> = records
            .order
            .iter()
            .enumerate()
            .filter_map(|(seq, id)| records.jobs.get(id).map(|job| (seq, job)))
            .collect();
        ordered.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| seq_b.cmp(seq_a))
        });
        let limit = limit.unwrap_or(usize::MAX);
        Ok(ordered
            .into_iter()
            .take(limit)
            .map(|(_, job)| job.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tasksvc_core::Document;

    fn job(key: Option<&str>) -> Job {
        Job::new("hash", Document::new(), key.map(str::to_string))
    }

    #[tokio::test]
    async fn create_get_update() {
        let store = InMemoryJobStore::new();
        let mut j = job(None);
        store.create(&j).await.unwrap();

        let loaded = store.get(j.id).await.unwrap().unwrap();
        assert_eq!(loaded, j);

        j.mark_running(Utc::now()).unwrap();
        store.update(&j).await.unwrap();
        let loaded = store.get(j.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, tasksvc_jobs::JobStatus::Running);

        assert!(store.get(JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_of_unknown_record_is_not_found() {
        let store = InMemoryJobStore::new();
        let j = job(None);
        assert_eq!(store.update(&j).await, Err(JobStoreError::NotFound(j.id)));
    }

    #[tokio::test]
    async fn idempotency_key_is_unique() {
        let store = InMemoryJobStore::new();
        let first = job(Some("k1"));
        store.create(&first).await.unwrap();

        let err = store.create(&job(Some("k1"))).await.unwrap_err();
        assert_eq!(err, JobStoreError::DuplicateIdempotencyKey("k1".into()));
        assert_eq!(store.len(), 1);

        let found = store.get_by_idempotency_key("k1").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert!(store.get_by_idempotency_key("k2").await.unwrap().is_none());

        // Records without a key never collide.
        store.create(&job(None)).await.unwrap();
        store.create(&job(None)).await.unwrap();
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let store = InMemoryJobStore::new();
        let j = job(None);
        store.create(&j).await.unwrap();
        assert_eq!(store.create(&j).await, Err(JobStoreError::AlreadyExists(j.id)));
    }

    #[tokio::test]
    async fn list_recent_is_newest_first() {
        let store = InMemoryJobStore::new();
        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..3 {
            let j = Job::new_at(JobId::new(), "hash", Document::new(), None, base + Duration::seconds(i));
            ids.push(j.id);
            store.create(&j).await.unwrap();
        }

        let listed: Vec<JobId> = store.list_recent(None).await.unwrap().iter().map(|j| j.id).collect();
        assert_eq!(listed, vec![ids[2], ids[1], ids[0]]);

        let limited = store.list_recent(Some(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, ids[2]);
    }

    #[tokio::test]
    async fn list_recent_breaks_timestamp_ties_by_insertion() {
        let store = InMemoryJobStore::new();
        let at = Utc::now();
        let a = Job::new_at(JobId::new(), "hash", Document::new(), None, at);
        let b = Job::new_at(JobId::new(), "hash", Document::new(), None, at);
        store.create(&a).await.unwrap();
        store.create(&b).await.unwrap();

        let listed: Vec<JobId> = store.list_recent(None).await.unwrap().iter().map(|j| j.id).collect();
        assert_eq!(listed, vec![b.id, a.id]);
    }

    #[tokio::test]
    async fn arc_store_delegates() {
        let store: Arc<dyn JobStore> = InMemoryJobStore::arc();
        let j = job(Some("shared"));
        store.create(&j).await.unwrap();
        assert!(store.get_by_idempotency_key("shared").await.unwrap().is_some());
    }
}
