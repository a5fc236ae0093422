//! In-memory implementations of [`JobStore`], [`Broker`] and [`ObjectStore`].
//!
//! These keep the same semantics as the Postgres, Redis and S3 backends
//! (atomic compare-and-set, visibility leases with receipts) and are meant for
//! tests and single-process local runs. Each can be switched into an
//! unavailable mode to exercise infrastructure failure paths.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::job::{Expected, Job, JobMessage, JobState, JobUpdate};
use crate::services::queue::{AckHandle, Broker, Delivery, QueueError};
use crate::services::storage::{ObjectStore, StorageError};
use crate::services::store::{JobStore, StoreError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding the lock leaves plain data behind; keep going.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<Mutex<HashMap<Uuid, Job>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryJobStore {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Pretend the job was last written `by` ago.
    pub fn backdate(&self, job_id: Uuid, by: chrono::TimeDelta) {
        if let Some(job) = lock(&self.jobs).get_mut(&job_id) {
            job.updated_at -= by;
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        self.check()?;
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn read(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        self.check()?;
        Ok(lock(&self.jobs).get(&job_id).cloned())
    }

    async fn compare_and_set(
        &self,
        job_id: Uuid,
        expected: Expected,
        update: JobUpdate,
    ) -> Result<Option<Job>, StoreError> {
        self.check()?;
        if !update.is_valid_after(expected) {
            return Err(StoreError::IllegalTransition {
                job_id,
                from: expected.state,
                to: update.state,
            });
        }

        let mut jobs = lock(&self.jobs);
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if job.expected() != expected {
            return Ok(None);
        }

        job.state = update.state;
        job.attempt_count = update.attempt_count;
        job.result = update.result;
        job.error = update.error;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn list_stale(
        &self,
        states: &[JobState],
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        self.check()?;
        let mut stale: Vec<Job> = lock(&self.jobs)
            .values()
            .filter(|job| states.contains(&job.state) && job.updated_at < updated_before)
            .cloned()
            .collect();
        stale.sort_by_key(|job| job.updated_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.check()
    }
}

struct Lease {
    receipt: String,
    visible_at: Instant,
}

#[derive(Default)]
struct BrokerState {
    ready: VecDeque<String>,
    inflight: HashMap<String, Lease>,
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryBroker {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every leased message visible again, as if all leases ran out.
    pub fn expire_leases(&self) {
        let now = Instant::now();
        for lease in lock(&self.state).inflight.values_mut() {
            lease.visible_at = now;
        }
    }

    pub fn ready_count(&self) -> usize {
        lock(&self.state).ready.len()
    }

    pub fn inflight_count(&self) -> usize {
        lock(&self.state).inflight.len()
    }

    fn check(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("in-memory broker switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, message: &JobMessage) -> Result<(), QueueError> {
        self.check()?;
        let payload = serde_json::to_string(message)?;
        lock(&self.state).ready.push_back(payload);
        Ok(())
    }

    async fn receive(&self, lease: Duration) -> Result<Option<Delivery>, QueueError> {
        self.check()?;
        let now = Instant::now();
        let mut state = lock(&self.state);

        let expired = state
            .inflight
            .iter()
            .filter(|(_, l)| l.visible_at <= now)
            .min_by_key(|(_, l)| l.visible_at)
            .map(|(payload, _)| payload.clone());
        let payload = match expired.or_else(|| state.ready.pop_front()) {
            Some(payload) => payload,
            None => return Ok(None),
        };

        let receipt = Uuid::new_v4().to_string();
        state.inflight.insert(
            payload.clone(),
            Lease {
                receipt: receipt.clone(),
                visible_at: now + lease,
            },
        );
        drop(state);

        let message = serde_json::from_str(&payload)?;
        Ok(Some(Delivery {
            message,
            handle: AckHandle::new(payload, receipt),
        }))
    }

    async fn ack(&self, handle: &AckHandle) -> Result<bool, QueueError> {
        self.check()?;
        let mut state = lock(&self.state);
        match state.inflight.get(handle.payload()) {
            Some(lease) if lease.receipt == handle.receipt() => {
                state.inflight.remove(handle.payload());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn defer(&self, handle: &AckHandle, delay: Duration) -> Result<bool, QueueError> {
        self.check()?;
        let mut state = lock(&self.state);
        match state.inflight.get_mut(handle.payload()) {
            Some(lease) if lease.receipt == handle.receipt() => {
                lease.visible_at = Instant::now() + delay;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        self.check()?;
        Ok(lock(&self.state).ready.len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        self.check()
    }
}

#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryObjectStore {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("in-memory object store switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, data: &[u8]) -> Result<String, StorageError> {
        self.check()?;
        let key = format!("documents/{}", Uuid::new_v4());
        lock(&self.objects).insert(key.clone(), data.to_vec());
        Ok(key)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.check()?;
        lock(&self.objects)
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        lock(&self.objects).remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        self.check()
    }
}
