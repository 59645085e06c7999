//! Lock Service: single-flight guard per job posting, plus the cooperative
//! cancellation flag polled by the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::analysis::lease::{LeaseError, LeaseStore};

pub(crate) fn lock_key(job_id: Uuid) -> String {
    format!("analysis:lock:{job_id}")
}

pub(crate) fn cancel_key(job_id: Uuid) -> String {
    format!("analysis:cancel:{job_id}")
}

/// Proof of ownership of a job's analysis lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub job_id: Uuid,
    pub token: String,
}

/// Per-job mutual exclusion with TTL-bounded leases.
#[derive(Clone)]
pub struct LockService {
    store: Arc<dyn LeaseStore>,
}

impl LockService {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self { store }
    }

    /// Atomically takes the lease for `job_id` if nobody holds it.
    ///
    /// Fails closed: if the store cannot be reached the lease is reported as
    /// not acquired.
    pub async fn try_acquire(&self, job_id: Uuid, ttl: Duration) -> Option<Lease> {
        let token = Uuid::new_v4().to_string();
        match self
            .store
            .set_if_absent(&lock_key(job_id), &token, ttl)
            .await
        {
            Ok(true) => {
                debug!("Acquired analysis lease for job {job_id}");
                Some(Lease { job_id, token })
            }
            Ok(false) => None,
            Err(e) => {
                error!("Lease store unreachable while locking job {job_id}: {e}");
                None
            }
        }
    }

    /// Extends the lease. Returns false if the lease is no longer ours or
    /// the store is unreachable.
    pub async fn renew(&self, lease: &Lease, ttl: Duration) -> bool {
        match self
            .store
            .compare_and_expire(&lock_key(lease.job_id), &lease.token, ttl)
            .await
        {
            Ok(renewed) => renewed,
            Err(e) => {
                error!("Failed to renew analysis lease for job {}: {e}", lease.job_id);
                false
            }
        }
    }

    /// Releases the lease if we still own it. A lease that already expired is
    /// not an error.
    pub async fn release(&self, lease: Lease) {
        match self
            .store
            .compare_and_delete(&lock_key(lease.job_id), &lease.token)
            .await
        {
            Ok(true) => debug!("Released analysis lease for job {}", lease.job_id),
            Ok(false) => warn!(
                "Analysis lease for job {} had already expired or changed owner",
                lease.job_id
            ),
            Err(e) => error!(
                "Failed to release analysis lease for job {}; it will expire on its own: {e}",
                lease.job_id
            ),
        }
    }
}

/// Short-lived cancel signal, written by the controller and read by the
/// orchestrator.
#[derive(Clone)]
pub struct CancellationFlags {
    store: Arc<dyn LeaseStore>,
    ttl: Duration,
}

impl CancellationFlags {
    pub fn new(store: Arc<dyn LeaseStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Sets (or refreshes) the flag.
    pub async fn request(&self, job_id: Uuid) -> Result<(), LeaseError> {
        self.store.set(&cancel_key(job_id), "1", self.ttl).await
    }

    /// An unreachable store reads as "not cancelled"; the next poll retries.
    pub async fn is_requested(&self, job_id: Uuid) -> bool {
        match self.store.exists(&cancel_key(job_id)).await {
            Ok(set) => set,
            Err(e) => {
                warn!("Could not read cancellation flag for job {job_id}: {e}");
                false
            }
        }
    }

    pub async fn clear(&self, job_id: Uuid) -> Result<(), LeaseError> {
        self.store.delete(&cancel_key(job_id)).await
    }
}
