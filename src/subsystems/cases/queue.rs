//! Review queue: escalated cases parked until a clinician decides.
//!
//! Holds finished-but-unaccepted contexts only. A running case is never in
//! here, so the lock is held just long enough to insert or take one entry.
//! The queue is bounded; parking into a full queue evicts the case that has
//! waited longest. Parked cases live in memory only.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::subsystems::workflow::CaseContext;

pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Parked {
    next_seq: u64,
    cases: HashMap<Uuid, (u64, CaseContext)>,
}

#[derive(Debug, Clone)]
pub struct ReviewQueue {
    inner: Arc<Mutex<Parked>>,
    capacity: usize,
}

impl Default for ReviewQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { inner: Arc::new(Mutex::new(Parked::default())), capacity: capacity.max(1) }
    }

    /// Park a case. Returns the id of the case evicted to make room, if any.
    pub async fn park(&self, ctx: CaseContext) -> Option<Uuid> {
        let mut parked = self.inner.lock().await;
        let case_id = ctx.case_id;

        let mut evicted = None;
        if !parked.cases.contains_key(&case_id) && parked.cases.len() >= self.capacity {
            let oldest = parked.cases.iter().min_by_key(|(_, (seq, _))| *seq).map(|(id, _)| *id);
            if let Some(id) = oldest {
                parked.cases.remove(&id);
                warn!(case_id = %id, capacity = self.capacity, "review queue full, oldest case evicted");
                evicted = Some(id);
            }
        }

        let seq = parked.next_seq;
        parked.next_seq += 1;
        parked.cases.insert(case_id, (seq, ctx));
        info!(%case_id, depth = parked.cases.len(), "case parked for review");
        evicted
    }

    /// Remove and return a pending case.
    pub async fn take(&self, case_id: &Uuid) -> Option<CaseContext> {
        self.inner.lock().await.cases.remove(case_id).map(|(_, ctx)| ctx)
    }

    pub async fn contains(&self, case_id: &Uuid) -> bool {
        self.inner.lock().await.cases.contains_key(case_id)
    }

    pub async fn pending(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.inner.lock().await.cases.keys().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IntakeSegment, Modality, SymptomReport, UserRole};

    fn ctx() -> CaseContext {
        let report = SymptomReport::new(vec![IntakeSegment {
            modality: Modality::Text,
            payload_ref: "text".into(),
            content: "headache".into(),
            confidence: 1.0,
        }]);
        CaseContext::new(report, UserRole::Patient)
    }

    #[tokio::test]
    async fn full_queue_evicts_longest_waiting() {
        let queue = ReviewQueue::with_capacity(2);
        let (a, b, c) = (ctx(), ctx(), ctx());
        let (a_id, b_id, c_id) = (a.case_id, b.case_id, c.case_id);

        assert_eq!(queue.park(a).await, None);
        assert_eq!(queue.park(b).await, None);
        assert_eq!(queue.park(c).await, Some(a_id));

        assert!(!queue.contains(&a_id).await);
        assert!(queue.contains(&b_id).await);
        assert!(queue.contains(&c_id).await);
        assert_eq!(queue.pending().await.len(), 2);
    }

    #[tokio::test]
    async fn reparking_same_case_does_not_evict() {
        let queue = ReviewQueue::with_capacity(1);
        let a = ctx();
        let a_id = a.case_id;
        queue.park(a.clone()).await;
        assert_eq!(queue.park(a).await, None);
        assert!(queue.take(&a_id).await.is_some());
        assert!(queue.take(&a_id).await.is_none());
    }
}
