use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::queue::{Delivery, Parked, Receipt, WorkQueue, WorkUnit};

#[derive(Debug)]
struct Stored {
    id: Uuid,
    unit: WorkUnit,
    visible_at: Instant,
    receive_count: i32,
    lease_token: Option<Uuid>,
    deleted_at: Option<Instant>,
    dead_lettered: bool,
}

impl Stored {
    fn is_live(&self) -> bool {
        self.deleted_at.is_none() && !self.dead_lettered
    }
}

#[derive(Default)]
struct Inner {
    messages: Vec<Stored>,
    dedup: HashMap<String, Uuid>,
    accepted: Vec<WorkUnit>,
}

/// In-process queue with the same lease, dedup and dead-letter rules as
/// [`super::PgWorkQueue`].
pub struct MemoryWorkQueue {
    inner: Mutex<Inner>,
    max_receives: i32,
}

impl MemoryWorkQueue {
    pub fn new(max_receives: i32) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_receives: max_receives.max(1),
        }
    }

    /// Every unit ever accepted by `enqueue`, in order.
    pub async fn accepted(&self) -> Vec<WorkUnit> {
        self.inner.lock().await.accepted.clone()
    }

    /// Messages not yet deleted or dead-lettered, leased or not.
    pub async fn live_len(&self) -> usize {
        self.inner
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| m.is_live())
            .count()
    }

    pub async fn dead_lettered(&self) -> Vec<WorkUnit> {
        self.inner
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| m.dead_lettered)
            .map(|m| m.unit.clone())
            .collect()
    }

    /// Ends every live lease now, as if the visibility timeout had passed.
    pub async fn expire_leases(&self) {
        let now = Instant::now();
        for m in self.inner.lock().await.messages.iter_mut() {
            if m.is_live() && m.visible_at > now {
                m.visible_at = now;
            }
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    fn max_receives(&self) -> i32 {
        self.max_receives
    }

    async fn enqueue(&self, unit: &WorkUnit) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let key = unit.dedup_key();
        if inner.dedup.contains_key(&key) {
            return Ok(false);
        }

        let id = Uuid::new_v4();
        inner.dedup.insert(key, id);
        inner.accepted.push(unit.clone());
        inner.messages.push(Stored {
            id,
            unit: unit.clone(),
            visible_at: Instant::now(),
            receive_count: 0,
            lease_token: None,
            deleted_at: None,
            dead_lettered: false,
        });
        Ok(true)
    }

    async fn receive(&self, visibility: Duration) -> Result<Option<Delivery>> {
        let now = Instant::now();
        let max_receives = self.max_receives;
        let mut inner = self.inner.lock().await;

        let candidate = inner
            .messages
            .iter_mut()
            .filter(|m| m.is_live() && m.visible_at <= now && m.receive_count < max_receives)
            .min_by_key(|m| m.visible_at);

        let Some(m) = candidate else {
            return Ok(None);
        };

        let lease_token = Uuid::new_v4();
        m.visible_at = now + visibility;
        m.receive_count += 1;
        m.lease_token = Some(lease_token);

        Ok(Some(Delivery {
            receipt: Receipt {
                message_id: m.id,
                lease_token,
            },
            unit: m.unit.clone(),
            receive_count: m.receive_count,
        }))
    }

    async fn delete(&self, receipt: &Receipt) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.messages.iter_mut().find(|m| {
            m.id == receipt.message_id
                && m.lease_token == Some(receipt.lease_token)
                && m.deleted_at.is_none()
        }) {
            Some(m) => {
                m.deleted_at = Some(Instant::now());
                m.lease_token = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn extend_lease(&self, receipt: &Receipt, delay: Duration) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.messages.iter_mut().find(|m| {
            m.id == receipt.message_id
                && m.lease_token == Some(receipt.lease_token)
                && m.deleted_at.is_none()
        }) {
            Some(m) => {
                m.visible_at = Instant::now() + delay;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn dead_letter_exhausted(&self) -> Result<Vec<Parked>> {
        let now = Instant::now();
        let max_receives = self.max_receives;
        let mut inner = self.inner.lock().await;
        let mut parked = Vec::new();
        for m in inner.messages.iter_mut() {
            if m.is_live() && m.receive_count >= max_receives && m.visible_at <= now {
                m.dead_lettered = true;
                m.lease_token = None;
                parked.push(Parked {
                    unit: m.unit.clone(),
                    receive_count: m.receive_count,
                });
            }
        }
        Ok(parked)
    }

    async fn purge_deleted(&self, older_than: Duration) -> Result<u64> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let Inner {
            messages, dedup, ..
        } = &mut *inner;

        let before = messages.len();
        messages.retain(|m| match m.deleted_at {
            Some(at) if now.duration_since(at) >= older_than => {
                dedup.remove(&m.unit.dedup_key());
                false
            }
            _ => true,
        });
        Ok((before - messages.len()) as u64)
    }
}
