//! Delayed sends: one task per scheduled message, cancellable by id.

use super::outbound::OutboundGateway;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;
use wasla_core::{error::WaslaError, message::OutboundPayload};

/// A scheduled message as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledSend {
    pub id: String,
    pub chat_id: String,
    pub message: String,
    pub scheduled_time: DateTime<Utc>,
}

struct Entry {
    job: ScheduledSend,
    handle: JoinHandle<()>,
}

type Tasks = Arc<Mutex<HashMap<String, Entry>>>;

fn lock(tasks: &Tasks) -> MutexGuard<'_, HashMap<String, Entry>> {
    tasks.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Clone)]
pub struct Scheduler {
    outbound: OutboundGateway,
    tasks: Tasks,
}

impl Scheduler {
    pub fn new(outbound: OutboundGateway) -> Self {
        Self {
            outbound,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule `message` for `chat_id` at `at`. Returns the schedule id.
    ///
    /// The send bypasses the daily cap. A failure at fire time is logged and
    /// not retried.
    pub fn schedule(
        &self,
        chat_id: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<ScheduledSend, WaslaError> {
        let delay = (at - Utc::now())
            .to_std()
            .map_err(|_| WaslaError::InvalidInput("scheduled time must be in the future".into()))?;

        let job = ScheduledSend {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            message: message.to_string(),
            scheduled_time: at,
        };

        let mut tasks = lock(&self.tasks);
        let handle = tokio::spawn(fire(
            self.outbound.clone(),
            Arc::clone(&self.tasks),
            job.clone(),
            delay,
        ));
        tasks.insert(
            job.id.clone(),
            Entry {
                job: job.clone(),
                handle,
            },
        );
        info!("scheduled {} for {} at {at}", job.id, job.chat_id);
        Ok(job)
    }

    /// Cancel a pending send. Returns `false` for unknown or already-fired ids.
    pub fn cancel(&self, id: &str) -> bool {
        match lock(&self.tasks).remove(id) {
            Some(entry) => {
                entry.handle.abort();
                info!("cancelled scheduled send {id}");
                true
            }
            None => false,
        }
    }

    /// Pending sends, soonest first.
    pub fn pending(&self) -> Vec<ScheduledSend> {
        let mut out: Vec<ScheduledSend> = lock(&self.tasks)
            .values()
            .map(|e| e.job.clone())
            .collect();
        out.sort_by_key(|s| s.scheduled_time);
        out
    }

    /// Abort every pending send (shutdown).
    pub fn cancel_all(&self) {
        let drained: Vec<Entry> = lock(&self.tasks).drain().map(|(_, e)| e).collect();
        if !drained.is_empty() {
            info!("dropping {} pending scheduled sends", drained.len());
        }
        for entry in drained {
            entry.handle.abort();
        }
    }
}

async fn fire(outbound: OutboundGateway, tasks: Tasks, job: ScheduledSend, delay: std::time::Duration) {
    tokio::time::sleep(delay).await;
    lock(&tasks).remove(&job.id);
    match outbound
        .send(&job.chat_id, &OutboundPayload::text(job.message.as_str()))
        .await
    {
        Ok(_) => info!("scheduled send {} delivered to {}", job.id, job.chat_id),
        Err(e) => error!("scheduled send {} to {} failed: {e}", job.id, job.chat_id),
    }
}
