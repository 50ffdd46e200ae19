//! Best-effort checkpointing of in-progress answers.
//!
//! Checkpoints are eventually consistent and at-most-once-visible: a single
//! background task drains the queue and only the newest pending checkpoint
//! per response survives coalescing; superseded writes are dropped before
//! they hit the store. Failures are logged and dropped; finalization is the
//! only durability guarantee the engine makes.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::metrics::CHECKPOINTS_TOTAL;
use crate::models::{AnswerRecord, ResponseStatus};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

use super::store::{ResponseUpdate, SurveyStore};

#[derive(Debug, Clone)]
pub struct CheckpointJob {
    pub response_id: String,
    pub answers: Vec<AnswerRecord>,
    pub last_activity: DateTime<Utc>,
}

/// Handle to the background checkpoint task. Cheap to clone; enqueueing
/// never blocks the caller.
#[derive(Clone)]
pub struct CheckpointWriter {
    tx: mpsc::UnboundedSender<CheckpointJob>,
}

impl CheckpointWriter {
    pub fn spawn(store: Arc<dyn SurveyStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<CheckpointJob>();

        tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut batch = vec![first];
                while let Ok(job) = rx.try_recv() {
                    batch.push(job);
                }

                for job in coalesce(batch) {
                    write_checkpoint(store.as_ref(), job).await;
                }
            }
            tracing::debug!("Checkpoint writer channel closed, task exiting");
        });

        Self { tx }
    }

    pub fn enqueue(&self, job: CheckpointJob) {
        if self.tx.send(job).is_err() {
            tracing::warn!("Checkpoint writer is gone, dropping checkpoint");
        }
    }
}

/// Keep only the newest job per response id, preserving arrival order of the
/// survivors.
fn coalesce(batch: Vec<CheckpointJob>) -> Vec<CheckpointJob> {
    let mut latest: HashMap<String, usize> = HashMap::new();
    for (idx, job) in batch.iter().enumerate() {
        latest.insert(job.response_id.clone(), idx);
    }

    batch
        .into_iter()
        .enumerate()
        .filter_map(|(idx, job)| (latest[&job.response_id] == idx).then_some(job))
        .collect()
}

async fn write_checkpoint(store: &dyn SurveyStore, job: CheckpointJob) {
    let update = ResponseUpdate {
        status: Some(ResponseStatus::InProgress),
        answers: Some(job.answers.clone()),
        last_activity: Some(job.last_activity),
        ..Default::default()
    };

    let result = retry_async_with_config(RetryConfig::persistent(), || async {
        store.update_response(&job.response_id, update.clone()).await
    })
    .await;

    match result {
        Ok(()) => {
            CHECKPOINTS_TOTAL.with_label_values(&["written"]).inc();
        }
        Err(e) => {
            // losing one mid-survey checkpoint is preferable to blocking the
            // respondent; the next answer enqueues a fresh full snapshot
            CHECKPOINTS_TOTAL.with_label_values(&["dropped"]).inc();
            tracing::warn!(
                response_id = %job.response_id,
                "Checkpoint write failed, dropping: {e:#}"
            );
        }
    }
}
