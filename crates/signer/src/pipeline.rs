//! Bounded-concurrency dispatch of outbound items.
//!
//! Every scheduling pass takes a snapshot of the store grouped by vault and starts one task per
//! group that is not already being worked on. A group task signs its items one after the other,
//! each item holding one of `concurrency` permits while it runs. A failing item ends its group's
//! task for the pass, so that signers who disagree on the order restart from the same head.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use bifrost_db::{errors::DbError, outbound::OrderedLists};
use bifrost_primitives::{
    constants::DEFAULT_SIGNER_CONCURRENCY,
    outbound::{OutboundItem, VaultGroup},
};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::errors::SignerError;

/// The signer as seen by the pipeline.
#[async_trait]
pub trait PipelineSigner: Send + Sync + 'static {
    /// Whether the signer is shutting down. No new item is started once it is.
    fn is_stopped(&self) -> bool;

    /// Snapshot of the pending items grouped by vault.
    async fn ordered_lists(&self) -> Result<OrderedLists, DbError>;

    /// Runs one attempt on `item` and records its outcome.
    async fn process_transaction(&self, item: OutboundItem) -> Result<(), SignerError>;
}

/// Concurrency to use for a `SignerConcurrency` mimir value.
pub fn effective_concurrency(mimir: i64) -> usize {
    let concurrency = if mimir > 0 {
        mimir
    } else {
        DEFAULT_SIGNER_CONCURRENCY
    };

    usize::try_from(concurrency).unwrap_or(usize::MAX)
}

/// Items of a group to attempt in this pass.
///
/// A group holding a round-7 retry only attempts that item, as the later items may depend on
/// the outputs it spends.
fn items_to_attempt(mut items: Vec<OutboundItem>) -> Vec<OutboundItem> {
    match items.iter().position(|item| item.round7_retry) {
        Some(pos) => vec![items.swap_remove(pos)],
        None => items,
    }
}

/// Removes its group from the in-flight set when the group task ends.
struct GroupGuard {
    group: VaultGroup,
    in_flight: Arc<Mutex<HashSet<VaultGroup>>>,
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.group);
    }
}

/// One generation of signing workers sharing a fixed concurrency.
#[derive(Debug)]
pub struct SigningPipeline {
    concurrency: usize,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<VaultGroup>>>,
    tasks: TaskTracker,
}

impl SigningPipeline {
    /// Creates a pipeline running up to `concurrency` items at once.
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            concurrency,
            permits: Arc::new(Semaphore::new(concurrency)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tasks: TaskTracker::new(),
        }
    }

    /// Number of items run at once.
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Number of groups being worked on.
    pub fn groups_in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Starts a task for every pending group that is not already being worked on.
    pub async fn spawn_signings(&self, signer: Arc<dyn PipelineSigner>) {
        if signer.is_stopped() {
            return;
        }

        let lists = match signer.ordered_lists().await {
            Ok(lists) => lists,
            Err(err) => {
                error!(%err, "failed to list outbound items");
                return;
            }
        };

        for (group, items) in lists {
            if !self.in_flight.lock().insert(group.clone()) {
                debug!(%group, "group still in flight");
                continue;
            }

            let guard = GroupGuard {
                group,
                in_flight: self.in_flight.clone(),
            };
            let items = items_to_attempt(items);
            let permits = self.permits.clone();
            let signer = signer.clone();

            self.tasks.spawn(async move {
                for item in items {
                    if signer.is_stopped() {
                        break;
                    }

                    let Ok(_permit) = permits.acquire().await else {
                        break;
                    };

                    if let Err(err) = signer.process_transaction(item).await {
                        warn!(group = %guard.group, %err, "stopping group for this pass");
                        break;
                    }
                }

                drop(guard);
            });
        }
    }

    /// Waits for every task of this pipeline to complete.
    pub async fn wait(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// Owns the current pipeline and rebuilds it when the configured concurrency changes.
#[derive(Debug, Default)]
pub struct PipelineManager {
    pipeline: Option<SigningPipeline>,
}

impl PipelineManager {
    /// Creates a manager with no pipeline yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Concurrency of the current pipeline.
    pub fn concurrency(&self) -> Option<usize> {
        self.pipeline.as_ref().map(SigningPipeline::concurrency)
    }

    /// Runs a scheduling pass with `concurrency` workers.
    ///
    /// If the previous pass ran with a different concurrency, its workers are drained first so
    /// that no item is handled by two generations at once.
    pub async fn process_transactions(
        &mut self,
        signer: Arc<dyn PipelineSigner>,
        concurrency: usize,
    ) {
        let concurrency = concurrency.clamp(1, Semaphore::MAX_PERMITS);
        if self.concurrency().is_some_and(|current| current != concurrency) {
            info!(
                old = ?self.concurrency(),
                new = concurrency,
                "signer concurrency changed, draining pipeline"
            );
            self.drain().await;
        }

        self.pipeline
            .get_or_insert_with(|| SigningPipeline::new(concurrency))
            .spawn_signings(signer)
            .await;
    }

    /// Waits for the current pipeline to complete.
    pub async fn drain(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.wait().await;
        }
    }
}
