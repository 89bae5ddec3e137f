//! # State Machine Processor
//!
//! A processor is bound to one entity type and a set of source states. On
//! each tick it claims up to `batch_size` entities through
//! [`LeasableStore::next_not_leased`] and hands every claimed entity to its
//! [`EntityHandler`].
//!
//! ## Handler contract
//!
//! - Perform the state's side effect, transition the entity and `save` it.
//!   The save releases the lease.
//! - On failure, record `error_detail`, transition to the terminal error
//!   state and `save`. Failures are never propagated as errors.
//! - Return [`HandlerOutcome::Requeued`] after saving the entity back into
//!   its current state, e.g. after an inconclusive poll.
//! - Return [`HandlerOutcome::NotProcessed`] to leave the entity untouched;
//!   the processor releases the lease so the next tick sees it again.
//!
//! Only `Processed` entities count as progress. A tick that merely requeued
//! or skipped entities lets the state machine sleep for its full interval.
//! - A returned [`ProcessError`] aborts that invocation only. It is logged
//!   and counted, and the lease is left to expire.
//!
//! The processor never retries a handler within a tick.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dcp_core::{StateTransitionError, Stateful, StoreError};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::store::{SharedStore, StateFilter};

/// Result of one handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The handler moved the entity on and saved it.
    Processed,
    /// The handler saved the entity back into the state it was claimed in.
    Requeued,
    /// The handler left the entity untouched; release its lease.
    NotProcessed,
}

/// What one claim-and-dispatch cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Entities leased by this cycle.
    pub claimed: usize,
    /// Entities whose handler returned [`HandlerOutcome::Processed`].
    pub progressed: usize,
}

/// Contract violations that abort a handler invocation.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] StateTransitionError),
}

/// Per-state side effect invoked for every claimed entity.
#[async_trait]
pub trait EntityHandler<T>: Send + Sync {
    async fn handle(&self, entity: T) -> Result<HandlerOutcome, ProcessError>;
}

/// Adapter turning an async closure into an [`EntityHandler`].
pub struct FnHandler<F>(F);

/// Wrap `f` as an [`EntityHandler`].
pub fn handler_fn<T, F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HandlerOutcome, ProcessError>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<T, F, Fut> EntityHandler<T> for FnHandler<F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HandlerOutcome, ProcessError>> + Send,
{
    async fn handle(&self, entity: T) -> Result<HandlerOutcome, ProcessError> {
        (self.0)(entity).await
    }
}

/// Type-erased view of a processor, driven by [`crate::StateMachine`].
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    /// Run one claim-and-dispatch cycle. Returns the number of entities
    /// that moved on; requeued and skipped entities are not counted.
    async fn process(&self) -> usize;
}

/// Batch and worker limits for a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorSettings {
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            concurrency: 4,
        }
    }
}

/// Claims entities in the source states and dispatches them to a handler.
pub struct StateMachineProcessor<T: Stateful> {
    name: String,
    store: SharedStore<T>,
    filter: StateFilter,
    handler: Arc<dyn EntityHandler<T>>,
    batch_size: usize,
    concurrency: usize,
}

impl<T: Stateful> StateMachineProcessor<T> {
    pub fn new(
        name: impl Into<String>,
        store: SharedStore<T>,
        filter: StateFilter,
        handler: Arc<dyn EntityHandler<T>>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            filter,
            handler,
            batch_size: ProcessorSettings::default().batch_size,
            concurrency: ProcessorSettings::default().concurrency,
        }
    }

    pub fn with_settings(self, settings: ProcessorSettings) -> Self {
        self.with_batch_size(settings.batch_size)
            .with_concurrency(settings.concurrency)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn filter(&self) -> &StateFilter {
        &self.filter
    }

    /// Claim one batch and run the handler for each entity, at most
    /// `concurrency` at a time.
    pub async fn process_batch(&self) -> Result<BatchReport, StoreError> {
        let claimed = self
            .store
            .next_not_leased(self.batch_size, &self.filter)
            .await?;
        let count = claimed.len();
        if count == 0 {
            return Ok(BatchReport::default());
        }

        metrics::counter!("dcp_processor_claimed_total", "processor" => self.name.clone())
            .increment(count as u64);
        tracing::debug!(processor = %self.name, claimed = count, "claimed batch");

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for entity in claimed {
            let handler = Arc::clone(&self.handler);
            let store = Arc::clone(&self.store);
            let permits = Arc::clone(&permits);
            let name = self.name.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let id = entity.id().to_string();
                let state = entity.state();
                match handler.handle(entity).await {
                    Ok(HandlerOutcome::Processed) => true,
                    Ok(HandlerOutcome::Requeued) => false,
                    Ok(HandlerOutcome::NotProcessed) => {
                        if let Err(e) = store.break_lease(&id).await {
                            tracing::warn!(processor = %name, entity_id = %id, error = %e, "failed to break lease");
                        }
                        false
                    }
                    Err(e) => {
                        metrics::counter!("dcp_processor_failed_total", "processor" => name.clone())
                            .increment(1);
                        tracing::error!(processor = %name, entity_id = %id, state, error = %e, "handler aborted");
                        false
                    }
                }
            });
        }

        let mut progressed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => progressed += 1,
                Ok(false) => {}
                Err(e) => {
                    metrics::counter!("dcp_processor_failed_total", "processor" => self.name.clone())
                        .increment(1);
                    tracing::error!(processor = %self.name, error = %e, "handler task panicked");
                }
            }
        }

        Ok(BatchReport {
            claimed: count,
            progressed,
        })
    }
}

#[async_trait]
impl<T: Stateful> Processor for StateMachineProcessor<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self) -> usize {
        match self.process_batch().await {
            Ok(report) => report.progressed,
            Err(e) => {
                tracing::error!(processor = %self.name, error = %e, "claim failed");
                0
            }
        }
    }
}
