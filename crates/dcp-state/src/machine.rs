//! # State Machine Runtime
//!
//! A [`StateMachine`] is a named loop over one or more [`Processor`]s. Each
//! tick runs every processor once, in registration order, then sleeps for
//! the delay chosen by the [`WaitStrategy`]. A tick counts as busy only if
//! some entity moved to another state; requeued entities wait for the next
//! interval. The loop runs until
//! [`StateMachineHandle::stop`] is called; leases held by in-flight
//! handlers at shutdown simply expire.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::processor::Processor;
use crate::wait::{FixedWaitStrategy, WaitStrategy};

pub struct StateMachine {
    name: String,
    processors: Vec<Arc<dyn Processor>>,
    wait: Arc<dyn WaitStrategy>,
}

impl StateMachine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processors: Vec::new(),
            wait: Arc::new(FixedWaitStrategy::default()),
        }
    }

    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn with_wait_strategy(mut self, wait: Arc<dyn WaitStrategy>) -> Self {
        self.wait = wait;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run every processor once. Returns the total number of entities that
    /// moved on.
    pub async fn tick(&self) -> usize {
        let mut total = 0;
        for processor in &self.processors {
            total += processor.process().await;
        }
        total
    }

    /// Spawn the polling loop on the current tokio runtime.
    pub fn start(self) -> StateMachineHandle {
        let (shutdown, mut stopped) = watch::channel(false);
        let name = self.name.clone();
        tracing::info!(
            state_machine = %self.name,
            processors = self.processors.len(),
            "state machine started"
        );

        let task = tokio::spawn(async move {
            loop {
                if *stopped.borrow() {
                    break;
                }
                let progressed = self.tick().await;
                let delay = self.wait.next_delay(progressed > 0);
                tokio::select! {
                    biased;
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            tracing::info!(state_machine = %self.name, "state machine stopped");
        });

        StateMachineHandle {
            name,
            shutdown,
            task,
        }
    }
}

/// Handle to a running [`StateMachine`].
pub struct StateMachineHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl StateMachineHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal shutdown and wait for the current tick to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(state_machine = %self.name, error = %e, "state machine task failed");
        }
    }
}
