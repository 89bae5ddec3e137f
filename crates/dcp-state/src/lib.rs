//! # dcp-state — Lease-Based State Machine Engine
//!
//! The engine that drives every credential workflow in the stack.
//!
//! ## Components
//!
//! - **Leasable Entity Store** (`store.rs`): the persistence contract giving
//!   atomic claim-and-lease semantics over state-tagged entities, with an
//!   in-memory implementation (`memory.rs`) and a Postgres implementation
//!   (`postgres.rs`).
//!
//! - **State Machine Processor** (`processor.rs`): claims a batch of
//!   entities in the processor's source states and dispatches each to a
//!   handler, bounded by a per-instance worker limit.
//!
//! - **Runtime** (`machine.rs`, `wait.rs`): a named polling loop over one or
//!   more processors, paced by a wait strategy and stopped explicitly.
//!
//! ## Concurrency Model
//!
//! `next_not_leased` is the only synchronization point between processing
//! instances. An entity returned to one instance is invisible to every other
//! instance until its lease is released by a save or expires. Any number of
//! instances may therefore run the same processors against one store.

pub mod machine;
pub mod memory;
pub mod postgres;
pub mod processor;
pub mod store;
pub mod wait;

pub use machine::{StateMachine, StateMachineHandle};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use processor::{
    handler_fn, BatchReport, EntityHandler, HandlerOutcome, ProcessError, Processor, ProcessorSettings,
    StateMachineProcessor,
};
pub use store::{LeasableStore, SharedStore, StateFilter, DEFAULT_LEASE_DURATION_SECS};
pub use wait::{BackoffWaitStrategy, FixedWaitStrategy, WaitStrategy};
