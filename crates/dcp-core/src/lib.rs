//! # dcp-core — Foundational Types
//!
//! Shared primitives for the credential request and issuance stack. Every
//! other crate in the workspace depends on this one; it depends on nothing
//! internal.
//!
//! ## Modules
//!
//! - [`error`]: the error taxonomy returned by synchronous entry points
//!   ([`ServiceError`]) and by stores ([`StoreError`]).
//! - [`identity`]: the validated [`Did`] newtype.
//! - [`entity`]: [`StatefulEntity`], the base record of every workflow
//!   entity, plus the [`Stateful`] and [`StateCode`] traits.
//! - [`clock`]: injectable time source.
//! - [`query`]: field-path filter, sort and paging over serialized entities.

pub mod clock;
pub mod entity;
pub mod error;
pub mod identity;
pub mod query;

pub use clock::{Clock, FixedClock, SharedClock, SystemClock};
pub use entity::{advance, StateCode, Stateful, StatefulEntity};
pub use error::{
    ReasonCode, ServiceError, ServiceResult, StateTransitionError, StoreError, ValidationError,
};
pub use identity::Did;
pub use query::{Criterion, Operator, QuerySpec, SortOrder};
