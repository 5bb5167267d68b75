#![warn(mismatched_lifetime_syntaxes)]
#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions, clippy::missing_panics_doc)]

//! Rollback lifecycle for rbk
//!
//! This crate owns rollback entries from the moment a rollback-enabled
//! install is recorded until they are committed, expire, are cancelled or are
//! pruned from history. The [`RollbackManager`] drives every transition and
//! persists it through `rbk-store`; installed versions, package reversion and
//! time are injected so the manager can run against fakes in tests.

pub mod clock;
pub mod expiry;
pub mod manager;
pub mod query;
pub mod reverter;
pub mod service;
pub mod validator;

pub use clock::{Clock, ManualClock, SystemClock};
pub use expiry::ExpirationPolicy;
pub use manager::{Collaborators, CommitOutcome, ReloadSummary, RollbackManager};
pub use reverter::{PackageReverter, RevertError};
pub use service::{Command, RollbackService, ServiceHandle};
pub use validator::{validate, InstalledVersions, Mismatch, Validation, VersionWatermarks};
