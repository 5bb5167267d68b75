#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Event system for async communication in rbk
//!
//! Library crates never print. They emit domain events through an
//! [`EventEmitter`]; every emission is also recorded through `tracing` at the
//! level the event maps to, so an installed subscriber sees the same stream a
//! channel consumer does.
//!
//! ## Architecture
//!
//! - **Domain-driven events**: `Rollback`, `Store` and `General` domains
//! - **Unified `EventEmitter` trait**: Single, consistent API for all event emissions
//! - **Tracing integration**: structured log records with per-event levels

pub mod meta;
pub use meta::{EventLevel, EventMeta, EventSource};

pub mod events;
pub use events::{
    AppEvent, ExpiryReason, FailureContext, GeneralEvent, PruneReason, RollbackEvent, StoreEvent,
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::Level;

/// An event together with its emission metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub meta: EventMeta,
    pub event: AppEvent,
}

impl EventMessage {
    /// Wrap an event, deriving level and source from the event itself
    #[must_use]
    pub fn new(event: AppEvent) -> Self {
        let meta = EventMeta::new(event.log_level(), event.event_source());
        Self { meta, event }
    }

    /// Wrap an event and tag it with a correlation id
    #[must_use]
    pub fn correlated(event: AppEvent, correlation_id: impl Into<String>) -> Self {
        let mut message = Self::new(event);
        message.meta = message.meta.with_correlation_id(correlation_id);
        message
    }

    /// Record this event through `tracing` at its own level
    pub fn log(&self) {
        let meta = &self.meta;
        let target = self.event.log_target();
        let event = &self.event;
        match meta.tracing_level() {
            Level::ERROR => tracing::error!(
                source = meta.source.as_str(),
                target_domain = target,
                event_id = %meta.event_id,
                correlation = ?meta.correlation_id,
                ?event,
            ),
            Level::WARN => tracing::warn!(
                source = meta.source.as_str(),
                target_domain = target,
                event_id = %meta.event_id,
                correlation = ?meta.correlation_id,
                ?event,
            ),
            Level::INFO => tracing::info!(
                source = meta.source.as_str(),
                target_domain = target,
                event_id = %meta.event_id,
                correlation = ?meta.correlation_id,
                ?event,
            ),
            Level::DEBUG => tracing::debug!(
                source = meta.source.as_str(),
                target_domain = target,
                event_id = %meta.event_id,
                correlation = ?meta.correlation_id,
                ?event,
            ),
            Level::TRACE => tracing::trace!(
                source = meta.source.as_str(),
                target_domain = target,
                event_id = %meta.event_id,
                correlation = ?meta.correlation_id,
                ?event,
            ),
        }
    }
}

/// Type alias for event sender
pub type EventSender = UnboundedSender<EventMessage>;

/// Type alias for event receiver
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<EventMessage>;

/// Create a new event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// The unified trait for emitting events throughout rbk
///
/// This trait provides a single, consistent API for emitting events regardless of
/// whether you have a raw `EventSender` or a struct that contains one.
pub trait EventEmitter {
    /// Get the event sender for this emitter
    fn event_sender(&self) -> Option<&EventSender>;

    /// Emit a prepared message
    fn emit_message(&self, message: EventMessage) {
        message.log();
        if let Some(sender) = self.event_sender() {
            // Ignore send errors - if receiver is dropped, we just continue
            let _ = sender.send(message);
        }
    }

    /// Emit an event through this emitter
    fn emit(&self, event: AppEvent) {
        self.emit_message(EventMessage::new(event));
    }

    /// Emit a rollback lifecycle event correlated by rollback id
    fn emit_rollback(&self, event: RollbackEvent) {
        let correlation = rollback_correlation(&event);
        let event = AppEvent::Rollback(event);
        match correlation {
            Some(id) => self.emit_message(EventMessage::correlated(event, id)),
            None => self.emit(event),
        }
    }

    /// Emit a record store event
    fn emit_store(&self, event: StoreEvent) {
        self.emit(AppEvent::Store(event));
    }

    /// Emit a debug log event
    fn emit_debug(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::debug(message)));
    }

    /// Emit a warning event
    fn emit_warning(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::warning(message)));
    }

    /// Emit a warning event with context
    fn emit_warning_with_context(&self, message: impl Into<String>, context: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::warning_with_context(
            message, context,
        )));
    }

    /// Emit an error event
    fn emit_error(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::error(message)));
    }

    /// Emit an error event with details
    fn emit_error_with_details(&self, message: impl Into<String>, details: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::error_with_details(
            message, details,
        )));
    }

    /// Emit an operation started event
    fn emit_operation_started(&self, operation: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::OperationStarted {
            operation: operation.into(),
        }));
    }

    /// Emit an operation completed event
    fn emit_operation_completed(&self, operation: impl Into<String>, success: bool) {
        self.emit(AppEvent::General(GeneralEvent::OperationCompleted {
            operation: operation.into(),
            success,
        }));
    }

    /// Emit an operation failed event
    fn emit_operation_failed(&self, operation: impl Into<String>, error: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::OperationFailed {
            operation: operation.into(),
            error: error.into(),
        }));
    }
}

fn rollback_correlation(event: &RollbackEvent) -> Option<String> {
    let id = match event {
        RollbackEvent::Enabled { rollback_id, .. }
        | RollbackEvent::Available { rollback_id }
        | RollbackEvent::CommitStarted { rollback_id, .. }
        | RollbackEvent::ValidationFailed { rollback_id, .. }
        | RollbackEvent::Committed { rollback_id, .. }
        | RollbackEvent::CommitFailed { rollback_id, .. }
        | RollbackEvent::PartiallyApplied { rollback_id, .. }
        | RollbackEvent::Expired { rollback_id, .. }
        | RollbackEvent::Cancelled { rollback_id, .. }
        | RollbackEvent::Pruned { rollback_id, .. }
        | RollbackEvent::Recovered { rollback_id, .. }
        | RollbackEvent::QuarantineCleared { rollback_id } => rollback_id,
        RollbackEvent::Reloaded { .. } | RollbackEvent::SweepCompleted { .. } => return None,
    };
    Some(format!("rollback-{id}"))
}

/// Implementation of `EventEmitter` for the raw `EventSender`
/// This allows `EventSender` to be used directly where `EventEmitter` is expected
impl EventEmitter for EventSender {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(self)
    }
}

/// Emitter for an optional sender; `None` still logs through `tracing`
impl EventEmitter for Option<EventSender> {
    fn event_sender(&self) -> Option<&EventSender> {
        self.as_ref()
    }
}
