//! Integration tests for events

#[cfg(test)]
mod tests {
    use rbk_events::*;
    use rbk_types::RollbackId;

    #[tokio::test]
    async fn test_event_sender_emitter() {
        let (tx, mut rx) = channel();

        tx.emit_error("test error");
        tx.emit_rollback(RollbackEvent::Available {
            rollback_id: RollbackId(5),
        });

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first.event,
            AppEvent::General(GeneralEvent::Error { .. })
        ));
        assert_eq!(first.meta.level, EventLevel::Error);
        assert!(first.meta.correlation_id.is_none());

        let second = rx.recv().await.unwrap();
        assert_eq!(second.meta.source, EventSource::ROLLBACK);
        assert_eq!(second.meta.correlation_id.as_deref(), Some("rollback-5"));
    }

    #[tokio::test]
    async fn test_dropped_receiver() {
        let (tx, rx) = channel();
        drop(rx);

        // Should not panic when receiver is dropped
        tx.emit_warning("ignored");
    }

    #[test]
    fn test_detached_emitter_only_logs() {
        let emitter: Option<EventSender> = None;
        emitter.emit_store(StoreEvent::StrayTempRemoved {
            path: "rollbacks/3.json.tmp".into(),
        });
    }

    #[test]
    fn test_levels() {
        let partial = AppEvent::Rollback(RollbackEvent::PartiallyApplied {
            rollback_id: RollbackId(1),
            applied: vec!["a".into()],
            failed_package: Some("b".into()),
            error: "disk full".into(),
        });
        assert_eq!(partial.log_level(), tracing::Level::ERROR);

        let corrupt = AppEvent::Store(StoreEvent::RecordCorrupted {
            path: "rollbacks/2.json".into(),
            quarantined_to: None,
            message: "expected value".into(),
        });
        assert_eq!(corrupt.log_level(), tracing::Level::WARN);
        assert_eq!(corrupt.log_target(), "rbk::events::store");
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = AppEvent::Rollback(RollbackEvent::Expired {
            rollback_id: RollbackId(3),
            reason: ExpiryReason::LifetimeElapsed,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["domain"], "rollback");
        assert_eq!(json["event"]["type"], "Expired");
        assert_eq!(json["event"]["reason"], "lifetime_elapsed");
    }
}
