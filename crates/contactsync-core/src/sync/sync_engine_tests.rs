//! Tests for sync_engine module.

#[cfg(test)]
mod tests {
    use super::super::sync_engine::*;
    use crate::contact::ContactRecord;
    use crate::storage::SqliteContactStore;
    use crate::sync::correlation::CorrelationStore;
    use crate::sync::credential::StaticCredentials;
    use crate::sync::http_directory::HttpDirectory;
    use crate::sync::local::LocalContactStore;
    use crate::sync::memory_directory::{Fault, MemoryDirectory};
    use crate::sync::types::{Action, Origin, SyncError};
    use chrono::{TimeZone, Utc};

    struct Fixture {
        remote: MemoryDirectory,
        local: SqliteContactStore,
        correlations: CorrelationStore,
        credentials: StaticCredentials,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                remote: MemoryDirectory::new(),
                local: SqliteContactStore::open_memory().unwrap(),
                correlations: CorrelationStore::open_memory().unwrap(),
                credentials: StaticCredentials::new("token"),
            }
        }

        fn engine(&self) -> SyncEngine<'_> {
            SyncEngine::new(
                &self.remote,
                &self.local,
                &self.correlations,
                &self.credentials,
            )
        }
    }

    /// Local stamps are rounded up to the millisecond; wait until the clock
    /// has passed them.
    fn settle() {
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_empty_run_converges_and_records_watermark() {
        let f = Fixture::new();
        let closed_at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let mut engine = f.engine().with_clock(move || closed_at);
        assert_eq!(engine.state(), &SyncState::Idle);

        let report = engine.run().await.unwrap();

        assert_eq!(engine.state(), &SyncState::Converged);
        assert_eq!(report.passes, 1);
        assert!(report.outcomes.is_empty());
        assert!(report.window.is_full_history());
        assert_eq!(f.correlations.last_sync_at().unwrap(), Some(closed_at));
    }

    #[tokio::test]
    async fn test_second_run_starts_at_previous_watermark() {
        let f = Fixture::new();
        f.engine().run().await.unwrap();
        let first = f.correlations.last_sync_at().unwrap();

        let report = f.engine().run().await.unwrap();
        assert_eq!(report.window.from, first);
    }

    #[tokio::test]
    async fn test_transport_fault_fails_without_watermark() {
        let f = Fixture::new();
        f.local.create(&ContactRecord::named("Ada")).unwrap();
        f.remote.inject(Fault::Transport);

        let mut engine = f.engine();
        let err = engine.run().await.unwrap_err();

        assert!(matches!(err, SyncError::Transport(_)));
        assert_eq!(engine.state(), &SyncState::Failed);
        assert_eq!(f.correlations.last_sync_at().unwrap(), None);
    }

    #[tokio::test]
    async fn test_unauthorized_is_fatal() {
        let f = Fixture::new();
        f.remote.inject(Fault::Unauthorized);

        let mut engine = f.engine();
        assert!(matches!(
            engine.run().await,
            Err(SyncError::Unauthorized(_))
        ));
        assert_eq!(engine.state(), &SyncState::Failed);
    }

    #[tokio::test]
    async fn test_stale_tag_retries_until_converged() {
        let f = Fixture::new();
        let created = f.local.create(&ContactRecord::named("Ada")).unwrap();
        f.engine().run().await.unwrap();
        let remote_id = f
            .correlations
            .lookup_remote_id(&created.local_id)
            .unwrap()
            .unwrap();

        f.local
            .update(&created.local_id, &ContactRecord::named("Ada L."))
            .unwrap();
        settle();
        f.remote.inject(Fault::ConcurrentEdit);

        let mut engine = f.engine();
        let report = engine.run().await.unwrap();

        assert_eq!(engine.state(), &SyncState::Converged);
        assert_eq!(report.passes, 2);
        assert!(report.failures.is_empty());
        assert_eq!(report.outcomes.len(), 1);
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.contact_key, created.local_id);
        assert_eq!(outcome.origin, Origin::Remote);
        assert_eq!(outcome.action, Action::Updated);
        assert_eq!(
            f.local.get(&created.local_id).unwrap().unwrap().record,
            f.remote.get(&remote_id).unwrap()
        );
        assert_eq!(
            f.correlations.last_sync_at().unwrap(),
            Some(report.window.to)
        );
    }

    #[tokio::test]
    async fn test_bad_feed_entry_is_reported_and_good_entry_imported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/contacts")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{
                    "updated": "2024-01-01T12:00:00Z",
                    "entries": [
                        {"id": "R1", "etag": "e1", "updated": "2024-01-01T10:00:00Z",
                         "contact": {"name": "Ada"}},
                        {"id": "R2", "updated": "2024-01-01T11:00:00Z",
                         "contact": {"name": "Grace"}}
                    ]
                }"#,
            )
            .create_async()
            .await;
        let remote =
            HttpDirectory::new(server.url(), std::time::Duration::from_secs(5), 100).unwrap();
        let local = SqliteContactStore::open_memory().unwrap();
        let correlations = CorrelationStore::open_memory().unwrap();
        let credentials = StaticCredentials::new("token");

        let mut engine = SyncEngine::new(&remote, &local, &correlations, &credentials);
        let report = engine.run().await.unwrap();

        assert_eq!(engine.state(), &SyncState::Converged);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].origin, Origin::Remote);
        assert_eq!(report.outcomes[0].action, Action::Created);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].contact_key, "R2");
        assert_eq!(local.count().unwrap(), 1);
        assert!(correlations.lookup_local_id("R1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unreadable_local_row_does_not_block_sync() {
        let f = Fixture::new();
        f.local.create(&ContactRecord::named("Ada")).unwrap();
        f.local.insert_raw("bad", r#"{"emails": 5}"#, 0).unwrap();

        let mut engine = f.engine();
        let report = engine.run().await.unwrap();

        assert_eq!(engine.state(), &SyncState::Converged);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].contact_key, "bad");
        assert_eq!(f.remote.live_records().len(), 1);
        assert!(f.correlations.last_sync_at().unwrap().is_some());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SyncState::Idle.to_string(), "idle");
        assert_eq!(SyncState::Converged.to_string(), "converged");
        assert_eq!(SyncState::Failed.to_string(), "failed");
    }
}
