//! Integration tests for full sync attempts.
//!
//! These run the engine against the in-memory directory and the real
//! SQLite local store, checking the observable outcomes and that both
//! stores end up holding the same contacts.

use contactsync_core::contact::{ContactField, ContactRecord};
use contactsync_core::storage::SqliteContactStore;
use contactsync_core::sync::{
    Action, CorrelationStore, Fault, LocalContactStore, MemoryDirectory, Origin,
    StaticCredentials, SyncEngine, SyncError, SyncReport, SyncState,
};

struct Env {
    remote: MemoryDirectory,
    local: SqliteContactStore,
    correlations: CorrelationStore,
    credentials: StaticCredentials,
}

impl Env {
    fn new() -> Self {
        Self {
            remote: MemoryDirectory::new(),
            local: SqliteContactStore::open_memory().unwrap(),
            correlations: CorrelationStore::open_memory().unwrap(),
            credentials: StaticCredentials::new("integration-token"),
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

    async fn sync(&self) -> SyncReport {
        let mut engine = self.engine();
        let report = engine.run().await.unwrap();
        assert_eq!(engine.state(), &SyncState::Converged);
        report
    }

    fn local_records(&self) -> Vec<ContactRecord> {
        let mut records: Vec<_> = self
            .local
            .list_all()
            .unwrap()
            .records
            .into_iter()
            .map(|r| r.record)
            .collect();
        records.sort_by_key(ContactRecord::display_name);
        records
    }

    fn remote_records(&self) -> Vec<ContactRecord> {
        let mut records: Vec<_> = self.remote.live_records().into_values().collect();
        records.sort_by_key(ContactRecord::display_name);
        records
    }
}

/// Local stamps are rounded up to the millisecond; wait until the clock has
/// passed them so the next window covers the edit.
fn settle() {
    std::thread::sleep(std::time::Duration::from_millis(5));
}

#[tokio::test]
async fn test_first_sync_imports_remote_contact() {
    let env = Env::new();
    let receipt = env.remote.insert(ContactRecord::named("Ada Lovelace"));

    let report = env.sync().await;

    assert_eq!(report.passes, 1);
    assert_eq!(report.outcomes.len(), 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.contact_key, receipt.remote_id);
    assert_eq!(outcome.origin, Origin::Remote);
    assert_eq!(outcome.action, Action::Created);

    assert_eq!(env.local.count().unwrap(), 1);
    let local_id = env
        .correlations
        .lookup_local_id(&receipt.remote_id)
        .unwrap()
        .expect("correlation created");
    assert_eq!(
        env.local.get(&local_id).unwrap().unwrap().record,
        ContactRecord::named("Ada Lovelace")
    );
}

#[tokio::test]
async fn test_first_sync_pushes_local_contact() {
    let env = Env::new();
    let created = env.local.create(&ContactRecord::named("Grace")).unwrap();

    let report = env.sync().await;

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].contact_key, created.local_id);
    assert_eq!(report.outcomes[0].origin, Origin::Local);
    assert_eq!(report.outcomes[0].action, Action::Created);
    let remote_id = env
        .correlations
        .lookup_remote_id(&created.local_id)
        .unwrap()
        .unwrap();
    assert_eq!(
        env.remote.get(&remote_id),
        Some(ContactRecord::named("Grace"))
    );
}

#[tokio::test]
async fn test_local_update_is_pushed_and_tag_refreshed() {
    let env = Env::new();
    let created = env.local.create(&ContactRecord::named("Alan")).unwrap();
    env.sync().await;
    let remote_id = env
        .correlations
        .lookup_remote_id(&created.local_id)
        .unwrap()
        .unwrap();

    let mut edited = ContactRecord::named("Alan Turing");
    edited.emails.push(ContactField::typed("alan@example.com", "work"));
    env.local.update(&created.local_id, &edited).unwrap();
    settle();

    let report = env.sync().await;

    assert_eq!(report.outcomes.len(), 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.contact_key, created.local_id);
    assert_eq!(outcome.origin, Origin::Local);
    assert_eq!(outcome.action, Action::Updated);
    assert_eq!(env.remote.get(&remote_id), Some(edited));
    assert_eq!(
        env.correlations.version_tag(&remote_id).unwrap(),
        env.remote.version_tag(&remote_id)
    );
}

#[tokio::test]
async fn test_later_remote_edit_wins_conflict() {
    let env = Env::new();
    let created = env.local.create(&ContactRecord::named("Edsger")).unwrap();
    env.sync().await;
    let remote_id = env
        .correlations
        .lookup_remote_id(&created.local_id)
        .unwrap()
        .unwrap();

    env.local
        .update(&created.local_id, &ContactRecord::named("Edsger (local)"))
        .unwrap();
    settle();
    env.remote
        .edit(&remote_id, ContactRecord::named("Edsger (remote)"))
        .unwrap();
    settle();

    let report = env.sync().await;

    assert_eq!(report.outcomes.len(), 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.contact_key, created.local_id);
    assert_eq!(outcome.origin, Origin::Remote);
    assert_eq!(outcome.action, Action::Updated);
    assert_eq!(
        env.local.get(&created.local_id).unwrap().unwrap().record,
        ContactRecord::named("Edsger (remote)")
    );
}

#[tokio::test]
async fn test_stale_tag_defers_then_converges() {
    let env = Env::new();
    let created = env.local.create(&ContactRecord::named("Barbara")).unwrap();
    env.sync().await;

    env.local
        .update(&created.local_id, &ContactRecord::named("Barbara L."))
        .unwrap();
    settle();
    env.remote.inject(Fault::ConcurrentEdit);

    let report = env.sync().await;

    assert_eq!(report.passes, 2);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(env.local_records(), env.remote_records());
}

#[tokio::test]
async fn test_local_delete_yields_one_delete_outcome() {
    let env = Env::new();
    let created = env.local.create(&ContactRecord::named("Ken")).unwrap();
    env.sync().await;
    let remote_id = env
        .correlations
        .lookup_remote_id(&created.local_id)
        .unwrap()
        .unwrap();

    env.local.delete(&created.local_id).unwrap();
    let report = env.sync().await;

    let deletes: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| o.action == Action::Deleted)
        .collect();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].contact_key, created.local_id);
    assert_eq!(deletes[0].origin, Origin::Local);
    assert_eq!(env.correlations.lookup_remote_id(&created.local_id).unwrap(), None);
    assert!(!env.correlations.is_known(&created.local_id).unwrap());
    assert_eq!(env.remote.get(&remote_id), None);

    let again = env.sync().await;
    assert!(again.outcomes.is_empty());
}

#[tokio::test]
async fn test_remote_delete_removes_local_contact() {
    let env = Env::new();
    let receipt = env.remote.insert(ContactRecord::named("Dennis"));
    env.sync().await;
    let local_id = env
        .correlations
        .lookup_local_id(&receipt.remote_id)
        .unwrap()
        .unwrap();

    env.remote.remove(&receipt.remote_id);
    let report = env.sync().await;

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].origin, Origin::Remote);
    assert_eq!(report.outcomes[0].action, Action::Deleted);
    assert!(env.local.get(&local_id).unwrap().is_none());
    assert_eq!(env.correlations.correlated_count().unwrap(), 0);
}

#[tokio::test]
async fn test_second_sync_without_changes_is_idempotent() {
    let env = Env::new();
    env.local.create(&ContactRecord::named("Local One")).unwrap();
    env.remote.insert(ContactRecord::named("Remote One"));

    let first = env.sync().await;
    assert_eq!(first.summary().created, 2);

    let second = env.sync().await;
    assert!(second.outcomes.is_empty());
    assert!(second.failures.is_empty());
}

#[tokio::test]
async fn test_mixed_mutations_converge() {
    let env = Env::new();
    let a = env.local.create(&ContactRecord::named("A")).unwrap();
    let b = env.local.create(&ContactRecord::named("B")).unwrap();
    let c = env.remote.insert(ContactRecord::named("C"));
    env.sync().await;
    assert_eq!(env.local_records(), env.remote_records());

    env.local.update(&a.local_id, &ContactRecord::named("A2")).unwrap();
    env.local.delete(&b.local_id).unwrap();
    env.local.create(&ContactRecord::named("E")).unwrap();
    env.remote.edit(&c.remote_id, ContactRecord::named("C2")).unwrap();
    env.remote.insert(ContactRecord::named("D"));
    settle();

    let report = env.sync().await;

    assert_eq!(
        report.summary(),
        contactsync_core::sync::SyncSummary {
            created: 2,
            updated: 2,
            deleted: 1
        }
    );
    let names: Vec<_> = env
        .local_records()
        .iter()
        .map(ContactRecord::display_name)
        .collect();
    assert_eq!(names, vec!["A2", "C2", "D", "E"]);
    assert_eq!(env.local_records(), env.remote_records());
}

#[tokio::test]
async fn test_transport_failure_keeps_watermark() {
    let env = Env::new();
    env.remote.insert(ContactRecord::named("Remote"));
    env.remote.inject(Fault::Transport);

    let mut engine = env.engine();
    let err = engine.run().await.unwrap_err();
    assert!(matches!(err, SyncError::Transport(_)));
    assert_eq!(engine.state(), &SyncState::Failed);
    assert_eq!(env.correlations.last_sync_at().unwrap(), None);

    let report = env.sync().await;
    assert_eq!(report.outcomes.len(), 1);
    assert!(report.window.is_full_history());
}

#[tokio::test]
async fn test_malformed_remote_contact_is_reported_not_applied() {
    let env = Env::new();
    let mut broken = ContactRecord::named("Broken");
    broken.phones.push(ContactField::new("   "));
    let bad = env.remote.insert(broken);
    env.remote.insert(ContactRecord::named("Fine"));

    let report = env.sync().await;

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].contact_key, bad.remote_id);
    assert_eq!(env.local.count().unwrap(), 1);
}
