//! Tests for sync types module.

#[cfg(test)]
mod tests {
    use super::super::types::*;
    use crate::contact::{ContactField, ContactRecord};
    use crate::error::DatabaseError;
    use chrono::{Duration, TimeZone, Utc};

    fn at(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_window_is_half_open() {
        let window = Window::new(Some(at(1)), at(2));
        assert!(window.contains(at(1)));
        assert!(window.contains(at(1) + Duration::minutes(59)));
        assert!(!window.contains(at(2)));
        assert!(!window.contains(at(0)));
    }

    #[test]
    fn test_full_history_window_has_no_lower_bound() {
        let window = Window::full_history(at(2));
        assert!(window.is_full_history());
        assert!(window.contains(Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap()));
        assert!(!window.contains(at(3)));
    }

    #[test]
    fn test_window_advance_starts_at_previous_end() {
        let next = Window::full_history(at(2)).advance(at(5));
        assert_eq!(next, Window::new(Some(at(2)), at(5)));
    }

    #[test]
    fn test_live_record_requires_record() {
        let entry = LocalChangeEntry {
            local_id: "L1".into(),
            updated_at: at(1),
            deleted: false,
            record: None,
        };
        assert!(matches!(entry.live_record(), Err(SyncError::Malformed(_))));
    }

    #[test]
    fn test_live_record_validates_fields() {
        let record = ContactRecord {
            phones: vec![ContactField::new(" ")],
            ..Default::default()
        };
        let entry = RemoteChangeEntry::live("R1", "e1", at(1), record);
        assert!(matches!(entry.live_record(), Err(SyncError::Malformed(_))));
    }

    #[test]
    fn test_error_classification() {
        assert!(SyncError::conflict("R1").is_recoverable());
        assert!(!SyncError::conflict("R1").is_fatal());
        assert!(SyncError::Transport("x".into()).is_fatal());
        assert!(SyncError::Unauthorized("x".into()).is_fatal());
        assert!(SyncError::LocalStore("x".into()).is_fatal());
        assert!(SyncError::from(DatabaseError::Locked).is_fatal());
        let malformed = SyncError::Malformed("x".into());
        assert!(!malformed.is_fatal() && !malformed.is_recoverable());
    }

    #[test]
    fn test_outcome_serializes_lowercase() {
        let outcome = SyncOutcome {
            contact_key: "R1".into(),
            origin: Origin::Remote,
            action: Action::Created,
            timestamp: at(1),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["origin"], "remote");
        assert_eq!(json["action"], "created");
    }

    #[test]
    fn test_report_summary_counts_actions() {
        let outcome = |key: &str, action| SyncOutcome {
            contact_key: key.into(),
            origin: Origin::Local,
            action,
            timestamp: at(1),
        };
        let report = SyncReport {
            outcomes: vec![
                outcome("a", Action::Created),
                outcome("b", Action::Created),
                outcome("c", Action::Deleted),
            ],
            failures: vec![],
            passes: 1,
            window: Window::full_history(at(2)),
            watermark: None,
        };
        assert_eq!(
            report.summary(),
            SyncSummary {
                created: 2,
                updated: 0,
                deleted: 1
            }
        );
    }

    #[test]
    fn test_take_carried_empties_report() {
        let mut report = PassReport::default();
        report
            .carried_local
            .insert("L1".into(), LocalChangeEntry::tombstone("L1", at(1)));
        let carried = report.take_carried();
        assert_eq!(carried.local.len(), 1);
        assert!(report.carried_local.is_empty());
        assert!(!carried.is_empty());
    }
}
