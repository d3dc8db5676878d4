//! In-process remote directory.
//!
//! Behaves like the HTTP directory (windowed feed, version tags, tombstones,
//! conditional writes) without a network. Other-client edits and transport
//! faults can be simulated, which makes it the directory of choice for
//! engine tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::contact::ContactRecord;
use crate::sync::credential::Credential;
use crate::sync::remote::{RemoteDirectory, RemoteFeed, RemoteWriteReceipt};
use crate::sync::types::{RemoteChangeEntry, SyncError, Window};

/// Simulated failure consumed by the next matching request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Next request of any kind fails with `Transport`.
    Transport,
    /// Next request of any kind fails with `Unauthorized`.
    Unauthorized,
    /// Another client edits the target just before the next update or
    /// delete, so its expected tag is stale.
    ConcurrentEdit,
}

#[derive(Debug, Clone)]
struct Stored {
    tag: String,
    updated_at: DateTime<Utc>,
    deleted: bool,
    record: ContactRecord,
}

#[derive(Debug, Default)]
struct State {
    contacts: BTreeMap<String, Stored>,
    next_id: u64,
    next_tag: u64,
    last_stamp: Option<DateTime<Utc>>,
    faults: VecDeque<Fault>,
    requests: usize,
}

impl State {
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if last >= now => last + Duration::nanoseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn tag(&mut self) -> String {
        self.next_tag += 1;
        format!("W/\"{}\"", self.next_tag)
    }

    fn write(&mut self, id: &str, record: ContactRecord, deleted: bool) -> RemoteWriteReceipt {
        let stored = Stored {
            tag: self.tag(),
            updated_at: self.stamp(),
            deleted,
            record,
        };
        let receipt = RemoteWriteReceipt {
            remote_id: id.to_string(),
            version_tag: stored.tag.clone(),
            updated_at: stored.updated_at,
        };
        self.contacts.insert(id.to_string(), stored);
        receipt
    }

    fn take_fault(&mut self, conditional_write: bool) -> Result<bool, SyncError> {
        self.requests += 1;
        match self.faults.front().copied() {
            Some(Fault::Transport) => {
                self.faults.pop_front();
                Err(SyncError::Transport("simulated transport failure".into()))
            }
            Some(Fault::Unauthorized) => {
                self.faults.pop_front();
                Err(SyncError::Unauthorized("simulated expired token".into()))
            }
            Some(Fault::ConcurrentEdit) if conditional_write => {
                self.faults.pop_front();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Checks `expected` against the live record, applying a pending
    /// concurrent edit first.
    fn check_tag(
        &mut self,
        remote_id: &str,
        expected: Option<&str>,
        concurrent_edit: bool,
    ) -> Result<(), SyncError> {
        let live = self
            .contacts
            .get(remote_id)
            .filter(|c| !c.deleted)
            .map(|c| c.record.clone());
        let Some(record) = live else {
            return Err(SyncError::conflict(remote_id));
        };
        if concurrent_edit {
            self.write(remote_id, record, false);
        }
        match (expected, self.contacts.get(remote_id)) {
            (Some(tag), Some(current)) if current.tag != tag => {
                Err(SyncError::conflict(remote_id))
            }
            _ => Ok(()),
        }
    }
}

/// Remote directory held in memory.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: Mutex<State>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-request.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a simulated failure.
    pub fn inject(&self, fault: Fault) {
        self.state().faults.push_back(fault);
    }

    /// Create a contact as another client would.
    pub fn insert(&self, record: ContactRecord) -> RemoteWriteReceipt {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("r{}", state.next_id);
        state.write(&id, record, false)
    }

    /// Edit a contact as another client would. Returns `None` for unknown ids.
    pub fn edit(&self, remote_id: &str, record: ContactRecord) -> Option<RemoteWriteReceipt> {
        let mut state = self.state();
        if !state.contacts.get(remote_id).is_some_and(|c| !c.deleted) {
            return None;
        }
        Some(state.write(remote_id, record, false))
    }

    /// Delete a contact as another client would, leaving a tombstone.
    pub fn remove(&self, remote_id: &str) -> bool {
        let mut state = self.state();
        let Some(record) = state.contacts.get(remote_id).map(|c| c.record.clone()) else {
            return false;
        };
        state.write(remote_id, record, true);
        true
    }

    /// Live record for `remote_id`.
    pub fn get(&self, remote_id: &str) -> Option<ContactRecord> {
        self.state()
            .contacts
            .get(remote_id)
            .filter(|c| !c.deleted)
            .map(|c| c.record.clone())
    }

    pub fn version_tag(&self, remote_id: &str) -> Option<String> {
        self.state().contacts.get(remote_id).map(|c| c.tag.clone())
    }

    /// Every live record keyed by remote id.
    pub fn live_records(&self) -> BTreeMap<String, ContactRecord> {
        self.state()
            .contacts
            .iter()
            .filter(|(_, c)| !c.deleted)
            .map(|(id, c)| (id.clone(), c.record.clone()))
            .collect()
    }

    /// Number of requests served, failed ones included.
    pub fn request_count(&self) -> usize {
        self.state().requests
    }
}

#[async_trait]
impl RemoteDirectory for MemoryDirectory {
    async fn fetch_changes(
        &self,
        window: &Window,
        _credential: &Credential,
    ) -> Result<RemoteFeed, SyncError> {
        let mut state = self.state();
        state.take_fault(false)?;
        let entries = state
            .contacts
            .iter()
            .filter(|(_, c)| window.contains(c.updated_at))
            .filter(|(_, c)| !c.deleted || !window.is_full_history())
            .map(|(id, c)| RemoteChangeEntry {
                remote_id: id.clone(),
                version_tag: c.tag.clone(),
                updated_at: c.updated_at,
                deleted: c.deleted,
                record: (!c.deleted).then(|| c.record.clone()),
            })
            .collect();
        Ok(RemoteFeed {
            entries,
            rejected: Vec::new(),
            watermark: Some(window.to),
        })
    }

    async fn create(
        &self,
        record: &ContactRecord,
        _credential: &Credential,
    ) -> Result<RemoteWriteReceipt, SyncError> {
        let mut state = self.state();
        state.take_fault(false)?;
        state.next_id += 1;
        let id = format!("r{}", state.next_id);
        Ok(state.write(&id, record.clone(), false))
    }

    async fn update(
        &self,
        remote_id: &str,
        record: &ContactRecord,
        expected_tag: Option<&str>,
        _credential: &Credential,
    ) -> Result<RemoteWriteReceipt, SyncError> {
        let mut state = self.state();
        let concurrent_edit = state.take_fault(true)?;
        state.check_tag(remote_id, expected_tag, concurrent_edit)?;
        Ok(state.write(remote_id, record.clone(), false))
    }

    async fn delete(
        &self,
        remote_id: &str,
        expected_tag: Option<&str>,
        _credential: &Credential,
    ) -> Result<(), SyncError> {
        let mut state = self.state();
        let concurrent_edit = state.take_fault(true)?;
        if !state.contacts.get(remote_id).is_some_and(|c| !c.deleted) {
            return Ok(());
        }
        state.check_tag(remote_id, expected_tag, concurrent_edit)?;
        let record = state
            .contacts
            .get(remote_id)
            .map(|c| c.record.clone())
            .unwrap_or_default();
        state.write(remote_id, record, true);
        Ok(())
    }
}
