use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use crate::envelope::ReplyEnvelope;
use crate::error::DispatchError;

/// What happened to a reply handed to [`PendingTable::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The waiting caller received it.
    Delivered,
    /// No caller is waiting for this correlation id (never registered,
    /// already answered, or timed out).
    Unknown,
    /// A caller registered the id but stopped waiting before the reply came.
    Abandoned,
}

/// # PendingTable
///
/// Correlation id to waiting caller. Shared between the tasks that submit
/// requests and the task that routes replies.
///
/// Each entry holds the sending half of a oneshot channel; the caller holds
/// the receiving half. An entry leaves the table exactly once: when its reply
/// arrives, when the caller's wait times out or is dropped, or when the table
/// is closed.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<String, oneshot::Sender<ReplyEnvelope>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<ReplyEnvelope>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a caller for `correlation_id`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::DuplicateCorrelationId`] if the id is already waiting.
    pub fn register(&self, correlation_id: &str) -> Result<oneshot::Receiver<ReplyEnvelope>, DispatchError> {
        let mut entries = self.lock();
        match entries.entry(correlation_id.to_string()) {
            Entry::Occupied(_) => Err(DispatchError::DuplicateCorrelationId(correlation_id.to_string())),
            Entry::Vacant(slot) => {
                let (sender, receiver) = oneshot::channel();
                slot.insert(sender);
                Ok(receiver)
            }
        }
    }

    /// Hands `reply` to whoever waits on `correlation_id`, removing the entry.
    pub fn complete(&self, correlation_id: &str, reply: ReplyEnvelope) -> Completion {
        let Some(sender) = self.lock().remove(correlation_id) else {
            return Completion::Unknown;
        };
        match sender.send(reply) {
            Ok(()) => Completion::Delivered,
            Err(_) => Completion::Abandoned,
        }
    }

    /// Drops the entry for `correlation_id`, if any.
    pub fn remove(&self, correlation_id: &str) -> bool {
        self.lock().remove(correlation_id).is_some()
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.lock().contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry. Waiting callers observe a closed channel.
    pub fn close_all(&self) -> usize {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_complete_delivers_to_waiter() {
        let table = PendingTable::new();
        let receiver = table.register("a").unwrap();

        assert_eq!(table.complete("a", ReplyEnvelope::success(json!({"n": 1}))), Completion::Delivered);
        assert_eq!(receiver.await.unwrap().result, json!({"n": 1}));
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let table = PendingTable::new();
        let _receiver = table.register("a").unwrap();
        assert!(matches!(table.register("a"), Err(DispatchError::DuplicateCorrelationId(id)) if id == "a"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_second_completion_is_unknown() {
        let table = PendingTable::new();
        let _receiver = table.register("a").unwrap();
        assert_eq!(table.complete("a", ReplyEnvelope::success(json!({}))), Completion::Delivered);
        assert_eq!(table.complete("a", ReplyEnvelope::success(json!({}))), Completion::Unknown);
        assert_eq!(table.complete("never", ReplyEnvelope::error("x")), Completion::Unknown);
    }

    #[test]
    fn test_dropped_receiver_is_abandoned() {
        let table = PendingTable::new();
        drop(table.register("a").unwrap());
        assert_eq!(table.complete("a", ReplyEnvelope::success(json!({}))), Completion::Abandoned);
        assert!(!table.contains("a"));
    }

    #[tokio::test]
    async fn test_close_all_wakes_waiters() {
        let table = PendingTable::new();
        let first = table.register("a").unwrap();
        let second = table.register("b").unwrap();

        assert_eq!(table.close_all(), 2);
        assert!(first.await.is_err());
        assert!(second.await.is_err());
        assert!(table.is_empty());
    }
}
