use crate::{types::Value, wire::CorrelationId};
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};
use tokio::sync::oneshot;

/// What a reply carries back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyPayload {
    pub error: Option<String>,
    pub result: Value,
}

/// In-flight outbound calls awaiting a reply, by correlation id.
///
/// Each entry is removed exactly once: by [`resolve`](Self::resolve) when its
/// reply arrives, or by [`abandon`](Self::abandon) / [`clear`](Self::clear).
#[derive(Debug, Default)]
pub(crate) struct CorrelationTable {
    pending: Mutex<HashMap<CorrelationId, oneshot::Sender<ReplyPayload>>>,
}

impl CorrelationTable {
    /// Inserts a fresh entry under a newly generated id.
    pub(crate) fn register(&self) -> (CorrelationId, oneshot::Receiver<ReplyPayload>) {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.lock();
        let mut id = CorrelationId::generate();
        while pending.contains_key(&id) {
            id = CorrelationId::generate();
        }
        pending.insert(id.clone(), tx);
        (id, rx)
    }

    /// Completes and removes the entry. Returns `false` if there was none.
    pub(crate) fn resolve(&self, id: &CorrelationId, reply: ReplyPayload) -> bool {
        let Some(tx) = self.lock().remove(id) else {
            return false;
        };
        // The caller may have stopped waiting; that is not our problem.
        let _ = tx.send(reply);
        true
    }

    pub(crate) fn abandon(&self, id: &CorrelationId) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Drops every pending completion; their callers observe a closed channel.
    pub(crate) fn clear(&self) -> usize {
        let mut pending = self.lock();
        let n = pending.len();
        pending.clear();
        n
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CorrelationId, oneshot::Sender<ReplyPayload>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(n: i64) -> ReplyPayload {
        ReplyPayload {
            error: None,
            result: Value::Int(n),
        }
    }

    #[tokio::test]
    async fn resolves_only_the_matching_entry() {
        let table = CorrelationTable::default();
        let (a, rx_a) = table.register();
        let (b, rx_b) = table.register();
        assert_ne!(a, b);

        assert!(table.resolve(&b, ok(2)));
        assert!(table.resolve(&a, ok(1)));
        assert_eq!(rx_a.await.unwrap(), ok(1));
        assert_eq!(rx_b.await.unwrap(), ok(2));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn unknown_and_duplicate_replies_are_ignored() {
        let table = CorrelationTable::default();
        let (a, _rx) = table.register();
        assert!(!table.resolve(&"nope".into(), ok(0)));
        assert_eq!(table.len(), 1);
        assert!(table.resolve(&a, ok(1)));
        assert!(!table.resolve(&a, ok(1)));
    }

    #[tokio::test]
    async fn clear_fails_waiters() {
        let table = CorrelationTable::default();
        let (_a, rx) = table.register();
        assert_eq!(table.clear(), 1);
        assert!(rx.await.is_err());
    }
}
