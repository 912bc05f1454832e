//! Outstanding control requests awaiting a peer response.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::{Error, Result};

type Waiter = oneshot::Sender<Result<Value>>;

#[derive(Default)]
struct Table {
    waiters: HashMap<String, Waiter>,
    /// Set once the channel closes; later registrations fail immediately.
    closed: Option<Error>,
}

/// Correlation table for requests sent to the peer.
///
/// Each entry is resolved exactly once: by its response, by its caller
/// giving up, or by [`PendingRequests::close_all`].
#[derive(Default)]
pub(crate) struct PendingRequests {
    table: Mutex<Table>,
}

impl PendingRequests {
    /// Register a request id. Fails if the channel already closed.
    pub(crate) fn register(&self, id: &str) -> Result<oneshot::Receiver<Result<Value>>> {
        let mut table = self.lock()?;
        if let Some(reason) = &table.closed {
            return Err(reason.duplicate());
        }
        let (tx, rx) = oneshot::channel();
        table.waiters.insert(id.to_string(), tx);
        Ok(rx)
    }

    /// Resolve a request. Returns false if nobody was waiting for `id`.
    pub(crate) fn resolve(&self, id: &str, outcome: Result<Value>) -> bool {
        let waiter = match self.lock() {
            Ok(mut table) => table.waiters.remove(id),
            Err(_) => None,
        };
        match waiter {
            Some(tx) => {
                // The caller may have timed out between removal and send.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Forget a request whose caller stopped waiting.
    pub(crate) fn abandon(&self, id: &str) {
        if let Ok(mut table) = self.lock() {
            table.waiters.remove(id);
        }
    }

    /// Fail every outstanding request with `reason` and refuse new ones.
    ///
    /// Only the first call has an effect.
    pub(crate) fn close_all(&self, reason: Error) {
        let waiters: Vec<_> = {
            let Ok(mut table) = self.lock() else { return };
            if table.closed.is_some() {
                return;
            }
            table.closed = Some(reason.duplicate());
            table.waiters.drain().collect()
        };
        if !waiters.is_empty() {
            tracing::debug!(count = waiters.len(), reason = %reason, "failing pending control requests");
        }
        for (_, tx) in waiters {
            let _ = tx.send(Err(reason.duplicate()));
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().map(|t| t.closed.is_some()).unwrap_or(true)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().map(|t| t.waiters.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Table>> {
        self.table
            .lock()
            .map_err(|_| Error::peer_closed("pending request table poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolves_by_id_in_any_order() {
        let pending = PendingRequests::default();
        let first = pending.register("req_1").unwrap();
        let second = pending.register("req_2").unwrap();

        assert!(pending.resolve("req_2", Ok(json!(2))));
        assert!(pending.resolve("req_1", Ok(json!(1))));
        assert!(!pending.resolve("req_1", Ok(json!(1))));

        assert_eq!(second.await.unwrap().unwrap(), json!(2));
        assert_eq!(first.await.unwrap().unwrap(), json!(1));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn close_all_fails_waiters_once_and_rejects_new_ones() {
        let pending = PendingRequests::default();
        let waiter = pending.register("req_1").unwrap();

        pending.close_all(Error::peer_closed("query closed"));
        pending.close_all(Error::peer_closed("second close"));

        match waiter.await.unwrap() {
            Err(Error::PeerClosed { reason }) => assert_eq!(reason, "query closed"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(pending.is_closed());
        assert!(matches!(
            pending.register("req_2"),
            Err(Error::PeerClosed { reason }) if reason == "query closed"
        ));
    }

    #[test]
    fn abandoned_requests_are_unmatched() {
        let pending = PendingRequests::default();
        let _rx = pending.register("req_1").unwrap();
        pending.abandon("req_1");
        assert!(!pending.resolve("req_1", Ok(Value::Null)));
    }
}
