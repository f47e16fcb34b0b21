//! Live-connection registry used for graceful shutdown.
//!
//! Connections insert themselves on `Connected` and remove themselves on
//! `Disposed`. The group only holds weak references: it can ask a
//! connection to close, it never keeps one alive.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::net::connection::{ConnectionId, ConnectionIdentity, ConnectionLifecycle};

struct Member {
    identity: ConnectionIdentity,
    lifecycle: Weak<ConnectionLifecycle>,
}

#[derive(Default)]
struct GroupInner {
    members: DashMap<ConnectionId, Member>,
    emptied: Notify,
}

/// Thread-safe set of live connections.
#[derive(Clone, Default)]
pub struct ConnectionGroup {
    inner: Arc<GroupInner>,
}

impl ConnectionGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, lifecycle: &Arc<ConnectionLifecycle>) {
        self.inner.members.insert(
            lifecycle.id(),
            Member {
                identity: lifecycle.identity().clone(),
                lifecycle: Arc::downgrade(lifecycle),
            },
        );
    }

    pub(crate) fn remove(&self, id: ConnectionId) {
        if self.inner.members.remove(&id).is_some() && self.inner.members.is_empty() {
            self.inner.emptied.notify_waiters();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.members.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.members.contains_key(&id)
    }

    /// Snapshot of the identities currently tracked.
    pub fn identities(&self) -> Vec<ConnectionIdentity> {
        self.inner
            .members
            .iter()
            .map(|entry| entry.value().identity.clone())
            .collect()
    }

    /// Wait until no connection is tracked.
    pub async fn wait_empty(&self) {
        loop {
            let notified = self.inner.emptied.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Ask every tracked connection to close. Returns how many were signalled.
    pub fn close_all(&self) -> usize {
        // collect first so no shard lock is held while signalling
        let live: Vec<Arc<ConnectionLifecycle>> = self
            .inner
            .members
            .iter()
            .filter_map(|entry| entry.value().lifecycle.upgrade())
            .collect();

        for lifecycle in &live {
            lifecycle.request_close();
        }
        tracing::debug!(count = live.len(), "Requested close of all group connections");
        live.len()
    }

    /// Close every connection and wait for the group to empty.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        self.close_all();
        tokio::time::timeout(timeout, self.wait_empty())
            .await
            .map_err(|_| Error::Timeout {
                operation: "connection group close",
                timeout,
            })
    }
}

impl std::fmt::Debug for ConnectionGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGroup")
            .field("live", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::address::Endpoint;
    use crate::net::connection::Observers;

    fn lifecycle(group: &ConnectionGroup) -> Arc<ConnectionLifecycle> {
        ConnectionLifecycle::new(
            ConnectionIdentity::new(
                Endpoint::Inet("127.0.0.1:1".parse().unwrap()),
                Endpoint::Inet("127.0.0.1:2".parse().unwrap()),
            ),
            Observers::new(),
            Some(group.clone()),
        )
    }

    #[test]
    fn membership_follows_lifecycle() {
        let group = ConnectionGroup::new();
        let first = lifecycle(&group);
        let second = lifecycle(&group);
        assert!(group.is_empty());

        first.connected();
        second.connected();
        assert_eq!(group.len(), 2);
        assert!(group.contains(first.id()));

        first.dispose();
        assert_eq!(group.len(), 1);
        assert_eq!(group.identities()[0].id, second.id());

        drop(second);
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn wait_empty_returns_after_last_disposal() {
        let group = ConnectionGroup::new();
        let conn = lifecycle(&group);
        conn.connected();

        let waiter = {
            let group = group.clone();
            tokio::spawn(async move { group.wait_empty().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        conn.dispose();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn close_all_signals_members() {
        let group = ConnectionGroup::new();
        let conn = lifecycle(&group);
        conn.connected();

        let requested = conn.close_requested();
        assert_eq!(group.close_all(), 1);
        tokio::time::timeout(Duration::from_secs(1), requested)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn close_times_out_when_members_linger() {
        let group = ConnectionGroup::new();
        let conn = lifecycle(&group);
        conn.connected();

        let err = group.close(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        drop(conn);
        group.close(Duration::from_millis(20)).await.unwrap();
    }
}
