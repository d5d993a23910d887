//! Directory of live connections.
//!
//! One `RwLock` guards the whole map. Lookups by user or session are linear
//! scans, which is fine at the expected connection counts.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::Connection;
use crate::domain::{ConnectionId, Counter, MetricsSink, SessionId, UserId};

pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    metrics: Arc<dyn MetricsSink>,
}

impl ConnectionRegistry {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    pub fn add(&self, connection: Arc<Connection>) {
        let count = {
            let mut connections = self.connections.write();
            if let Some(previous) = connections.insert(connection.id().clone(), connection.clone())
            {
                tracing::warn!("Connection '{}' was registered twice", previous.id());
            }
            connections.len()
        };
        self.metrics.increment(Counter::ConnectionsOpened);
        self.metrics.set_active_connections(count);
        tracing::debug!(
            "Connection '{}' of user '{}' registered ({} active)",
            connection.id(),
            connection.user_id(),
            count
        );
    }

    /// Remove a connection; `None` if it was not registered
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let (removed, count) = {
            let mut connections = self.connections.write();
            let removed = connections.remove(id);
            (removed, connections.len())
        };
        if removed.is_some() {
            self.metrics.increment(Counter::ConnectionsClosed);
            self.metrics.set_active_connections(count);
            tracing::debug!("Connection '{}' unregistered ({} active)", id, count);
        }
        removed
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    pub fn get_by_user(&self, user_id: &UserId) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .values()
            .filter(|c| c.user_id() == user_id)
            .cloned()
            .collect()
    }

    pub fn get_by_session(&self, session_id: &SessionId) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .values()
            .filter(|c| c.is_attached_to(session_id))
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.connections.read().len()
    }

    /// Fire the close signal of every connection (server shutdown)
    pub fn close_all(&self) -> usize {
        let connections: Vec<Arc<Connection>> =
            self.connections.read().values().cloned().collect();
        for connection in &connections {
            connection.close();
        }
        connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::metrics::InMemoryMetrics;

    fn registry() -> (ConnectionRegistry, Arc<InMemoryMetrics>) {
        let metrics = Arc::new(InMemoryMetrics::new());
        (ConnectionRegistry::new(metrics.clone()), metrics)
    }

    fn connection(user: &str) -> Arc<Connection> {
        let (conn, _rx) = Connection::new(
            ConnectionId::generate(),
            UserId::new(user.to_string()).unwrap(),
            0,
            4,
        );
        Arc::new(conn)
    }

    #[test]
    fn test_get_returns_connection_until_removed() {
        // テスト項目: 削除されるまで get で取得でき、削除後は取得できない
        // given (前提条件):
        let (registry, metrics) = registry();
        let conn = connection("alice");

        // when (操作):
        registry.add(conn.clone());
        let found = registry.get(conn.id());
        let removed = registry.remove(conn.id());

        // then (期待する結果):
        assert!(found.is_some_and(|c| Arc::ptr_eq(&c, &conn)));
        assert!(removed.is_some());
        assert!(registry.get(conn.id()).is_none());
        assert_eq!(registry.count(), 0);
        assert_eq!(metrics.get(Counter::ConnectionsOpened), 1);
        assert_eq!(metrics.get(Counter::ConnectionsClosed), 1);
    }

    #[test]
    fn test_remove_unknown_connection_is_noop() {
        // テスト項目: 未登録の接続を削除してもメトリクスは変化しない
        let (registry, metrics) = registry();

        assert!(registry.remove(&ConnectionId::generate()).is_none());
        assert_eq!(metrics.get(Counter::ConnectionsClosed), 0);
    }

    #[test]
    fn test_lookup_by_user_and_session() {
        // テスト項目: ユーザー・セッション単位で複数の接続を取得できる
        // given (前提条件): alice は 2 タブ、bob は 1 タブ
        let (registry, metrics) = registry();
        let alice_tab1 = connection("alice");
        let alice_tab2 = connection("alice");
        let bob = connection("bob");
        let session = SessionId::new("s1".to_string()).unwrap();
        alice_tab1.attach_session(session.clone());
        bob.attach_session(session.clone());
        for conn in [&alice_tab1, &alice_tab2, &bob] {
            registry.add(conn.clone());
        }

        // when (操作):
        let by_user = registry.get_by_user(&UserId::new("alice".to_string()).unwrap());
        let by_session = registry.get_by_session(&session);

        // then (期待する結果):
        assert_eq!(by_user.len(), 2);
        assert_eq!(by_session.len(), 2);
        assert!(by_session.iter().any(|c| Arc::ptr_eq(c, &bob)));
        assert!(!by_session.iter().any(|c| Arc::ptr_eq(c, &alice_tab2)));
        assert_eq!(registry.count(), 3);
        assert_eq!(metrics.snapshot().active_connections, 3);
    }

    #[test]
    fn test_close_all_fires_every_close_signal() {
        // テスト項目: close_all で全接続のクローズシグナルが発火する
        let (registry, _metrics) = registry();
        let a = connection("alice");
        let b = connection("bob");
        registry.add(a.clone());
        registry.add(b.clone());

        assert_eq!(registry.close_all(), 2);
        assert!(a.is_closed() && b.is_closed());
    }
}
