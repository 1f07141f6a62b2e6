//! Connection registry.
//!
//! The authoritative set of live connections of this process, kept as two mutually consistent
//! mappings (connection id → entry with user id, user id → connection id) plus the set of every
//! user seen since startup. Owned by the broadcast engine; never shared across tasks.

use std::collections::{BTreeSet, HashMap};

use hiroba_shared::time::now_millis;
use thiserror::Error;
use tokio::{sync::mpsc, time::Instant};

use crate::domain::{ConnectionId, UserId};

use super::CloseSignal;

/// Bounded outbound queue of encoded frames.
pub type OutboundSender = mpsc::Sender<String>;

/// One live connection as seen by the engine.
#[derive(Debug)]
pub struct ConnectionEntry {
    pub id: ConnectionId,
    pub outbound: OutboundSender,
    pub closer: CloseSignal,
    /// Unset until the connection identifies.
    pub user_id: Option<UserId>,
    /// Unix milliseconds.
    pub connected_at: i64,
    pub last_activity: Instant,
}

impl ConnectionEntry {
    pub fn new(id: ConnectionId, outbound: OutboundSender, closer: CloseSignal) -> Self {
        Self {
            id,
            outbound,
            closer,
            user_id: None,
            connected_at: now_millis(),
            last_activity: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("connection {0} is not registered")]
    NotRegistered(ConnectionId),
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),
}

/// Result of binding a user id to a connection.
#[derive(Debug)]
pub enum BindOutcome {
    /// The connection was already bound to this user.
    AlreadyBound,
    Bound {
        /// Another connection previously bound to the same user; already removed from the
        /// registry and left for the caller to close.
        displaced: Option<ConnectionEntry>,
        /// The user this connection was bound to before, if it re-identified as someone else.
        previous_user: Option<UserId>,
    },
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    users: HashMap<UserId, ConnectionId>,
    known_users: BTreeSet<UserId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: ConnectionEntry) -> Result<(), RegistryError> {
        if self.connections.contains_key(&entry.id) {
            return Err(RegistryError::AlreadyRegistered(entry.id));
        }
        self.connections.insert(entry.id, entry);
        Ok(())
    }

    /// Remove a connection. Removing an unknown id is a no-op.
    pub fn unregister(&mut self, id: &ConnectionId) -> Option<ConnectionEntry> {
        let entry = self.connections.remove(id)?;
        if let Some(user_id) = &entry.user_id {
            if self.users.get(user_id) == Some(id) {
                self.users.remove(user_id);
            }
        }
        Some(entry)
    }

    /// Bind `user_id` to the connection. A user maps to at most one connection: an existing
    /// binding on another connection is replaced and that connection is removed.
    pub fn bind(
        &mut self,
        id: &ConnectionId,
        user_id: UserId,
    ) -> Result<BindOutcome, RegistryError> {
        let entry = self
            .connections
            .get(id)
            .ok_or(RegistryError::NotRegistered(*id))?;
        if entry.user_id.as_ref() == Some(&user_id) {
            return Ok(BindOutcome::AlreadyBound);
        }

        let previous_user = entry.user_id.clone();
        if let Some(previous) = &previous_user {
            if self.users.get(previous) == Some(id) {
                self.users.remove(previous);
            }
        }

        let displaced = match self.users.get(&user_id).copied() {
            Some(other) if other != *id => self.unregister(&other),
            _ => None,
        };

        if let Some(entry) = self.connections.get_mut(id) {
            entry.user_id = Some(user_id.clone());
        }
        self.users.insert(user_id.clone(), *id);
        self.known_users.insert(user_id);

        Ok(BindOutcome::Bound {
            displaced,
            previous_user,
        })
    }

    /// Drop the connection's identity, keeping the connection. Returns the released user.
    pub fn unbind(&mut self, id: &ConnectionId) -> Option<UserId> {
        let user_id = self.connections.get_mut(id)?.user_id.take()?;
        if self.users.get(&user_id) == Some(id) {
            self.users.remove(&user_id);
        }
        Some(user_id)
    }

    pub fn lookup_by_user(&self, user_id: &UserId) -> Option<&ConnectionEntry> {
        self.users
            .get(user_id)
            .and_then(|id| self.connections.get(id))
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&ConnectionEntry> {
        self.connections.get(id)
    }

    /// Record inbound activity on the connection.
    pub fn touch(&mut self, id: &ConnectionId, now: Instant) -> bool {
        match self.connections.get_mut(id) {
            Some(entry) => {
                entry.last_activity = now;
                true
            }
            None => false,
        }
    }

    /// Snapshot of all live connection ids.
    pub fn all_connections(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ConnectionEntry> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Every user identified since process start.
    pub fn known_users(&self) -> &BTreeSet<UserId> {
        &self.known_users
    }

    /// Remove every connection.
    pub fn drain(&mut self) -> Vec<ConnectionEntry> {
        self.users.clear();
        self.connections.drain().map(|(_, entry)| entry).collect()
    }

    /// Both mappings agree with each other.
    pub fn is_consistent(&self) -> bool {
        let forward = self.users.iter().all(|(user_id, id)| {
            self.connections
                .get(id)
                .is_some_and(|entry| entry.user_id.as_ref() == Some(user_id))
        });
        let backward = self.connections.values().all(|entry| match &entry.user_id {
            Some(user_id) => self.users.get(user_id) == Some(&entry.id),
            None => true,
        });
        forward && backward
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - register / unregister / bind / unbind / lookup_by_user
    // - 2 つのマッピングが常に整合していること
    //
    // 【なぜこのテストが必要か】
    // - レジストリはブロードキャストの配信先を決める唯一の情報源
    // - 同一ユーザーの二重接続で古い接続が孤立しないことを保証する
    // ========================================

    fn entry() -> ConnectionEntry {
        let (tx, _rx) = mpsc::channel(4);
        ConnectionEntry::new(ConnectionId::generate(), tx, CloseSignal::new())
    }

    fn user(id: &str) -> UserId {
        UserId::new(id.to_string()).unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        // テスト項目: 登録した接続を ID で取得できる
        // given (前提条件):
        let mut registry = ConnectionRegistry::new();
        let conn = entry();
        let id = conn.id;

        // when (操作):
        registry.register(conn).unwrap();

        // then (期待する結果):
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&id).is_some());
        assert!(registry.get(&id).unwrap().user_id.is_none());
    }

    #[test]
    fn test_register_twice_is_error() {
        // テスト項目: 同じ接続 ID の二重登録はエラー
        // given (前提条件):
        let mut registry = ConnectionRegistry::new();
        let conn = entry();
        let duplicate = ConnectionEntry::new(conn.id, conn.outbound.clone(), CloseSignal::new());
        let id = conn.id;
        registry.register(conn).unwrap();

        // when (操作):
        let result = registry.register(duplicate);

        // then (期待する結果):
        assert_eq!(result, Err(RegistryError::AlreadyRegistered(id)));
    }

    #[test]
    fn test_unregister_is_idempotent() {
        // テスト項目: 削除済みの接続を再度削除しても何も起きない
        // given (前提条件):
        let mut registry = ConnectionRegistry::new();
        let conn = entry();
        let id = conn.id;
        registry.register(conn).unwrap();

        // when (操作):
        let first = registry.unregister(&id);
        let second = registry.unregister(&id);

        // then (期待する結果):
        assert!(first.is_some());
        assert!(second.is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_all_connections_lists_live_ids() {
        // テスト項目: all_connections は登録中の接続 ID だけを返す
        // given (前提条件):
        let mut registry = ConnectionRegistry::new();
        let (a, b, c) = (entry(), entry(), entry());
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);
        registry.register(a).unwrap();
        registry.register(b).unwrap();
        registry.register(c).unwrap();
        registry.bind(&b_id, user("bob")).unwrap();

        // when (操作):
        registry.unregister(&a_id);
        let ids: std::collections::HashSet<ConnectionId> =
            registry.all_connections().into_iter().collect();

        // then (期待する結果):
        assert_eq!(ids, std::collections::HashSet::from([b_id, c_id]));
        assert!(ConnectionRegistry::new().all_connections().is_empty());
    }

    #[test]
    fn test_bind_maps_both_directions() {
        // テスト項目: bind で両方向のマッピングが作られ、既知ユーザーに追加される
        // given (前提条件):
        let mut registry = ConnectionRegistry::new();
        let conn = entry();
        let id = conn.id;
        registry.register(conn).unwrap();

        // when (操作):
        let outcome = registry.bind(&id, user("alice")).unwrap();

        // then (期待する結果):
        assert!(matches!(
            outcome,
            BindOutcome::Bound {
                displaced: None,
                previous_user: None
            }
        ));
        assert_eq!(registry.lookup_by_user(&user("alice")).unwrap().id, id);
        assert!(registry.known_users().contains(&user("alice")));
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_bind_same_user_again_is_noop() {
        // テスト項目: 同じ接続で同じユーザーを再度 bind しても変化しない
        // given (前提条件):
        let mut registry = ConnectionRegistry::new();
        let conn = entry();
        let id = conn.id;
        registry.register(conn).unwrap();
        registry.bind(&id, user("alice")).unwrap();

        // when (操作):
        let outcome = registry.bind(&id, user("alice")).unwrap();

        // then (期待する結果):
        assert!(matches!(outcome, BindOutcome::AlreadyBound));
    }

    #[test]
    fn test_bind_unknown_connection_is_error() {
        // テスト項目: 未登録の接続への bind はエラー
        // given (前提条件):
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::generate();

        // when (操作):
        let result = registry.bind(&id, user("alice"));

        // then (期待する結果):
        assert!(matches!(result, Err(RegistryError::NotRegistered(_))));
    }

    #[test]
    fn test_duplicate_identification_displaces_older_connection() {
        // テスト項目: 同一ユーザーが別接続で識別すると古い接続が取り除かれる
        // given (前提条件):
        let mut registry = ConnectionRegistry::new();
        let old = entry();
        let new = entry();
        let (old_id, new_id) = (old.id, new.id);
        registry.register(old).unwrap();
        registry.register(new).unwrap();
        registry.bind(&old_id, user("alice")).unwrap();

        // when (操作):
        let outcome = registry.bind(&new_id, user("alice")).unwrap();

        // then (期待する結果):
        match outcome {
            BindOutcome::Bound {
                displaced: Some(displaced),
                previous_user: None,
            } => assert_eq!(displaced.id, old_id),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(registry.get(&old_id).is_none());
        assert_eq!(registry.lookup_by_user(&user("alice")).unwrap().id, new_id);
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_rebind_to_other_user_reports_previous() {
        // テスト項目: 別ユーザーとして再識別すると以前のユーザーが返される
        // given (前提条件):
        let mut registry = ConnectionRegistry::new();
        let conn = entry();
        let id = conn.id;
        registry.register(conn).unwrap();
        registry.bind(&id, user("alice")).unwrap();

        // when (操作):
        let outcome = registry.bind(&id, user("bob")).unwrap();

        // then (期待する結果):
        assert!(matches!(
            outcome,
            BindOutcome::Bound {
                displaced: None,
                previous_user: Some(ref previous)
            } if previous == &user("alice")
        ));
        assert!(registry.lookup_by_user(&user("alice")).is_none());
        assert!(registry.known_users().contains(&user("alice")));
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_unbind_keeps_connection_and_known_user() {
        // テスト項目: unbind で接続は残り、ユーザーは既知ユーザーとして残る
        // given (前提条件):
        let mut registry = ConnectionRegistry::new();
        let conn = entry();
        let id = conn.id;
        registry.register(conn).unwrap();
        registry.bind(&id, user("alice")).unwrap();

        // when (操作):
        let released = registry.unbind(&id);

        // then (期待する結果):
        assert_eq!(released, Some(user("alice")));
        assert!(registry.get(&id).is_some());
        assert!(registry.lookup_by_user(&user("alice")).is_none());
        assert!(registry.known_users().contains(&user("alice")));
        assert_eq!(registry.unbind(&id), None);
    }

    #[test]
    fn test_unregister_identified_removes_user_mapping() {
        // テスト項目: 識別済み接続の削除でユーザー側のマッピングも消える
        // given (前提条件):
        let mut registry = ConnectionRegistry::new();
        let conn = entry();
        let id = conn.id;
        registry.register(conn).unwrap();
        registry.bind(&id, user("alice")).unwrap();

        // when (操作):
        let removed = registry.unregister(&id).unwrap();

        // then (期待する結果):
        assert_eq!(removed.user_id, Some(user("alice")));
        assert!(registry.lookup_by_user(&user("alice")).is_none());
        assert!(registry.is_consistent());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register(usize),
        Unregister(usize),
        Bind(usize, usize),
        Unbind(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..6usize).prop_map(Op::Register),
            (0..6usize).prop_map(Op::Unregister),
            (0..6usize, 0..3usize).prop_map(|(c, u)| Op::Bind(c, u)),
            (0..6usize).prop_map(Op::Unbind),
        ]
    }

    proptest! {
        #[test]
        fn mappings_stay_consistent(ops in proptest::collection::vec(op_strategy(), 1..64)) {
            let ids: Vec<ConnectionId> = (0..6).map(|_| ConnectionId::generate()).collect();
            let users = [user("alice"), user("bob"), user("carol")];
            let mut registry = ConnectionRegistry::new();

            for op in ops {
                match op {
                    Op::Register(c) => {
                        let (tx, _rx) = mpsc::channel(1);
                        let _ = registry.register(ConnectionEntry::new(ids[c], tx, CloseSignal::new()));
                    }
                    Op::Unregister(c) => {
                        registry.unregister(&ids[c]);
                    }
                    Op::Bind(c, u) => {
                        let _ = registry.bind(&ids[c], users[u].clone());
                    }
                    Op::Unbind(c) => {
                        registry.unbind(&ids[c]);
                    }
                }
                prop_assert!(registry.is_consistent());
                for u in &users {
                    let bound = registry
                        .entries()
                        .filter(|entry| entry.user_id.as_ref() == Some(u))
                        .count();
                    prop_assert!(bound <= 1);
                }
            }
        }
    }
}
