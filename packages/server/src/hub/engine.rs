//! Broadcast engine.
//!
//! A single task owns the [`ConnectionRegistry`] and consumes [`HubEvent`]s from a bounded
//! queue, so registration, identification, removal and fan-out are totally ordered. Fan-out
//! never blocks on a connection: a full outbound queue evicts that connection as a slow
//! consumer. Presence writes go through a [`PresenceWriter`], so a slow or hung presence store
//! never stalls fan-out.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use tokio::{
    sync::{Notify, mpsc, oneshot},
    time::Instant,
};

use crate::{
    config::HubConfig,
    domain::{ConnectionId, OutboundMessage, PresenceStatus, PresenceStore, UserId},
    infrastructure::dto::websocket::encode_outbound,
};

use super::{
    CloseSignal, HubError,
    presence::{PresenceWorker, PresenceWriter},
    registry::{BindOutcome, ConnectionEntry, ConnectionRegistry, OutboundSender},
};

/// Commands accepted by the engine.
#[derive(Debug)]
pub enum HubEvent {
    Register(ConnectionEntry),
    Identify {
        conn_id: ConnectionId,
        user_id: UserId,
    },
    Release {
        conn_id: ConnectionId,
    },
    Touch {
        conn_id: ConnectionId,
    },
    Unregister {
        conn_id: ConnectionId,
    },
    Broadcast {
        message: OutboundMessage,
        exclude: Option<ConnectionId>,
    },
    /// Frame forwarded on behalf of a connection; dropped once that connection is gone.
    Relay {
        from: ConnectionId,
        message: OutboundMessage,
        echo: bool,
    },
    SendTo {
        conn_id: ConnectionId,
        message: OutboundMessage,
    },
    Snapshot {
        reply: oneshot::Sender<HubSnapshot>,
    },
    FlushPresence {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Fan-out counters since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub broadcasts: u64,
    pub delivered_frames: u64,
    pub slow_consumers_dropped: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub user_id: Option<UserId>,
    /// Unix milliseconds.
    pub connected_at: i64,
    pub last_activity: Instant,
}

/// Point-in-time copy of the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HubSnapshot {
    pub connections: Vec<ConnectionSummary>,
    pub known_users: Vec<UserId>,
    pub stats: HubStats,
}

impl HubSnapshot {
    /// Identified users of this process with their last activity.
    pub fn live_users(&self) -> HashMap<UserId, Instant> {
        self.connections
            .iter()
            .filter_map(|conn| {
                conn.user_id
                    .as_ref()
                    .map(|user_id| (user_id.clone(), conn.last_activity))
            })
            .collect()
    }

    pub fn identified_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|conn| conn.user_id.is_some())
            .count()
    }
}

/// Cloneable entry point to the engine.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.tx.send(event).await.map_err(|_| HubError::EngineStopped)
    }

    pub async fn register(
        &self,
        id: ConnectionId,
        outbound: OutboundSender,
        closer: CloseSignal,
    ) -> Result<(), HubError> {
        self.send(HubEvent::Register(ConnectionEntry::new(id, outbound, closer)))
            .await
    }

    pub async fn identify(&self, conn_id: ConnectionId, user_id: UserId) -> Result<(), HubError> {
        self.send(HubEvent::Identify { conn_id, user_id }).await
    }

    pub async fn release(&self, conn_id: ConnectionId) -> Result<(), HubError> {
        self.send(HubEvent::Release { conn_id }).await
    }

    pub async fn touch(&self, conn_id: ConnectionId) -> Result<(), HubError> {
        self.send(HubEvent::Touch { conn_id }).await
    }

    pub async fn unregister(&self, conn_id: ConnectionId) -> Result<(), HubError> {
        self.send(HubEvent::Unregister { conn_id }).await
    }

    pub async fn broadcast(
        &self,
        message: OutboundMessage,
        exclude: Option<ConnectionId>,
    ) -> Result<(), HubError> {
        self.send(HubEvent::Broadcast { message, exclude }).await
    }

    /// Fan out `message` from `from`, to everyone when `echo`, otherwise to everyone else.
    pub async fn relay(
        &self,
        from: ConnectionId,
        message: OutboundMessage,
        echo: bool,
    ) -> Result<(), HubError> {
        self.send(HubEvent::Relay {
            from,
            message,
            echo,
        })
        .await
    }

    pub async fn send_to(
        &self,
        conn_id: ConnectionId,
        message: OutboundMessage,
    ) -> Result<(), HubError> {
        self.send(HubEvent::SendTo { conn_id, message }).await
    }

    pub async fn snapshot(&self) -> Result<HubSnapshot, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::Snapshot { reply }).await?;
        rx.await.map_err(|_| HubError::EngineStopped)
    }

    /// Resolves once every presence write queued so far has been applied or timed out.
    #[cfg(test)]
    pub(crate) async fn flush_presence(&self) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::FlushPresence { reply }).await?;
        rx.await.map_err(|_| HubError::EngineStopped)
    }

    /// Ask the engine to close every connection and stop.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        self.send(HubEvent::Shutdown).await
    }

    /// Resolves once the engine has stopped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

pub struct BroadcastEngine {
    registry: ConnectionRegistry,
    events: mpsc::Receiver<HubEvent>,
    presence: PresenceWriter,
    presence_worker: Option<PresenceWorker>,
    roster_trigger: Arc<Notify>,
    stats: HubStats,
    /// Users whose last connection went away; settled after each event.
    departures: VecDeque<UserId>,
}

impl BroadcastEngine {
    pub fn new(
        config: &HubConfig,
        store: Arc<dyn PresenceStore>,
        roster_trigger: Arc<Notify>,
    ) -> (Self, HubHandle) {
        let (tx, events) = mpsc::channel(config.engine_queue_capacity);
        let (presence, presence_worker) =
            PresenceWriter::new(store, config.engine_queue_capacity, config.store_timeout);
        let engine = Self {
            registry: ConnectionRegistry::new(),
            events,
            presence,
            presence_worker: Some(presence_worker),
            roster_trigger,
            stats: HubStats::default(),
            departures: VecDeque::new(),
        };
        (engine, HubHandle { tx })
    }

    /// Consume events until shutdown or until every handle is dropped.
    ///
    /// Returns after the presence worker has applied the final offline writes.
    pub async fn run(mut self) {
        tracing::info!("Broadcast engine started");
        let worker = self.presence_worker.take().map(|w| tokio::spawn(w.run()));
        while let Some(event) = self.events.recv().await {
            if matches!(event, HubEvent::Shutdown) {
                self.shutdown();
                break;
            }
            self.handle(event);
            self.settle_departures();
        }
        // Closes the event queue and the presence queue.
        drop(self);
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!("Presence worker failed: {}", e);
            }
        }
        tracing::info!("Broadcast engine stopped");
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(entry) => {
                let conn_id = entry.id;
                match self.registry.register(entry) {
                    Ok(()) => tracing::info!(
                        conn_id = %conn_id,
                        connections = self.registry.len(),
                        "Connection registered"
                    ),
                    Err(e) => tracing::warn!("Register rejected: {}", e),
                }
            }
            HubEvent::Identify { conn_id, user_id } => self.identify(conn_id, user_id),
            HubEvent::Release { conn_id } => {
                if let Some(user_id) = self.registry.unbind(&conn_id) {
                    tracing::info!(conn_id = %conn_id, user_id = %user_id, "Identity released");
                    self.departures.push_back(user_id);
                }
            }
            HubEvent::Touch { conn_id } => {
                if !self.registry.touch(&conn_id, Instant::now()) {
                    return;
                }
                let bound = self.registry.get(&conn_id).and_then(|e| e.user_id.clone());
                if let Some(user_id) = bound {
                    self.presence.set_online(user_id);
                }
            }
            HubEvent::Unregister { conn_id } => {
                if let Some(entry) = self.registry.unregister(&conn_id) {
                    tracing::info!(
                        conn_id = %conn_id,
                        connections = self.registry.len(),
                        "Connection unregistered"
                    );
                    entry.closer.close();
                    self.departures.extend(entry.user_id);
                }
            }
            HubEvent::Broadcast { message, exclude } => self.fan_out(&message, exclude),
            HubEvent::Relay {
                from,
                message,
                echo,
            } => {
                if self.registry.get(&from).is_none() {
                    tracing::debug!(conn_id = %from, "Dropping frame from a removed connection");
                    return;
                }
                self.fan_out(&message, (!echo).then_some(from));
            }
            HubEvent::SendTo { conn_id, message } => self.send_to(conn_id, &message),
            HubEvent::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            HubEvent::FlushPresence { reply } => self.presence.flush(reply),
            HubEvent::Shutdown => {}
        }
    }

    fn identify(&mut self, conn_id: ConnectionId, user_id: UserId) {
        let outcome = match self.registry.bind(&conn_id, user_id.clone()) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!("Identify ignored: {}", e);
                return;
            }
        };

        match outcome {
            BindOutcome::AlreadyBound => {
                tracing::debug!(conn_id = %conn_id, user_id = %user_id, "Already identified");
            }
            BindOutcome::Bound {
                displaced,
                previous_user,
            } => {
                if let Some(old) = displaced {
                    tracing::info!(
                        conn_id = %old.id,
                        user_id = %user_id,
                        "Closing connection replaced by a newer one"
                    );
                    old.closer.close();
                }
                self.departures.extend(previous_user);

                tracing::info!(conn_id = %conn_id, user_id = %user_id, "Connection identified");
                self.presence.set_online(user_id.clone());
                self.fan_out(&OutboundMessage::UserJoined { user_id }, None);
                self.roster_trigger.notify_one();
            }
        }
    }

    fn settle_departures(&mut self) {
        while let Some(user_id) = self.departures.pop_front() {
            if self.registry.lookup_by_user(&user_id).is_some() {
                continue;
            }
            self.presence.set_offline(user_id.clone());
            tracing::info!(user_id = %user_id, "User left");
            self.fan_out(
                &OutboundMessage::UserLeft {
                    user_id: user_id.clone(),
                },
                None,
            );
            self.fan_out(
                &OutboundMessage::StatusChanged {
                    user_id,
                    status: PresenceStatus::Offline,
                },
                None,
            );
            self.roster_trigger.notify_one();
        }
    }

    fn fan_out(&mut self, message: &OutboundMessage, exclude: Option<ConnectionId>) {
        if message.is_heartbeat() {
            tracing::debug!("Refusing to fan out a heartbeat");
            return;
        }
        let frame = match encode_outbound(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(kind = message.kind(), "Failed to encode frame: {}", e);
                return;
            }
        };

        self.stats.broadcasts += 1;
        let mut evicted = Vec::new();
        for entry in self.registry.entries() {
            if Some(entry.id) == exclude {
                continue;
            }
            match entry.outbound.try_send(frame.clone()) {
                Ok(()) => self.stats.delivered_frames += 1,
                Err(mpsc::error::TrySendError::Full(_)) => evicted.push((entry.id, true)),
                Err(mpsc::error::TrySendError::Closed(_)) => evicted.push((entry.id, false)),
            }
        }
        tracing::debug!(
            kind = message.kind(),
            recipients = self.registry.len(),
            "Fan-out"
        );

        for (conn_id, slow) in evicted {
            self.evict(conn_id, slow);
        }
    }

    fn send_to(&mut self, conn_id: ConnectionId, message: &OutboundMessage) {
        let Some(entry) = self.registry.get(&conn_id) else {
            return;
        };
        let frame = match encode_outbound(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(kind = message.kind(), "Failed to encode frame: {}", e);
                return;
            }
        };
        let result = entry.outbound.try_send(frame);
        match result {
            Ok(()) => self.stats.delivered_frames += 1,
            Err(mpsc::error::TrySendError::Full(_)) => self.evict(conn_id, true),
            Err(mpsc::error::TrySendError::Closed(_)) => self.evict(conn_id, false),
        }
    }

    fn evict(&mut self, conn_id: ConnectionId, slow: bool) {
        let Some(entry) = self.registry.unregister(&conn_id) else {
            return;
        };
        if slow {
            self.stats.slow_consumers_dropped += 1;
            tracing::warn!(conn_id = %conn_id, "Dropping slow consumer");
        } else {
            tracing::debug!(conn_id = %conn_id, "Outbound queue closed, removing connection");
        }
        entry.closer.close();
        self.departures.extend(entry.user_id);
    }

    fn snapshot(&self) -> HubSnapshot {
        let mut connections: Vec<ConnectionSummary> = self
            .registry
            .entries()
            .map(|entry| ConnectionSummary {
                id: entry.id,
                user_id: entry.user_id.clone(),
                connected_at: entry.connected_at,
                last_activity: entry.last_activity,
            })
            .collect();
        connections.sort_by_key(|conn| conn.connected_at);

        HubSnapshot {
            connections,
            known_users: self.registry.known_users().iter().cloned().collect(),
            stats: self.stats,
        }
    }

    fn shutdown(&mut self) {
        let entries = self.registry.drain();
        tracing::info!(connections = entries.len(), "Closing all connections");
        for entry in entries {
            entry.closer.close();
            if let Some(user_id) = entry.user_id {
                self.presence.set_offline(user_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::PresenceError, infrastructure::presence::InMemoryPresenceStore};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - BroadcastEngine のイベント処理（登録・識別・削除・ファンアウト）
    // - 遅いコンシューマーの切断、二重識別、明示的な退出
    //
    // 【なぜこのテストが必要か】
    // - 配信の順序と除外ルールはエンジンの一点でのみ決まる
    // - 切断時の user_leave / status_change が一度だけ届くことを保証する
    //
    // 【どのような状況を想定しているか】
    // - 正常系: 複数接続へのブロードキャスト
    // - 異常系: キューが満杯の接続、Presence Store の障害
    // ========================================

    struct Conn {
        id: ConnectionId,
        rx: mpsc::Receiver<String>,
        closer: CloseSignal,
    }

    struct FailingStore;

    #[async_trait]
    impl PresenceStore for FailingStore {
        async fn set_online(&self, _: &UserId) -> Result<(), PresenceError> {
            Err(PresenceError::Backend("unavailable".to_string()))
        }
        async fn set_offline(&self, _: &UserId) -> Result<(), PresenceError> {
            Err(PresenceError::Backend("unavailable".to_string()))
        }
        async fn get_status(&self, _: &UserId) -> Result<PresenceStatus, PresenceError> {
            Err(PresenceError::Backend("unavailable".to_string()))
        }
        async fn get_all_statuses(
            &self,
        ) -> Result<HashMap<UserId, PresenceStatus>, PresenceError> {
            Err(PresenceError::Backend("unavailable".to_string()))
        }
    }

    struct HangingStore;

    #[async_trait]
    impl PresenceStore for HangingStore {
        async fn set_online(&self, _: &UserId) -> Result<(), PresenceError> {
            std::future::pending().await
        }
        async fn set_offline(&self, _: &UserId) -> Result<(), PresenceError> {
            std::future::pending().await
        }
        async fn get_status(&self, _: &UserId) -> Result<PresenceStatus, PresenceError> {
            std::future::pending().await
        }
        async fn get_all_statuses(
            &self,
        ) -> Result<HashMap<UserId, PresenceStatus>, PresenceError> {
            std::future::pending().await
        }
    }

    fn user(id: &str) -> UserId {
        UserId::new(id.to_string()).unwrap()
    }

    fn start(store: Arc<dyn PresenceStore>) -> (HubHandle, Arc<Notify>) {
        let trigger = Arc::new(Notify::new());
        let (engine, handle) = BroadcastEngine::new(&HubConfig::default(), store, trigger.clone());
        tokio::spawn(engine.run());
        (handle, trigger)
    }

    fn start_inmemory() -> (HubHandle, Arc<InMemoryPresenceStore>) {
        let store = Arc::new(InMemoryPresenceStore::new(Duration::from_secs(300)));
        let (handle, _) = start(store.clone());
        (handle, store)
    }

    async fn connect(handle: &HubHandle, capacity: usize) -> Conn {
        let (tx, rx) = mpsc::channel(capacity);
        let id = ConnectionId::generate();
        let closer = CloseSignal::new();
        handle.register(id, tx, closer.clone()).await.unwrap();
        Conn { id, rx, closer }
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    fn chat(text: &str) -> OutboundMessage {
        let mut payload = serde_json::Map::new();
        payload.insert("type".to_string(), Value::from("message"));
        payload.insert("text".to_string(), Value::from(text));
        OutboundMessage::ChatText {
            sender: None,
            payload,
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone_but_excluded() {
        // テスト項目: 除外指定した接続以外の全員に配信される
        // given (前提条件):
        let (handle, _store) = start_inmemory();
        let mut a = connect(&handle, 8).await;
        let mut b = connect(&handle, 8).await;
        let mut c = connect(&handle, 8).await;

        // when (操作):
        handle.broadcast(chat("hi"), Some(a.id)).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();

        // then (期待する結果):
        assert!(drain(&mut a.rx).is_empty());
        assert_eq!(drain(&mut b.rx).len(), 1);
        assert_eq!(drain(&mut c.rx)[0]["text"], "hi");
        assert_eq!(snapshot.stats.broadcasts, 1);
        assert_eq!(snapshot.stats.delivered_frames, 2);
    }

    #[tokio::test]
    async fn test_heartbeat_is_never_fanned_out() {
        // テスト項目: heartbeat はファンアウトされない
        // given (前提条件):
        let (handle, _store) = start_inmemory();
        let mut a = connect(&handle, 8).await;

        // when (操作):
        handle
            .broadcast(OutboundMessage::Heartbeat, None)
            .await
            .unwrap();
        let snapshot = handle.snapshot().await.unwrap();

        // then (期待する結果):
        assert!(drain(&mut a.rx).is_empty());
        assert_eq!(snapshot.stats.broadcasts, 0);
    }

    #[tokio::test]
    async fn test_identify_announces_join_and_records_presence() {
        // テスト項目: 識別で user_join が全員に配信され、Presence が online になる
        // given (前提条件):
        let (handle, store) = start_inmemory();
        let mut a = connect(&handle, 8).await;
        let mut b = connect(&handle, 8).await;

        // when (操作):
        handle.identify(a.id, user("alice")).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        handle.flush_presence().await.unwrap();

        // then (期待する結果):
        let frames = drain(&mut b.rx);
        assert_eq!(frames[0]["type"], "user_join");
        assert_eq!(frames[0]["userId"], "alice");
        assert_eq!(frames[0]["status"], "online");
        assert_eq!(drain(&mut a.rx).len(), 1);
        assert_eq!(
            store.get_status(&user("alice")).await.unwrap(),
            PresenceStatus::Online
        );
        assert_eq!(snapshot.known_users, vec![user("alice")]);
        assert_eq!(snapshot.identified_count(), 1);
    }

    #[tokio::test]
    async fn test_unregister_identified_announces_departure_once() {
        // テスト項目: 識別済み接続の削除で user_leave と status_change が一度だけ届く
        // given (前提条件):
        let (handle, store) = start_inmemory();
        let a = connect(&handle, 8).await;
        let mut b = connect(&handle, 8).await;
        handle.identify(a.id, user("alice")).await.unwrap();
        handle.snapshot().await.unwrap();
        drain(&mut b.rx);

        // when (操作):
        handle.unregister(a.id).await.unwrap();
        handle.unregister(a.id).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        handle.flush_presence().await.unwrap();

        // then (期待する結果):
        let frames = drain(&mut b.rx);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["type"], "user_leave");
        assert_eq!(frames[0]["userId"], "alice");
        assert_eq!(frames[1]["type"], "status_change");
        assert_eq!(frames[1]["status"], "offline");
        assert!(a.closer.is_closed());
        assert_eq!(snapshot.connections.len(), 1);
        assert_eq!(
            store.get_status(&user("alice")).await.unwrap(),
            PresenceStatus::Offline
        );
    }

    #[tokio::test]
    async fn test_unregister_anonymous_is_silent() {
        // テスト項目: 未識別接続の削除では何も配信されない
        // given (前提条件):
        let (handle, _store) = start_inmemory();
        let a = connect(&handle, 8).await;
        let mut b = connect(&handle, 8).await;

        // when (操作):
        handle.unregister(a.id).await.unwrap();
        handle.snapshot().await.unwrap();

        // then (期待する結果):
        assert!(drain(&mut b.rx).is_empty());
    }

    #[tokio::test]
    async fn test_slow_consumer_is_evicted() {
        // テスト項目: キューが満杯の接続は切断され、他の接続への配信は続く
        // given (前提条件):
        let (handle, _store) = start_inmemory();
        let mut slow = connect(&handle, 1).await;
        let mut fast = connect(&handle, 8).await;

        // when (操作):
        handle.broadcast(chat("one"), None).await.unwrap();
        handle.broadcast(chat("two"), None).await.unwrap();
        handle.broadcast(chat("three"), None).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();

        // then (期待する結果):
        assert!(slow.closer.is_closed());
        let queued = drain(&mut slow.rx);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0]["text"], "one");
        assert_eq!(drain(&mut fast.rx).len(), 3);
        assert_eq!(snapshot.connections.len(), 1);
        assert_eq!(snapshot.stats.slow_consumers_dropped, 1);
    }

    #[tokio::test]
    async fn test_duplicate_identification_closes_old_connection_silently() {
        // テスト項目: 同一ユーザーの新しい接続が勝ち、古い接続は user_leave なしで閉じられる
        // given (前提条件):
        let (handle, store) = start_inmemory();
        let old = connect(&handle, 8).await;
        let new = connect(&handle, 8).await;
        let mut observer = connect(&handle, 8).await;
        handle.identify(old.id, user("alice")).await.unwrap();

        // when (操作):
        handle.identify(new.id, user("alice")).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        handle.flush_presence().await.unwrap();

        // then (期待する結果):
        assert!(old.closer.is_closed());
        assert!(!new.closer.is_closed());
        let frames = drain(&mut observer.rx);
        assert!(frames.iter().all(|frame| frame["type"] == "user_join"));
        assert_eq!(
            store.get_status(&user("alice")).await.unwrap(),
            PresenceStatus::Online
        );
        let bound: Vec<_> = snapshot
            .connections
            .iter()
            .filter(|conn| conn.user_id == Some(user("alice")))
            .collect();
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].id, new.id);
    }

    #[tokio::test]
    async fn test_release_keeps_connection_open() {
        // テスト項目: 明示的な退出で接続は残り、退出が通知される
        // given (前提条件):
        let (handle, store) = start_inmemory();
        let mut a = connect(&handle, 8).await;
        let mut b = connect(&handle, 8).await;
        handle.identify(a.id, user("alice")).await.unwrap();
        handle.snapshot().await.unwrap();
        drain(&mut a.rx);
        drain(&mut b.rx);

        // when (操作):
        handle.release(a.id).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        handle.flush_presence().await.unwrap();

        // then (期待する結果):
        assert!(!a.closer.is_closed());
        assert_eq!(snapshot.connections.len(), 2);
        assert_eq!(snapshot.identified_count(), 0);
        assert_eq!(drain(&mut b.rx)[0]["type"], "user_leave");
        assert_eq!(
            store.get_status(&user("alice")).await.unwrap(),
            PresenceStatus::Offline
        );
    }

    #[tokio::test]
    async fn test_send_to_targets_one_connection() {
        // テスト項目: send_to は指定した接続にだけ届く
        // given (前提条件):
        let (handle, _store) = start_inmemory();
        let mut a = connect(&handle, 8).await;
        let mut b = connect(&handle, 8).await;

        // when (操作):
        handle
            .send_to(a.id, OutboundMessage::PassThrough(r#"{"x":1}"#.to_string()))
            .await
            .unwrap();
        handle.snapshot().await.unwrap();

        // then (期待する結果):
        assert_eq!(drain(&mut a.rx)[0]["x"], 1);
        assert!(drain(&mut b.rx).is_empty());
    }

    #[tokio::test]
    async fn test_presence_store_failure_is_not_fatal() {
        // テスト項目: Presence Store の障害があっても識別と配信は続く
        // given (前提条件):
        let (handle, trigger) = start(Arc::new(FailingStore));
        let a = connect(&handle, 8).await;
        let mut b = connect(&handle, 8).await;

        // when (操作):
        handle.identify(a.id, user("alice")).await.unwrap();
        handle.unregister(a.id).await.unwrap();
        handle.snapshot().await.unwrap();

        // then (期待する結果):
        let kinds: Vec<Value> = drain(&mut b.rx)
            .into_iter()
            .map(|frame| frame["type"].clone())
            .collect();
        assert_eq!(kinds, vec!["user_join", "user_leave", "status_change"]);
        tokio::time::timeout(Duration::from_millis(100), trigger.notified())
            .await
            .expect("roster refresh should be requested");
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything_and_stops() {
        // テスト項目: シャットダウンで全接続が閉じられ、エンジンが停止する
        // given (前提条件):
        let store = Arc::new(InMemoryPresenceStore::new(Duration::from_secs(300)));
        let (engine, handle) =
            BroadcastEngine::new(&HubConfig::default(), store.clone(), Arc::new(Notify::new()));
        let engine_task = tokio::spawn(engine.run());
        let a = connect(&handle, 8).await;
        let b = connect(&handle, 8).await;
        handle.identify(a.id, user("alice")).await.unwrap();

        // when (操作):
        handle.shutdown().await.unwrap();
        engine_task.await.unwrap();

        // then (期待する結果):
        assert_eq!(handle.snapshot().await, Err(HubError::EngineStopped));
        assert!(a.closer.is_closed());
        assert!(b.closer.is_closed());
        assert_eq!(
            store.get_status(&user("alice")).await.unwrap(),
            PresenceStatus::Offline
        );
    }

    #[tokio::test]
    async fn test_relay_from_removed_connection_is_dropped() {
        // テスト項目: 削除済み接続からの転送は配信されず、登録中の接続からの転送は届く
        // given (前提条件):
        let (handle, _store) = start_inmemory();
        let mut a = connect(&handle, 8).await;
        let gone = connect(&handle, 8).await;
        handle.unregister(gone.id).await.unwrap();

        // when (操作):
        handle.relay(gone.id, chat("stale"), true).await.unwrap();
        handle.relay(a.id, chat("echo"), true).await.unwrap();
        handle.snapshot().await.unwrap();

        // then (期待する結果):
        let frames = drain(&mut a.rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["text"], "echo");
    }

    #[tokio::test]
    async fn test_touch_after_eviction_does_not_revive_presence() {
        // テスト項目: 切断済み接続のアクティビティ記録で Presence が online に戻らない
        // given (前提条件):
        let (handle, store) = start_inmemory();
        let evicted = connect(&handle, 1).await;
        let mut observer = connect(&handle, 8).await;
        handle.identify(evicted.id, user("alice")).await.unwrap();
        handle.broadcast(chat("overflow"), None).await.unwrap();
        handle.snapshot().await.unwrap();
        assert!(evicted.closer.is_closed());

        // when (操作):
        handle.touch(evicted.id).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        handle.flush_presence().await.unwrap();

        // then (期待する結果):
        assert_eq!(
            store.get_status(&user("alice")).await.unwrap(),
            PresenceStatus::Offline
        );
        assert!(snapshot.live_users().is_empty());
        let kinds: Vec<Value> = drain(&mut observer.rx)
            .into_iter()
            .map(|frame| frame["type"].clone())
            .collect();
        assert_eq!(
            kinds,
            vec!["user_join", "message", "user_leave", "status_change"]
        );
    }

    #[tokio::test]
    async fn test_touch_refreshes_presence_of_bound_connection() {
        // テスト項目: 識別済み接続のアクティビティで Presence が online に更新される
        // given (前提条件):
        let (handle, store) = start_inmemory();
        let a = connect(&handle, 8).await;
        handle.identify(a.id, user("alice")).await.unwrap();
        handle.flush_presence().await.unwrap();
        store.set_offline(&user("alice")).await.unwrap();

        // when (操作):
        handle.touch(a.id).await.unwrap();
        handle.flush_presence().await.unwrap();

        // then (期待する結果):
        assert_eq!(
            store.get_status(&user("alice")).await.unwrap(),
            PresenceStatus::Online
        );
    }

    #[tokio::test]
    async fn test_hung_presence_store_does_not_stall_fan_out() {
        // テスト項目: 応答しない Presence Store があっても配信とスナップショットは止まらない
        // given (前提条件):
        let (handle, _trigger) = start(Arc::new(HangingStore));
        let a = connect(&handle, 8).await;
        let mut b = connect(&handle, 8).await;
        handle.identify(a.id, user("alice")).await.unwrap();

        // when (操作):
        handle.broadcast(chat("still here"), Some(a.id)).await.unwrap();

        // then (期待する結果):
        let mut texts = Vec::new();
        while texts.is_empty() {
            let frame = tokio::time::timeout(Duration::from_secs(2), b.rx.recv())
                .await
                .expect("fan-out should not wait on the presence store")
                .unwrap();
            let frame: Value = serde_json::from_str(&frame).unwrap();
            if frame["type"] == "message" {
                texts.push(frame["text"].clone());
            }
        }
        assert_eq!(texts, vec!["still here"]);
        let snapshot = tokio::time::timeout(Duration::from_secs(1), handle.snapshot())
            .await
            .expect("snapshot should not wait on the presence store")
            .unwrap();
        assert_eq!(snapshot.identified_count(), 1);
    }
}
