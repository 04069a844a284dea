//! WebSocket hub: connection map + per-connection `mpsc` channel + split
//! send/receive tasks joined with `tokio::select!`, wrapped with bounded
//! queues, topic subscriptions, heartbeats, and typed notification helpers.
//! The registry is owned by the hub loop — external callers only ever see a
//! [`ClientInfo`] snapshot, never the live map.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{mpsc, oneshot, Notify, RwLock};
use tracing::{debug, info, warn};

use super::types::{
    run_topic, test_topic, ClientFrame, ClientInfo, Envelope, HubConfig, MessageType, TOPIC_ALL,
};
use crate::models::{HistoricRun, Regression};

struct ClientHandle {
    tx: mpsc::Sender<Message>,
    kill: Arc<Notify>,
    remote_addr: String,
    user_agent: String,
    connected_at: chrono::DateTime<Utc>,
    last_ping: chrono::DateTime<Utc>,
    subscriptions: HashSet<String>,
}

#[derive(Default)]
struct HubState {
    clients: HashMap<String, ClientHandle>,
}

enum HubCommand {
    Register {
        id: String,
        remote_addr: String,
        user_agent: String,
        tx: mpsc::Sender<Message>,
        kill: Arc<Notify>,
        reply: oneshot::Sender<bool>,
    },
    Unregister {
        id: String,
    },
    Subscribe {
        id: String,
        topic: String,
    },
    Unsubscribe {
        id: String,
        topic: String,
    },
    Touch {
        id: String,
    },
    Broadcast {
        envelope: Envelope,
        topics: Option<Vec<String>>,
    },
}

/// Handle to the hub: cheap to clone, passed around through `AppState`.
#[derive(Clone)]
pub struct Hub {
    config: HubConfig,
    state: Arc<RwLock<HubState>>,
    commands: mpsc::Sender<HubCommand>,
    dropped_broadcasts: Arc<AtomicU64>,
    shutdown: Arc<Notify>,
}

impl Hub {
    pub fn new(config: HubConfig) -> (Self, HubRunner) {
        let (tx, rx) = mpsc::channel(config.broadcast_buffer_size);
        let state = Arc::new(RwLock::new(HubState::default()));
        let hub = Self {
            config: config.clone(),
            state: state.clone(),
            commands: tx,
            dropped_broadcasts: Arc::new(AtomicU64::new(0)),
            shutdown: Arc::new(Notify::new()),
        };
        let runner = HubRunner {
            config,
            state,
            commands: rx,
            shutdown: hub.shutdown.clone(),
        };
        (hub, runner)
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Upgrades a socket into a managed client. Returns `None` when the
    /// registry is already at `max_clients`, in which case the connection
    /// is closed with a policy-violation frame before returning.
    pub async fn register_client(
        &self,
        socket: WebSocket,
        id: String,
        remote_addr: String,
        user_agent: String,
    ) {
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(self.config.client_buffer_size);
        let kill = Arc::new(Notify::new());

        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .commands
            .send(HubCommand::Register {
                id: id.clone(),
                remote_addr,
                user_agent,
                tx: tx.clone(),
                kill: kill.clone(),
                reply: reply_tx,
            })
            .await;

        let accepted = sent.is_ok() && reply_rx.await.unwrap_or(false);
        if !accepted {
            use axum::extract::ws::CloseFrame;
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: axum::extract::ws::close_code::POLICY,
                    reason: "server at capacity".into(),
                })))
                .await;
            let _ = sink.close().await;
            return;
        }

        let welcome = Envelope::new(
            MessageType::Connection,
            json!({ "client_id": id, "message": "connected" }),
        );
        let _ = tx.send(Message::Text(welcome.to_text())).await;

        let write_timeout = self.config.write_timeout;
        let writer_kill = kill.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_kill.notified() => break,
                    maybe = rx.recv() => {
                        let Some(msg) = maybe else { break };
                        let send = tokio::time::timeout(write_timeout, sink.send(msg));
                        if send.await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
        });

        let commands = self.commands.clone();
        let read_timeout = self.config.read_timeout;
        let reader_id = id.clone();
        let reader_tx = tx.clone();
        let reader = tokio::spawn(async move {
            loop {
                let next = tokio::time::timeout(read_timeout, stream.next()).await;
                let Ok(Some(Ok(msg))) = next else { break };
                match msg {
                    Message::Text(text) => {
                        if let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) {
                            match frame {
                                ClientFrame::Ping => {
                                    let _ = commands
                                        .send(HubCommand::Touch {
                                            id: reader_id.clone(),
                                        })
                                        .await;
                                    let pong = Envelope::new(MessageType::Pong, json!({}));
                                    let _ = reader_tx.try_send(Message::Text(pong.to_text()));
                                }
                                ClientFrame::Subscribe { topic } => {
                                    let _ = commands
                                        .send(HubCommand::Subscribe {
                                            id: reader_id.clone(),
                                            topic,
                                        })
                                        .await;
                                }
                                ClientFrame::Unsubscribe { topic } => {
                                    let _ = commands
                                        .send(HubCommand::Unsubscribe {
                                            id: reader_id.clone(),
                                            topic,
                                        })
                                        .await;
                                }
                            }
                        }
                    }
                    Message::Pong(_) => {
                        let _ = commands
                            .send(HubCommand::Touch {
                                id: reader_id.clone(),
                            })
                            .await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        tokio::select! {
            _ = writer => debug!(client_id = %id, "writer task finished"),
            _ = reader => debug!(client_id = %id, "reader task finished"),
        }
        kill.notify_one();
        let _ = self
            .commands
            .send(HubCommand::Unregister { id: id.clone() })
            .await;
        info!(client_id = %id, "client disconnected");
    }

    pub async fn subscribe(&self, client_id: &str, topic: &str) {
        let _ = self
            .commands
            .send(HubCommand::Subscribe {
                id: client_id.to_string(),
                topic: topic.to_string(),
            })
            .await;
    }

    pub async fn unsubscribe(&self, client_id: &str, topic: &str) {
        let _ = self
            .commands
            .send(HubCommand::Unsubscribe {
                id: client_id.to_string(),
                topic: topic.to_string(),
            })
            .await;
    }

    fn try_broadcast(&self, envelope: Envelope, topics: Option<Vec<String>>) {
        if self
            .commands
            .try_send(HubCommand::Broadcast { envelope, topics })
            .is_err()
        {
            self.dropped_broadcasts.fetch_add(1, Ordering::Relaxed);
            warn!("broadcast queue full, dropping message");
        }
    }

    pub fn broadcast_to_all(&self, kind: MessageType, payload: serde_json::Value) {
        self.try_broadcast(Envelope::new(kind, payload), None);
    }

    pub fn broadcast_to_subscribers(
        &self,
        kind: MessageType,
        payload: serde_json::Value,
        topics: Vec<String>,
    ) {
        self.try_broadcast(Envelope::new(kind, payload), Some(topics));
    }

    pub fn notify_new_run(&self, run: &HistoricRun) {
        self.broadcast_to_subscribers(
            MessageType::NewRun,
            json!({ "run_id": run.id, "test_name": run.test_name }),
            vec![test_topic(&run.test_name), TOPIC_ALL.to_string()],
        );
    }

    pub fn notify_regression(&self, regression: &Regression, run: &HistoricRun) {
        self.broadcast_to_subscribers(
            MessageType::RegressionDetected,
            json!({
                "regression_id": regression.id,
                "run_id": run.id,
                "test_name": run.test_name,
                "client": regression.client,
                "metric": regression.metric,
                "severity": regression.severity,
            }),
            vec![
                test_topic(&run.test_name),
                run_topic(&run.id),
                TOPIC_ALL.to_string(),
            ],
        );
    }

    pub fn notify_baseline_updated(&self, name: &str, run_id: &str, test_name: &str) {
        self.broadcast_to_subscribers(
            MessageType::BaselineUpdated,
            json!({ "name": name, "run_id": run_id, "test_name": test_name }),
            vec![test_topic(test_name), TOPIC_ALL.to_string()],
        );
    }

    pub fn notify_analysis_complete(
        &self,
        run_id: &str,
        test_name: &str,
        results: serde_json::Value,
    ) {
        self.broadcast_to_subscribers(
            MessageType::AnalysisComplete,
            json!({ "run_id": run_id, "test_name": test_name, "results": results }),
            vec![test_topic(test_name), TOPIC_ALL.to_string()],
        );
    }

    pub async fn connected_client_count(&self) -> usize {
        self.state.read().await.clients.len()
    }

    pub async fn client_info(&self) -> Vec<ClientInfo> {
        self.state
            .read()
            .await
            .clients
            .iter()
            .map(|(id, c)| ClientInfo {
                id: id.clone(),
                remote_addr: c.remote_addr.clone(),
                user_agent: c.user_agent.clone(),
                connected_at: c.connected_at,
                last_ping: c.last_ping,
            })
            .collect()
    }

    pub fn dropped_broadcast_count(&self) -> u64 {
        self.dropped_broadcasts.load(Ordering::Relaxed)
    }

    /// Cancels the root context, drains queues, and joins the hub loop.
    /// Idempotent — a second call is a no-op.
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }
}

/// Owns the hub's single mutating task. `run` must be spawned once.
pub struct HubRunner {
    config: HubConfig,
    state: Arc<RwLock<HubState>>,
    commands: mpsc::Receiver<HubCommand>,
    shutdown: Arc<Notify>,
}

impl HubRunner {
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        let mut last_ping = Utc::now();
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("hub shutting down, draining clients");
                    let mut state = self.state.write().await;
                    for (_, client) in state.clients.drain() {
                        client.kill.notify_one();
                    }
                    break;
                }
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.handle_command(cmd).await;
                }
                _ = ticker.tick() => {
                    let now = Utc::now();
                    if (now - last_ping).num_seconds()
                        >= self.config.ping_interval.as_secs() as i64
                    {
                        last_ping = now;
                        self.send_ping_to_all().await;
                    }
                    self.evict_stale_clients().await;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register {
                id,
                remote_addr,
                user_agent,
                tx,
                kill,
                reply,
            } => {
                let mut state = self.state.write().await;
                let accepted = state.clients.len() < self.config.max_clients;
                if accepted {
                    state.clients.insert(
                        id,
                        ClientHandle {
                            tx,
                            kill,
                            remote_addr,
                            user_agent,
                            connected_at: Utc::now(),
                            last_ping: Utc::now(),
                            subscriptions: HashSet::new(),
                        },
                    );
                }
                let _ = reply.send(accepted);
            }
            HubCommand::Unregister { id } => {
                self.state.write().await.clients.remove(&id);
            }
            HubCommand::Subscribe { id, topic } => {
                if let Some(client) = self.state.write().await.clients.get_mut(&id) {
                    client.subscriptions.insert(topic);
                }
            }
            HubCommand::Unsubscribe { id, topic } => {
                if let Some(client) = self.state.write().await.clients.get_mut(&id) {
                    client.subscriptions.remove(&topic);
                }
            }
            HubCommand::Touch { id } => {
                if let Some(client) = self.state.write().await.clients.get_mut(&id) {
                    client.last_ping = Utc::now();
                }
            }
            HubCommand::Broadcast { envelope, topics } => {
                self.deliver(envelope, topics).await;
            }
        }
    }

    async fn deliver(&mut self, envelope: Envelope, topics: Option<Vec<String>>) {
        let text = Message::Text(envelope.to_text());
        let mut evicted = Vec::new();
        {
            let state = self.state.read().await;
            for (id, client) in &state.clients {
                let deliverable = match &topics {
                    None => true,
                    Some(topics) => {
                        client.subscriptions.contains(TOPIC_ALL)
                            || topics.iter().any(|t| client.subscriptions.contains(t))
                    }
                };
                if !deliverable {
                    continue;
                }
                if client.tx.try_send(text.clone()).is_err() {
                    evicted.push(id.clone());
                }
            }
        }
        self.evict(evicted).await;
    }

    async fn evict(&mut self, ids: Vec<String>) {
        if ids.is_empty() {
            return;
        }
        let mut state = self.state.write().await;
        for id in ids {
            if let Some(client) = state.clients.remove(&id) {
                client.kill.notify_one();
                warn!(client_id = %id, "evicted client: send queue full");
            }
        }
    }

    /// Sends a protocol-level Ping control frame to every connected client,
    /// bypassing the JSON envelope entirely. `LastPing` is refreshed when the
    /// client's reader task observes the matching Pong (or an app-level
    /// `{"type":"ping"}` frame) — never by this send, so a client that stops
    /// responding still ages out via `evict_stale_clients`.
    async fn send_ping_to_all(&mut self) {
        let mut evicted = Vec::new();
        {
            let state = self.state.read().await;
            for (id, client) in &state.clients {
                if client.tx.try_send(Message::Ping(Vec::new())).is_err() {
                    evicted.push(id.clone());
                }
            }
        }
        self.evict(evicted).await;
    }

    async fn evict_stale_clients(&mut self) {
        let now = Utc::now();
        let pong_timeout = self.config.pong_timeout.as_secs() as i64;
        let stale: Vec<String> = {
            let state = self.state.read().await;
            state
                .clients
                .iter()
                .filter(|(_, c)| (now - c.last_ping).num_seconds() > pong_timeout)
                .map(|(id, _)| id.clone())
                .collect()
        };
        if stale.is_empty() {
            return;
        }
        let mut state = self.state.write().await;
        for id in stale {
            if let Some(client) = state.clients.remove(&id) {
                client.kill.notify_one();
                warn!(client_id = %id, "evicted client: pong timeout");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_client(buffer: usize) -> (ClientHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = ClientHandle {
            tx,
            kill: Arc::new(Notify::new()),
            remote_addr: "127.0.0.1:0".into(),
            user_agent: "test".into(),
            connected_at: Utc::now(),
            last_ping: Utc::now(),
            subscriptions: HashSet::new(),
        };
        (handle, rx)
    }

    #[tokio::test]
    async fn broadcast_queue_drop_on_full_increments_dropped_counter() {
        let config = HubConfig {
            broadcast_buffer_size: 1,
            ..HubConfig::default()
        };
        let (hub, _runner) = Hub::new(config);

        hub.broadcast_to_all(MessageType::Ping, json!({}));
        hub.broadcast_to_all(MessageType::Ping, json!({}));

        assert_eq!(hub.dropped_broadcast_count(), 1);
    }

    #[tokio::test]
    async fn deliver_only_reaches_clients_subscribed_to_the_topic() {
        let (hub, mut runner) = Hub::new(HubConfig::default());
        let (mut subscribed, mut rx_subscribed) = fake_client(8);
        subscribed.subscriptions.insert(test_topic("bench"));
        let (unsubscribed, mut rx_unsubscribed) = fake_client(8);

        {
            let mut state = hub.state.write().await;
            state.clients.insert("subscribed".to_string(), subscribed);
            state.clients.insert("unsubscribed".to_string(), unsubscribed);
        }

        let envelope = Envelope::new(MessageType::NewRun, json!({ "run_id": "run-1" }));
        runner.deliver(envelope, Some(vec![test_topic("bench")])).await;

        assert!(rx_subscribed.try_recv().is_ok());
        assert!(rx_unsubscribed.try_recv().is_err());
    }

    #[tokio::test]
    async fn deliver_evicts_a_client_whose_send_queue_is_full() {
        let (hub, mut runner) = Hub::new(HubConfig::default());
        let (full, _rx) = fake_client(1);
        full.tx.try_send(Message::Text("backlog".into())).unwrap();

        {
            let mut state = hub.state.write().await;
            state.clients.insert("full".to_string(), full);
        }

        runner.deliver(Envelope::new(MessageType::Ping, json!({})), None).await;

        assert_eq!(hub.connected_client_count().await, 0);
    }

    #[tokio::test]
    async fn register_is_rejected_once_the_registry_is_at_capacity() {
        let config = HubConfig {
            max_clients: 1,
            ..HubConfig::default()
        };
        let (hub, mut runner) = Hub::new(config);
        let (existing, _rx) = fake_client(8);
        {
            let mut state = hub.state.write().await;
            state.clients.insert("existing".to_string(), existing);
        }

        let (tx, _rx) = mpsc::channel(8);
        let (reply_tx, reply_rx) = oneshot::channel();
        runner
            .handle_command(HubCommand::Register {
                id: "newcomer".to_string(),
                remote_addr: "127.0.0.1:1".into(),
                user_agent: "test".into(),
                tx,
                kill: Arc::new(Notify::new()),
                reply: reply_tx,
            })
            .await;

        assert_eq!(reply_rx.await, Ok(false));
        assert_eq!(hub.connected_client_count().await, 1);
    }
}
