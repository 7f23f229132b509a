//! Result broadcasting to subscribed connections.
//!
//! ```text
//!   pipeline ──► broadcast() ──► bounded queue ──► fan-out task
//!                                                   │ snapshot subscriptions
//!                                                   │ view_of(result) per connection
//!                                                   ▼
//!                                       per-connection mpsc ──► websocket writer
//! ```
//!
//! The queue keeps only the newest results: when the fan-out task falls
//! behind, the oldest queued results are skipped and counted. Each
//! connection's outbound buffer is bounded as well; a full buffer drops that
//! message for that connection only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vhub_models::{
    AnalysisOptions, AnalysisResult, ClassifierType, ClientMessage, DetectionFilters,
    ServerMessage, Subscription,
};

use crate::error::{EngineError, EngineResult};
use crate::metrics;

pub type ConnectionId = Uuid;

/// Broadcast configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastConfig {
    /// Results buffered between the pipeline and the fan-out task.
    pub queue_capacity: usize,
    /// Messages buffered per connection.
    pub client_buffer: usize,
    /// Idle interval after which closed connections are pruned.
    pub poll_interval: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            client_buffer: 32,
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BroadcastStats {
    pub active_connections: usize,
    pub results_broadcast: u64,
    pub results_dropped: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub connections_pruned: u64,
}

struct Connection {
    subscription: Subscription,
    sender: mpsc::Sender<ServerMessage>,
}

#[derive(Default)]
struct Counters {
    results_broadcast: AtomicU64,
    results_dropped: AtomicU64,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
    connections_pruned: AtomicU64,
}

pub struct BroadcastManager {
    config: BroadcastConfig,
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    queue: broadcast::Sender<Arc<AnalysisResult>>,
    latest: StdRwLock<Option<Arc<AnalysisResult>>>,
    counters: Counters,
}

impl BroadcastManager {
    pub fn new(config: BroadcastConfig) -> Self {
        let (queue, _) = broadcast::channel(config.queue_capacity.max(1));
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
            queue,
            latest: StdRwLock::new(None),
            counters: Counters::default(),
        }
    }

    /// Register a connection with the initial person-only subscription.
    ///
    /// Returns the connection id and the receiver of its outbound messages.
    pub async fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(self.config.client_buffer.max(1));
        let mut connections = self.connections.write().await;
        connections.insert(
            id,
            Connection {
                subscription: Subscription::initial(),
                sender,
            },
        );
        metrics::set_broadcast_connections(connections.len());
        info!(connection_id = %id, active = connections.len(), "Client connected");
        (id, receiver)
    }

    /// Forget a connection. Returns whether it was registered.
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        let removed = connections.remove(&id).is_some();
        if removed {
            metrics::set_broadcast_connections(connections.len());
            info!(connection_id = %id, active = connections.len(), "Client disconnected");
        }
        removed
    }

    /// Replace a connection's subscription and acknowledge it.
    pub async fn subscribe(
        &self,
        id: ConnectionId,
        classifiers: Vec<ClassifierType>,
        options: AnalysisOptions,
        filters: DetectionFilters,
    ) -> EngineResult<Subscription> {
        filters.validate()?;
        let mut classifiers = classifiers;
        classifiers.sort();
        classifiers.dedup();

        let subscription = {
            let mut connections = self.connections.write().await;
            let connection = connections
                .get_mut(&id)
                .ok_or(EngineError::ConnectionNotFound(id))?;
            connection.subscription = Subscription {
                classifiers,
                options,
                filters,
                connected_at: connection.subscription.connected_at,
            };
            connection.subscription.clone()
        };

        debug!(connection_id = %id, classifiers = ?subscription.classifiers, "Subscription updated");
        self.send_to(id, ServerMessage::subscribed(subscription.clone()))
            .await?;
        Ok(subscription)
    }

    /// Stop pushing results to a connection; it stays open.
    pub async fn unsubscribe(&self, id: ConnectionId) -> EngineResult<()> {
        {
            let mut connections = self.connections.write().await;
            let connection = connections
                .get_mut(&id)
                .ok_or(EngineError::ConnectionNotFound(id))?;
            connection.subscription.classifiers.clear();
        }
        debug!(connection_id = %id, "Unsubscribed");
        self.send_to(id, ServerMessage::unsubscribed()).await
    }

    pub async fn subscription(&self, id: ConnectionId) -> Option<Subscription> {
        self.connections
            .read()
            .await
            .get(&id)
            .map(|c| c.subscription.clone())
    }

    /// Queue a result for fan-out and remember it as the latest.
    pub fn broadcast(&self, result: AnalysisResult) {
        let result = Arc::new(result);
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&result));
        self.counters.results_broadcast.fetch_add(1, Ordering::Relaxed);
        if self.queue.send(result).is_err() {
            debug!("No fan-out task running; result kept as latest only");
        }
    }

    pub fn latest(&self) -> Option<Arc<AnalysisResult>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Send the most recent result to one connection, bypassing the queue.
    ///
    /// Active subscriptions receive their filtered view; connections without
    /// one receive the full result. Returns whether a result was available.
    pub async fn send_latest(&self, id: ConnectionId) -> EngineResult<bool> {
        let Some(latest) = self.latest() else {
            return Ok(false);
        };
        let subscription = self
            .subscription(id)
            .await
            .ok_or(EngineError::ConnectionNotFound(id))?;
        let message = match subscription.view_of(&latest) {
            Some(view) => ServerMessage::analysis_result(&view),
            None => ServerMessage::analysis_result(&latest),
        };
        self.send_to(id, message).await?;
        Ok(true)
    }

    /// Parse and dispatch a raw client message.
    ///
    /// Malformed input is answered with an error message to that connection.
    pub async fn handle_client_text(&self, id: ConnectionId, text: &str) -> EngineResult<()> {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle_client_message(id, message).await,
            Err(e) => {
                debug!(connection_id = %id, error = %e, "Rejected client message");
                self.send_to(id, ServerMessage::error(format!("Invalid message: {}", e)))
                    .await
            }
        }
    }

    pub async fn handle_client_message(
        &self,
        id: ConnectionId,
        message: ClientMessage,
    ) -> EngineResult<()> {
        match message {
            ClientMessage::Subscribe {
                classifiers,
                options,
                filters,
            } => match self.subscribe(id, classifiers, options, filters).await {
                Ok(_) => Ok(()),
                Err(EngineError::InvalidRequest(e)) => {
                    self.send_to(id, ServerMessage::error(e.to_string())).await
                }
                Err(e) => Err(e),
            },
            ClientMessage::Unsubscribe => self.unsubscribe(id).await,
            ClientMessage::Ping => self.send_to(id, ServerMessage::pong()).await,
            ClientMessage::GetLatest => {
                if self.send_latest(id).await? {
                    Ok(())
                } else {
                    self.send_to(id, ServerMessage::error("No analysis result available"))
                        .await
                }
            }
        }
    }

    /// Queue a message on one connection's outbound buffer.
    pub async fn send_to(&self, id: ConnectionId, message: ServerMessage) -> EngineResult<()> {
        let sender = self
            .connections
            .read()
            .await
            .get(&id)
            .map(|c| c.sender.clone())
            .ok_or(EngineError::ConnectionNotFound(id))?;
        if self.deliver(&sender, message) == Delivery::Closed {
            self.disconnect(id).await;
        }
        Ok(())
    }

    /// Push a result to every matching subscriber. Returns how many received it.
    pub async fn fan_out(&self, result: &AnalysisResult) -> usize {
        let snapshot: Vec<_> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .filter(|(_, c)| c.subscription.is_active())
                .map(|(id, c)| (*id, c.subscription.clone(), c.sender.clone()))
                .collect()
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, subscription, sender) in snapshot {
            let Some(view) = subscription.view_of(result) else {
                continue;
            };
            match self.deliver(&sender, ServerMessage::analysis_result(&view)) {
                Delivery::Sent => delivered += 1,
                Delivery::Dropped => {}
                Delivery::Closed => dead.push(id),
            }
        }

        if !dead.is_empty() {
            self.remove_dead(&dead).await;
        }
        delivered
    }

    fn deliver(&self, sender: &mpsc::Sender<ServerMessage>, message: ServerMessage) -> Delivery {
        let message_type = message.message_type();
        match sender.try_send(message) {
            Ok(()) => {
                self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
                metrics::record_broadcast_message_sent(message_type);
                Delivery::Sent
            }
            Err(TrySendError::Full(_)) => {
                self.counters.messages_dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_broadcast_message_dropped();
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    async fn remove_dead(&self, dead: &[ConnectionId]) {
        let mut connections = self.connections.write().await;
        for id in dead {
            if connections.remove(id).is_some() {
                self.counters.connections_pruned.fetch_add(1, Ordering::Relaxed);
                debug!(connection_id = %id, "Removed closed connection");
            }
        }
        metrics::set_broadcast_connections(connections.len());
    }

    /// Remove connections whose receivers are gone.
    pub async fn prune_closed(&self) -> usize {
        let dead: Vec<_> = self
            .connections
            .read()
            .await
            .iter()
            .filter(|(_, c)| c.sender.is_closed())
            .map(|(id, _)| *id)
            .collect();
        if !dead.is_empty() {
            self.remove_dead(&dead).await;
        }
        dead.len()
    }

    /// Start the fan-out task. It stops when `shutdown` flips to `true`.
    pub fn spawn_fanout(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut queue = self.queue.subscribe();
        tokio::spawn(async move {
            info!("Broadcast fan-out started");
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    received = tokio::time::timeout(manager.config.poll_interval, queue.recv()) => {
                        match received {
                            Ok(Ok(result)) => {
                                manager.fan_out(&result).await;
                            }
                            Ok(Err(RecvError::Lagged(skipped))) => {
                                manager.counters.results_dropped.fetch_add(skipped, Ordering::Relaxed);
                                metrics::record_broadcast_results_dropped(skipped);
                                warn!(skipped, "Fan-out fell behind; dropped oldest results");
                            }
                            Ok(Err(RecvError::Closed)) => break,
                            Err(_) => {
                                manager.prune_closed().await;
                            }
                        }
                    }
                }
            }
            info!("Broadcast fan-out stopped");
        })
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            active_connections: self.connection_count().await,
            results_broadcast: self.counters.results_broadcast.load(Ordering::Relaxed),
            results_dropped: self.counters.results_dropped.load(Ordering::Relaxed),
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.counters.messages_dropped.load(Ordering::Relaxed),
            connections_pruned: self.counters.connections_pruned.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    Dropped,
    Closed,
}
