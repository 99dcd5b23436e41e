//! Epidemic message propagation with bounded fanout and TTL.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// The closed set of gossip message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    AgentJoined,
    AgentLeft,
    TaskAvailable,
    TaskBid,
    TaskAssigned,
    TaskCompleted,
    Heartbeat,
    Consensus,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::AgentJoined => "agent_joined",
            MessageKind::AgentLeft => "agent_left",
            MessageKind::TaskAvailable => "task_available",
            MessageKind::TaskBid => "task_bid",
            MessageKind::TaskAssigned => "task_assigned",
            MessageKind::TaskCompleted => "task_completed",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Consensus => "consensus",
        }
    }
}

/// A gossip message. Payloads are opaque JSON; handlers downcast at the
/// consumption site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Sender sid.
    pub from: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Hops remaining.
    pub ttl: u32,
}

impl Message {
    pub fn new(kind: MessageKind, from: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: String::new(),
            kind,
            from: from.into(),
            payload,
            timestamp: Utc::now(),
            // 0 means "unset"; broadcast stamps the configured default.
            ttl: 0,
        }
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Where forwarded messages go. The default loopback keeps everything
/// in-process; a production implementation sends over the network.
pub trait Transport: Send + Sync {
    fn send(&self, peer: &str, message: Message);
}

/// In-process transport: forwarding re-enqueues onto the local bus.
pub struct LoopbackTransport {
    tx: mpsc::Sender<Message>,
}

impl Transport for LoopbackTransport {
    fn send(&self, _peer: &str, message: Message) {
        // Queue full means the message is lost, never blocked on.
        let _ = self.tx.try_send(message);
    }
}

/// Gossip tuning knobs.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Peers each message is forwarded to per hop.
    pub fanout: usize,
    /// Default hop budget stamped on broadcast.
    pub ttl: u32,
    /// Maintenance tick for seen-set eviction.
    pub interval: Duration,
    /// Seen-set size that triggers a whole-set reset.
    pub seen_capacity: usize,
    /// Depth of the enqueue channel.
    pub queue_depth: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            fanout: 3,
            ttl: 10,
            interval: Duration::from_millis(100),
            seen_capacity: 10_000,
            queue_depth: 1000,
        }
    }
}

type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

struct GossipState {
    peers: HashSet<String>,
    seen: HashSet<String>,
    handlers: HashMap<MessageKind, Vec<Handler>>,
    transport: Arc<dyn Transport>,
}

/// Snapshot of bus counters.
#[derive(Debug, Clone, Copy)]
pub struct GossipStats {
    pub peer_count: usize,
    pub seen_messages: usize,
    pub handler_count: usize,
}

/// The epidemic message bus.
///
/// Messages are delivered at most once per id: the drain loop drops
/// anything already in the seen set, runs the registered handlers for the
/// message type in registration order, then forwards to a random peer
/// subset while TTL remains. Ordering across messages is not guaranteed
/// and handlers must be idempotent.
pub struct Gossip {
    config: GossipConfig,
    state: RwLock<GossipState>,
    tx: mpsc::Sender<Message>,
    // Taken exactly once when the drain loop starts.
    rx: Mutex<Option<mpsc::Receiver<Message>>>,
}

impl Gossip {
    pub fn new(config: GossipConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_depth);
        let transport = Arc::new(LoopbackTransport { tx: tx.clone() });
        Self {
            config,
            state: RwLock::new(GossipState {
                peers: HashSet::new(),
                seen: HashSet::new(),
                handlers: HashMap::new(),
                transport,
            }),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Replace the forwarding transport. The default is in-process
    /// loopback; nothing above this seam depends on which is installed.
    pub fn set_transport(&self, transport: Arc<dyn Transport>) {
        self.state.write().unwrap().transport = transport;
    }

    pub fn add_peer(&self, sid: impl Into<String>) {
        self.state.write().unwrap().peers.insert(sid.into());
    }

    pub fn remove_peer(&self, sid: &str) {
        self.state.write().unwrap().peers.remove(sid);
    }

    pub fn peers(&self) -> Vec<String> {
        self.state.read().unwrap().peers.iter().cloned().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.state.read().unwrap().peers.len()
    }

    /// Register a handler for a message type. Handlers for the same type
    /// run in registration order.
    pub fn on_message<F>(&self, kind: MessageKind, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.state
            .write()
            .unwrap()
            .handlers
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Send a message into the network. Best-effort: a full queue drops
    /// the message silently, and no error ever reaches the broadcaster.
    pub fn broadcast(&self, mut message: Message) {
        message.id = Uuid::new_v4().to_string();
        message.timestamp = Utc::now();
        if message.ttl == 0 {
            message.ttl = self.config.ttl;
        }

        if self.tx.try_send(message).is_err() {
            tracing::trace!("gossip queue full, dropping broadcast");
        }
    }

    /// Start the drain and maintenance loops.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) {
        let Some(rx) = self.rx.lock().unwrap().take() else {
            return;
        };
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            bus.run(shutdown, rx).await;
        });
    }

    pub fn stats(&self) -> GossipStats {
        let state = self.state.read().unwrap();
        GossipStats {
            peer_count: state.peers.len(),
            seen_messages: state.seen.len(),
            handler_count: state.handlers.values().map(Vec::len).sum(),
        }
    }

    async fn run(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        mut rx: mpsc::Receiver<Message>,
    ) {
        let mut maintenance = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                message = rx.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
                _ = maintenance.tick() => self.evict_seen(),
            }
        }
    }

    fn handle(&self, mut message: Message) {
        let handlers = {
            let mut state = self.state.write().unwrap();
            if !state.seen.insert(message.id.clone()) {
                return;
            }
            state
                .handlers
                .get(&message.kind)
                .cloned()
                .unwrap_or_default()
        };

        for handler in handlers {
            // A panicking handler must not take down the drain loop or
            // the handlers registered after it.
            if catch_unwind(AssertUnwindSafe(|| handler(&message))).is_err() {
                tracing::warn!(kind = message.kind.as_str(), "gossip handler panicked");
            }
        }

        if message.ttl > 0 {
            message.ttl -= 1;
            self.forward(message);
        }
    }

    fn forward(&self, message: Message) {
        let (targets, transport) = {
            let state = self.state.read().unwrap();
            let mut candidates: Vec<String> = state
                .peers
                .iter()
                .filter(|sid| **sid != message.from)
                .cloned()
                .collect();

            candidates.shuffle(&mut rand::thread_rng());
            candidates.truncate(self.config.fanout);
            (candidates, Arc::clone(&state.transport))
        };

        for peer in targets {
            transport.send(&peer, message.clone());
        }
    }

    fn evict_seen(&self) {
        let mut state = self.state.write().unwrap();
        if state.seen.len() > self.config.seen_capacity {
            state.seen = HashSet::new();
        }
    }
}
