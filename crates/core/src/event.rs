//! Loop events and the broadcast hub that fans them out to observers.
//!
//! Every state transition of the loop is published as a [`LoopEvent`].
//! The hub serializes each event once and enqueues the JSON text, tagged
//! with its event type, on every registered sink. A sink that is closed or full is deregistered; observers
//! come and go and that is not an error.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::state::{LoopConfig, RunState};
use crate::store::Store;

/// Per-observer queue depth.
pub const SINK_CAPACITY: usize = 1024;

/// Events on the observer stream, one JSON object each, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// First event on every subscription: full config and state.
    Connected { config: LoopConfig, state: RunState },

    /// A new iteration started.
    Iteration { iteration: u64 },

    /// Exact prompt text about to be dispatched.
    Prompt { prompt: String, iteration: u64 },

    /// Agent response text for an iteration.
    Response { response: String, iteration: u64 },

    /// Monitor command output (or its failure text).
    Monitor { output: String },

    /// Configuration changed.
    Config { config: LoopConfig },

    /// Run state changed.
    State { state: RunState },

    /// The loop returned to idle.
    Stopped,

    /// Something failed; the loop keeps going unless it never started.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iteration: Option<u64>,
    },
}

impl LoopEvent {
    pub fn error(message: impl Into<String>, iteration: Option<u64>) -> Self {
        Self::Error {
            message: message.into(),
            iteration,
        }
    }

    /// Wire name of this event (the `type` field).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Iteration { .. } => "iteration",
            Self::Prompt { .. } => "prompt",
            Self::Response { .. } => "response",
            Self::Monitor { .. } => "monitor",
            Self::Config { .. } => "config",
            Self::State { .. } => "state",
            Self::Stopped => "stopped",
            Self::Error { .. } => "error",
        }
    }
}

/// One serialized event as queued on a sink.
#[derive(Debug, Clone)]
pub struct EventFrame {
    /// The event's `type` field.
    pub kind: &'static str,
    pub json: Arc<str>,
}

impl EventFrame {
    fn encode(event: &LoopEvent) -> serde_json::Result<Self> {
        Ok(Self {
            kind: event.event_type(),
            json: serde_json::to_string(event)?.into(),
        })
    }
}

/// Registry of observer sinks.
pub struct BroadcastHub {
    store: Arc<Store>,
    sinks: Mutex<HashMap<u64, mpsc::Sender<EventFrame>>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            sinks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock_sinks(&self) -> MutexGuard<'_, HashMap<u64, mpsc::Sender<EventFrame>>> {
        self.sinks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish an event to every live sink. Returns how many sinks received it.
    pub fn publish(&self, event: &LoopEvent) -> usize {
        let frame = match EventFrame::encode(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event = event.event_type(), error = %e, "Failed to serialize loop event");
                return 0;
            }
        };

        let mut sinks = self.lock_sinks();
        sinks.retain(|id, sink| match sink.try_send(frame.clone()) {
            Ok(()) => true,
            Err(e) => {
                debug!(sink = id, reason = %e, "Dropping observer");
                false
            }
        });
        debug!(event = event.event_type(), observers = sinks.len(), "Published loop event");
        sinks.len()
    }

    /// Register a new observer.
    ///
    /// The returned subscription always yields a `connected` event carrying
    /// the current snapshot before anything published afterwards.
    pub async fn subscribe(&self) -> Subscription {
        let snapshot = self.store.snapshot().await;
        let connected = LoopEvent::Connected {
            config: snapshot.config,
            state: snapshot.state,
        };

        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // Queued before the sink is visible to publish().
        match EventFrame::encode(&connected) {
            Ok(frame) => {
                let _ = tx.try_send(frame);
            }
            Err(e) => warn!(error = %e, "Failed to serialize connected event"),
        }
        let observers = {
            let mut sinks = self.lock_sinks();
            sinks.insert(id, tx);
            sinks.len()
        };
        debug!(sink = id, observers, "Observer subscribed");

        Subscription { id, receiver: rx }
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.lock_sinks().remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_sinks().len()
    }
}

/// Receiving end of one observer sink.
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<EventFrame>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next serialized event, or `None` once the hub dropped this sink.
    pub async fn recv(&mut self) -> Option<EventFrame> {
        self.receiver.recv().await
    }

    /// Next event decoded back into a [`LoopEvent`].
    pub async fn recv_event(&mut self) -> Option<LoopEvent> {
        while let Some(frame) = self.receiver.recv().await {
            match serde_json::from_str(&frame.json) {
                Ok(event) => return Some(event),
                Err(e) => warn!(error = %e, "Skipping undecodable loop event"),
            }
        }
        None
    }

    pub fn into_receiver(self) -> mpsc::Receiver<EventFrame> {
        self.receiver
    }
}
