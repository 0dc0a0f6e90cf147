//! Live fan-out registry (C5): routes each newly persisted record to every
//! live WebSocket subscriber of its tenant, without ever blocking the
//! ingest path on a slow reader.
//!
//! The registry (`DashMap<TenantId, DashMap<SubscriberId, _>>`, a bounded
//! `mpsc` channel per subscriber, `try_send` + `dropped_count` eviction) is
//! original to this spec's §4.5/§8-property-5 requirements, grounded on the
//! teacher's `DashMap`-sharded state pattern in `rate_limiting.rs` and
//! `usage_analytics.rs`, generalized from a flat counter map to a nested
//! per-tenant subscriber set. The WebSocket task shape (`socket.split()`,
//! `tokio::select!` over a heartbeat interval and the subscriber channel)
//! follows the pack's orchestrator `stream.rs`, rewritten in the teacher's
//! plain documented style.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use loglytics_core::LogRecord;

use crate::config::FanoutConfig;
use crate::metrics;
use crate::state::SharedState;

/// A message queued for delivery to one subscriber.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    NewLog(Value),
}

struct SubscriberEntry {
    sender: mpsc::Sender<OutboundMessage>,
    dropped_count: Arc<AtomicU32>,
    eviction_reason: Arc<Mutex<Option<&'static str>>>,
}

/// Tenant-sharded subscriber registry. Mutation (`subscribe`/`unsubscribe`)
/// and `broadcast` may run concurrently; `DashMap`'s internal sharding gives
/// `broadcast` a consistent snapshot of the handle set without a global lock.
pub struct FanoutRegistry {
    tenants: DashMap<String, DashMap<String, SubscriberEntry>>,
    buffer_size: usize,
    drop_eviction_threshold: u32,
}

impl FanoutRegistry {
    pub fn new(config: &FanoutConfig) -> Self {
        Self {
            tenants: DashMap::new(),
            buffer_size: config.subscriber_buffer,
            drop_eviction_threshold: config.drop_eviction_threshold,
        }
    }

    /// Register a new subscriber for `tenant_id`, returning the handle it
    /// drains.
    pub fn subscribe(self: &Arc<Self>, tenant_id: &str) -> Handle {
        let subscriber_id = uuid::Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::channel(self.buffer_size.max(1));
        let eviction_reason = Arc::new(Mutex::new(None));
        let entry = SubscriberEntry {
            sender,
            dropped_count: Arc::new(AtomicU32::new(0)),
            eviction_reason: eviction_reason.clone(),
        };
        let subs = self.tenants.entry(tenant_id.to_string()).or_default();
        subs.insert(subscriber_id.clone(), entry);
        metrics::update_fanout_subscribers(tenant_id, subs.len() as i64);
        drop(subs);

        Handle {
            tenant_id: tenant_id.to_string(),
            subscriber_id,
            receiver,
            eviction_reason,
            registry: self.clone(),
        }
    }

    /// Remove and close a subscriber. Safe to call more than once.
    pub fn unsubscribe(&self, tenant_id: &str, subscriber_id: &str) {
        if let Some(subs) = self.tenants.get(tenant_id) {
            subs.remove(subscriber_id);
            metrics::update_fanout_subscribers(tenant_id, subs.len() as i64);
        }
    }

    /// Push `record` to every subscriber of `tenant_id`. Never blocks: a
    /// full buffer drops the record for that subscriber and counts towards
    /// eviction, never towards the caller's latency.
    pub fn broadcast(&self, tenant_id: &str, record: &LogRecord) {
        let Some(subscribers) = self.tenants.get(tenant_id) else {
            return;
        };
        let payload = new_log_payload(record);

        let mut to_evict: Vec<String> = Vec::new();
        for item in subscribers.iter() {
            let subscriber_id = item.key().clone();
            let entry = item.value();
            match entry.sender.try_send(OutboundMessage::NewLog(payload.clone())) {
                Ok(()) => metrics::record_fanout_delivered(),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics::record_fanout_dropped();
                    let dropped = entry.dropped_count.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped >= self.drop_eviction_threshold {
                        to_evict.push(subscriber_id);
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    to_evict.push(subscriber_id);
                }
            }
        }
        drop(subscribers);

        for subscriber_id in to_evict {
            self.evict(tenant_id, &subscriber_id, "slow_consumer");
        }
    }

    fn evict(&self, tenant_id: &str, subscriber_id: &str, reason: &'static str) {
        if let Some(subs) = self.tenants.get(tenant_id) {
            if let Some((_, entry)) = subs.remove(subscriber_id) {
                *entry.eviction_reason.lock() = Some(reason);
                warn!(tenant_id, subscriber_id, reason, "evicted slow fan-out subscriber");
                metrics::record_fanout_eviction();
                metrics::update_fanout_subscribers(tenant_id, subs.len() as i64);
                // `entry.sender` drops here, closing the channel; the
                // subscriber's task observes `recv() == None` and reads
                // `eviction_reason` to learn why before closing its socket.
            }
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self, tenant_id: &str) -> usize {
        self.tenants.get(tenant_id).map(|s| s.len()).unwrap_or(0)
    }
}

fn new_log_payload(record: &LogRecord) -> Value {
    json!({
        "type": "new_log",
        "data": {
            "event_time": record.event_time.to_rfc3339(),
            "level": record.level.as_str(),
            "message": record.message,
            "source": record.source,
        }
    })
}

/// A live subscription. Dropping it without calling `unsubscribe` leaves a
/// stale registry entry until the channel fills and the subscriber is
/// evicted naturally; callers should always `unsubscribe` on disconnect.
pub struct Handle {
    pub tenant_id: String,
    pub subscriber_id: String,
    receiver: mpsc::Receiver<OutboundMessage>,
    eviction_reason: Arc<Mutex<Option<&'static str>>>,
    registry: Arc<FanoutRegistry>,
}

impl Handle {
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.receiver.recv().await
    }

    pub fn eviction_reason(&self) -> Option<&'static str> {
        *self.eviction_reason.lock()
    }

    pub fn unsubscribe(&self) {
        self.registry.unsubscribe(&self.tenant_id, &self.subscriber_id);
    }
}

/// `GET /ws/:tenant_id` — upgrades to a WebSocket and streams `new_log`
/// frames for the tenant until the client disconnects or is evicted.
pub async fn subscribe_handler(
    State(state): State<SharedState>,
    Path(tenant_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, tenant_id))
}

async fn handle_socket(socket: WebSocket, state: SharedState, tenant_id: String) {
    let mut handle = state.fanout.subscribe(&tenant_id);
    let (mut sink, mut stream) = socket.split();

    let info = json!({
        "type": "connection_info",
        "tenant_id": tenant_id,
        "subscriber_id": handle.subscriber_id,
    });
    if sink.send(Message::Text(info.to_string())).await.is_err() {
        handle.unsubscribe();
        return;
    }

    let heartbeat_interval = state.config.fanout.heartbeat_interval;
    let idle_timeout = heartbeat_interval * state.config.fanout.heartbeat_timeout_multiplier;
    let mut ticker = tokio::time::interval(heartbeat_interval);
    ticker.tick().await; // the first tick fires immediately; skip it
    let mut last_activity = tokio::time::Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if last_activity.elapsed() > idle_timeout {
                    debug!(tenant_id, subscriber_id = %handle.subscriber_id, "heartbeat timeout, closing");
                    break;
                }
                let heartbeat = json!({"type": "heartbeat", "at": chrono::Utc::now().to_rfc3339()});
                if sink.send(Message::Text(heartbeat.to_string())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = tokio::time::Instant::now();
                        if text == "ping" && sink.send(Message::Text("pong".to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => last_activity = tokio::time::Instant::now(),
                    Some(Err(_)) => break,
                }
            }
            outbound = handle.recv() => {
                match outbound {
                    Some(OutboundMessage::NewLog(payload)) => {
                        last_activity = tokio::time::Instant::now();
                        if sink.send(Message::Text(payload.to_string())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        if let Some(reason) = handle.eviction_reason() {
                            let frame = json!({"type": "evicted", "reason": reason});
                            let _ = sink.send(Message::Text(frame.to_string())).await;
                        }
                        let _ = sink.close().await;
                        return;
                    }
                }
            }
        }
    }

    handle.unsubscribe();
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loglytics_core::LogLevel;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn sample_record() -> LogRecord {
        LogRecord {
            tenant_id: "t1".to_string(),
            ingested_at: Utc::now(),
            seq: 0,
            event_time: Utc::now(),
            level: LogLevel::Error,
            message: "boom".to_string(),
            source: Some("svc".to_string()),
            service: None,
            metadata: BTreeMap::new(),
            raw: "{}".to_string(),
        }
    }

    fn test_config() -> FanoutConfig {
        FanoutConfig {
            subscriber_buffer: 2,
            drop_eviction_threshold: 3,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout_multiplier: 2,
        }
    }

    #[tokio::test]
    async fn broadcast_delivers_to_subscriber() {
        let registry = Arc::new(FanoutRegistry::new(&test_config()));
        let mut handle = registry.subscribe("t1");
        registry.broadcast("t1", &sample_record());
        let msg = handle.recv().await.unwrap();
        match msg {
            OutboundMessage::NewLog(value) => assert_eq!(value["data"]["level"], "ERROR"),
        }
    }

    #[tokio::test]
    async fn broadcast_to_unknown_tenant_is_a_no_op() {
        let registry = Arc::new(FanoutRegistry::new(&test_config()));
        registry.broadcast("nobody", &sample_record());
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_past_drop_threshold() {
        let registry = Arc::new(FanoutRegistry::new(&test_config()));
        let mut handle = registry.subscribe("t1");
        // buffer=2, threshold=3: fill the buffer, then overflow 3 more times.
        for _ in 0..5 {
            registry.broadcast("t1", &sample_record());
        }
        assert_eq!(registry.subscriber_count("t1"), 0);
        // Drain whatever made it into the buffer, then the channel closes.
        while handle.recv().await.is_some() {}
        assert_eq!(handle.eviction_reason(), Some("slow_consumer"));
    }

    #[tokio::test]
    async fn unsubscribe_removes_the_handle() {
        let registry = Arc::new(FanoutRegistry::new(&test_config()));
        let handle = registry.subscribe("t1");
        assert_eq!(registry.subscriber_count("t1"), 1);
        handle.unsubscribe();
        assert_eq!(registry.subscriber_count("t1"), 0);
    }
}
