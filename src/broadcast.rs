//! Subscriber fabric.
//!
//! Subscribers register under a scope and immediately receive a filtered
//! snapshot; after that a fixed tick drains the dirty sets, batches the
//! summaries, and fans the serialized message out to every subscriber queue
//! in scope. Queues are bounded and drop their oldest entry under
//! backpressure so producers never block.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::correlate::{self, GateCodes};
use crate::flights::{FlightRecord, FlightSummary};
use crate::scope_proto;
use crate::store::Store;

/// Per-subscriber queue capacity.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 512;

/// En-route snapshot entries older than this are left out.
const SNAPSHOT_POSITION_MAX_AGE_SECS: i64 = 60;

/// Subscription scopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// All en-route flights (the web map).
    Flights,
    /// One airport's surface tracks.
    Surface(String),
    /// One facility's terminal tracks.
    Terminal(String),
    /// One airport's tower events.
    Tower(String),
    /// The downstream scope-display protocol, facility-scoped.
    ScopeProto(String),
}

/// Bounded single-reader queue with drop-oldest overflow.
pub struct OutboundQueue {
    capacity: usize,
    inner: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
        }
    }

    /// Never blocks: when full, the oldest undelivered message is discarded.
    pub fn push(&self, message: String) {
        {
            let mut queue = self.inner.lock().unwrap();
            if queue.len() >= self.capacity {
                queue.pop_front();
                metrics::counter!("broadcast.dropped_oldest").increment(1);
            }
            queue.push_back(message);
        }
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<String> {
        self.inner.lock().unwrap().pop_front()
    }

    pub async fn pop(&self) -> String {
        loop {
            if let Some(message) = self.try_pop() {
                return message;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Wire envelope: every message is `{type, data}` regardless of source.
pub fn envelope<T: Serialize>(kind: &str, data: &T) -> String {
    serde_json::json!({ "type": kind, "data": data }).to_string()
}

struct SubscriberEntry {
    scope: Scope,
    queue: Arc<OutboundQueue>,
}

/// Handle held by a connected subscriber task.
pub struct Subscription {
    pub id: Uuid,
    pub queue: Arc<OutboundQueue>,
}

/// Idle windows per record family.
#[derive(Debug, Clone)]
pub struct StaleWindows {
    pub flights: Duration,
    pub surface: Duration,
    pub terminal: Duration,
    pub tower: Duration,
}

impl Default for StaleWindows {
    fn default() -> Self {
        Self {
            flights: Duration::minutes(60),
            surface: Duration::seconds(120),
            terminal: Duration::seconds(120),
            tower: Duration::minutes(60),
        }
    }
}

pub struct Broadcaster {
    store: Arc<Store>,
    gate_codes: Arc<GateCodes>,
    subscribers: DashMap<Uuid, SubscriberEntry>,
    pub windows: StaleWindows,
}

impl Broadcaster {
    pub fn new(store: Arc<Store>, gate_codes: Arc<GateCodes>, windows: StaleWindows) -> Self {
        Self {
            store,
            gate_codes,
            subscribers: DashMap::new(),
            windows,
        }
    }

    /// Register a subscriber and queue its snapshot.
    pub fn subscribe(&self, scope: Scope) -> Subscription {
        let id = Uuid::new_v4();
        let queue = Arc::new(OutboundQueue::new(SUBSCRIBER_QUEUE_CAPACITY));
        for message in self.snapshot_messages(&scope) {
            queue.push(message);
        }
        self.subscribers.insert(
            id,
            SubscriberEntry {
                scope,
                queue: queue.clone(),
            },
        );
        metrics::gauge!("broadcast.subscribers").set(self.subscribers.len() as f64);
        Subscription { id, queue }
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.subscribers.remove(&id);
        metrics::gauge!("broadcast.subscribers").set(self.subscribers.len() as f64);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn fanout(&self, scope: &Scope, message: &str) {
        for entry in self.subscribers.iter() {
            if entry.value().scope == *scope {
                entry.value().queue.push(message.to_string());
            }
        }
    }

    /// Broadcast a stats envelope to the map subscribers.
    pub fn send_stats<T: Serialize>(&self, stats: &T) {
        self.fanout(&Scope::Flights, &envelope("stats", stats));
    }

    fn snapshot_messages(&self, scope: &Scope) -> Vec<String> {
        let now = Utc::now();
        match scope {
            Scope::Flights => {
                let summaries: Vec<FlightSummary> = self
                    .store
                    .flights
                    .iter()
                    .filter(|e| {
                        let record = e.value();
                        record.has_position()
                            && !record.is_cancelled()
                            && record
                                .position_age_secs(now)
                                .is_some_and(|age| age <= SNAPSHOT_POSITION_MAX_AGE_SECS)
                    })
                    .map(|e| FlightSummary::of(e.value()))
                    .collect();
                vec![envelope("snapshot", &summaries)]
            }
            Scope::Surface(airport) => {
                let tracks = self.surface_batch(airport);
                vec![envelope("snapshot", &tracks)]
            }
            Scope::Terminal(facility) => {
                let tracks: Vec<_> = self
                    .store
                    .terminal
                    .iter()
                    .filter(|e| e.key().0 == *facility && e.value().has_position())
                    .map(|e| e.value().clone())
                    .collect();
                vec![envelope("snapshot", &tracks)]
            }
            Scope::Tower(airport) => {
                let aircraft: Vec<_> = self
                    .store
                    .tower
                    .iter()
                    .filter(|e| e.key().0 == *airport)
                    .map(|e| e.value().clone())
                    .collect();
                vec![envelope("snapshot", &aircraft)]
            }
            Scope::ScopeProto(facility) => scope_proto::snapshot(&self.store, facility),
        }
    }

    /// Correlate and collect one airport's surface tracks with a position.
    fn surface_batch(&self, airport: &str) -> Vec<crate::surface::SurfaceTrack> {
        let keys: Vec<(String, String)> = self
            .store
            .surface
            .iter()
            .filter(|e| e.key().0 == airport && e.value().has_position())
            .map(|e| e.key().clone())
            .collect();
        let mut batch = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(mut entry) = self.store.surface.get_mut(&key) {
                correlate::correlate_surface(&self.store, &self.gate_codes, entry.value_mut());
                batch.push(entry.value().clone());
            }
        }
        batch
    }

    /// One broadcast tick: drain every dirty set and fan out batches.
    pub fn flush(&self) {
        let dirty_flights = self.store.drain_dirty_flights();
        if !dirty_flights.is_empty() {
            let mut summaries = Vec::new();
            let mut removed: Vec<String> = Vec::new();
            for gufi in &dirty_flights {
                match self.store.flights.get(gufi) {
                    Some(record) if !record.is_cancelled() => {
                        summaries.push(FlightSummary::of(record.value()));
                    }
                    Some(_) => removed.push(gufi.clone()),
                    None => removed.push(gufi.clone()),
                }
            }
            if !summaries.is_empty() {
                self.fanout(&Scope::Flights, &envelope("batch", &summaries));
            }
            if !removed.is_empty() {
                self.fanout(&Scope::Flights, &envelope("remove", &removed));
            }
            debug!(
                batched = summaries.len(),
                removed = removed.len(),
                "flight batch flushed"
            );
        }

        for airport in self.store.drain_dirty_surface() {
            let batch = self.surface_batch(&airport);
            self.fanout(&Scope::Surface(airport), &envelope("batch", &batch));
        }

        for facility in self.store.drain_dirty_terminal() {
            let tracks: Vec<_> = self
                .store
                .terminal
                .iter()
                .filter(|e| e.key().0 == facility)
                .map(|e| e.value().clone())
                .collect();
            self.fanout(&Scope::Terminal(facility.clone()), &envelope("batch", &tracks));
            for message in scope_proto::batch(&self.store, &facility, &tracks) {
                self.fanout(&Scope::ScopeProto(facility.clone()), &message);
            }
        }

        for airport in self.store.drain_dirty_tower() {
            let aircraft: Vec<_> = self
                .store
                .tower
                .iter()
                .filter(|e| e.key().0 == airport)
                .map(|e| e.value().clone())
                .collect();
            self.fanout(&Scope::Tower(airport), &envelope("batch", &aircraft));
        }
    }

    /// Staleness sweep: purge idle records, emit explicit deletions, return
    /// the purged flight records for end-of-flight archiving.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<FlightRecord> {
        let purged_flights = self.store.purge_idle_flights(now, self.windows.flights);
        if !purged_flights.is_empty() {
            let gufis: Vec<&str> = purged_flights.iter().map(|f| f.gufi.as_str()).collect();
            self.fanout(&Scope::Flights, &envelope("remove", &gufis));
        }

        for (airport, track_id) in self.store.purge_idle_surface(now, self.windows.surface) {
            self.fanout(
                &Scope::Surface(airport.clone()),
                &envelope("remove", &[track_id]),
            );
        }

        for (facility, track_num) in self.store.purge_idle_terminal(now, self.windows.terminal) {
            self.fanout(
                &Scope::Terminal(facility.clone()),
                &envelope("remove", &[track_num]),
            );
            let message = scope_proto::delete(&self.store, &facility, track_num);
            self.fanout(&Scope::ScopeProto(facility), &message);
        }

        for (airport, aircraft_id) in self.store.purge_idle_tower(now, self.windows.tower) {
            self.fanout(
                &Scope::Tower(airport.clone()),
                &envelope("remove", &[aircraft_id]),
            );
        }

        crate::merge::expire_pointouts(&self.store, now);
        purged_flights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcaster() -> (Arc<Store>, Broadcaster) {
        let store = Arc::new(Store::new());
        let b = Broadcaster::new(
            store.clone(),
            Arc::new(GateCodes::new(None)),
            StaleWindows::default(),
        );
        (store, b)
    }

    #[test]
    fn test_queue_drops_exactly_the_oldest() {
        let queue = OutboundQueue::new(SUBSCRIBER_QUEUE_CAPACITY);
        for i in 0..1000 {
            queue.push(format!("m{i}"));
        }
        assert_eq!(queue.len(), SUBSCRIBER_QUEUE_CAPACITY);
        // The reader sees exactly the most recent 512 messages, in order
        assert_eq!(queue.try_pop().as_deref(), Some("m488"));
        let mut last = String::new();
        while let Some(m) = queue.try_pop() {
            last = m;
        }
        assert_eq!(last, "m999");
    }

    #[tokio::test]
    async fn test_queue_pop_wakes_on_push() {
        let queue = Arc::new(OutboundQueue::new(8));
        let reader = queue.clone();
        let handle = tokio::spawn(async move { reader.pop().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.push("hello".to_string());
        assert_eq!(handle.await.unwrap(), "hello");
    }

    #[test]
    fn test_snapshot_filters_positionless_cancelled_and_stale() {
        let (store, b) = broadcaster();
        let now = Utc::now();

        let mut with_pos = FlightRecord::new("ok".to_string(), now);
        with_pos.record_position(40.0, -75.0, now);
        store.flights.insert("ok".to_string(), with_pos);

        store
            .flights
            .insert("nopos".to_string(), FlightRecord::new("nopos".to_string(), now));

        let mut cancelled = FlightRecord::new("cx".to_string(), now);
        cancelled.record_position(41.0, -75.0, now);
        cancelled.apply_status(crate::flights::FlightStatus::Cancelled);
        store.flights.insert("cx".to_string(), cancelled);

        let mut stale = FlightRecord::new("stale".to_string(), now);
        stale.record_position(42.0, -75.0, now - Duration::minutes(5));
        store.flights.insert("stale".to_string(), stale);

        let sub = b.subscribe(Scope::Flights);
        let snapshot = sub.queue.try_pop().unwrap();
        assert!(snapshot.contains("\"type\":\"snapshot\""));
        assert!(snapshot.contains("\"ok\""));
        assert!(!snapshot.contains("nopos"));
        assert!(!snapshot.contains("\"cx\""));
        assert!(!snapshot.contains("stale"));
    }

    #[test]
    fn test_flush_sends_batch_to_scope_only() {
        let (store, b) = broadcaster();
        let now = Utc::now();
        let mut record = FlightRecord::new("g1".to_string(), now);
        record.record_position(40.0, -75.0, now);
        store.flights.insert("g1".to_string(), record);

        let map_sub = b.subscribe(Scope::Flights);
        let surface_sub = b.subscribe(Scope::Surface("KATL".to_string()));
        // drain the snapshots
        map_sub.queue.try_pop();
        surface_sub.queue.try_pop();

        store.mark_flight_dirty("g1");
        b.flush();
        let batch = map_sub.queue.try_pop().unwrap();
        assert!(batch.contains("\"type\":\"batch\""));
        assert!(batch.contains("\"g1\""));
        assert!(surface_sub.queue.is_empty());
    }

    #[test]
    fn test_sweep_purges_and_notifies() {
        let (store, b) = broadcaster();
        let now = Utc::now();
        let mut old = FlightRecord::new("old".to_string(), now - Duration::hours(2));
        old.record_position(40.0, -75.0, now - Duration::hours(2));
        old.last_seen = now - Duration::hours(2);
        store.flights.insert("old".to_string(), old);

        let sub = b.subscribe(Scope::Flights);
        sub.queue.try_pop();

        let purged = b.sweep(now);
        assert_eq!(purged.len(), 1);
        let removal = sub.queue.try_pop().unwrap();
        assert!(removal.contains("\"type\":\"remove\""));
        assert!(removal.contains("old"));
        assert!(store.flights.is_empty());
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let (store, b) = broadcaster();
        let sub = b.subscribe(Scope::Flights);
        assert_eq!(b.subscriber_count(), 1);
        b.unsubscribe(sub.id);
        assert_eq!(b.subscriber_count(), 0);
        store.mark_flight_dirty("g1");
        b.flush();
        assert!(sub.queue.is_empty());
    }
}
