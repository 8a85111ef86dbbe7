//! Global counters and the periodic stats heartbeat.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

/// Broker sessions silent longer than this draw a periodic warning.
pub const SILENCE_WARNING_SECS: i64 = 60;

/// Per-session connection health, shared between the session task, the
/// heartbeat, and the health endpoint.
pub struct BrokerHealth {
    pub name: String,
    connected: AtomicBool,
    /// Unix seconds of the last delivery; zero before the first.
    last_delivery: AtomicI64,
}

impl BrokerHealth {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            connected: AtomicBool::new(false),
            last_delivery: AtomicI64::new(0),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn touch(&self) {
        self.last_delivery
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    /// Seconds since the last delivery; None before the first one.
    pub fn silence_secs(&self) -> Option<i64> {
        match self.last_delivery.load(Ordering::Relaxed) {
            0 => None,
            t => Some(Utc::now().timestamp() - t),
        }
    }
}

pub struct Stats {
    started: Instant,
    pub messages_total: AtomicU64,
    pub decode_errors: AtomicU64,
    pub messages_at_last_beat: AtomicU64,
    pub sessions: Vec<Arc<BrokerHealth>>,
}

#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub connected: bool,
    pub total_messages: u64,
    pub decode_errors: u64,
    /// Messages per second since the previous heartbeat.
    pub rate: f64,
    pub elapsed_secs: u64,
    pub active_flights: usize,
    pub surface_tracks: usize,
    pub terminal_tracks: usize,
    pub tower_aircraft: usize,
}

impl Stats {
    pub fn new(sessions: Vec<Arc<BrokerHealth>>) -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            messages_total: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            messages_at_last_beat: AtomicU64::new(0),
            sessions,
        })
    }

    pub fn count_message(&self) {
        self.messages_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Build the heartbeat snapshot, advancing the rate window.
    pub fn snapshot(&self, store: &crate::store::Store, interval_secs: f64) -> StatsSnapshot {
        let total = self.messages_total.load(Ordering::Relaxed);
        let previous = self.messages_at_last_beat.swap(total, Ordering::Relaxed);
        StatsSnapshot {
            connected: self.sessions.iter().any(|s| s.is_connected()),
            total_messages: total,
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            rate: (total.saturating_sub(previous)) as f64 / interval_secs,
            elapsed_secs: self.started.elapsed().as_secs(),
            active_flights: store.flights.len(),
            surface_tracks: store.surface.len(),
            terminal_tracks: store.terminal.len(),
            tower_aircraft: store.tower.len(),
        }
    }

    /// Read-only view for the REST endpoint; does not advance the rate
    /// window the heartbeat uses.
    pub fn peek(&self, store: &crate::store::Store, interval_secs: f64) -> StatsSnapshot {
        let total = self.messages_total.load(Ordering::Relaxed);
        let previous = self.messages_at_last_beat.load(Ordering::Relaxed);
        StatsSnapshot {
            connected: self.sessions.iter().any(|s| s.is_connected()),
            total_messages: total,
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            rate: (total.saturating_sub(previous)) as f64 / interval_secs,
            elapsed_secs: self.started.elapsed().as_secs(),
            active_flights: store.flights.len(),
            surface_tracks: store.surface.len(),
            terminal_tracks: store.terminal.len(),
            tower_aircraft: store.tower.len(),
        }
    }

    /// Log a warning for any session silent past the threshold.
    pub fn warn_on_silence(&self) {
        for session in &self.sessions {
            if let Some(silence) = session.silence_secs()
                && silence > SILENCE_WARNING_SECS
            {
                warn!(
                    session = %session.name,
                    silence_secs = silence,
                    "broker session has gone quiet"
                );
            }
        }
    }
}
