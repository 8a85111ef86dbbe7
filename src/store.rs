//! Concurrent identity and state store.
//!
//! Four keyed maps, one per record family. DashMap gives per-entry locking,
//! so all mutation of a single record is serialized while different records
//! update in parallel. Dirty sets are kept at the coarse level each
//! subscriber family batches on: flight id for the en-route map, airport for
//! surface and tower scopes, facility for terminal scopes.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use crate::flights::FlightRecord;
use crate::surface::SurfaceTrack;
use crate::terminal::TerminalTrack;
use crate::tower::TowerAircraft;

#[derive(Default)]
pub struct Store {
    pub flights: DashMap<String, FlightRecord>,
    pub surface: DashMap<(String, String), SurfaceTrack>,
    pub terminal: DashMap<(String, u32), TerminalTrack>,
    pub tower: DashMap<(String, String), TowerAircraft>,

    dirty_flights: DashSet<String>,
    dirty_surface_airports: DashSet<String>,
    dirty_terminal_facilities: DashSet<String>,
    dirty_tower_airports: DashSet<String>,

    /// FDPS cross-reference identifier -> GUFI, for the surface correlator's
    /// direct hit.
    pub eram_index: DashMap<String, String>,
    /// Callsign -> GUFIs, rebuilt on a coarse schedule rather than kept
    /// transactionally current.
    callsign_index: RwLock<HashMap<String, Vec<String>>>,
    /// Stable GUIDs for the downstream scope protocol, minted on first sight
    /// of a Mode-S key or facility+track key.
    guids: DashMap<String, Uuid>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_flight_dirty(&self, gufi: &str) {
        self.dirty_flights.insert(gufi.to_string());
    }

    pub fn mark_surface_dirty(&self, airport: &str) {
        self.dirty_surface_airports.insert(airport.to_string());
    }

    pub fn mark_terminal_dirty(&self, facility: &str) {
        self.dirty_terminal_facilities.insert(facility.to_string());
    }

    pub fn mark_tower_dirty(&self, airport: &str) {
        self.dirty_tower_airports.insert(airport.to_string());
    }

    pub fn drain_dirty_flights(&self) -> Vec<String> {
        drain(&self.dirty_flights)
    }

    pub fn drain_dirty_surface(&self) -> Vec<String> {
        drain(&self.dirty_surface_airports)
    }

    pub fn drain_dirty_terminal(&self) -> Vec<String> {
        drain(&self.dirty_terminal_facilities)
    }

    pub fn drain_dirty_tower(&self) -> Vec<String> {
        drain(&self.dirty_tower_airports)
    }

    /// Rebuild the callsign secondary index from the current flight set.
    pub fn rebuild_callsign_index(&self) {
        let mut index: HashMap<String, Vec<String>> = HashMap::new();
        for entry in self.flights.iter() {
            if let Some(callsign) = &entry.value().callsign {
                index
                    .entry(callsign.to_ascii_uppercase())
                    .or_default()
                    .push(entry.key().clone());
            }
        }
        *self.callsign_index.write().unwrap() = index;
    }

    pub fn flights_by_callsign(&self, callsign: &str) -> Vec<String> {
        self.callsign_index
            .read()
            .unwrap()
            .get(&callsign.to_ascii_uppercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Resolve a surface track's ERAM cross-reference to a flight GUFI:
    /// direct key hit first, then the FDPS identifier index.
    pub fn resolve_eram_gufi(&self, eram_gufi: &str) -> Option<String> {
        if self.flights.contains_key(eram_gufi) {
            return Some(eram_gufi.to_string());
        }
        self.eram_index.get(eram_gufi).map(|g| g.value().clone())
    }

    /// Whether any terminal track in the facility already flies this
    /// callsign. Used by enrichment to avoid duplicating datablocks when the
    /// feeds desync.
    pub fn callsign_in_facility(&self, facility: &str, callsign: &str) -> bool {
        self.terminal.iter().any(|entry| {
            entry.key().0 == facility
                && entry
                    .value()
                    .callsign
                    .as_deref()
                    .is_some_and(|c| c.eq_ignore_ascii_case(callsign))
        })
    }

    /// Find the terminal track in a facility carrying the given Mode-S
    /// address.
    pub fn terminal_by_hex(&self, facility: &str, hex: &str) -> Option<(String, u32)> {
        self.terminal.iter().find_map(|entry| {
            if entry.key().0 == facility
                && entry
                    .value()
                    .mode_s_hex
                    .as_deref()
                    .is_some_and(|h| h.eq_ignore_ascii_case(hex))
            {
                Some(entry.key().clone())
            } else {
                None
            }
        })
    }

    /// Tower event history for (airport, aircraft id), matched
    /// case-insensitively on the aircraft id.
    pub fn tower_lookup_ci(&self, airport: &str, aircraft_id: &str) -> Option<TowerAircraft> {
        let exact = self
            .tower
            .get(&(airport.to_string(), aircraft_id.to_string()));
        if let Some(hit) = exact {
            return Some(hit.value().clone());
        }
        self.tower.iter().find_map(|entry| {
            let (apt, acid) = entry.key();
            if apt == airport && acid.eq_ignore_ascii_case(aircraft_id) {
                Some(entry.value().clone())
            } else {
                None
            }
        })
    }

    /// Stable GUID for a scope-protocol key, minted on first sight.
    pub fn guid_for(&self, key: &str) -> Uuid {
        *self
            .guids
            .entry(key.to_string())
            .or_insert_with(Uuid::new_v4)
    }

    pub fn forget_guid(&self, key: &str) {
        self.guids.remove(key);
    }

    /// Remove flights idle past the window. Returns the purged records so
    /// the sweep can archive the non-cancelled ones.
    pub fn purge_idle_flights(&self, now: DateTime<Utc>, idle: chrono::Duration) -> Vec<FlightRecord> {
        let cutoff = now - idle;
        let stale: Vec<String> = self
            .flights
            .iter()
            .filter(|e| e.value().last_seen < cutoff)
            .map(|e| e.key().clone())
            .collect();
        let mut purged = Vec::with_capacity(stale.len());
        for gufi in stale {
            if let Some((_, record)) = self.flights.remove(&gufi) {
                if let Some(fdps) = &record.fdps_gufi {
                    self.eram_index.remove(fdps);
                }
                purged.push(record);
            }
        }
        purged
    }

    /// Remove surface tracks idle past the window; returns removed keys.
    pub fn purge_idle_surface(
        &self,
        now: DateTime<Utc>,
        idle: chrono::Duration,
    ) -> Vec<(String, String)> {
        let cutoff = now - idle;
        let stale: Vec<(String, String)> = self
            .surface
            .iter()
            .filter(|e| e.value().last_seen < cutoff)
            .map(|e| e.key().clone())
            .collect();
        for key in &stale {
            self.surface.remove(key);
        }
        stale
    }

    /// Remove terminal tracks idle past the window; returns removed keys.
    pub fn purge_idle_terminal(
        &self,
        now: DateTime<Utc>,
        idle: chrono::Duration,
    ) -> Vec<(String, u32)> {
        let cutoff = now - idle;
        let stale: Vec<(String, u32)> = self
            .terminal
            .iter()
            .filter(|e| e.value().last_seen < cutoff)
            .map(|e| e.key().clone())
            .collect();
        for key in &stale {
            self.terminal.remove(key);
        }
        stale
    }

    /// Remove tower histories idle past the window; returns removed keys.
    pub fn purge_idle_tower(
        &self,
        now: DateTime<Utc>,
        idle: chrono::Duration,
    ) -> Vec<(String, String)> {
        let cutoff = now - idle;
        let stale: Vec<(String, String)> = self
            .tower
            .iter()
            .filter(|e| e.value().last_seen < cutoff)
            .map(|e| e.key().clone())
            .collect();
        for key in &stale {
            self.tower.remove(key);
        }
        stale
    }
}

fn drain(set: &DashSet<String>) -> Vec<String> {
    let keys: Vec<String> = set.iter().map(|k| k.key().clone()).collect();
    for key in &keys {
        set.remove(key);
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flights::FlightStatus;

    #[test]
    fn test_dirty_sets_drain_and_clear() {
        let store = Store::new();
        store.mark_flight_dirty("g1");
        store.mark_flight_dirty("g2");
        store.mark_flight_dirty("g1");
        let mut drained = store.drain_dirty_flights();
        drained.sort();
        assert_eq!(drained, vec!["g1", "g2"]);
        assert!(store.drain_dirty_flights().is_empty());
    }

    #[test]
    fn test_callsign_index_rebuild() {
        let store = Store::new();
        let mut record = FlightRecord::new("g1".to_string(), Utc::now());
        record.callsign = Some("DAL402".to_string());
        store.flights.insert("g1".to_string(), record);
        assert!(store.flights_by_callsign("DAL402").is_empty());
        store.rebuild_callsign_index();
        assert_eq!(store.flights_by_callsign("dal402"), vec!["g1"]);
    }

    #[test]
    fn test_eram_resolution_direct_then_index() {
        let store = Store::new();
        store
            .flights
            .insert("gufi-1".to_string(), FlightRecord::new("gufi-1".to_string(), Utc::now()));
        store
            .eram_index
            .insert("KZTL301DAL402".to_string(), "gufi-1".to_string());
        assert_eq!(store.resolve_eram_gufi("gufi-1").as_deref(), Some("gufi-1"));
        assert_eq!(
            store.resolve_eram_gufi("KZTL301DAL402").as_deref(),
            Some("gufi-1")
        );
        assert!(store.resolve_eram_gufi("missing").is_none());
    }

    #[test]
    fn test_guid_is_stable_per_key() {
        let store = Store::new();
        let a = store.guid_for("A7C43B");
        let b = store.guid_for("A7C43B");
        assert_eq!(a, b);
        assert_ne!(a, store.guid_for("A80:412"));
    }

    #[test]
    fn test_purge_idle_flights_removes_and_returns() {
        let store = Store::new();
        let now = Utc::now();
        let mut old = FlightRecord::new("old".to_string(), now - chrono::Duration::hours(2));
        old.status = FlightStatus::Dropped;
        old.fdps_gufi = Some("XREF1".to_string());
        store.eram_index.insert("XREF1".to_string(), "old".to_string());
        store.flights.insert("old".to_string(), old);
        store
            .flights
            .insert("fresh".to_string(), FlightRecord::new("fresh".to_string(), now));

        let purged = store.purge_idle_flights(now, chrono::Duration::minutes(60));
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].gufi, "old");
        assert!(store.flights.contains_key("fresh"));
        assert!(store.eram_index.get("XREF1").is_none());
    }
}
