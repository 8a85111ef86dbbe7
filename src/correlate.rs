//! Cross-source correlator for surface tracks.
//!
//! Runs inside the surface broadcast pipeline. Each track gets its overlay
//! re-derived from SFDPS (by ERAM cross-reference, then by callsign) and
//! TDLS (by airport + aircraft id), and finally a short gate code from the
//! per-airport pattern map. Overlay data is display-only and never written
//! back into the en-route store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::store::Store;
use crate::surface::SurfaceTrack;

/// Per-airport pattern map: pattern string -> short gate code. Patterns are
/// whitespace-separated tokens; a `#` suffix on a token matches optional
/// trailing digits.
pub type AirportPatterns = BTreeMap<String, String>;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GateCodeFile(pub HashMap<String, AirportPatterns>);

/// Persisted gate-code pattern maps with read-mostly access.
pub struct GateCodes {
    path: Option<PathBuf>,
    map: RwLock<HashMap<String, AirportPatterns>>,
}

impl GateCodes {
    pub fn new(path: Option<PathBuf>) -> Self {
        let map = match &path {
            Some(p) => match std::fs::read_to_string(p) {
                Ok(raw) => match serde_json::from_str::<GateCodeFile>(&raw) {
                    Ok(file) => {
                        info!(airports = file.0.len(), "gate code patterns loaded");
                        file.0
                    }
                    Err(e) => {
                        warn!(error = %e, path = %p.display(), "gate code file unreadable");
                        HashMap::new()
                    }
                },
                Err(_) => HashMap::new(),
            },
            None => HashMap::new(),
        };
        Self {
            path,
            map: RwLock::new(map),
        }
    }

    pub fn airport(&self, airport: &str) -> AirportPatterns {
        self.map
            .read()
            .unwrap()
            .get(airport)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_airport(&self, airport: &str, patterns: AirportPatterns) -> Result<()> {
        {
            let mut map = self.map.write().unwrap();
            map.insert(airport.to_string(), patterns);
        }
        self.save()
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let map = self.map.read().unwrap();
        let payload = serde_json::to_string_pretty(&GateCodeFile(map.clone()))?;
        std::fs::write(path, payload)?;
        Ok(())
    }

    /// Derive a gate code for a route. First matching pattern wins; the
    /// fallback is the destination truncated to its FAA LID.
    pub fn derive(&self, airport: &str, route: Option<&str>, destination: Option<&str>) -> Option<String> {
        if let Some(route) = route {
            let tokens = route_token_set(route);
            let map = self.map.read().unwrap();
            if let Some(patterns) = map.get(airport) {
                for (pattern, code) in patterns {
                    if pattern_matches(pattern, &tokens) {
                        return Some(code.clone());
                    }
                }
            }
        }
        destination.map(lid_of)
    }
}

/// Route tokens split on whitespace and dots; every token also contributes
/// its trailing-digit-stripped stem.
fn route_token_set(route: &str) -> HashSet<String> {
    let mut set = HashSet::new();
    for token in route.split([' ', '.']).filter(|t| !t.is_empty()) {
        set.insert(token.to_string());
        let stem = token.trim_end_matches(|c: char| c.is_ascii_digit());
        if stem.len() != token.len() && !stem.is_empty() {
            set.insert(stem.to_string());
        }
    }
    set
}

/// Every pattern token must appear in the token set. A trailing `#` makes
/// the trailing digits optional on the route side.
fn pattern_matches(pattern: &str, tokens: &HashSet<String>) -> bool {
    pattern.split_whitespace().all(|ptoken| {
        match ptoken.strip_suffix('#') {
            Some(stem) => tokens.contains(stem),
            None => tokens.contains(ptoken),
        }
    })
}

/// Strip a leading K or P from a four-letter code down to the FAA LID.
fn lid_of(code: &str) -> String {
    if code.len() == 4 {
        code.strip_prefix(['K', 'P']).unwrap_or(code).to_string()
    } else {
        code.to_string()
    }
}

/// Re-derive one surface track's overlay. Departure legs win over arrival
/// legs when an airline reuses a callsign for the turnover.
pub fn correlate_surface(store: &Store, gate_codes: &GateCodes, track: &mut SurfaceTrack) {
    track.overlay = Default::default();

    let flight_gufi = track
        .eram_gufi
        .as_deref()
        .and_then(|x| store.resolve_eram_gufi(x))
        .or_else(|| {
            let callsign = track.callsign.as_deref()?;
            let candidates = store.flights_by_callsign(callsign);
            pick_leg(store, &candidates, &track.airport)
        });

    if let Some(gufi) = flight_gufi
        && let Some(flight) = store.flights.get(&gufi)
    {
        track.overlay.origin = flight.origin.clone();
        track.overlay.destination = flight.destination.clone();
        track.overlay.arrival_procedure = flight.arrival_procedure.clone();
        track.overlay.route = flight.route_text.clone();
    }

    if let Some(callsign) = &track.callsign
        && let Some(tower) = store.tower_lookup_ci(&track.airport, callsign)
    {
        let (gate, runway) = tower.latest_gate_runway();
        track.overlay.gate = gate.map(str::to_string);
        track.overlay.runway = runway.map(str::to_string);
        if track.overlay.destination.is_none() {
            track.overlay.destination = tower.latest_destination().map(str::to_string);
        }
    }

    track.overlay.gate_code = gate_codes.derive(
        &track.airport,
        track.overlay.route.as_deref(),
        track.overlay.destination.as_deref(),
    );
}

/// Among flights sharing a callsign, prefer the one departing this airport,
/// then the one arriving here.
fn pick_leg(store: &Store, candidates: &[String], airport: &str) -> Option<String> {
    let airport_lid = lid_of(airport);
    let mut arrival: Option<String> = None;
    for gufi in candidates {
        let Some(flight) = store.flights.get(gufi) else {
            continue;
        };
        if flight.origin.as_deref().map(lid_of).as_deref() == Some(airport_lid.as_str()) {
            return Some(gufi.clone());
        }
        if arrival.is_none()
            && flight.destination.as_deref().map(lid_of).as_deref() == Some(airport_lid.as_str())
        {
            arrival = Some(gufi.clone());
        }
    }
    arrival
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flights::FlightRecord;
    use crate::tower::{TowerAircraft, TowerEvent, TowerEventKind};
    use chrono::Utc;

    fn gate_codes_with(airport: &str, patterns: &[(&str, &str)]) -> GateCodes {
        let codes = GateCodes::new(None);
        codes
            .set_airport(
                airport,
                patterns
                    .iter()
                    .map(|(p, c)| (p.to_string(), c.to_string()))
                    .collect(),
            )
            .unwrap();
        codes
    }

    #[test]
    fn test_pattern_tokens_all_required() {
        let tokens = route_token_set("KATL SMKEY3 SMKEY Q22 VUZ KMEM");
        assert!(pattern_matches("SMKEY# Q22", &tokens));
        assert!(pattern_matches("SMKEY3", &tokens));
        assert!(!pattern_matches("SMKEY# J52", &tokens));
    }

    #[test]
    fn test_stem_of_digit_suffixed_token_is_in_set() {
        let tokens = route_token_set("ROBUC3.BUZRD");
        assert!(tokens.contains("ROBUC3"));
        assert!(tokens.contains("ROBUC"));
        assert!(tokens.contains("BUZRD"));
    }

    #[test]
    fn test_derive_first_match_then_fallback() {
        let codes = gate_codes_with("KATL", &[("SMKEY#", "MEM"), ("VUZ", "VUZ")]);
        assert_eq!(
            codes.derive("KATL", Some("SMKEY3 VUZ KMEM"), Some("KMEM")),
            Some("MEM".to_string())
        );
        assert_eq!(
            codes.derive("KATL", Some("PLAIN ROUTE"), Some("KMEM")),
            Some("MEM".to_string())
        );
        assert_eq!(codes.derive("KATL", None, Some("PHNL")), Some("HNL".to_string()));
        assert_eq!(codes.derive("KATL", None, Some("MCO")), Some("MCO".to_string()));
        assert_eq!(codes.derive("KATL", None, None), None);
    }

    #[test]
    fn test_gate_code_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gatecodes.json");
        {
            let codes = GateCodes::new(Some(path.clone()));
            codes
                .set_airport("KATL", BTreeMap::from([("VUZ".to_string(), "VUZ".to_string())]))
                .unwrap();
        }
        let reloaded = GateCodes::new(Some(path));
        assert_eq!(reloaded.airport("KATL").get("VUZ").unwrap(), "VUZ");
    }

    fn flight(gufi: &str, callsign: &str, origin: &str, destination: &str) -> FlightRecord {
        let mut f = FlightRecord::new(gufi.to_string(), Utc::now());
        f.callsign = Some(callsign.to_string());
        f.origin = Some(origin.to_string());
        f.destination = Some(destination.to_string());
        f.route_text = Some(format!("{origin} DCT {destination}"));
        f.arrival_procedure = Some("GLAVN1".to_string());
        f
    }

    #[test]
    fn test_correlate_by_eram_reference() {
        let store = Store::new();
        store
            .flights
            .insert("g1".to_string(), flight("g1", "DAL402", "KATL", "KMCO"));
        store
            .eram_index
            .insert("KZTL301DAL402".to_string(), "g1".to_string());

        let mut track = SurfaceTrack::new("KATL".to_string(), "1024".to_string(), Utc::now());
        track.eram_gufi = Some("KZTL301DAL402".to_string());
        let codes = GateCodes::new(None);
        correlate_surface(&store, &codes, &mut track);
        assert_eq!(track.overlay.origin.as_deref(), Some("KATL"));
        assert_eq!(track.overlay.destination.as_deref(), Some("KMCO"));
        assert_eq!(track.overlay.arrival_procedure.as_deref(), Some("GLAVN1"));
        assert_eq!(track.overlay.gate_code.as_deref(), Some("MCO"));
    }

    #[test]
    fn test_correlate_by_callsign_prefers_departure_leg() {
        let store = Store::new();
        // Same callsign, one leg arriving KATL and one departing it
        store
            .flights
            .insert("in".to_string(), flight("in", "DAL402", "KMCO", "KATL"));
        store
            .flights
            .insert("out".to_string(), flight("out", "DAL402", "KATL", "KBOS"));
        store.rebuild_callsign_index();

        let mut track = SurfaceTrack::new("KATL".to_string(), "1024".to_string(), Utc::now());
        track.callsign = Some("DAL402".to_string());
        let codes = GateCodes::new(None);
        correlate_surface(&store, &codes, &mut track);
        assert_eq!(track.overlay.destination.as_deref(), Some("KBOS"));
    }

    #[test]
    fn test_tdls_attach_fills_gate_runway_and_fallback_destination() {
        let store = Store::new();
        let now = Utc::now();
        let mut tower = TowerAircraft::new("KCLT".to_string(), "AAL1225".to_string(), now);
        tower.push(
            TowerEvent {
                at: now,
                beacon: None,
                aircraft_type: None,
                computer_id: None,
                eram_gufi: None,
                sfdps_gufi: None,
                destination: Some("KDFW".to_string()),
                kind: TowerEventKind::Departure {
                    gate: Some("C10".to_string()),
                    runway: Some("18C".to_string()),
                    clearance_time: None,
                    taxi_time: None,
                    takeoff_time: None,
                },
            },
            now,
        );
        store
            .tower
            .insert(("KCLT".to_string(), "AAL1225".to_string()), tower);

        let mut track = SurfaceTrack::new("KCLT".to_string(), "55".to_string(), now);
        track.callsign = Some("aal1225".to_string());
        let codes = GateCodes::new(None);
        correlate_surface(&store, &codes, &mut track);
        assert_eq!(track.overlay.gate.as_deref(), Some("C10"));
        assert_eq!(track.overlay.runway.as_deref(), Some("18C"));
        assert_eq!(track.overlay.destination.as_deref(), Some("KDFW"));
        assert_eq!(track.overlay.gate_code.as_deref(), Some("DFW"));
    }
}
