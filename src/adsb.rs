//! ADS-B enrichment orchestrator.
//!
//! Two loops share one rate-limited HTTP client: the regional snapshot loop
//! that back-fills callsigns onto terminal tracks, and the military
//! injection loop that synthesizes tracks for military traffic the terminal
//! feed never carries. Everything published here flows through the same
//! merge engine as live feed data.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CoverageArea, EnrichRegion};
use crate::geometry::distance_nm;
use crate::merge;
use crate::store::Store;
use crate::tais::TaisUpdate;

/// Minimum spacing between requests to the public service.
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(1100);

/// Per-request timeout for the small queries.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Cap on per-hex fallback lookups per snapshot cycle.
const MAX_HEX_LOOKUPS_PER_CYCLE: usize = 50;

/// How long a hex stays in the lookup-suppression cache.
const HEX_CACHE_TTL: Duration = Duration::from_secs(300);

/// Squawk matching gates.
const SQUAWK_MATCH_RADIUS_NM: f64 = 5.0;
const SQUAWK_MATCH_ALTITUDE_FT: f64 = 1000.0;

/// Synthetic military track numbers start here, far above the terminal
/// automation's own track-number space.
const MILITARY_TRACK_BASE: u32 = 60_000;

#[derive(Debug, Clone, Deserialize)]
pub struct AdsbAircraft {
    pub hex: String,
    #[serde(default)]
    pub flight: Option<String>,
    #[serde(default)]
    pub squawk: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    /// Barometric altitude; the wire value is a number or the string
    /// "ground".
    #[serde(default)]
    pub alt_baro: Option<serde_json::Value>,
    #[serde(default, rename = "t")]
    pub aircraft_type: Option<String>,
    #[serde(default, rename = "dbFlags")]
    pub db_flags: Option<u64>,
}

impl AdsbAircraft {
    pub fn altitude_feet(&self) -> Option<f64> {
        match &self.alt_baro {
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(serde_json::Value::String(s)) if s == "ground" => Some(0.0),
            _ => None,
        }
    }

    pub fn callsign(&self) -> Option<String> {
        self.flight
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }

    /// Military by ICAO hex block (AE/AF) or the service's database flag.
    pub fn is_military(&self) -> bool {
        let block = self.hex.to_ascii_uppercase();
        block.starts_with("AE")
            || block.starts_with("AF")
            || self.db_flags.is_some_and(|f| f & 1 != 0)
    }
}

#[derive(Debug, Deserialize)]
struct AdsbResponse {
    #[serde(default)]
    ac: Vec<AdsbAircraft>,
}

/// Rate-limited client to the public ADS-B service. One request in flight
/// at a time, spaced at least [`MIN_REQUEST_INTERVAL`] apart.
pub struct AdsbClient {
    http: reqwest::Client,
    base_url: String,
    gate: Mutex<Instant>,
}

impl AdsbClient {
    pub fn new(base_url: String) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            base_url,
            gate: Mutex::new(Instant::now() - MIN_REQUEST_INTERVAL),
        })
    }

    async fn fetch(&self, path: &str) -> Result<AdsbResponse> {
        let mut last = self.gate.lock().await;
        let elapsed = last.elapsed();
        if elapsed < MIN_REQUEST_INTERVAL {
            tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
        }
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let result = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        *last = Instant::now();
        let response = result?;
        Ok(response.json().await?)
    }

    pub async fn by_hex(&self, hex: &str) -> Result<Option<AdsbAircraft>> {
        let response = self.fetch(&format!("/v2/hex/{}", hex.to_ascii_lowercase())).await?;
        Ok(response.ac.into_iter().next())
    }

    pub async fn by_area(&self, lat: f64, lon: f64, radius_nm: f64) -> Result<Vec<AdsbAircraft>> {
        let response = self
            .fetch(&format!("/v3/lat/{lat:.4}/lon/{lon:.4}/dist/{radius_nm:.0}"))
            .await?;
        Ok(response.ac)
    }
}

/// Snapshot of the regional fetches, indexed for the enrichment walk.
#[derive(Debug, Default)]
pub struct RegionalIndex {
    pub by_hex: HashMap<String, AdsbAircraft>,
    pub by_squawk: HashMap<String, Vec<String>>,
}

impl RegionalIndex {
    /// Deduplicate by hex across overlapping regions while building both
    /// indices.
    pub fn build(regions: impl IntoIterator<Item = AdsbAircraft>) -> Self {
        let mut index = RegionalIndex::default();
        for aircraft in regions {
            let hex = aircraft.hex.to_ascii_uppercase();
            if index.by_hex.contains_key(&hex) {
                continue;
            }
            if let Some(squawk) = &aircraft.squawk {
                index
                    .by_squawk
                    .entry(squawk.clone())
                    .or_default()
                    .push(hex.clone());
            }
            index.by_hex.insert(hex, aircraft);
        }
        index
    }

    /// Nearest regional aircraft squawking the code within the position and
    /// altitude gates. A stored altitude of zero means no Mode-C; the
    /// altitude gate is skipped then.
    pub fn squawk_match(
        &self,
        squawk: &str,
        lat: f64,
        lon: f64,
        altitude: Option<f64>,
    ) -> Option<&AdsbAircraft> {
        let candidates = self.by_squawk.get(squawk)?;
        candidates
            .iter()
            .filter_map(|hex| self.by_hex.get(hex))
            .filter_map(|ac| {
                let (aclat, aclon) = (ac.lat?, ac.lon?);
                let d = distance_nm(lat, lon, aclat, aclon);
                if d > SQUAWK_MATCH_RADIUS_NM {
                    return None;
                }
                if let Some(stored) = altitude.filter(|a| *a != 0.0)
                    && let Some(theirs) = ac.altitude_feet()
                    && (stored - theirs).abs() > SQUAWK_MATCH_ALTITUDE_FT
                {
                    return None;
                }
                Some((ac, d))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(ac, _)| ac)
    }
}

/// A terminal track awaiting callsign enrichment.
struct PendingTrack {
    facility: String,
    track_num: u32,
    mode_s_hex: Option<String>,
    squawk: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude: Option<f64>,
}

pub struct Enricher {
    client: Arc<AdsbClient>,
    store: Arc<Store>,
    regions: Vec<EnrichRegion>,
    coverage: Vec<CoverageArea>,
    refresh: Duration,
    /// Suppresses repeated per-hex fallback lookups.
    hex_cache: moka::sync::Cache<String, ()>,
    /// Hex -> minted synthetic track number, per facility.
    military_tracks: DashMap<(String, String), u32>,
    next_military_track: DashMap<String, u32>,
}

impl Enricher {
    pub fn new(
        client: Arc<AdsbClient>,
        store: Arc<Store>,
        regions: Vec<EnrichRegion>,
        coverage: Vec<CoverageArea>,
        refresh: Duration,
    ) -> Self {
        Self {
            client,
            store,
            regions,
            coverage,
            refresh,
            hex_cache: moka::sync::Cache::builder()
                .time_to_live(HEX_CACHE_TTL)
                .max_capacity(50_000)
                .build(),
            military_tracks: DashMap::new(),
            next_military_track: DashMap::new(),
        }
    }

    /// Regional snapshot loop: fetch, index, walk the pending-work set.
    pub async fn run_regional(self: Arc<Self>, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(self.refresh);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tick.tick() => {
                    if let Err(e) = self.regional_cycle().await {
                        warn!(error = %e, "enrichment cycle failed");
                    }
                }
            }
        }
    }

    async fn regional_cycle(&self) -> Result<()> {
        let mut all = Vec::new();
        for region in &self.regions {
            match self
                .client
                .by_area(region.lat, region.lon, region.radius_nm)
                .await
            {
                Ok(mut aircraft) => all.append(&mut aircraft),
                Err(e) => warn!(error = %e, lat = region.lat, lon = region.lon, "region fetch failed"),
            }
        }
        let index = RegionalIndex::build(all);
        for hex in index.by_hex.keys() {
            self.hex_cache.insert(hex.clone(), ());
        }
        metrics::gauge!("enrich.regional_aircraft").set(index.by_hex.len() as f64);

        let pending = self.pending_tracks();
        debug!(pending = pending.len(), "enrichment walk");
        let mut hex_lookups = 0usize;
        for track in pending {
            let matched = match &track.mode_s_hex {
                Some(hex) => {
                    let hex = hex.to_ascii_uppercase();
                    match index.by_hex.get(&hex) {
                        Some(found) => Some(found.clone()),
                        None if hex_lookups < MAX_HEX_LOOKUPS_PER_CYCLE
                            && !self.hex_cache.contains_key(&hex) =>
                        {
                            hex_lookups += 1;
                            self.hex_cache.insert(hex.clone(), ());
                            match self.client.by_hex(&hex).await {
                                Ok(found) => found,
                                Err(e) => {
                                    debug!(error = %e, %hex, "per-hex lookup failed");
                                    None
                                }
                            }
                        }
                        None => None,
                    }
                }
                None => match (&track.squawk, track.latitude, track.longitude) {
                    (Some(squawk), Some(lat), Some(lon)) => index
                        .squawk_match(squawk, lat, lon, track.altitude)
                        .cloned(),
                    _ => None,
                },
            };
            if let Some(aircraft) = matched {
                self.publish_enrichment(&track, &aircraft);
            }
        }
        Ok(())
    }

    fn pending_tracks(&self) -> Vec<PendingTrack> {
        self.store
            .terminal
            .iter()
            .filter(|e| e.value().wants_enrichment())
            .map(|e| {
                let t = e.value();
                PendingTrack {
                    facility: t.facility.clone(),
                    track_num: t.track_num,
                    mode_s_hex: t.mode_s_hex.clone(),
                    squawk: t.reported_squawk.clone(),
                    latitude: t.latitude,
                    longitude: t.longitude,
                    altitude: t.altitude_feet,
                }
            })
            .collect()
    }

    /// Publish a synthesized flight-plan update for a match, plus a position
    /// supplement when the track had no Mode-C.
    fn publish_enrichment(&self, track: &PendingTrack, aircraft: &AdsbAircraft) {
        let Some(callsign) = aircraft.callsign() else {
            return;
        };
        // A desynced feed can already show this callsign on another track;
        // never duplicate it within the facility
        if self.store.callsign_in_facility(&track.facility, &callsign) {
            debug!(%callsign, facility = %track.facility, "callsign already in facility");
            return;
        }

        let now = chrono::Utc::now();
        let mut update = TaisUpdate {
            track_num: track.track_num,
            ..Default::default()
        };
        if track.mode_s_hex.is_some() {
            // A true Mode-S target: callsign on line 1, squawk on line 3
            update.callsign = Some(callsign.clone());
            update.assigned_squawk = aircraft.squawk.clone().or_else(|| track.squawk.clone());
        } else if let Some(hex_track) = self
            .store
            .terminal_by_hex(&track.facility, &aircraft.hex.to_ascii_uppercase())
        {
            // Squawk-only target whose Mode-S twin is already tracked:
            // redirect the enrichment to the Mode-S track
            update.track_num = hex_track.1;
            update.callsign = Some(callsign.clone());
            update.assigned_squawk = track.squawk.clone();
        } else {
            // Uncorrelated squawk-only target: callsign rides the scratchpad
            update.scratchpad1 = Some(callsign.clone());
            update.assigned_squawk = track.squawk.clone();
        }
        if let Some(atype) = &aircraft.aircraft_type {
            update.aircraft_type = Some(atype.clone());
        }
        merge::apply_tais(&self.store, &track.facility, &update, now);
        metrics::counter!("enrich.callsign_published").increment(1);

        // Supplement the altitude when the track had none and the match has
        // one
        if track.altitude.unwrap_or(0.0) == 0.0
            && let Some(altitude) = aircraft.altitude_feet().filter(|a| *a > 0.0)
        {
            let position = TaisUpdate {
                track_num: update.track_num,
                latitude: aircraft.lat,
                longitude: aircraft.lon,
                reported_altitude: Some(altitude),
                ..Default::default()
            };
            merge::apply_tais(&self.store, &track.facility, &position, now);
        }
    }

    /// Military injection loop: one poll per coverage area per tick.
    pub async fn run_military(self: Arc<Self>, shutdown: CancellationToken) {
        if self.coverage.is_empty() {
            return;
        }
        let mut tick = tokio::time::interval(self.refresh);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tick.tick() => {
                    for area in &self.coverage {
                        match self.client.by_area(area.lat, area.lon, area.radius_nm).await {
                            Ok(aircraft) => self.inject_military(area, aircraft),
                            Err(e) => warn!(error = %e, facility = %area.facility, "military poll failed"),
                        }
                    }
                }
            }
        }
    }

    fn inject_military(&self, area: &CoverageArea, aircraft: Vec<AdsbAircraft>) {
        let now = chrono::Utc::now();
        let mut injected = 0usize;
        for ac in aircraft {
            if !ac.is_military() {
                continue;
            }
            let hex = ac.hex.to_ascii_uppercase();
            let (Some(lat), Some(lon)) = (ac.lat, ac.lon) else {
                continue;
            };
            // Skip aircraft the real feed already tracks
            if self.store.terminal_by_hex(&area.facility, &hex).is_some()
                && !self
                    .military_tracks
                    .contains_key(&(area.facility.clone(), hex.clone()))
            {
                continue;
            }
            let track_num = self.military_track_number(&area.facility, &hex);
            let update = TaisUpdate {
                track_num,
                latitude: Some(lat),
                longitude: Some(lon),
                reported_altitude: ac.altitude_feet(),
                callsign: ac.callsign().or_else(|| Some(hex.clone())),
                aircraft_type: ac.aircraft_type.clone(),
                reported_squawk: ac.squawk.clone(),
                mode_s_hex: Some(hex.clone()),
                pseudo: Some(true),
                ..Default::default()
            };
            merge::apply_tais(&self.store, &area.facility, &update, now);
            injected += 1;
        }
        if injected > 0 {
            info!(facility = %area.facility, injected, "military tracks injected");
        }
    }

    /// Stable synthetic track number for a military hex within a facility.
    fn military_track_number(&self, facility: &str, hex: &str) -> u32 {
        *self
            .military_tracks
            .entry((facility.to_string(), hex.to_string()))
            .or_insert_with(|| {
                let mut next = self
                    .next_military_track
                    .entry(facility.to_string())
                    .or_insert(MILITARY_TRACK_BASE);
                let n = *next;
                *next += 1;
                n
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aircraft(hex: &str, squawk: Option<&str>, lat: f64, lon: f64, alt: f64) -> AdsbAircraft {
        AdsbAircraft {
            hex: hex.to_string(),
            flight: Some("JBU123 ".to_string()),
            squawk: squawk.map(str::to_string),
            lat: Some(lat),
            lon: Some(lon),
            alt_baro: Some(serde_json::json!(alt)),
            aircraft_type: Some("A320".to_string()),
            db_flags: None,
        }
    }

    #[test]
    fn test_regional_index_dedupes_by_hex() {
        let index = RegionalIndex::build(vec![
            aircraft("abc123", Some("5274"), 40.0, -75.0, 33900.0),
            aircraft("ABC123", Some("5274"), 40.1, -75.1, 33900.0),
            aircraft("def456", Some("5274"), 40.2, -75.2, 10000.0),
        ]);
        assert_eq!(index.by_hex.len(), 2);
        assert_eq!(index.by_squawk["5274"].len(), 2);
    }

    #[test]
    fn test_squawk_match_nearest_within_gates() {
        let index = RegionalIndex::build(vec![
            aircraft("AAA111", Some("5274"), 40.020, -74.990, 33900.0),
            aircraft("BBB222", Some("5274"), 40.040, -74.980, 33900.0),
            // out of altitude gate
            aircraft("CCC333", Some("5274"), 40.001, -75.001, 20000.0),
            // out of range
            aircraft("DDD444", Some("5274"), 42.0, -75.0, 34000.0),
        ]);
        let hit = index
            .squawk_match("5274", 40.000, -75.000, Some(34000.0))
            .unwrap();
        assert_eq!(hit.hex, "AAA111");
    }

    #[test]
    fn test_squawk_match_skips_altitude_gate_when_no_mode_c() {
        let index = RegionalIndex::build(vec![aircraft(
            "CCC333",
            Some("5274"),
            40.001,
            -75.001,
            20000.0,
        )]);
        assert!(index.squawk_match("5274", 40.0, -75.0, Some(34000.0)).is_none());
        assert!(index.squawk_match("5274", 40.0, -75.0, Some(0.0)).is_some());
        assert!(index.squawk_match("5274", 40.0, -75.0, None).is_some());
    }

    #[test]
    fn test_altitude_feet_handles_ground_sentinel() {
        let mut ac = aircraft("AAA111", None, 40.0, -75.0, 1000.0);
        assert_eq!(ac.altitude_feet(), Some(1000.0));
        ac.alt_baro = Some(serde_json::json!("ground"));
        assert_eq!(ac.altitude_feet(), Some(0.0));
        ac.alt_baro = None;
        assert_eq!(ac.altitude_feet(), None);
    }

    #[test]
    fn test_military_detection() {
        let mut ac = aircraft("AE01CE", None, 40.0, -75.0, 25000.0);
        assert!(ac.is_military());
        ac.hex = "A7C43B".to_string();
        assert!(!ac.is_military());
        ac.db_flags = Some(1);
        assert!(ac.is_military());
    }

    #[test]
    fn test_callsign_trims_padding() {
        let ac = aircraft("AAA111", None, 40.0, -75.0, 1000.0);
        assert_eq!(ac.callsign().as_deref(), Some("JBU123"));
    }

    #[tokio::test]
    async fn test_squawk_only_enrichment_lands_in_scratchpad() {
        use crate::terminal::TerminalTrack;

        let store = Arc::new(Store::new());
        let mut track = TerminalTrack::new("A80".to_string(), 412, chrono::Utc::now());
        track.reported_squawk = Some("5274".to_string());
        track.latitude = Some(40.0);
        track.longitude = Some(-75.0);
        track.altitude_feet = Some(34000.0);
        store.terminal.insert(("A80".to_string(), 412), track);

        let enricher = Enricher::new(
            Arc::new(AdsbClient::new("http://unused.invalid".to_string()).unwrap()),
            store.clone(),
            Vec::new(),
            Vec::new(),
            Duration::from_secs(60),
        );
        let pending = enricher.pending_tracks();
        assert_eq!(pending.len(), 1);
        let matched = aircraft("ABC123", Some("5274"), 40.020, -74.990, 33900.0);
        enricher.publish_enrichment(&pending[0], &matched);

        let stored = store.terminal.get(&("A80".to_string(), 412)).unwrap().value().clone();
        assert_eq!(stored.scratchpad1.as_deref(), Some("JBU123"));
        assert_eq!(stored.assigned_squawk.as_deref(), Some("5274"));
        assert!(stored.callsign.is_none());
    }

    #[tokio::test]
    async fn test_enrichment_skipped_when_callsign_in_facility() {
        use crate::terminal::TerminalTrack;

        let store = Arc::new(Store::new());
        let mut existing = TerminalTrack::new("A80".to_string(), 1, chrono::Utc::now());
        existing.callsign = Some("JBU123".to_string());
        store.terminal.insert(("A80".to_string(), 1), existing);

        let mut track = TerminalTrack::new("A80".to_string(), 412, chrono::Utc::now());
        track.reported_squawk = Some("5274".to_string());
        track.latitude = Some(40.0);
        track.longitude = Some(-75.0);
        store.terminal.insert(("A80".to_string(), 412), track);

        let enricher = Enricher::new(
            Arc::new(AdsbClient::new("http://unused.invalid".to_string()).unwrap()),
            store.clone(),
            Vec::new(),
            Vec::new(),
            Duration::from_secs(60),
        );
        let pending = enricher.pending_tracks();
        let matched = aircraft("ABC123", Some("5274"), 40.020, -74.990, 33900.0);
        for p in &pending {
            enricher.publish_enrichment(p, &matched);
        }
        let stored = store.terminal.get(&("A80".to_string(), 412)).unwrap().value().clone();
        assert!(stored.scratchpad1.is_none());
    }

    #[test]
    fn test_military_track_numbers_are_stable_and_distinct() {
        let store = Arc::new(Store::new());
        let enricher = Enricher::new(
            Arc::new(AdsbClient::new("http://unused.invalid".to_string()).unwrap()),
            store,
            Vec::new(),
            Vec::new(),
            Duration::from_secs(60),
        );
        let a = enricher.military_track_number("P31", "AE01CE");
        let b = enricher.military_track_number("P31", "AE01CF");
        assert_eq!(a, MILITARY_TRACK_BASE);
        assert_eq!(b, MILITARY_TRACK_BASE + 1);
        assert_eq!(enricher.military_track_number("P31", "AE01CE"), a);
    }
}
