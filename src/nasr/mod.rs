//! National airspace data index.
//!
//! Once per cycle the dated release is downloaded and parsed into an
//! immutable [`AirspaceIndex`]; lookups never see a half-built cycle. A
//! failed download or parse leaves the previous cycle in place.

mod cycle;
mod fetch;
mod load;

pub use cycle::{CYCLE_LENGTH_DAYS, current_cycle, next_cycle};
pub use fetch::ensure_cycle_on_disk;
pub use load::load_index;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info};

use crate::geometry::equirectangular_sq;

/// A named point: navaid, fix, or airport.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NavPoint {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    /// "VOR", "NDB", "FIX", "APT", ...
    pub kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcedureKind {
    Sid,
    Star,
}

/// One coded departure or arrival procedure at one airport.
#[derive(Debug, Clone, Serialize)]
pub struct ProcedureDefinition {
    pub id: String,
    pub airport: String,
    pub kind: ProcedureKind,
    /// Common body fixes shared by every runway variant, in flight
    /// direction.
    pub body: Vec<String>,
    /// Transition fix lists in flight direction, keyed both by transition
    /// name and by the enroute endpoint fix.
    pub transitions: HashMap<String, Vec<String>>,
}

/// Extended instrument approach centerline, threshold out to 15 NM.
#[derive(Debug, Clone, Serialize)]
pub struct CenterlineSegment {
    pub id: String,
    pub airport: String,
    pub runway: String,
    pub kind: String,
    pub threshold_lat: f64,
    pub threshold_lon: f64,
    pub outer_lat: f64,
    pub outer_lon: f64,
}

/// Public operational airport with a derived airspace class for the map
/// overlay.
#[derive(Debug, Clone, Serialize)]
pub struct OverlayAirport {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub class: char,
}

/// Immutable per-cycle index.
#[derive(Debug, Default)]
pub struct AirspaceIndex {
    pub cycle: Option<NaiveDate>,
    /// Names are not unique; one id can resolve to several points.
    pub navaids: HashMap<String, Vec<NavPoint>>,
    pub fixes: HashMap<String, Vec<NavPoint>>,
    pub airports_by_lid: HashMap<String, NavPoint>,
    pub airports_by_icao: HashMap<String, NavPoint>,
    pub airways: HashMap<String, Vec<String>>,
    pub procedures: HashMap<String, Vec<ProcedureDefinition>>,
    pub centerlines: Vec<CenterlineSegment>,
    pub overlay_airports: Vec<OverlayAirport>,
}

impl AirspaceIndex {
    /// Pick the candidate nearest the anchor by the cheap equirectangular
    /// score; the first candidate when no anchor is given.
    fn nearest<'a>(points: &'a [NavPoint], near: Option<(f64, f64)>) -> Option<&'a NavPoint> {
        match near {
            None => points.first(),
            Some((lat, lon)) => points.iter().min_by(|a, b| {
                let da = equirectangular_sq(lat, lon, a.lat, a.lon);
                let db = equirectangular_sq(lat, lon, b.lat, b.lon);
                da.total_cmp(&db)
            }),
        }
    }

    pub fn navaid(&self, id: &str, near: Option<(f64, f64)>) -> Option<&NavPoint> {
        self.navaids.get(id).and_then(|pts| Self::nearest(pts, near))
    }

    pub fn fix(&self, id: &str, near: Option<(f64, f64)>) -> Option<&NavPoint> {
        self.fixes.get(id).and_then(|pts| Self::nearest(pts, near))
    }

    /// Airport by FAA LID or four-letter ICAO code.
    pub fn airport(&self, id: &str) -> Option<&NavPoint> {
        self.airports_by_icao
            .get(id)
            .or_else(|| self.airports_by_lid.get(id))
            .or_else(|| {
                // A K/P-prefixed ICAO spelling of a LID-only field
                id.strip_prefix(['K', 'P'])
                    .and_then(|lid| self.airports_by_lid.get(lid))
            })
    }

    /// Any point by id: navaid first, then fix, then airport.
    pub fn point(&self, id: &str, near: Option<(f64, f64)>) -> Option<&NavPoint> {
        self.navaid(id, near)
            .or_else(|| self.fix(id, near))
            .or_else(|| self.airport(id))
    }

    pub fn airway(&self, id: &str) -> Option<&[String]> {
        self.airways.get(id).map(|v| v.as_slice())
    }

    pub fn procedure(&self, id: &str) -> Option<&[ProcedureDefinition]> {
        self.procedures.get(id).map(|v| v.as_slice())
    }
}

/// Shared handle that atomically swaps in a freshly loaded cycle.
pub struct AirspaceService {
    data_dir: PathBuf,
    archive_url_base: String,
    index: RwLock<Arc<AirspaceIndex>>,
}

impl AirspaceService {
    pub fn new(data_dir: PathBuf, archive_url_base: String) -> Self {
        Self {
            data_dir,
            archive_url_base,
            index: RwLock::new(Arc::new(AirspaceIndex::default())),
        }
    }

    pub fn current(&self) -> Arc<AirspaceIndex> {
        self.index.read().unwrap().clone()
    }

    pub fn cycle(&self) -> Option<NaiveDate> {
        self.current().cycle
    }

    /// Fetch (if needed) and load the cycle effective today. On any failure
    /// the previously active cycle stays in place.
    pub async fn refresh(&self, today: NaiveDate) -> Result<NaiveDate> {
        let cycle = current_cycle(today);
        if self.cycle() == Some(cycle) {
            return Ok(cycle);
        }
        let cycle_dir =
            ensure_cycle_on_disk(&self.data_dir, &self.archive_url_base, cycle).await?;
        let index = load_index(&cycle_dir, cycle)?;
        info!(
            cycle = %cycle,
            navaids = index.navaids.len(),
            fixes = index.fixes.len(),
            airports = index.airports_by_lid.len(),
            airways = index.airways.len(),
            procedures = index.procedures.len(),
            centerlines = index.centerlines.len(),
            "airspace cycle loaded"
        );
        *self.index.write().unwrap() = Arc::new(index);
        Ok(cycle)
    }

    /// Daily refresh loop; errors keep the old cycle and retry next day.
    pub async fn run(self: Arc<Self>, shutdown: tokio_util::sync::CancellationToken) {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(24 * 3600));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tick.tick() => {
                    let today = chrono::Utc::now().date_naive();
                    if let Err(e) = self.refresh(today).await {
                        error!(error = %e, "airspace cycle refresh failed, previous cycle stays active");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, lat: f64, lon: f64) -> NavPoint {
        NavPoint {
            id: id.to_string(),
            lat,
            lon,
            kind: "FIX".to_string(),
        }
    }

    #[test]
    fn test_near_anchor_picks_closest_duplicate() {
        let mut index = AirspaceIndex::default();
        index.fixes.insert(
            "DUPE".to_string(),
            vec![point("DUPE", 30.0, -90.0), point("DUPE", 42.0, -71.0)],
        );
        let hit = index.fix("DUPE", Some((41.0, -72.0))).unwrap();
        assert_eq!(hit.lat, 42.0);
        let first = index.fix("DUPE", None).unwrap();
        assert_eq!(first.lat, 30.0);
    }

    #[test]
    fn test_airport_lookup_strips_icao_prefix() {
        let mut index = AirspaceIndex::default();
        index
            .airports_by_lid
            .insert("BOS".to_string(), point("BOS", 42.36, -71.01));
        assert!(index.airport("BOS").is_some());
        assert!(index.airport("KBOS").is_some());
        assert!(index.airport("EGLL").is_none());
    }

    #[test]
    fn test_point_resolution_order() {
        let mut index = AirspaceIndex::default();
        index.navaids.insert(
            "ACK".to_string(),
            vec![NavPoint {
                id: "ACK".to_string(),
                lat: 41.28,
                lon: -70.03,
                kind: "VOR".to_string(),
            }],
        );
        index
            .fixes
            .insert("ACK".to_string(), vec![point("ACK", 0.0, 0.0)]);
        assert_eq!(index.point("ACK", None).unwrap().kind, "VOR");
    }
}
