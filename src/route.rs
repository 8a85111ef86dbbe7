//! Filed-route resolver.
//!
//! Expands a NAS route string into a polyline against the active airspace
//! cycle: airway walks, SID/STAR bodies and transitions, direct point
//! lookups and fix-radial-distance tokens. Results are cached per
//! origin:destination:route and the cache drops on cycle rollover.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use lru::LruCache;
use serde::Serialize;

use crate::geometry::{distance_nm, project};
use crate::nasr::{AirspaceIndex, AirspaceService, ProcedureDefinition, ProcedureKind};

/// Resolved routes kept per cycle.
const CACHE_SIZE: usize = 4096;

/// A body fix this close to the anchor counts as already plotted.
const ANCHOR_RADIUS_NM: f64 = 1.0;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RoutePoint {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedRoute {
    pub origin: String,
    pub destination: String,
    pub route: String,
    pub points: Vec<RoutePoint>,
}

pub struct RouteResolver {
    airspace: Arc<AirspaceService>,
    cache: Mutex<(Option<NaiveDate>, LruCache<String, Arc<ResolvedRoute>>)>,
}

impl RouteResolver {
    pub fn new(airspace: Arc<AirspaceService>) -> Self {
        Self {
            airspace,
            cache: Mutex::new((
                None,
                LruCache::new(NonZeroUsize::new(CACHE_SIZE).unwrap()),
            )),
        }
    }

    pub fn resolve(&self, origin: &str, destination: &str, route: &str) -> Arc<ResolvedRoute> {
        let index = self.airspace.current();
        let key = format!("{origin}:{destination}:{route}");
        {
            let mut cache = self.cache.lock().unwrap();
            if cache.0 != index.cycle {
                cache.1.clear();
                cache.0 = index.cycle;
            }
            if let Some(hit) = cache.1.get(&key) {
                return hit.clone();
            }
        }
        let resolved = Arc::new(resolve_route(&index, origin, destination, route));
        let mut cache = self.cache.lock().unwrap();
        cache.1.put(key, resolved.clone());
        resolved
    }
}

struct Plotter {
    points: Vec<RoutePoint>,
}

impl Plotter {
    fn push(&mut self, id: &str, lat: f64, lon: f64) {
        if let Some(last) = self.points.last()
            && (last.id == id
                || ((last.lat - lat).abs() < 1e-6 && (last.lon - lon).abs() < 1e-6))
        {
            return;
        }
        self.points.push(RoutePoint {
            id: id.to_string(),
            lat,
            lon,
        });
    }

    fn anchor(&self) -> Option<(f64, f64)> {
        self.points.last().map(|p| (p.lat, p.lon))
    }

    fn anchor_id(&self) -> Option<&str> {
        self.points.last().map(|p| p.id.as_str())
    }
}

/// One of the airway designator letters followed by digits.
fn is_airway(token: &str) -> bool {
    let mut chars = token.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let rest = chars.as_str();
    matches!(first, 'J' | 'V' | 'Q' | 'T' | 'L' | 'M' | 'N' | 'P')
        && !rest.is_empty()
        && rest.chars().all(|c| c.is_ascii_digit())
}

fn tokenize(route: &str) -> Vec<String> {
    route
        .split([' ', '.'])
        .map(str::trim)
        .filter(|t| !t.is_empty() && *t != "DCT" && *t != "/")
        .map(|t| match t.find('/') {
            // Strip speed/altitude qualifiers after the first slash
            Some(idx) => t[..idx].to_string(),
            None => t.to_string(),
        })
        .filter(|t| !t.is_empty())
        .collect()
}

fn resolve_route(
    index: &AirspaceIndex,
    origin: &str,
    destination: &str,
    route: &str,
) -> ResolvedRoute {
    let mut plot = Plotter { points: Vec::new() };
    if let Some(apt) = index.airport(origin) {
        plot.push(origin, apt.lat, apt.lon);
    }

    let tokens = tokenize(route);
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        let next = tokens.get(i + 1).map(|s| s.as_str());

        if is_airway(token) && index.airway(token).is_some() {
            if walk_airway(index, &mut plot, token, next) {
                i += 1; // consume the exit fix as well
            }
        } else if token == origin || token == destination {
            // already plotted as the endpoints
        } else if let Some(point) = index.point(token, plot.anchor()) {
            let (lat, lon) = (point.lat, point.lon);
            plot.push(token, lat, lon);
        } else if let Some((id, lat, lon)) = resolve_frd(index, token, plot.anchor()) {
            plot.push(&id, lat, lon);
        } else if let Some(procedure) = pick_procedure(index, token, origin, destination) {
            if plot_procedure(index, &mut plot, &procedure, next) {
                i += 1;
            }
        }
        i += 1;
    }

    if let Some(apt) = index.airport(destination) {
        plot.push(destination, apt.lat, apt.lon);
    }
    ResolvedRoute {
        origin: origin.to_string(),
        destination: destination.to_string(),
        route: route.to_string(),
        points: plot.points,
    }
}

/// Walk an airway from the fix nearest the anchor to the exit fix (or the
/// end of the airway). Returns true when the exit token was used.
fn walk_airway(
    index: &AirspaceIndex,
    plot: &mut Plotter,
    airway_id: &str,
    exit: Option<&str>,
) -> bool {
    let Some(fix_names) = index.airway(airway_id) else {
        return false;
    };
    if fix_names.is_empty() {
        return false;
    }
    let anchor = plot.anchor();
    let resolved: Vec<Option<(f64, f64)>> = fix_names
        .iter()
        .map(|name| index.point(name, anchor).map(|p| (p.lat, p.lon)))
        .collect();

    let start = match anchor {
        Some((lat, lon)) => resolved
            .iter()
            .enumerate()
            .filter_map(|(idx, p)| p.map(|(plat, plon)| (idx, distance_nm(lat, lon, plat, plon))))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(idx, _)| idx)
            .unwrap_or(0),
        None => 0,
    };
    let exit_idx = exit.and_then(|name| fix_names.iter().position(|f| f == name));
    let end = exit_idx.unwrap_or(fix_names.len() - 1);

    let indices: Vec<usize> = if start <= end {
        (start..=end).collect()
    } else {
        (end..=start).rev().collect()
    };
    for idx in indices {
        if let Some((lat, lon)) = resolved[idx] {
            plot.push(&fix_names[idx], lat, lon);
        }
    }
    exit_idx.is_some()
}

/// Fix-radial-distance: a plottable base name followed by six digits,
/// radial then distance.
fn resolve_frd(
    index: &AirspaceIndex,
    token: &str,
    anchor: Option<(f64, f64)>,
) -> Option<(String, f64, f64)> {
    let digits = token
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }
    let base = &token[..token.len() - digits];
    if base.is_empty() {
        return None;
    }
    let point = index.point(base, anchor)?;
    if digits == 6 {
        let radial: f64 = token[token.len() - 6..token.len() - 3].parse().ok()?;
        let distance: f64 = token[token.len() - 3..].parse().ok()?;
        let (lat, lon) = project(point.lat, point.lon, radial, distance);
        return Some((token.to_string(), lat, lon));
    }
    Some((point.id.clone(), point.lat, point.lon))
}

fn normalize_airport(id: &str) -> &str {
    if id.len() == 4 {
        id.strip_prefix(['K', 'P']).unwrap_or(id)
    } else {
        id
    }
}

/// The procedure instance flown here: a SID at the origin or a STAR at the
/// destination.
fn pick_procedure(
    index: &AirspaceIndex,
    token: &str,
    origin: &str,
    destination: &str,
) -> Option<ProcedureDefinition> {
    let instances = index.procedure(token)?;
    instances
        .iter()
        .find(|p| match p.kind {
            ProcedureKind::Sid => p.airport == normalize_airport(origin),
            ProcedureKind::Star => p.airport == normalize_airport(destination),
        })
        .cloned()
}

/// Plot a procedure. Returns true when the following token was consumed as a
/// SID transition endpoint.
fn plot_procedure(
    index: &AirspaceIndex,
    plot: &mut Plotter,
    procedure: &ProcedureDefinition,
    next: Option<&str>,
) -> bool {
    let anchor_id = plot.anchor_id().map(str::to_string);
    match procedure.kind {
        ProcedureKind::Star => {
            // Entering via a transition: its fixes come before the body, the
            // first one skipped since it is the anchor itself
            if let Some(anchor) = &anchor_id
                && let Some(transition) = procedure.transitions.get(anchor)
            {
                for fix in transition.iter().skip(1) {
                    plot_fix(index, plot, fix);
                }
            }
            for fix in &procedure.body {
                plot_fix(index, plot, fix);
            }
            false
        }
        ProcedureKind::Sid => {
            // Leaving on a transition the anchor already sits on: finish the
            // transition, skip the body
            if let Some(endpoint) = next
                && let Some(transition) = procedure.transitions.get(endpoint)
                && let Some(pos) = anchor_id
                    .as_deref()
                    .and_then(|a| transition.iter().position(|f| f == a))
            {
                for fix in transition.iter().skip(pos + 1) {
                    plot_fix(index, plot, fix);
                }
                return true;
            }

            // Body, starting after any fix that equals the anchor by name or
            // sits within a mile of it
            let start = procedure
                .body
                .iter()
                .position(|fix| anchored(index, plot, fix))
                .map(|idx| idx + 1)
                .unwrap_or(0);
            for fix in &procedure.body[start..] {
                plot_fix(index, plot, fix);
            }

            if let Some(endpoint) = next
                && let Some(transition) = procedure.transitions.get(endpoint)
            {
                for fix in transition {
                    plot_fix(index, plot, fix);
                }
                return true;
            }
            false
        }
    }
}

fn plot_fix(index: &AirspaceIndex, plot: &mut Plotter, fix: &str) {
    if let Some(point) = index.point(fix, plot.anchor()) {
        let (lat, lon) = (point.lat, point.lon);
        plot.push(fix, lat, lon);
    }
}

fn anchored(index: &AirspaceIndex, plot: &Plotter, fix: &str) -> bool {
    if plot.anchor_id() == Some(fix) {
        return true;
    }
    if let (Some((alat, alon)), Some(point)) = (plot.anchor(), index.point(fix, plot.anchor())) {
        return distance_nm(alat, alon, point.lat, point.lon) <= ANCHOR_RADIUS_NM;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nasr::NavPoint;
    use std::collections::HashMap;

    fn add_fix(index: &mut AirspaceIndex, id: &str, lat: f64, lon: f64) {
        index.fixes.entry(id.to_string()).or_default().push(NavPoint {
            id: id.to_string(),
            lat,
            lon,
            kind: "FIX".to_string(),
        });
    }

    fn test_index() -> AirspaceIndex {
        let mut index = AirspaceIndex {
            cycle: Some(chrono::NaiveDate::from_ymd_opt(2026, 2, 19).unwrap()),
            ..Default::default()
        };
        for (lid, icao, lat, lon) in [
            ("BOS", "KBOS", 42.3629, -71.0064),
            ("JFK", "KJFK", 40.6398, -73.7787),
        ] {
            let p = NavPoint {
                id: lid.to_string(),
                lat,
                lon,
                kind: "APT".to_string(),
            };
            index.airports_by_lid.insert(lid.to_string(), p.clone());
            index.airports_by_icao.insert(icao.to_string(), p);
        }
        add_fix(&mut index, "HYLND", 42.2000, -70.9000);
        add_fix(&mut index, "SSOXS", 42.1000, -70.8000);
        add_fix(&mut index, "BUZRD", 41.4042, -70.8583);
        add_fix(&mut index, "PARCH", 41.0500, -72.2000);
        add_fix(&mut index, "CCC", 40.9297, -72.7958);
        add_fix(&mut index, "ROBER", 40.8500, -73.0000);
        index.navaids.insert(
            "ACK".to_string(),
            vec![NavPoint {
                id: "ACK".to_string(),
                lat: 41.2816,
                lon: -70.0264,
                kind: "VOR".to_string(),
            }],
        );
        index.airways.insert(
            "V1".to_string(),
            vec![
                "SSOXS".to_string(),
                "BUZRD".to_string(),
                "PARCH".to_string(),
                "CCC".to_string(),
            ],
        );
        index.procedures.insert(
            "LOGAN4".to_string(),
            vec![ProcedureDefinition {
                id: "LOGAN4".to_string(),
                airport: "BOS".to_string(),
                kind: ProcedureKind::Sid,
                body: vec!["HYLND".to_string(), "SSOXS".to_string()],
                transitions: HashMap::new(),
            }],
        );
        index.procedures.insert(
            "PARCH3".to_string(),
            vec![ProcedureDefinition {
                id: "PARCH3".to_string(),
                airport: "JFK".to_string(),
                kind: ProcedureKind::Star,
                body: vec!["CCC".to_string(), "ROBER".to_string()],
                transitions: HashMap::from([(
                    "PARCH".to_string(),
                    vec!["PARCH".to_string(), "CCC".to_string()],
                )]),
            }],
        );
        index
    }

    fn ids(route: &ResolvedRoute) -> Vec<&str> {
        route.points.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_sid_airway_star_expansion() {
        let index = test_index();
        let resolved = resolve_route(&index, "KBOS", "KJFK", "LOGAN4 SSOXS V1 BUZRD PARCH3");
        assert_eq!(
            ids(&resolved),
            vec!["KBOS", "HYLND", "SSOXS", "BUZRD", "CCC", "ROBER", "KJFK"]
        );
    }

    #[test]
    fn test_star_entered_via_transition() {
        let index = test_index();
        let resolved = resolve_route(&index, "KBOS", "KJFK", "ACK PARCH PARCH3");
        assert_eq!(
            ids(&resolved),
            vec!["KBOS", "ACK", "PARCH", "CCC", "ROBER", "KJFK"]
        );
    }

    #[test]
    fn test_dct_and_qualifiers_are_stripped() {
        let index = test_index();
        let resolved = resolve_route(&index, "KBOS", "KJFK", "DCT ACK/N0450F350 DCT");
        assert_eq!(ids(&resolved), vec!["KBOS", "ACK", "KJFK"]);
    }

    #[test]
    fn test_frd_projection() {
        let index = test_index();
        let resolved = resolve_route(&index, "KBOS", "KJFK", "ACK270010");
        assert_eq!(ids(&resolved), vec!["KBOS", "ACK270010", "KJFK"]);
        let frd = &resolved.points[1];
        // 10 NM due west of the ACK VOR
        let d = distance_nm(41.2816, -70.0264, frd.lat, frd.lon);
        assert!((d - 10.0).abs() < 0.05);
        assert!(frd.lon < -70.0264);
    }

    #[test]
    fn test_airway_without_exit_runs_to_end() {
        let index = test_index();
        let resolved = resolve_route(&index, "KBOS", "KJFK", "SSOXS V1");
        assert_eq!(
            ids(&resolved),
            vec!["KBOS", "SSOXS", "BUZRD", "PARCH", "CCC", "KJFK"]
        );
    }

    #[test]
    fn test_unknown_tokens_are_skipped() {
        let index = test_index();
        let resolved = resolve_route(&index, "KBOS", "KJFK", "ZZZZZ ACK");
        assert_eq!(ids(&resolved), vec!["KBOS", "ACK", "KJFK"]);
    }

    #[test]
    fn test_is_airway() {
        for ok in ["J55", "V1", "Q75", "T291"] {
            assert!(is_airway(ok), "{ok}");
        }
        for bad in ["ACK", "J", "LOGAN4", "B4", "V1A"] {
            assert!(!is_airway(bad), "{bad}");
        }
    }

    #[test]
    fn test_resolver_caches_per_cycle() {
        let airspace = Arc::new(AirspaceService::new(
            std::path::PathBuf::from("/nonexistent"),
            String::new(),
        ));
        let resolver = RouteResolver::new(airspace);
        let a = resolver.resolve("KBOS", "KJFK", "ACK");
        let b = resolver.resolve("KBOS", "KJFK", "ACK");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
