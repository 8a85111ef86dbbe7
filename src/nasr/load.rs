//! Tabular file parsing and index construction for one cycle directory.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::StringRecord;

use super::fetch::REQUIRED_FILES;
use super::{
    AirspaceIndex, CenterlineSegment, NavPoint, OverlayAirport, ProcedureDefinition, ProcedureKind,
};
use crate::geometry::project;

const FEET_PER_NM: f64 = 6076.115;

/// Centerlines extend this far out from the threshold.
const CENTERLINE_LENGTH_NM: f64 = 15.0;

struct Table {
    columns: HashMap<String, usize>,
    rows: Vec<StringRecord>,
}

impl Table {
    fn open(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("open {}", path.display()))?;
        let columns = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_string(), i))
            .collect();
        let rows = reader.records().collect::<Result<Vec<_>, _>>()?;
        Ok(Self { columns, rows })
    }

    fn get<'a>(&self, row: &'a StringRecord, column: &str) -> Option<&'a str> {
        let idx = *self.columns.get(column)?;
        row.get(idx).map(str::trim).filter(|v| !v.is_empty())
    }

    fn num(&self, row: &StringRecord, column: &str) -> Option<f64> {
        self.get(row, column).and_then(|v| v.parse().ok())
    }
}

/// Parse every required tabular file in the cycle directory into an index.
/// Any missing required file fails the whole load.
pub fn load_index(cycle_dir: &Path, cycle: NaiveDate) -> Result<AirspaceIndex> {
    for required in REQUIRED_FILES {
        if !cycle_dir.join(required).exists() {
            anyhow::bail!("required file {required} missing from {}", cycle_dir.display());
        }
    }

    let mut index = AirspaceIndex {
        cycle: Some(cycle),
        ..Default::default()
    };
    load_navaids(&Table::open(&cycle_dir.join("NAV_BASE.csv"))?, &mut index);
    load_fixes(&Table::open(&cycle_dir.join("FIX_BASE.csv"))?, &mut index);
    load_airports(&Table::open(&cycle_dir.join("APT_BASE.csv"))?, &mut index);
    load_airways(&Table::open(&cycle_dir.join("AWY_SEG.csv"))?, &mut index);
    load_procedures(
        &Table::open(&cycle_dir.join("DP_RTE.csv"))?,
        ProcedureKind::Sid,
        &mut index,
    );
    load_procedures(
        &Table::open(&cycle_dir.join("STAR_RTE.csv"))?,
        ProcedureKind::Star,
        &mut index,
    );
    load_centerlines(&Table::open(&cycle_dir.join("ILS_BASE.csv"))?, &mut index);
    Ok(index)
}

fn load_navaids(table: &Table, index: &mut AirspaceIndex) {
    for row in &table.rows {
        let (Some(id), Some(lat), Some(lon)) = (
            table.get(row, "NAV_ID"),
            table.num(row, "LAT_DECIMAL"),
            table.num(row, "LONG_DECIMAL"),
        ) else {
            continue;
        };
        let kind = table.get(row, "NAV_TYPE").unwrap_or("NAVAID").to_string();
        index.navaids.entry(id.to_string()).or_default().push(NavPoint {
            id: id.to_string(),
            lat,
            lon,
            kind,
        });
    }
}

fn load_fixes(table: &Table, index: &mut AirspaceIndex) {
    for row in &table.rows {
        let (Some(id), Some(lat), Some(lon)) = (
            table.get(row, "FIX_ID"),
            table.num(row, "LAT_DECIMAL"),
            table.num(row, "LONG_DECIMAL"),
        ) else {
            continue;
        };
        index.fixes.entry(id.to_string()).or_default().push(NavPoint {
            id: id.to_string(),
            lat,
            lon,
            kind: "FIX".to_string(),
        });
    }
}

fn load_airports(table: &Table, index: &mut AirspaceIndex) {
    for row in &table.rows {
        let (Some(lid), Some(lat), Some(lon)) = (
            table.get(row, "ARPT_ID"),
            table.num(row, "LAT_DECIMAL"),
            table.num(row, "LONG_DECIMAL"),
        ) else {
            continue;
        };
        let point = NavPoint {
            id: lid.to_string(),
            lat,
            lon,
            kind: "APT".to_string(),
        };
        index.airports_by_lid.insert(lid.to_string(), point.clone());
        if let Some(icao) = table.get(row, "ICAO_ID") {
            index.airports_by_icao.insert(icao.to_string(), point.clone());
        }

        // Overlay: public operational fields only, with the class derived
        // from certification and tower type
        let public = table.get(row, "OWNERSHIP_TYPE_CODE") == Some("PU");
        let operational = table.get(row, "ARPT_STATUS").map(|s| s == "O").unwrap_or(true);
        if public && operational {
            index.overlay_airports.push(OverlayAirport {
                id: lid.to_string(),
                name: table.get(row, "ARPT_NAME").unwrap_or(lid).to_string(),
                lat,
                lon,
                class: airspace_class(
                    table.get(row, "FAR_139_TYPE_CODE"),
                    table.get(row, "TWR_TYPE_CODE"),
                ),
            });
        }
    }
}

/// Class B for a FAR-139 I-E certificate, C under an approach-control tower,
/// D under a plain tower, otherwise E.
fn airspace_class(far139: Option<&str>, tower: Option<&str>) -> char {
    if far139.map(|c| c.eq_ignore_ascii_case("I E")).unwrap_or(false) {
        return 'B';
    }
    match tower.map(|t| t.to_ascii_uppercase()) {
        Some(t) if matches!(t.as_str(), "TRACON" | "RAPCON" | "RATCF" | "A" | "C") => 'C',
        Some(t) if t == "ATCT" => 'D',
        _ => 'E',
    }
}

fn load_airways(table: &Table, index: &mut AirspaceIndex) {
    let mut segments: HashMap<String, Vec<(i64, String)>> = HashMap::new();
    for row in &table.rows {
        let (Some(awy), Some(seq), Some(fix)) = (
            table.get(row, "AWY_ID"),
            table.num(row, "SEQ"),
            table.get(row, "FIX_ID"),
        ) else {
            continue;
        };
        segments
            .entry(awy.to_string())
            .or_default()
            .push((seq as i64, fix.to_string()));
    }
    for (awy, mut fixes) in segments {
        fixes.sort_by_key(|(seq, _)| *seq);
        index
            .airways
            .insert(awy, fixes.into_iter().map(|(_, fix)| fix).collect());
    }
}

fn load_procedures(table: &Table, kind: ProcedureKind, index: &mut AirspaceIndex) {
    let code_column = match kind {
        ProcedureKind::Sid => "DP_COMPUTER_CODE",
        ProcedureKind::Star => "STAR_COMPUTER_CODE",
    };

    // (procedure, airport) -> per-variant body sequences and per-name
    // transition sequences, both still in file order
    type Sequences = HashMap<String, Vec<(i64, String)>>;
    let mut bodies: HashMap<(String, String), Sequences> = HashMap::new();
    let mut transitions: HashMap<(String, String), Sequences> = HashMap::new();

    for row in &table.rows {
        let (Some(code), Some(airport), Some(seq), Some(point)) = (
            table.get(row, code_column),
            table.get(row, "ARPT_ID"),
            table.num(row, "POINT_SEQ"),
            table.get(row, "POINT"),
        ) else {
            continue;
        };
        let key = (code.to_string(), airport.to_string());
        let portion = table.get(row, "ROUTE_PORTION_TYPE").unwrap_or("BODY");
        if portion.eq_ignore_ascii_case("TRANSITION") {
            let name = table
                .get(row, "TRANSITION_COMPUTER_CODE")
                .unwrap_or("")
                .to_string();
            transitions
                .entry(key)
                .or_default()
                .entry(name)
                .or_default()
                .push((seq as i64, point.to_string()));
        } else {
            let variant = table
                .get(row, "ARPT_RWY_ASSOC")
                .or_else(|| table.get(row, "ROUTE_NAME"))
                .unwrap_or("ALL")
                .to_string();
            bodies
                .entry(key)
                .or_default()
                .entry(variant)
                .or_default()
                .push((seq as i64, point.to_string()));
        }
    }

    let keys: std::collections::HashSet<(String, String)> = bodies
        .keys()
        .chain(transitions.keys())
        .cloned()
        .collect();
    for key in keys {
        let (code, airport) = key.clone();
        let variants: Vec<Vec<String>> = bodies
            .remove(&key)
            .map(|m| m.into_values().map(ordered_reversed).collect())
            .unwrap_or_default();
        let body = common_body(&variants);

        let mut transition_map: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(trans) = transitions.remove(&key) {
            for (name, seq) in trans {
                let fixes = ordered_reversed(seq);
                if fixes.is_empty() {
                    continue;
                }
                // Keyed both by transition name and by the enroute endpoint:
                // first fix of a STAR transition, last fix of a SID
                // transition
                let endpoint = match kind {
                    ProcedureKind::Star => fixes.first().cloned(),
                    ProcedureKind::Sid => fixes.last().cloned(),
                };
                if let Some(endpoint) = endpoint
                    && endpoint != name
                {
                    transition_map.insert(endpoint, fixes.clone());
                }
                if !name.is_empty() {
                    transition_map.insert(name, fixes);
                }
            }
        }

        index
            .procedures
            .entry(code.clone())
            .or_default()
            .push(ProcedureDefinition {
                id: code,
                airport,
                kind,
                body,
                transitions: transition_map,
            });
    }
}

/// Sort by sequence number, then flip file order into flight direction.
fn ordered_reversed(mut seq: Vec<(i64, String)>) -> Vec<String> {
    seq.sort_by_key(|(n, _)| *n);
    seq.into_iter().rev().map(|(_, fix)| fix).collect()
}

/// Fixes shared by every runway variant, kept in the first variant's order.
fn common_body(variants: &[Vec<String>]) -> Vec<String> {
    let Some(first) = variants.first() else {
        return Vec::new();
    };
    first
        .iter()
        .filter(|fix| variants[1..].iter().all(|v| v.contains(fix)))
        .cloned()
        .collect()
}

fn load_centerlines(table: &Table, index: &mut AirspaceIndex) {
    for row in &table.rows {
        let Some(kind) = table.get(row, "SYSTEM_TYPE_CODE") else {
            continue;
        };
        if !["ILS", "LOC", "LDA", "SDF"]
            .iter()
            .any(|k| kind.to_ascii_uppercase().starts_with(k))
        {
            continue;
        }
        let (Some(airport), Some(runway), Some(lat), Some(lon), Some(mag_brg), Some(length_feet)) = (
            table.get(row, "ARPT_ID"),
            table.get(row, "RWY_ID"),
            table.num(row, "LAT_DECIMAL"),
            table.num(row, "LONG_DECIMAL"),
            table.num(row, "MAG_BRG"),
            table.num(row, "RWY_LEN"),
        ) else {
            continue;
        };
        let variation = table.num(row, "MAG_VAR").unwrap_or(0.0);
        // The localizer sits past the far end; the threshold is its position
        // projected back along the reciprocal of the true approach course
        // for the runway length
        let course = (mag_brg + variation).rem_euclid(360.0);
        let reciprocal = (course + 180.0).rem_euclid(360.0);
        let (threshold_lat, threshold_lon) =
            project(lat, lon, reciprocal, length_feet / FEET_PER_NM);
        let (outer_lat, outer_lon) =
            project(threshold_lat, threshold_lon, reciprocal, CENTERLINE_LENGTH_NM);
        index.centerlines.push(CenterlineSegment {
            id: table
                .get(row, "ILS_LOC_ID")
                .map(str::to_string)
                .unwrap_or_else(|| format!("{airport}-{runway}")),
            airport: airport.to_string(),
            runway: runway.to_string(),
            kind: kind.to_string(),
            threshold_lat,
            threshold_lon,
            outer_lat,
            outer_lon,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::distance_nm;

    fn write_cycle(dir: &Path) {
        std::fs::write(
            dir.join("NAV_BASE.csv"),
            "NAV_ID,NAV_TYPE,LAT_DECIMAL,LONG_DECIMAL\n\
             ACK,VOR/DME,41.2816,-70.0264\n\
             BOS,VORTAC,42.3573,-70.9897\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("FIX_BASE.csv"),
            "FIX_ID,LAT_DECIMAL,LONG_DECIMAL\n\
             SSOXS,42.1000,-70.8000\n\
             BUZRD,41.4042,-70.8583\n\
             PARCH,41.0500,-72.2000\n\
             CCC,40.9297,-72.7958\n\
             ROBER,40.8500,-73.0000\n\
             HYLND,42.2000,-70.9000\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("APT_BASE.csv"),
            "ARPT_ID,ICAO_ID,ARPT_NAME,LAT_DECIMAL,LONG_DECIMAL,OWNERSHIP_TYPE_CODE,ARPT_STATUS,FAR_139_TYPE_CODE,TWR_TYPE_CODE\n\
             BOS,KBOS,GENERAL EDWARD LAWRENCE LOGAN INTL,42.3629,-71.0064,PU,O,I E,ATCT\n\
             JFK,KJFK,JOHN F KENNEDY INTL,40.6398,-73.7787,PU,O,I E,ATCT\n\
             OWD,KOWD,NORWOOD MEMORIAL,42.1905,-71.1729,PU,O,,ATCT\n\
             0B5,,TURNERS FALLS,42.5914,-72.5228,PU,O,,\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("AWY_SEG.csv"),
            "AWY_ID,SEQ,FIX_ID\n\
             V1,10,SSOXS\n\
             V1,20,BUZRD\n\
             V1,30,PARCH\n\
             V1,40,CCC\n",
        )
        .unwrap();
        // File order is reverse flight direction; LOGAN4 departs over SSOXS
        std::fs::write(
            dir.join("DP_RTE.csv"),
            "DP_COMPUTER_CODE,ARPT_ID,ROUTE_PORTION_TYPE,ARPT_RWY_ASSOC,TRANSITION_COMPUTER_CODE,POINT_SEQ,POINT\n\
             LOGAN4,BOS,BODY,RW04,,10,SSOXS\n\
             LOGAN4,BOS,BODY,RW04,,20,HYLND\n\
             LOGAN4,BOS,BODY,RW22,,10,SSOXS\n\
             LOGAN4,BOS,BODY,RW22,,20,HYLND\n\
             LOGAN4,BOS,BODY,RW22,,30,BUZRD\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("STAR_RTE.csv"),
            "STAR_COMPUTER_CODE,ARPT_ID,ROUTE_PORTION_TYPE,ARPT_RWY_ASSOC,TRANSITION_COMPUTER_CODE,POINT_SEQ,POINT\n\
             PARCH3,JFK,BODY,ALL,,10,ROBER\n\
             PARCH3,JFK,BODY,ALL,,20,CCC\n\
             PARCH3,JFK,TRANSITION,,PARCH,10,CCC\n\
             PARCH3,JFK,TRANSITION,,PARCH,20,PARCH\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("ILS_BASE.csv"),
            "ARPT_ID,RWY_ID,ILS_LOC_ID,SYSTEM_TYPE_CODE,LAT_DECIMAL,LONG_DECIMAL,MAG_BRG,MAG_VAR,RWY_LEN\n\
             BOS,04R,IBOS,ILS/DME,42.3745,-70.9890,35.0,-14.0,10005\n\
             BOS,33L,XXXX,VOR,42.3,-71.0,330.0,-14.0,7000\n",
        )
        .unwrap();
    }

    fn cycle() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 19).unwrap()
    }

    #[test]
    fn test_load_builds_all_indices() {
        let dir = tempfile::tempdir().unwrap();
        write_cycle(dir.path());
        let index = load_index(dir.path(), cycle()).unwrap();
        assert_eq!(index.cycle, Some(cycle()));
        assert_eq!(index.navaids["ACK"].len(), 1);
        assert_eq!(index.airways["V1"], vec!["SSOXS", "BUZRD", "PARCH", "CCC"]);
        assert!(index.airports_by_icao.contains_key("KBOS"));
        assert!(index.airports_by_lid.contains_key("0B5"));
    }

    #[test]
    fn test_missing_required_file_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        write_cycle(dir.path());
        std::fs::remove_file(dir.path().join("AWY_SEG.csv")).unwrap();
        assert!(load_index(dir.path(), cycle()).is_err());
    }

    #[test]
    fn test_procedure_body_is_variant_intersection_in_flight_order() {
        let dir = tempfile::tempdir().unwrap();
        write_cycle(dir.path());
        let index = load_index(dir.path(), cycle()).unwrap();
        let logan = &index.procedures["LOGAN4"][0];
        assert_eq!(logan.kind, ProcedureKind::Sid);
        // RW22 has BUZRD which RW04 lacks; file order reverses to flight
        // direction HYLND -> SSOXS
        assert_eq!(logan.body, vec!["HYLND", "SSOXS"]);
    }

    #[test]
    fn test_star_transition_keyed_by_name_and_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        write_cycle(dir.path());
        let index = load_index(dir.path(), cycle()).unwrap();
        let parch3 = &index.procedures["PARCH3"][0];
        assert_eq!(parch3.body, vec!["CCC", "ROBER"]);
        // Transition file order reversed: PARCH -> CCC; endpoint of a STAR
        // transition is its first fix
        assert_eq!(parch3.transitions["PARCH"], vec!["PARCH", "CCC"]);
    }

    #[test]
    fn test_airspace_classes() {
        let dir = tempfile::tempdir().unwrap();
        write_cycle(dir.path());
        let index = load_index(dir.path(), cycle()).unwrap();
        let class_of = |id: &str| {
            index
                .overlay_airports
                .iter()
                .find(|a| a.id == id)
                .unwrap()
                .class
        };
        assert_eq!(class_of("BOS"), 'B');
        assert_eq!(class_of("OWD"), 'D');
        assert_eq!(class_of("0B5"), 'E');
    }

    #[test]
    fn test_centerline_projection() {
        let dir = tempfile::tempdir().unwrap();
        write_cycle(dir.path());
        let index = load_index(dir.path(), cycle()).unwrap();
        // Non-localizer rows are skipped
        assert_eq!(index.centerlines.len(), 1);
        let cl = &index.centerlines[0];
        assert_eq!(cl.kind, "ILS/DME");
        let threshold_back = distance_nm(42.3745, -70.9890, cl.threshold_lat, cl.threshold_lon);
        assert!((threshold_back - 10005.0 / FEET_PER_NM).abs() < 0.05);
        let outer = distance_nm(cl.threshold_lat, cl.threshold_lon, cl.outer_lat, cl.outer_lon);
        assert!((outer - 15.0).abs() < 0.1);
    }
}
