//! Surface-movement (ASDE-X) message decoder.
//!
//! Only `asdexMsg` roots are accepted. Two report shapes live inside: the
//! radar `positionReport` (coordinates spelled `latitude`/`longitude`) and
//! the `adsbReport` basic report (coordinates spelled `lat`/`lon`, identity
//! fields absent). `SafetyLogicHoldBar` children are dropped without
//! comment.

use anyhow::bail;

use crate::xmltree::{Element, parse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmesReportKind {
    Position,
    Adsb,
}

/// One decoded surface report.
#[derive(Debug, Clone)]
pub struct SmesUpdate {
    pub track_id: String,
    pub kind: SmesReportKind,
    /// True when a position report carries `full="true"`; the update then
    /// replaces the stored identity fields instead of layering onto them.
    pub full: bool,
    pub callsign: Option<String>,
    pub squawk: Option<String>,
    pub aircraft_type: Option<String>,
    pub target_type: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude_feet: Option<f64>,
    pub speed_knots: Option<f64>,
    pub heading: Option<f64>,
    pub eram_gufi: Option<String>,
}

#[derive(Debug, Default)]
pub struct SmesBatch {
    pub airport: String,
    pub updates: Vec<SmesUpdate>,
    /// Reports skipped for lacking a track id.
    pub dropped: usize,
}

pub fn decode(xml: &str) -> anyhow::Result<SmesBatch> {
    let root = parse(xml)?;
    if root.name != "asdexMsg" {
        bail!("unexpected root element {}", root.name);
    }
    let mut batch = SmesBatch {
        airport: root
            .child_text("airport")
            .unwrap_or_default()
            .to_string(),
        ..Default::default()
    };
    for child in &root.children {
        match child.name.as_str() {
            "positionReport" => match decode_position_report(child) {
                Some(update) => batch.updates.push(update),
                None => batch.dropped += 1,
            },
            "adsbReport" => {
                if let Some(basic) = child.descendant("basicReport") {
                    match decode_basic_report(basic) {
                        Some(update) => batch.updates.push(update),
                        None => batch.dropped += 1,
                    }
                }
            }
            _ => {}
        }
    }
    Ok(batch)
}

fn decode_position_report(report: &Element) -> Option<SmesUpdate> {
    let track_id = report
        .child_text("track")
        .or_else(|| report.attr("track"))?
        .to_string();
    let mut update = SmesUpdate {
        track_id,
        kind: SmesReportKind::Position,
        full: report.attr("full") == Some("true"),
        callsign: None,
        squawk: None,
        aircraft_type: None,
        target_type: None,
        latitude: parse_num(report.child_text("latitude")),
        longitude: parse_num(report.child_text("longitude")),
        altitude_feet: parse_num(report.child_text("altitude")),
        speed_knots: None,
        heading: None,
        eram_gufi: None,
    };
    if let Some(flight_id) = report.child("flightId") {
        update.callsign = flight_id.child_text("aircraftId").map(str::to_string);
        update.squawk = flight_id.child_text("mode3ACode").map(str::to_string);
    }
    if let Some(info) = report.child("flightInfo") {
        update.aircraft_type = info.child_text("acType").map(str::to_string);
        update.target_type = info.child_text("tgtType").map(str::to_string);
    }
    if let Some(movement) = report.child("movement") {
        update.speed_knots = parse_num(movement.child_text("speed"));
        update.heading = parse_num(movement.child_text("heading"));
    }
    update.eram_gufi = cross_reference(report);
    Some(update)
}

fn decode_basic_report(basic: &Element) -> Option<SmesUpdate> {
    let track_id = basic
        .child_text("track")
        .or_else(|| basic.attr("track"))?
        .to_string();
    Some(SmesUpdate {
        track_id,
        kind: SmesReportKind::Adsb,
        full: false,
        callsign: None,
        squawk: None,
        aircraft_type: None,
        target_type: None,
        latitude: parse_num(basic.child_text("lat")),
        longitude: parse_num(basic.child_text("lon")),
        altitude_feet: parse_num(basic.child_text("altitude")),
        speed_knots: None,
        heading: None,
        eram_gufi: cross_reference(basic),
    })
}

fn cross_reference(el: &Element) -> Option<String> {
    el.child("enhancedData")
        .and_then(|e| e.child_text("eramGufi"))
        .map(str::to_string)
}

fn parse_num(text: Option<&str>) -> Option<f64> {
    text.and_then(|t| t.parse().ok())
}
