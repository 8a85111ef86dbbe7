//! Tower event decoder (TDLS clearances and departure events).
//!
//! Captured roots are `TDLSCSPMessage` (pre-departure datalink clearance,
//! times formatted `MMddyyyyHHmmss`) and `TowerDepartureEventMessage`
//! (gate/taxi/takeoff, ISO 8601 times). `DATISData` roots are recognized and
//! ignored.

use anyhow::bail;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::tower::{TowerEvent, TowerEventKind};
use crate::xmltree::{Element, parse};

/// One decoded tower event plus its store key.
#[derive(Debug, Clone)]
pub struct TdesUpdate {
    pub airport: String,
    pub aircraft_id: String,
    pub event: TowerEvent,
}

#[derive(Debug)]
pub enum TdesOutcome {
    Event(TdesUpdate),
    /// Root is a known family we deliberately do not carry.
    Ignored,
}

pub fn decode(xml: &str) -> anyhow::Result<TdesOutcome> {
    let root = parse(xml)?;
    match root.name.as_str() {
        "TDLSCSPMessage" => decode_clearance(&root),
        "TowerDepartureEventMessage" => decode_departure(&root),
        "DATISData" => Ok(TdesOutcome::Ignored),
        other => bail!("unexpected root element {other}"),
    }
}

fn decode_clearance(root: &Element) -> anyhow::Result<TdesOutcome> {
    let (airport, aircraft_id) = identity(root)?;
    let at = root
        .attr_or_child("timeStamp")
        .and_then(parse_tdls_time)
        .unwrap_or_else(Utc::now);
    let event = TowerEvent {
        at,
        beacon: root.attr_or_child("beaconCode").map(str::to_string),
        aircraft_type: root.attr_or_child("aircraftType").map(str::to_string),
        computer_id: root.attr_or_child("computerId").map(str::to_string),
        eram_gufi: root.attr_or_child("eramGufi").map(str::to_string),
        sfdps_gufi: root.attr_or_child("sfdpsGufi").map(str::to_string),
        destination: root.attr_or_child("destination").map(str::to_string),
        kind: TowerEventKind::DatalinkClearance {
            header: root.child_text("header").map(str::to_string),
            body: root.child_text("body").map(str::to_string),
        },
    };
    Ok(TdesOutcome::Event(TdesUpdate {
        airport,
        aircraft_id,
        event,
    }))
}

fn decode_departure(root: &Element) -> anyhow::Result<TdesOutcome> {
    let (airport, aircraft_id) = identity(root)?;
    let clearance_time = root.attr_or_child("clearanceTime").and_then(parse_iso_time);
    let taxi_time = root.attr_or_child("taxiTime").and_then(parse_iso_time);
    let takeoff_time = root.attr_or_child("takeoffTime").and_then(parse_iso_time);
    let at = takeoff_time
        .or(taxi_time)
        .or(clearance_time)
        .unwrap_or_else(Utc::now);
    let event = TowerEvent {
        at,
        beacon: root.attr_or_child("beaconCode").map(str::to_string),
        aircraft_type: root.attr_or_child("aircraftType").map(str::to_string),
        computer_id: root.attr_or_child("computerId").map(str::to_string),
        eram_gufi: root.attr_or_child("eramGufi").map(str::to_string),
        sfdps_gufi: root.attr_or_child("sfdpsGufi").map(str::to_string),
        destination: root.attr_or_child("destination").map(str::to_string),
        kind: TowerEventKind::Departure {
            gate: root.attr_or_child("gate").map(str::to_string),
            runway: runway(root),
            clearance_time,
            taxi_time,
            takeoff_time,
        },
    };
    Ok(TdesOutcome::Event(TdesUpdate {
        airport,
        aircraft_id,
        event,
    }))
}

fn identity(root: &Element) -> anyhow::Result<(String, String)> {
    let airport = root
        .attr_or_child("airport")
        .ok_or_else(|| anyhow::anyhow!("missing airport"))?;
    let aircraft_id = root
        .attr_or_child("aircraftId")
        .ok_or_else(|| anyhow::anyhow!("missing aircraftId"))?;
    Ok((airport.to_string(), aircraft_id.to_string()))
}

/// Runway is the concatenation of the numeric id and the optional sub id
/// ("18" + "C" -> "18C").
fn runway(root: &Element) -> Option<String> {
    let numeric = root.attr_or_child("numericRunwayID")?;
    let sub = root.attr_or_child("runwaySubID").unwrap_or("");
    Some(format!("{numeric}{sub}"))
}

fn parse_tdls_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), "%m%d%Y%H%M%S")
        .ok()
        .map(|t| t.and_utc())
}

fn parse_iso_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
