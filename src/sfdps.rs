//! SFDPS en-route flight message decoder.
//!
//! Each message collection carries many flight elements; every flight element
//! decodes into one [`SfdpsUpdate`] holding exactly the fields present on the
//! wire. Clearable fields keep their tri-state so the merge engine can tell
//! "not carried" apart from "explicitly nil".
//!
//! Matching is by local name only; the producers disagree about whether a
//! value rides as an attribute or a child element, so most scalar reads
//! accept either form.

use chrono::{DateTime, Utc};

use crate::flights::{AssignedAltitude, FlightStatus};
use crate::xmltree::{Clearable, Element, parse};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClearedUpdate {
    pub heading: Option<String>,
    pub speed: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandoffUpdate {
    pub event: Option<String>,
    pub transferring: Option<String>,
    pub receiving: Option<String>,
    pub accepting: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionUpdate {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub velocity_x: Option<f64>,
    pub velocity_y: Option<f64>,
    pub coasting: bool,
    pub target_latitude: Option<f64>,
    pub target_longitude: Option<f64>,
    pub target_altitude: Option<i32>,
}

/// Partial update decoded from one flight element.
#[derive(Debug, Clone, Default)]
pub struct SfdpsUpdate {
    pub gufi: String,
    pub source: String,
    pub centre: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub flight_type: Option<String>,
    pub callsign: Option<String>,
    pub computer_id: Option<String>,
    pub status: Option<FlightStatus>,
    pub operator: Option<String>,
    pub aftn_originator: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub alternates: Vec<String>,
    pub departure_actual: Option<String>,
    pub departure_estimated: Option<String>,
    pub arrival_actual: Option<String>,
    pub arrival_estimated: Option<String>,
    pub assigned_altitude: Option<AssignedAltitude>,
    pub interim_altitude: Clearable<i32>,
    pub controlling_facility: Option<String>,
    pub controlling_sector: Option<String>,
    pub remarks: Option<String>,
    pub coordination_time: Option<String>,
    pub coordination_fix: Option<String>,
    pub requested_airspeed: Option<String>,
    pub position: Option<PositionUpdate>,
    pub assigned_beacon: Option<String>,
    pub current_beacon: Option<String>,
    pub pointout_originating: Option<String>,
    pub pointout_receiving: Option<String>,
    pub cleared: Option<ClearedUpdate>,
    pub handoff: Option<HandoffUpdate>,
    pub aircraft_type: Option<String>,
    pub registration: Option<String>,
    pub wake_category: Option<String>,
    pub mode_s_hex: Option<String>,
    pub equipment_qualifier: Option<String>,
    pub communication_codes: Option<String>,
    pub navigation_codes: Option<String>,
    pub surveillance_codes: Option<String>,
    pub route_text: Option<String>,
    pub flight_rules: Option<String>,
    pub arrival_procedure: Option<String>,
    pub elapsed_estimates: Vec<(String, i64)>,
    pub fdps_gufi: Option<String>,
    pub tmi_ids: Option<String>,
    pub fourth_adapted_field: Option<String>,
}

/// Decode result for one message collection.
#[derive(Debug, Default)]
pub struct SfdpsBatch {
    pub updates: Vec<SfdpsUpdate>,
    /// Flight elements dropped for lacking a GUFI.
    pub dropped: usize,
}

/// Decode a message-collection payload. Unknown children of the root are
/// skipped; only children containing a flight sub-element contribute.
pub fn decode(xml: &str) -> anyhow::Result<SfdpsBatch> {
    let root = parse(xml)?;
    let mut batch = SfdpsBatch::default();
    for child in &root.children {
        let Some(flight) = child.descendant("flight") else {
            continue;
        };
        match decode_flight(flight) {
            Some(update) => batch.updates.push(update),
            None => batch.dropped += 1,
        }
    }
    // A bare flight document (seen from the debug replay tooling)
    if batch.updates.is_empty() && batch.dropped == 0 && root.name == "flight" {
        match decode_flight(&root) {
            Some(update) => batch.updates.push(update),
            None => batch.dropped += 1,
        }
    }
    Ok(batch)
}

fn decode_flight(flight: &Element) -> Option<SfdpsUpdate> {
    let gufi = flight
        .child_text("gufi")
        .or_else(|| flight.attr("gufi"))
        .map(str::to_string)?;

    let mut u = SfdpsUpdate {
        gufi,
        source: flight.attr("source").unwrap_or("").to_string(),
        centre: flight.attr("centre").map(str::to_string),
        timestamp: flight
            .attr("timestamp")
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc)),
        flight_type: flight.attr("flightType").map(str::to_string),
        ..Default::default()
    };

    if let Some(ident) = flight.child("flightIdentification") {
        u.callsign = ident.attr_or_child("aircraftIdentification").map(str::to_string);
        u.computer_id = ident.attr_or_child("computerId").map(str::to_string);
    }
    if let Some(status) = flight.child("flightStatus") {
        u.status = status
            .attr_or_child("fdpsFlightStatus")
            .and_then(FlightStatus::parse);
    }
    if let Some(op) = flight.child("operator") {
        u.operator = op
            .descendant("organization")
            .and_then(|o| o.attr_or_child("name"))
            .or_else(|| op.text_value())
            .map(str::to_string);
    }
    if let Some(orig) = flight.child("originator") {
        u.aftn_originator = orig.attr_or_child("aftnAddress").map(str::to_string);
    }
    if let Some(dep) = flight.child("departure") {
        u.origin = dep.attr_or_child("departurePoint").map(str::to_string);
        u.departure_actual = dep.descendant("actual").and_then(time_of).map(str::to_string);
        u.departure_estimated = dep
            .descendant("estimated")
            .and_then(time_of)
            .map(str::to_string);
    }
    if let Some(arr) = flight.child("arrival") {
        u.destination = arr.attr_or_child("arrivalPoint").map(str::to_string);
        u.arrival_actual = arr.descendant("actual").and_then(time_of).map(str::to_string);
        u.arrival_estimated = arr
            .descendant("estimated")
            .and_then(time_of)
            .map(str::to_string);
        u.alternates = arr
            .children_named("alternate")
            .filter_map(|a| a.text_value().or_else(|| a.attr("airport")))
            .map(str::to_string)
            .collect();
    }
    if let Some(alt) = flight.child("assignedAltitude") {
        u.assigned_altitude = decode_assigned_altitude(alt);
    }
    if let Some(interim) = flight.child("interimAltitude") {
        u.interim_altitude = if interim.is_nil() {
            Clearable::Nil
        } else {
            match interim.text_value().and_then(parse_feet) {
                Some(feet) => Clearable::Value(feet),
                None => Clearable::Nil,
            }
        };
    }
    if let Some(unit) = flight.child("controllingUnit") {
        u.controlling_facility = unit.attr_or_child("unitIdentifier").map(str::to_string);
        u.controlling_sector = unit.attr_or_child("sectorIdentifier").map(str::to_string);
    }
    if let Some(plan) = flight.child("flightPlan") {
        u.remarks = plan.attr_or_child("remarks").map(str::to_string);
    }
    if let Some(coord) = flight.child("coordination") {
        u.coordination_time = coord
            .attr_or_child("coordinationTime")
            .or_else(|| coord.attr_or_child("time"))
            .map(str::to_string);
        u.coordination_fix = coord
            .attr_or_child("coordinationFix")
            .or_else(|| coord.attr_or_child("fix"))
            .map(str::to_string);
    }
    u.requested_airspeed = flight.attr_or_child("requestedAirspeed").map(str::to_string);
    if let Some(en_route) = flight.child("enRoute")
        && let Some(pos) = en_route.descendant("position")
    {
        u.position = decode_position(pos);
    }
    if let Some(assignment) = flight.child("beaconCodeAssignment") {
        u.assigned_beacon = assignment
            .child_text("currentBeaconCode")
            .or_else(|| assignment.text_value())
            .or_else(|| assignment.attr("currentBeaconCode"))
            .map(str::to_string);
    } else if let Some(current) = flight.child("currentBeaconCode") {
        u.current_beacon = current.text_value().map(str::to_string);
    }
    if let Some(pointout) = flight.child("pointout") {
        u.pointout_originating = pointout.child("originatingUnit").and_then(unit_string);
        u.pointout_receiving = pointout.child("receivingUnit").and_then(unit_string);
    }
    if let Some(cleared) = flight.child("cleared") {
        u.cleared = Some(ClearedUpdate {
            heading: cleared.attr_or_child("clearanceHeading").map(str::to_string),
            speed: cleared.attr_or_child("clearanceSpeed").map(str::to_string),
            text: cleared.attr_or_child("clearanceText").map(str::to_string),
        });
    }
    if let Some(handoff) = flight.child("handoff") {
        u.handoff = Some(HandoffUpdate {
            event: handoff.attr_or_child("event").map(str::to_string),
            transferring: handoff.child("transferringUnit").and_then(unit_string),
            receiving: handoff.child("receivingUnit").and_then(unit_string),
            accepting: handoff.child("acceptingUnit").and_then(unit_string),
        });
    }
    if let Some(desc) = flight.child("aircraftDescription") {
        decode_aircraft_description(desc, &mut u);
    }
    if let Some(route) = flight.child("agreed").and_then(|a| a.child("route")) {
        u.route_text = route.attr_or_child("nasRouteText").map(str::to_string);
        u.flight_rules = route.attr_or_child("initialFlightRules").map(str::to_string);
        u.arrival_procedure = route
            .attr_or_child("nasadaptedArrivalRoute")
            .map(str::to_string);
        for eet in route.children_named("estimatedElapsedTime") {
            if let (Some(location), Some(duration)) = (
                eet.attr_or_child("location"),
                eet.attr_or_child("elapsedTime"),
            ) && let Some(seconds) = parse_iso8601_duration(duration)
            {
                u.elapsed_estimates.push((location.to_string(), seconds));
            }
        }
    }
    if let Some(supplemental) = flight.child("supplementalData") {
        let mut pairs = Vec::new();
        supplemental.walk_paths(&mut |_, el| {
            if el.name == "nameValue"
                && let (Some(name), Some(value)) = (el.attr("name"), el.attr("value"))
            {
                pairs.push((name.to_string(), value.to_string()));
            }
        });
        for (name, value) in pairs {
            match name.as_str() {
                "FDPS_GUFI" => u.fdps_gufi = Some(value),
                "TMI_IDS" => u.tmi_ids = Some(value),
                "4TH_ADAPTED_FIELD" => u.fourth_adapted_field = Some(value),
                _ => {}
            }
        }
    }
    Some(u)
}

fn decode_assigned_altitude(alt: &Element) -> Option<AssignedAltitude> {
    if let Some(simple) = alt.child("simple") {
        return simple
            .text_value()
            .and_then(parse_feet)
            .map(|feet| AssignedAltitude::Simple { feet });
    }
    if let Some(vfr_plus) = alt.child("vfrPlus") {
        return vfr_plus
            .text_value()
            .and_then(parse_feet)
            .map(|feet| AssignedAltitude::VfrPlus { feet });
    }
    if alt.child("vfr").is_some() {
        return Some(AssignedAltitude::Vfr);
    }
    if let Some(block) = alt.child("block") {
        let floor = block.child_text("above").and_then(parse_feet);
        let ceiling = block.child_text("below").and_then(parse_feet);
        if let (Some(floor), Some(ceiling)) = (floor, ceiling) {
            return Some(AssignedAltitude::Block { floor, ceiling });
        }
    }
    None
}

fn decode_position(pos: &Element) -> Option<PositionUpdate> {
    let (latitude, longitude) = pos.descendant("pos").and_then(|p| parse_pos(p.text_value()?))?;
    let mut update = PositionUpdate {
        latitude,
        longitude,
        ..Default::default()
    };
    update.altitude = pos
        .descendant("altitude")
        .and_then(|a| a.text_value())
        .and_then(|v| v.parse().ok());
    update.speed = pos
        .descendant("surveillance")
        .and_then(|s| s.text_value())
        .and_then(|v| v.parse().ok());
    if let Some(velocity) = pos.descendant("trackVelocity") {
        update.velocity_x = velocity.attr("x").and_then(|v| v.parse().ok());
        update.velocity_y = velocity.attr("y").and_then(|v| v.parse().ok());
    }
    update.coasting = pos
        .attr("coastIndicator")
        .or_else(|| pos.child_text("coastIndicator"))
        .is_some();
    if let Some(target) = pos.descendant("targetPosition")
        && let Some((lat, lon)) = target.descendant("pos").and_then(|p| parse_pos(p.text_value()?))
    {
        update.target_latitude = Some(lat);
        update.target_longitude = Some(lon);
    }
    if let Some(target_alt) = pos.descendant("targetAltitude")
        && target_alt.attr("invalid") != Some("true")
    {
        update.target_altitude = target_alt.text_value().and_then(parse_feet);
    }
    Some(update)
}

fn decode_aircraft_description(desc: &Element, u: &mut SfdpsUpdate) {
    u.aircraft_type = desc.attr_or_child("icaoModelIdentifier").map(str::to_string);
    u.registration = desc.attr_or_child("registration").map(str::to_string);
    u.wake_category = desc.attr_or_child("wakeTurbulence").map(str::to_string);
    u.mode_s_hex = desc
        .attr_or_child("aircraftAddress")
        .map(|h| h.to_ascii_uppercase());
    u.equipment_qualifier = desc.attr_or_child("equipmentQualifier").map(str::to_string);
    if let Some(comm) = desc.descendant("communication") {
        u.communication_codes = join_codes(&[
            comm.attr_or_child("code"),
            comm.attr("selectiveCallingCode"),
            comm.attr("otherDataLinkCapabilities"),
        ]);
    }
    if let Some(nav) = desc.descendant("navigation") {
        u.navigation_codes = join_codes(&[
            nav.attr_or_child("code"),
            nav.attr("performanceBasedCode"),
            nav.attr("otherNavigationCapabilities"),
        ]);
    }
    if let Some(surv) = desc.descendant("surveillance") {
        u.surveillance_codes = join_codes(&[
            surv.attr_or_child("code"),
            surv.attr("otherSurveillanceCapabilities"),
        ]);
    }
}

fn join_codes(parts: &[Option<&str>]) -> Option<String> {
    let joined: Vec<&str> = parts.iter().flatten().copied().collect();
    if joined.is_empty() {
        None
    } else {
        Some(joined.join(" "))
    }
}

fn unit_string(unit: &Element) -> Option<String> {
    let facility = unit.attr_or_child("unitIdentifier")?;
    match unit.attr_or_child("sectorIdentifier") {
        Some(sector) => Some(format!("{facility}/{sector}")),
        None => Some(facility.to_string()),
    }
}

fn time_of(el: &Element) -> Option<&str> {
    el.attr("time").or_else(|| el.text_value())
}

/// "lat lon" space-separated pair.
fn parse_pos(text: &str) -> Option<(f64, f64)> {
    let mut parts = text.split_whitespace();
    let lat = parts.next()?.parse().ok()?;
    let lon = parts.next()?.parse().ok()?;
    Some((lat, lon))
}

fn parse_feet(s: &str) -> Option<i32> {
    s.trim().parse::<f64>().ok().map(|f| f.round() as i32)
}

/// Minimal ISO-8601 duration parser ("PT1H20M", "P1DT2H30M15S").
pub fn parse_iso8601_duration(s: &str) -> Option<i64> {
    let s = s.trim();
    let rest = s.strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, t),
        None => (rest, ""),
    };
    let mut seconds = 0i64;
    let mut number = String::new();
    for c in date_part.chars() {
        if c.is_ascii_digit() {
            number.push(c);
        } else {
            let value: i64 = number.parse().ok()?;
            number.clear();
            seconds += match c {
                'D' => value * 86_400,
                'W' => value * 7 * 86_400,
                _ => return None,
            };
        }
    }
    for c in time_part.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
        } else {
            let value: f64 = number.parse().ok()?;
            number.clear();
            seconds += match c {
                'H' => (value * 3600.0) as i64,
                'M' => (value * 60.0) as i64,
                'S' => value as i64,
                _ => return None,
            };
        }
    }
    Some(seconds)
}
