//! Terminal radar (STARS) message decoder.
//!
//! Root element is `TATrackAndFlightPlan` with the facility in `src` and one
//! `record` child per track. The feed uses the literal strings "unavailable"
//! and "unassigned" as absent markers.

use anyhow::bail;

use crate::xmltree::{Element, parse};

/// One decoded STARS record: track state plus the optional flight-plan and
/// enhanced-data overlays.
#[derive(Debug, Clone, Default)]
pub struct TaisUpdate {
    pub track_num: u32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub reported_squawk: Option<String>,
    pub reported_altitude: Option<f64>,
    pub vertical_rate_fpm: Option<i32>,
    pub frozen: Option<bool>,
    pub pseudo: Option<bool>,
    pub mode_s_hex: Option<String>,
    pub velocity: Option<(f64, f64)>,
    pub callsign: Option<String>,
    pub aircraft_type: Option<String>,
    pub flight_rules: Option<String>,
    pub entry_fix: Option<String>,
    pub exit_fix: Option<String>,
    pub assigned_squawk: Option<String>,
    pub requested_altitude: Option<i32>,
    pub runway: Option<String>,
    pub scratchpad1: Option<String>,
    pub scratchpad2: Option<String>,
    pub owner: Option<String>,
    pub wake_category: Option<String>,
    pub equipment_suffix: Option<String>,
    pub pending_handoff: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
}

#[derive(Debug, Default)]
pub struct TaisBatch {
    pub facility: String,
    pub updates: Vec<TaisUpdate>,
    /// Records skipped for lacking a track number.
    pub dropped: usize,
}

pub fn decode(xml: &str) -> anyhow::Result<TaisBatch> {
    let root = parse(xml)?;
    if root.name != "TATrackAndFlightPlan" {
        bail!("unexpected root element {}", root.name);
    }
    let mut batch = TaisBatch {
        facility: root
            .attr("src")
            .or_else(|| root.child_text("src"))
            .unwrap_or_default()
            .to_string(),
        ..Default::default()
    };
    for record in root.children_named("record") {
        match decode_record(record) {
            Some(update) => batch.updates.push(update),
            None => batch.dropped += 1,
        }
    }
    Ok(batch)
}

fn decode_record(record: &Element) -> Option<TaisUpdate> {
    let track = record.child("track")?;
    let track_num: u32 = text(track, "trackNum")?.parse().ok()?;

    let mut u = TaisUpdate {
        track_num,
        latitude: text(track, "lat").and_then(|v| v.parse().ok()),
        longitude: text(track, "lon").and_then(|v| v.parse().ok()),
        reported_squawk: text(track, "reportedBeaconCode").map(str::to_string),
        reported_altitude: text(track, "reportedAltitude").and_then(|v| v.parse().ok()),
        vertical_rate_fpm: text(track, "vVert").and_then(|v| v.parse().ok()),
        frozen: text(track, "frozen").map(flag),
        pseudo: text(track, "pseudo").map(flag),
        mode_s_hex: text(track, "acAddress").and_then(hex_address),
        ..Default::default()
    };
    if let (Some(vx), Some(vy)) = (
        text(track, "vx").and_then(|v| v.parse().ok()),
        text(track, "vy").and_then(|v| v.parse().ok()),
    ) {
        u.velocity = Some((vx, vy));
    }

    if let Some(plan) = record.child("flightPlan") {
        u.callsign = text(plan, "acid").map(str::to_string);
        u.aircraft_type = text(plan, "acType").map(str::to_string);
        u.flight_rules = text(plan, "flightRules").map(str::to_string);
        u.entry_fix = text(plan, "entryFix").map(str::to_string);
        u.exit_fix = text(plan, "exitFix").map(str::to_string);
        u.assigned_squawk = text(plan, "assignedBeaconCode").map(str::to_string);
        u.requested_altitude = text(plan, "requestedAltitude").and_then(|v| v.parse().ok());
        u.runway = text(plan, "runway").map(str::to_string);
        u.scratchpad1 = text(plan, "scratchPad1").map(str::to_string);
        u.scratchpad2 = text(plan, "scratchPad2").map(str::to_string);
        u.owner = text(plan, "cps").map(str::to_string);
        u.wake_category = text(plan, "category").map(str::to_string);
        u.equipment_suffix = text(plan, "eqptSuffix").map(str::to_string);
        u.pending_handoff = text(plan, "pendingHandoff").map(str::to_string);
    }
    if let Some(enhanced) = record.child("enhancedData") {
        u.origin = text(enhanced, "departureAirport").map(str::to_string);
        u.destination = text(enhanced, "destinationAirport").map(str::to_string);
    }
    Some(u)
}

/// Child text with the feed's absent-value sentinels filtered out.
fn text<'a>(el: &'a Element, name: &str) -> Option<&'a str> {
    el.child_text(name)
        .filter(|v| !v.eq_ignore_ascii_case("unavailable") && !v.eq_ignore_ascii_case("unassigned"))
}

fn flag(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
}

/// Transponder address arrives as a decimal integer; zero means no address.
fn hex_address(v: &str) -> Option<String> {
    let value: u32 = v.trim().parse().ok()?;
    if value == 0 {
        None
    } else {
        Some(format!("{value:06X}"))
    }
}
