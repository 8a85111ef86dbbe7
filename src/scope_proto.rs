//! Downstream scope-display protocol subscriber support.
//!
//! Terminal batches map one-to-one onto position and flight-plan messages
//! with stable GUIDs; deletions are explicit. The GUID is minted on first
//! sight of a Mode-S key, falling back to the facility+track-number key for
//! targets without an address.

use serde::Serialize;
use uuid::Uuid;

use crate::broadcast::envelope;
use crate::store::Store;
use crate::terminal::TerminalTrack;

#[derive(Debug, Serialize)]
struct ProtoPosition<'a> {
    kind: &'static str,
    guid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    callsign: Option<&'a str>,
    lat: f64,
    lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ground_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    track: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vertical_rate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    squawk: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ProtoFlightPlan<'a> {
    kind: &'static str,
    guid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    callsign: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aircraft_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    equipment_suffix: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    destination: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assigned_squawk: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    requested_altitude: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    runway: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scratchpad1: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scratchpad2: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ProtoDelete {
    kind: &'static str,
    guid: Uuid,
}

/// GUID key for a track: the Mode-S address when it has one, else the
/// facility-scoped track number.
pub fn guid_key(track: &TerminalTrack) -> String {
    match &track.mode_s_hex {
        Some(hex) => hex.clone(),
        None => format!("{}:{}", track.facility, track.track_num),
    }
}

fn position_message(store: &Store, track: &TerminalTrack) -> Option<String> {
    let (lat, lon) = (track.latitude?, track.longitude?);
    let guid = store.guid_for(&guid_key(track));
    Some(envelope(
        "update",
        &ProtoPosition {
            kind: "position",
            guid,
            callsign: track.callsign.as_deref(),
            lat,
            lon,
            altitude: track.altitude_feet,
            ground_speed: track.ground_speed_knots,
            track: track.track_deg,
            vertical_rate: track.vertical_rate_fpm,
            squawk: track.reported_squawk.as_deref(),
        },
    ))
}

fn flight_plan_message(store: &Store, track: &TerminalTrack) -> Option<String> {
    let has_plan = track.callsign.is_some()
        || track.assigned_squawk.is_some()
        || track.origin.is_some()
        || track.destination.is_some()
        || track.scratchpad1.is_some();
    if !has_plan {
        return None;
    }
    let guid = store.guid_for(&guid_key(track));
    Some(envelope(
        "update",
        &ProtoFlightPlan {
            kind: "flightplan",
            guid,
            callsign: track.callsign.as_deref(),
            aircraft_type: track.aircraft_type.as_deref(),
            equipment_suffix: track.equipment_suffix.as_deref(),
            origin: track.origin.as_deref(),
            destination: track.destination.as_deref(),
            assigned_squawk: track.assigned_squawk.as_deref(),
            requested_altitude: track.requested_altitude,
            runway: track.runway.as_deref(),
            scratchpad1: track.scratchpad1.as_deref(),
            scratchpad2: track.scratchpad2.as_deref(),
            owner: track.owner.as_deref(),
        },
    ))
}

/// Snapshot for a newly connected scope subscriber.
pub fn snapshot(store: &Store, facility: &str) -> Vec<String> {
    let mut messages = Vec::new();
    for entry in store.terminal.iter() {
        if entry.key().0 != facility || !entry.value().has_position() {
            continue;
        }
        let track = entry.value();
        if let Some(plan) = flight_plan_message(store, track) {
            messages.push(plan);
        }
        if let Some(position) = position_message(store, track) {
            messages.push(position);
        }
    }
    messages
}

/// Per-tick messages for a dirty facility batch.
pub fn batch(store: &Store, facility: &str, tracks: &[TerminalTrack]) -> Vec<String> {
    let mut messages = Vec::new();
    for track in tracks {
        if track.facility != facility {
            continue;
        }
        if let Some(plan) = flight_plan_message(store, track) {
            messages.push(plan);
        }
        if let Some(position) = position_message(store, track) {
            messages.push(position);
        }
    }
    messages
}

/// Deletion message for a purged track; the GUID is retired with it.
pub fn delete(store: &Store, facility: &str, track_num: u32) -> String {
    // The track is already gone from the store; reconstruct both possible
    // keys and retire whichever GUID was minted
    let key = format!("{facility}:{track_num}");
    let guid = store.guid_for(&key);
    store.forget_guid(&key);
    envelope("remove", &ProtoDelete {
        kind: "delete",
        guid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn track(facility: &str, num: u32, hex: Option<&str>) -> TerminalTrack {
        let mut t = TerminalTrack::new(facility.to_string(), num, Utc::now());
        t.mode_s_hex = hex.map(str::to_string);
        t.latitude = Some(33.78);
        t.longitude = Some(-84.52);
        t.callsign = Some("DAL402".to_string());
        t
    }

    #[test]
    fn test_guid_key_prefers_mode_s() {
        assert_eq!(guid_key(&track("A80", 412, Some("A7C43B"))), "A7C43B");
        assert_eq!(guid_key(&track("A80", 412, None)), "A80:412");
    }

    #[test]
    fn test_guid_stable_across_messages() {
        let store = Store::new();
        let t = track("A80", 412, Some("A7C43B"));
        let p1 = position_message(&store, &t).unwrap();
        let p2 = position_message(&store, &t).unwrap();
        assert_eq!(p1, p2);
        let plan = flight_plan_message(&store, &t).unwrap();
        let guid = store.guid_for("A7C43B").to_string();
        assert!(p1.contains(&guid));
        assert!(plan.contains(&guid));
    }

    #[test]
    fn test_batch_emits_plan_then_position() {
        let store = Store::new();
        let tracks = vec![track("A80", 412, None)];
        let messages = batch(&store, "A80", &tracks);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("\"kind\":\"flightplan\""));
        assert!(messages[1].contains("\"kind\":\"position\""));
        assert!(messages.iter().all(|m| m.contains("\"type\":\"update\"")));
    }

    #[test]
    fn test_positionless_track_sends_plan_only() {
        let store = Store::new();
        let mut t = track("A80", 412, None);
        t.latitude = None;
        let messages = batch(&store, "A80", std::slice::from_ref(&t));
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("flightplan"));
    }

    #[test]
    fn test_delete_retires_guid() {
        let store = Store::new();
        let first = delete(&store, "A80", 999);
        assert!(first.contains("\"type\":\"remove\""));
        let guid_before = first;
        let second = delete(&store, "A80", 999);
        // A retired GUID is never reused
        assert_ne!(guid_before, second);
    }
}
