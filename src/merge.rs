//! State merge engine.
//!
//! Applies decoded partial updates to stored records. A field updates iff
//! the incoming partial carries a value for it, except where a
//! clear-semantics rule says otherwise; those rules are all here, in one
//! place, keyed off the message source tag.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::flights::{FlightEvent, FlightRecord};
use crate::sfdps::SfdpsUpdate;
use crate::smes::{SmesReportKind, SmesUpdate};
use crate::store::Store;
use crate::tais::TaisUpdate;
use crate::tdes::TdesUpdate;
use crate::xmltree::Clearable;

/// Point-out indications expire after this long.
pub const POINTOUT_TTL: Duration = Duration::minutes(3);

/// Track messages: the periodic surveillance heartbeat. Carries Mode-C, not
/// an altitude assignment, so it never touches the assigned altitude.
pub fn is_heartbeat(source: &str) -> bool {
    source == "TH"
}

/// The canonical full-state message. Omission of the clearance element or
/// the interim altitude on this source is authoritative.
pub fn is_canonical(source: &str) -> bool {
    source == "FH"
}

/// Sources whose silence on the interim altitude clears it.
pub fn is_interim_authority(source: &str) -> bool {
    matches!(source, "FH" | "IA")
}

/// The assumed-handoff message family, the only source that can set the
/// forced-handoff flag.
pub fn is_assumed_handoff(source: &str) -> bool {
    source == "HU"
}

/// Raw payloads are archived on the event log only for the low-volume
/// sources; track and canonical-state traffic dominates the feed and would
/// swamp memory.
fn keeps_raw(source: &str) -> bool {
    !matches!(source, "TH" | "FH")
}

fn source_label(source: &str) -> &str {
    match source {
        "FZ" => "Flight plan filed",
        "AF" => "Amendment",
        "RS" => "Cancellation",
        "DZ" => "Departure",
        "AZ" => "Arrival",
        "TH" => "Track update",
        "FH" => "Flight data",
        "HU" => "Handoff update",
        "LH" => "Local handoff",
        "PT" => "Point-out",
        "BZ" => "Beacon assignment",
        "UZ" => "Boundary crossing",
        "IA" => "Interim altitude",
        other => other,
    }
}

/// Apply one SFDPS partial update. Creates the record on first sight of its
/// GUFI and marks the flight dirty.
pub fn apply_sfdps(store: &Store, update: &SfdpsUpdate, raw: Option<&str>, now: DateTime<Utc>) {
    let mut entry = store
        .flights
        .entry(update.gufi.clone())
        .or_insert_with(|| FlightRecord::new(update.gufi.clone(), now));
    let record = entry.value_mut();
    let mut notes: Vec<String> = Vec::new();

    record.last_seen = now;
    record.last_source = Some(update.source.clone());

    set_if_some(&mut record.callsign, &update.callsign);
    if let (Some(centre), Some(cid)) = (&update.centre, &update.computer_id) {
        record
            .computer_ids
            .insert(centre.clone(), cid.clone());
    }
    if let Some(status) = update.status {
        let before = record.status;
        record.apply_status(status);
        if record.status != before {
            notes.push(format!("Status {:?}", record.status));
        }
    }
    apply_operator(record, &update.operator);
    set_if_some(&mut record.aftn_originator, &update.aftn_originator);
    set_if_some(&mut record.origin, &update.origin);
    set_if_some(&mut record.destination, &update.destination);
    if !update.alternates.is_empty() {
        record.alternates = update.alternates.clone();
    }
    set_if_some(&mut record.departure_actual, &update.departure_actual);
    set_if_some(&mut record.departure_estimated, &update.departure_estimated);
    set_if_some(&mut record.arrival_actual, &update.arrival_actual);
    set_if_some(&mut record.arrival_estimated, &update.arrival_estimated);
    set_if_some(&mut record.aircraft_type, &update.aircraft_type);
    set_if_some(&mut record.registration, &update.registration);
    set_if_some(&mut record.wake_category, &update.wake_category);
    set_if_some(&mut record.mode_s_hex, &update.mode_s_hex);
    set_if_some(&mut record.equipment_qualifier, &update.equipment_qualifier);
    set_if_some(&mut record.flight_rules, &update.flight_rules);
    set_if_some(&mut record.flight_type, &update.flight_type);
    set_if_some(&mut record.remarks, &update.remarks);
    set_if_some(&mut record.coordination_fix, &update.coordination_fix);
    set_if_some(&mut record.coordination_time, &update.coordination_time);
    set_if_some(&mut record.requested_airspeed, &update.requested_airspeed);
    set_if_some(&mut record.communication_codes, &update.communication_codes);
    set_if_some(&mut record.navigation_codes, &update.navigation_codes);
    set_if_some(&mut record.surveillance_codes, &update.surveillance_codes);
    set_if_some(&mut record.arrival_procedure, &update.arrival_procedure);
    set_if_some(&mut record.tmi_ids, &update.tmi_ids);
    set_if_some(&mut record.fourth_adapted_field, &update.fourth_adapted_field);
    if let Some(route) = &update.route_text {
        if record.original_route_text.is_none() {
            record.original_route_text = Some(route.clone());
        }
        record.route_text = Some(route.clone());
    }
    if !update.elapsed_estimates.is_empty() {
        record.elapsed_estimates = update
            .elapsed_estimates
            .iter()
            .map(|(location, seconds)| crate::flights::ElapsedEstimate {
                location: location.clone(),
                seconds: *seconds,
            })
            .collect();
    }
    if let Some(fdps_gufi) = &update.fdps_gufi {
        record.fdps_gufi = Some(fdps_gufi.clone());
        store
            .eram_index
            .insert(fdps_gufi.clone(), update.gufi.clone());
    }

    // Assigned altitude: never from the surveillance heartbeat, and setting
    // one shape replaces whichever shape was in effect.
    if !is_heartbeat(&update.source)
        && let Some(altitude) = update.assigned_altitude
    {
        record.assigned_altitude = altitude;
        notes.push(format!("Assigned altitude {altitude:?}"));
    }

    match &update.interim_altitude {
        Clearable::Value(feet) => {
            record.interim_altitude = Some(*feet);
            notes.push(format!("Interim altitude {feet}"));
        }
        Clearable::Nil => {
            record.interim_altitude = None;
            notes.push("Interim altitude cleared (nil)".to_string());
        }
        Clearable::Absent => {
            if is_interim_authority(&update.source) && record.interim_altitude.is_some() {
                record.interim_altitude = None;
                notes.push("Interim altitude cleared".to_string());
            }
        }
    }

    // The cleared element is authoritative for all three clearance fields
    // when present; when the canonical-state message omits it entirely the
    // triple is wiped.
    if let Some(cleared) = &update.cleared {
        record.cleared_heading = cleared.heading.clone();
        record.cleared_speed = cleared.speed.clone();
        record.cleared_text = cleared.text.clone();
    } else if is_canonical(&update.source)
        && (record.cleared_heading.is_some()
            || record.cleared_speed.is_some()
            || record.cleared_text.is_some())
    {
        record.cleared_heading = None;
        record.cleared_speed = None;
        record.cleared_text = None;
        notes.push("Clearance wiped".to_string());
    }

    if let Some(assigned) = &update.assigned_beacon {
        record.assigned_squawk = Some(assigned.clone());
        record.reported_squawk = Some(assigned.clone());
    }
    if let Some(current) = &update.current_beacon {
        record.reported_squawk = Some(current.clone());
    }

    if let Some(position) = &update.position {
        let at = update.timestamp.unwrap_or(now);
        record.record_position(position.latitude, position.longitude, at);
        if let Some(altitude) = position.altitude {
            record.reported_altitude = Some(altitude);
        }
        set_if_some_copy(&mut record.ground_speed, position.speed);
        set_if_some_copy(&mut record.velocity_x, position.velocity_x);
        set_if_some_copy(&mut record.velocity_y, position.velocity_y);
        record.coasting = position.coasting;
        set_if_some_copy(&mut record.predicted_latitude, position.target_latitude);
        set_if_some_copy(&mut record.predicted_longitude, position.target_longitude);
        set_if_some_copy(&mut record.predicted_altitude, position.target_altitude);
    }

    if let Some(handoff) = &update.handoff {
        if let Some(event) = &handoff.event {
            record.handoff_event = Some(event.clone());
            record.handoff_forced = is_assumed_handoff(&update.source)
                && (event.starts_with("ACCEPT") || event == "EXECUTION");
            notes.push(format!("Handoff {event}"));
        }
        set_if_some(&mut record.handoff_transferring, &handoff.transferring);
        set_if_some(&mut record.handoff_receiving, &handoff.receiving);
        set_if_some(&mut record.handoff_accepting, &handoff.accepting);
    }

    set_if_some(&mut record.controlling_facility, &update.controlling_facility);
    set_if_some(&mut record.controlling_sector, &update.controlling_sector);

    // Handoff completion: the receiving unit has become the controlling
    // unit, so the whole triple is spent.
    if record.handoff_receiving.is_some()
        && controlling_unit_string(record).as_deref() == record.handoff_receiving.as_deref()
    {
        record.handoff_event = None;
        record.handoff_transferring = None;
        record.handoff_receiving = None;
        record.handoff_accepting = None;
        record.handoff_forced = false;
        notes.push("Handoff complete".to_string());
    }

    if update.pointout_originating.is_some() || update.pointout_receiving.is_some() {
        set_if_some(&mut record.pointout_originating, &update.pointout_originating);
        set_if_some(&mut record.pointout_receiving, &update.pointout_receiving);
        record.pointout_time = Some(now);
        notes.push("Point-out".to_string());
    }

    let summary = if notes.is_empty() {
        source_label(&update.source).to_string()
    } else {
        format!("{}: {}", source_label(&update.source), notes.join("; "))
    };
    record.record_event(FlightEvent {
        at: now,
        source: update.source.clone(),
        centre: update.centre.clone(),
        summary,
        raw: if keeps_raw(&update.source) {
            raw.map(str::to_string)
        } else {
            None
        },
    });

    drop(entry);
    store.mark_flight_dirty(&update.gufi);
    metrics::counter!("merge.sfdps_applied").increment(1);
}

fn controlling_unit_string(record: &FlightRecord) -> Option<String> {
    let facility = record.controlling_facility.as_deref()?;
    Some(match record.controlling_sector.as_deref() {
        Some(sector) => format!("{facility}/{sector}"),
        None => facility.to_string(),
    })
}

fn apply_operator(record: &mut FlightRecord, operator: &Option<String>) {
    // Longest wins: a descriptive name never shrinks back to a short code.
    if let Some(incoming) = operator {
        let keep = record
            .operator
            .as_ref()
            .is_some_and(|current| current.len() >= incoming.len());
        if !keep {
            record.operator = Some(incoming.clone());
        }
    }
}

fn set_if_some(target: &mut Option<String>, source: &Option<String>) {
    if let Some(value) = source {
        *target = Some(value.clone());
    }
}

fn set_if_some_copy<T: Copy>(target: &mut Option<T>, source: Option<T>) {
    if source.is_some() {
        *target = source;
    }
}

/// Apply one surface report under its (airport, track) key.
pub fn apply_smes(store: &Store, airport: &str, update: &SmesUpdate, now: DateTime<Utc>) {
    let key = (airport.to_string(), update.track_id.clone());
    let mut entry = store
        .surface
        .entry(key)
        .or_insert_with(|| crate::surface::SurfaceTrack::new(airport.to_string(), update.track_id.clone(), now));
    let track = entry.value_mut();
    track.last_seen = now;

    if update.kind == SmesReportKind::Position && update.full {
        // A full report is authoritative for the identity block.
        track.callsign = update.callsign.clone();
        track.squawk = update.squawk.clone();
        track.aircraft_type = update.aircraft_type.clone();
        track.target_type = update.target_type.clone();
    } else {
        set_if_some(&mut track.callsign, &update.callsign);
        set_if_some(&mut track.squawk, &update.squawk);
        set_if_some(&mut track.aircraft_type, &update.aircraft_type);
        set_if_some(&mut track.target_type, &update.target_type);
    }
    set_if_some_copy(&mut track.latitude, update.latitude);
    set_if_some_copy(&mut track.longitude, update.longitude);
    set_if_some_copy(&mut track.altitude_feet, update.altitude_feet);
    set_if_some_copy(&mut track.speed_knots, update.speed_knots);
    set_if_some_copy(&mut track.heading, update.heading);
    set_if_some(&mut track.eram_gufi, &update.eram_gufi);

    drop(entry);
    store.mark_surface_dirty(airport);
    metrics::counter!("merge.smes_applied").increment(1);
}

/// Apply one STARS record under its (facility, track number) key.
pub fn apply_tais(store: &Store, facility: &str, update: &TaisUpdate, now: DateTime<Utc>) {
    let key = (facility.to_string(), update.track_num);
    let mut entry = store
        .terminal
        .entry(key)
        .or_insert_with(|| crate::terminal::TerminalTrack::new(facility.to_string(), update.track_num, now));
    let track = entry.value_mut();
    track.last_seen = now;

    set_if_some_copy(&mut track.latitude, update.latitude);
    set_if_some_copy(&mut track.longitude, update.longitude);
    set_if_some(&mut track.reported_squawk, &update.reported_squawk);
    set_if_some_copy(&mut track.altitude_feet, update.reported_altitude);
    set_if_some_copy(&mut track.vertical_rate_fpm, update.vertical_rate_fpm);
    if let Some(frozen) = update.frozen {
        track.frozen = frozen;
    }
    if let Some(pseudo) = update.pseudo {
        track.pseudo = pseudo;
    }
    set_if_some(&mut track.mode_s_hex, &update.mode_s_hex);
    if let Some((vx, vy)) = update.velocity {
        track.set_velocity(vx, vy);
    }
    set_if_some(&mut track.callsign, &update.callsign);
    set_if_some(&mut track.aircraft_type, &update.aircraft_type);
    set_if_some(&mut track.flight_rules, &update.flight_rules);
    set_if_some(&mut track.entry_fix, &update.entry_fix);
    set_if_some(&mut track.exit_fix, &update.exit_fix);
    set_if_some(&mut track.assigned_squawk, &update.assigned_squawk);
    set_if_some_copy(&mut track.requested_altitude, update.requested_altitude);
    set_if_some(&mut track.runway, &update.runway);
    set_if_some(&mut track.scratchpad1, &update.scratchpad1);
    set_if_some(&mut track.scratchpad2, &update.scratchpad2);
    set_if_some(&mut track.owner, &update.owner);
    set_if_some(&mut track.wake_category, &update.wake_category);
    set_if_some(&mut track.equipment_suffix, &update.equipment_suffix);
    set_if_some(&mut track.pending_handoff, &update.pending_handoff);
    set_if_some(&mut track.origin, &update.origin);
    set_if_some(&mut track.destination, &update.destination);

    drop(entry);
    store.mark_terminal_dirty(facility);
    metrics::counter!("merge.tais_applied").increment(1);
}

/// Append one tower event under its (airport, aircraft id) key.
pub fn apply_tdes(store: &Store, update: &TdesUpdate, now: DateTime<Utc>) {
    let key = (update.airport.clone(), update.aircraft_id.clone());
    let mut entry = store.tower.entry(key).or_insert_with(|| {
        crate::tower::TowerAircraft::new(update.airport.clone(), update.aircraft_id.clone(), now)
    });
    entry.value_mut().push(update.event.clone(), now);
    drop(entry);
    store.mark_tower_dirty(&update.airport);
    metrics::counter!("merge.tdes_applied").increment(1);
}

/// Clear point-out triples older than [`POINTOUT_TTL`]. Run from the sweep.
pub fn expire_pointouts(store: &Store, now: DateTime<Utc>) {
    let expired: Vec<String> = store
        .flights
        .iter()
        .filter(|e| {
            e.value()
                .pointout_time
                .is_some_and(|t| now.signed_duration_since(t) > POINTOUT_TTL)
        })
        .map(|e| e.key().clone())
        .collect();
    for gufi in expired {
        if let Some(mut record) = store.flights.get_mut(&gufi) {
            record.pointout_originating = None;
            record.pointout_receiving = None;
            record.pointout_time = None;
            debug!(%gufi, "point-out expired");
        }
        store.mark_flight_dirty(&gufi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flights::AssignedAltitude;
    use crate::sfdps::{ClearedUpdate, HandoffUpdate, PositionUpdate};

    fn base_update(source: &str) -> SfdpsUpdate {
        SfdpsUpdate {
            gufi: "g1".to_string(),
            source: source.to_string(),
            ..Default::default()
        }
    }

    fn flight(store: &Store) -> FlightRecord {
        store.flights.get("g1").unwrap().value().clone()
    }

    #[test]
    fn test_block_replaces_simple_assigned_altitude() {
        let store = Store::new();
        let now = Utc::now();
        let mut u = base_update("FH");
        u.assigned_altitude = Some(AssignedAltitude::Simple { feet: 33000 });
        apply_sfdps(&store, &u, None, now);
        let mut u = base_update("FH");
        u.assigned_altitude = Some(AssignedAltitude::Block {
            floor: 30000,
            ceiling: 32000,
        });
        apply_sfdps(&store, &u, None, now);
        assert_eq!(
            flight(&store).assigned_altitude,
            AssignedAltitude::Block {
                floor: 30000,
                ceiling: 32000
            }
        );
    }

    #[test]
    fn test_heartbeat_never_touches_assigned_altitude() {
        let store = Store::new();
        let now = Utc::now();
        let mut u = base_update("FH");
        u.assigned_altitude = Some(AssignedAltitude::Simple { feet: 33000 });
        apply_sfdps(&store, &u, None, now);
        let mut u = base_update("TH");
        u.assigned_altitude = Some(AssignedAltitude::Simple { feet: 5000 });
        apply_sfdps(&store, &u, None, now);
        assert_eq!(
            flight(&store).assigned_altitude,
            AssignedAltitude::Simple { feet: 33000 }
        );
    }

    #[test]
    fn test_interim_clear_via_nil_logs_event() {
        let store = Store::new();
        let now = Utc::now();
        let mut u = base_update("IA");
        u.interim_altitude = Clearable::Value(25000);
        apply_sfdps(&store, &u, None, now);
        assert_eq!(flight(&store).interim_altitude, Some(25000));

        let mut u = base_update("LH");
        u.interim_altitude = Clearable::Nil;
        apply_sfdps(&store, &u, None, now);
        let record = flight(&store);
        assert_eq!(record.interim_altitude, None);
        assert!(
            record
                .events
                .back()
                .unwrap()
                .summary
                .contains("Interim altitude cleared (nil)")
        );
    }

    #[test]
    fn test_interim_absence_clears_only_for_authoritative_sources() {
        let store = Store::new();
        let now = Utc::now();
        let mut u = base_update("IA");
        u.interim_altitude = Clearable::Value(25000);
        apply_sfdps(&store, &u, None, now);

        // A track update that says nothing about interim leaves it alone
        apply_sfdps(&store, &base_update("TH"), None, now);
        assert_eq!(flight(&store).interim_altitude, Some(25000));

        // The canonical-state message with no interim clears it
        apply_sfdps(&store, &base_update("FH"), None, now);
        assert_eq!(flight(&store).interim_altitude, None);
    }

    #[test]
    fn test_cleared_triple_semantics() {
        let store = Store::new();
        let now = Utc::now();
        let mut u = base_update("AF");
        u.cleared = Some(ClearedUpdate {
            heading: Some("240".to_string()),
            speed: Some("280".to_string()),
            text: None,
        });
        apply_sfdps(&store, &u, None, now);
        assert_eq!(flight(&store).cleared_heading.as_deref(), Some("240"));

        // Present element with only heading clears the speed
        let mut u = base_update("AF");
        u.cleared = Some(ClearedUpdate {
            heading: Some("250".to_string()),
            speed: None,
            text: None,
        });
        apply_sfdps(&store, &u, None, now);
        let record = flight(&store);
        assert_eq!(record.cleared_heading.as_deref(), Some("250"));
        assert_eq!(record.cleared_speed, None);

        // A non-canonical message without the element leaves it alone
        apply_sfdps(&store, &base_update("TH"), None, now);
        assert_eq!(flight(&store).cleared_heading.as_deref(), Some("250"));

        // The canonical message without the element wipes it
        apply_sfdps(&store, &base_update("FH"), None, now);
        assert_eq!(flight(&store).cleared_heading, None);
    }

    #[test]
    fn test_beacon_split() {
        let store = Store::new();
        let now = Utc::now();
        let mut u = base_update("BZ");
        u.assigned_beacon = Some("5274".to_string());
        apply_sfdps(&store, &u, None, now);
        let record = flight(&store);
        assert_eq!(record.assigned_squawk.as_deref(), Some("5274"));
        assert_eq!(record.reported_squawk.as_deref(), Some("5274"));

        let mut u = base_update("TH");
        u.current_beacon = Some("1200".to_string());
        apply_sfdps(&store, &u, None, now);
        let record = flight(&store);
        assert_eq!(record.reported_squawk.as_deref(), Some("1200"));
        assert_eq!(record.assigned_squawk.as_deref(), Some("5274"));
    }

    #[test]
    fn test_operator_longest_wins() {
        let store = Store::new();
        let now = Utc::now();
        let mut u = base_update("FZ");
        u.operator = Some("JETBLUE AIRWAYS".to_string());
        apply_sfdps(&store, &u, None, now);
        let mut u = base_update("TH");
        u.operator = Some("JBU".to_string());
        apply_sfdps(&store, &u, None, now);
        assert_eq!(flight(&store).operator.as_deref(), Some("JETBLUE AIRWAYS"));
    }

    #[test]
    fn test_handoff_completion_clears_triple() {
        let store = Store::new();
        let now = Utc::now();
        let mut u = base_update("HU");
        u.controlling_facility = Some("ZOB".to_string());
        u.controlling_sector = Some("40".to_string());
        u.handoff = Some(HandoffUpdate {
            event: Some("INITIATION".to_string()),
            transferring: Some("ZOB/40".to_string()),
            receiving: Some("ZDC/55".to_string()),
            accepting: None,
        });
        apply_sfdps(&store, &u, None, now);
        assert_eq!(flight(&store).handoff_receiving.as_deref(), Some("ZDC/55"));

        let mut u = base_update("TH");
        u.controlling_facility = Some("ZDC".to_string());
        u.controlling_sector = Some("55".to_string());
        apply_sfdps(&store, &u, None, now);
        let record = flight(&store);
        assert_eq!(record.handoff_event, None);
        assert_eq!(record.handoff_receiving, None);
        assert_eq!(record.handoff_transferring, None);
        assert_eq!(record.handoff_accepting, None);
        assert!(!record.handoff_forced);
        assert_eq!(record.controlling_facility.as_deref(), Some("ZDC"));
    }

    #[test]
    fn test_forced_handoff_detection() {
        let store = Store::new();
        let now = Utc::now();
        let mut u = base_update("HU");
        u.handoff = Some(HandoffUpdate {
            event: Some("ACCEPTANCE".to_string()),
            receiving: Some("ZNY/10".to_string()),
            ..Default::default()
        });
        apply_sfdps(&store, &u, None, now);
        assert!(flight(&store).handoff_forced);

        // Same event from a non-assumed source does not force
        let store = Store::new();
        let mut u = base_update("LH");
        u.handoff = Some(HandoffUpdate {
            event: Some("ACCEPTANCE".to_string()),
            receiving: Some("ZNY/10".to_string()),
            ..Default::default()
        });
        apply_sfdps(&store, &u, None, now);
        assert!(!flight(&store).handoff_forced);
    }

    #[test]
    fn test_pointout_stamps_time_and_expires() {
        let store = Store::new();
        let now = Utc::now();
        let mut u = base_update("PT");
        u.pointout_originating = Some("ZOB/40".to_string());
        u.pointout_receiving = Some("ZOB/62".to_string());
        apply_sfdps(&store, &u, None, now);
        assert!(flight(&store).pointout_time.is_some());

        expire_pointouts(&store, now + Duration::minutes(2));
        assert!(flight(&store).pointout_originating.is_some());

        expire_pointouts(&store, now + Duration::minutes(4));
        let record = flight(&store);
        assert!(record.pointout_originating.is_none());
        assert!(record.pointout_time.is_none());
    }

    #[test]
    fn test_raw_payload_kept_only_for_low_volume_sources() {
        let store = Store::new();
        let now = Utc::now();
        apply_sfdps(&store, &base_update("AF"), Some("<xml/>"), now);
        assert!(flight(&store).events.back().unwrap().raw.is_some());
        apply_sfdps(&store, &base_update("TH"), Some("<xml/>"), now);
        assert!(flight(&store).events.back().unwrap().raw.is_none());
    }

    #[test]
    fn test_same_update_twice_is_idempotent_for_state() {
        let store = Store::new();
        let now = Utc::now();
        let mut u = base_update("FH");
        u.callsign = Some("JBU123".to_string());
        u.assigned_altitude = Some(AssignedAltitude::Simple { feet: 33000 });
        u.position = Some(PositionUpdate {
            latitude: 40.0,
            longitude: -75.0,
            altitude: Some(32975.0),
            ..Default::default()
        });
        apply_sfdps(&store, &u, None, now);
        let first = flight(&store);
        apply_sfdps(&store, &u, None, now);
        let second = flight(&store);
        assert_eq!(first.callsign, second.callsign);
        assert_eq!(first.assigned_altitude, second.assigned_altitude);
        assert_eq!(first.latitude, second.latitude);
        assert_eq!(first.positions.len(), second.positions.len());
    }

    #[test]
    fn test_smes_full_report_replaces_identity() {
        let store = Store::new();
        let now = Utc::now();
        let mut u = SmesUpdate {
            track_id: "1024".to_string(),
            kind: SmesReportKind::Position,
            full: false,
            callsign: Some("DAL402".to_string()),
            squawk: Some("2345".to_string()),
            aircraft_type: None,
            target_type: None,
            latitude: Some(33.64),
            longitude: Some(-84.43),
            altitude_feet: None,
            speed_knots: None,
            heading: None,
            eram_gufi: None,
        };
        apply_smes(&store, "KATL", &u, now);
        // full report with no callsign wipes it
        u.full = true;
        u.callsign = None;
        apply_smes(&store, "KATL", &u, now);
        let track = store
            .surface
            .get(&("KATL".to_string(), "1024".to_string()))
            .unwrap()
            .clone();
        assert!(track.callsign.is_none());
        assert_eq!(track.squawk.as_deref(), Some("2345"));
        assert_eq!(store.drain_dirty_surface(), vec!["KATL"]);
    }

    #[test]
    fn test_tais_merge_and_velocity() {
        let store = Store::new();
        let now = Utc::now();
        let u = TaisUpdate {
            track_num: 412,
            callsign: Some("DAL402".to_string()),
            velocity: Some((180.0, 0.0)),
            frozen: Some(false),
            ..Default::default()
        };
        apply_tais(&store, "A80", &u, now);
        let track = store
            .terminal
            .get(&("A80".to_string(), 412))
            .unwrap()
            .clone();
        assert_eq!(track.callsign.as_deref(), Some("DAL402"));
        assert!((track.track_deg.unwrap() - 90.0).abs() < 0.01);
        assert_eq!(store.drain_dirty_terminal(), vec!["A80"]);
    }
}
