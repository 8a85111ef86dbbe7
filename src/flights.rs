//! En-route flight record model.
//!
//! One record per GUFI. Partial updates from every SFDPS message family are
//! merged into these by the merge engine; the record also carries the bounded
//! position and event rings used by the map displays and the unbounded event
//! archive that is written out when the flight is purged.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position history ring capacity.
pub const POSITION_RING_CAPACITY: usize = 20;

/// Event log ring capacity. The archive list next to it is unbounded.
pub const EVENT_RING_CAPACITY: usize = 50;

/// Minimum coordinate change (degrees, either axis) that pushes the previous
/// position onto the history ring.
pub const POSITION_EPSILON: f64 = 0.0001;

/// Flight lifecycle status as reported by the en-route system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlightStatus {
    #[default]
    Active,
    Dropped,
    Cancelled,
}

impl FlightStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(FlightStatus::Active),
            "DROPPED" | "DROP" => Some(FlightStatus::Dropped),
            "CANCELLED" | "CANCELED" | "CANCELLATION" => Some(FlightStatus::Cancelled),
            _ => None,
        }
    }
}

/// Exactly one shape of assigned altitude is in effect at a time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum AssignedAltitude {
    #[default]
    None,
    Simple {
        feet: i32,
    },
    Vfr,
    VfrPlus {
        feet: i32,
    },
    Block {
        floor: i32,
        ceiling: i32,
    },
}

impl AssignedAltitude {
    pub fn is_none(&self) -> bool {
        matches!(self, AssignedAltitude::None)
    }
}

/// One entry of the position history ring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub lat: f64,
    pub lon: f64,
    pub at: DateTime<Utc>,
    pub symbol: char,
}

/// One entry of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightEvent {
    pub at: DateTime<Utc>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub centre: Option<String>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

/// Estimated elapsed time to a FIR boundary crossing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElapsedEstimate {
    pub location: String,
    pub seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightRecord {
    pub gufi: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    /// Facility code -> three-character computer id.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub computer_ids: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    pub status: FlightStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternates: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departure_actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departure_estimated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrival_actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrival_estimated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aircraft_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wake_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equipment_qualifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode_s_hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_squawk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_squawk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight_rules: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_route_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrival_procedure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
    #[serde(default)]
    pub assigned_altitude: AssignedAltitude,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interim_altitude: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ground_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity_x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity_y: Option<f64>,
    #[serde(default)]
    pub coasting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_altitude: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordination_fix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordination_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controlling_facility: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controlling_sector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_transferring: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_receiving: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_accepting: Option<String>,
    #[serde(default)]
    pub handoff_forced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointout_originating: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointout_receiving: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointout_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared_heading: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared_speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aftn_originator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fdps_gufi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmi_ids: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fourth_adapted_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub communication_codes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigation_codes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surveillance_codes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_airspeed: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elapsed_estimates: Vec<ElapsedEstimate>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_position_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_source: Option<String>,
    #[serde(default)]
    pub positions: VecDeque<PositionEntry>,
    #[serde(default)]
    pub events: VecDeque<FlightEvent>,
    /// Every event ever applied; only serialized into the end-of-flight
    /// archive record, not into the warm cache or broadcasts.
    #[serde(skip)]
    pub event_archive: Vec<FlightEvent>,
}

impl FlightRecord {
    pub fn new(gufi: String, now: DateTime<Utc>) -> Self {
        Self {
            gufi,
            callsign: None,
            computer_ids: HashMap::new(),
            operator: None,
            status: FlightStatus::Active,
            origin: None,
            destination: None,
            alternates: Vec::new(),
            departure_actual: None,
            departure_estimated: None,
            arrival_actual: None,
            arrival_estimated: None,
            aircraft_type: None,
            registration: None,
            wake_category: None,
            equipment_qualifier: None,
            mode_s_hex: None,
            assigned_squawk: None,
            reported_squawk: None,
            flight_rules: None,
            flight_type: None,
            route_text: None,
            original_route_text: None,
            arrival_procedure: None,
            remarks: None,
            assigned_altitude: AssignedAltitude::None,
            interim_altitude: None,
            reported_altitude: None,
            latitude: None,
            longitude: None,
            ground_speed: None,
            velocity_x: None,
            velocity_y: None,
            coasting: false,
            predicted_latitude: None,
            predicted_longitude: None,
            predicted_altitude: None,
            coordination_fix: None,
            coordination_time: None,
            controlling_facility: None,
            controlling_sector: None,
            handoff_event: None,
            handoff_transferring: None,
            handoff_receiving: None,
            handoff_accepting: None,
            handoff_forced: false,
            pointout_originating: None,
            pointout_receiving: None,
            pointout_time: None,
            cleared_heading: None,
            cleared_speed: None,
            cleared_text: None,
            aftn_originator: None,
            fdps_gufi: None,
            tmi_ids: None,
            fourth_adapted_field: None,
            communication_codes: None,
            navigation_codes: None,
            surveillance_codes: None,
            requested_airspeed: None,
            elapsed_estimates: Vec::new(),
            last_seen: now,
            last_position_at: None,
            last_source: None,
            positions: VecDeque::with_capacity(POSITION_RING_CAPACITY),
            events: VecDeque::with_capacity(EVENT_RING_CAPACITY),
            event_archive: Vec::new(),
        }
    }

    /// Datablock symbol for the position history, derived from current state.
    pub fn history_symbol(&self) -> char {
        let low_enough = self
            .reported_altitude
            .map(|a| a <= 23_000.0)
            .unwrap_or(false);
        if self.callsign.is_some() && low_enough {
            '\u{2022}'
        } else if self.callsign.is_some() {
            '\\'
        } else if self.reported_squawk.is_some() || self.assigned_squawk.is_some() {
            '/'
        } else {
            '+'
        }
    }

    /// Record a new surveillance position. The previous position goes onto
    /// the history ring when it moved more than [`POSITION_EPSILON`] in
    /// either axis.
    pub fn record_position(&mut self, lat: f64, lon: f64, at: DateTime<Utc>) {
        if let (Some(prev_lat), Some(prev_lon)) = (self.latitude, self.longitude) {
            let moved = (lat - prev_lat).abs() > POSITION_EPSILON
                || (lon - prev_lon).abs() > POSITION_EPSILON;
            if moved {
                if self.positions.len() >= POSITION_RING_CAPACITY {
                    self.positions.pop_front();
                }
                self.positions.push_back(PositionEntry {
                    lat: prev_lat,
                    lon: prev_lon,
                    at: self.last_position_at.unwrap_or(at),
                    symbol: self.history_symbol(),
                });
            }
        }
        self.latitude = Some(lat);
        self.longitude = Some(lon);
        self.last_position_at = Some(at);
    }

    /// Append an event to the bounded ring and the unbounded archive.
    pub fn record_event(&mut self, event: FlightEvent) {
        if self.events.len() >= EVENT_RING_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event.clone());
        self.event_archive.push(event);
    }

    /// Lifecycle transition from a reported status. Active records can drop,
    /// active or dropped records can cancel; a cancelled record stays
    /// cancelled.
    pub fn apply_status(&mut self, reported: FlightStatus) {
        self.status = match (self.status, reported) {
            (FlightStatus::Active, s) => s,
            (FlightStatus::Dropped, FlightStatus::Cancelled) => FlightStatus::Cancelled,
            (FlightStatus::Dropped, _) => FlightStatus::Dropped,
            (FlightStatus::Cancelled, _) => FlightStatus::Cancelled,
        };
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == FlightStatus::Cancelled
    }

    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// Age of the last surveillance position relative to `now`.
    pub fn position_age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_position_at
            .map(|t| now.signed_duration_since(t).num_seconds())
    }
}

/// The per-flight summary broadcast to map subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightSummary {
    pub gufi: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aircraft_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interim_altitude: Option<i32>,
    pub assigned_altitude: AssignedAltitude,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ground_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_squawk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_squawk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controlling_facility: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controlling_sector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_receiving: Option<String>,
    pub coasting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared_heading: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared_speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared_text: Option<String>,
    pub positions: Vec<PositionEntry>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_position_at: Option<DateTime<Utc>>,
}

impl FlightSummary {
    pub fn of(record: &FlightRecord) -> Self {
        Self {
            gufi: record.gufi.clone(),
            callsign: record.callsign.clone(),
            aircraft_type: record.aircraft_type.clone(),
            origin: record.origin.clone(),
            destination: record.destination.clone(),
            latitude: record.latitude,
            longitude: record.longitude,
            reported_altitude: record.reported_altitude,
            interim_altitude: record.interim_altitude,
            assigned_altitude: record.assigned_altitude,
            ground_speed: record.ground_speed,
            assigned_squawk: record.assigned_squawk.clone(),
            reported_squawk: record.reported_squawk.clone(),
            controlling_facility: record.controlling_facility.clone(),
            controlling_sector: record.controlling_sector.clone(),
            handoff_receiving: record.handoff_receiving.clone(),
            coasting: record.coasting,
            cleared_heading: record.cleared_heading.clone(),
            cleared_speed: record.cleared_speed.clone(),
            cleared_text: record.cleared_text.clone(),
            positions: record.positions.iter().copied().collect(),
            last_seen: record.last_seen,
            last_position_at: record.last_position_at,
        }
    }
}
