//! Terminal radar (STARS) track model, facility-scoped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Feet-per-second to knots.
const FPS_TO_KNOTS: f64 = 0.592_483_8;

/// One STARS track, keyed by (facility, track number).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalTrack {
    pub facility: String,
    pub track_num: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aircraft_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equipment_suffix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wake_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight_rules: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_fix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_fix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_squawk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_squawk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_altitude: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runway: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratchpad1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratchpad2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_handoff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_feet: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ground_speed_knots: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_deg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_rate_fpm: Option<i32>,
    /// 24-bit transponder address, upper-case hex; never the all-zero value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode_s_hex: Option<String>,
    #[serde(default)]
    pub frozen: bool,
    #[serde(default)]
    pub pseudo: bool,
    pub last_seen: DateTime<Utc>,
}

impl TerminalTrack {
    pub fn new(facility: String, track_num: u32, now: DateTime<Utc>) -> Self {
        Self {
            facility,
            track_num,
            callsign: None,
            aircraft_type: None,
            equipment_suffix: None,
            wake_category: None,
            flight_rules: None,
            origin: None,
            destination: None,
            entry_fix: None,
            exit_fix: None,
            assigned_squawk: None,
            reported_squawk: None,
            requested_altitude: None,
            runway: None,
            scratchpad1: None,
            scratchpad2: None,
            owner: None,
            pending_handoff: None,
            latitude: None,
            longitude: None,
            altitude_feet: None,
            ground_speed_knots: None,
            track_deg: None,
            vertical_rate_fpm: None,
            mode_s_hex: None,
            frozen: false,
            pseudo: false,
            last_seen: now,
        }
    }

    /// Derive ground speed and track from the feed's ft/s velocity
    /// components.
    pub fn set_velocity(&mut self, vx: f64, vy: f64) {
        let speed = (vx * vx + vy * vy).sqrt() * FPS_TO_KNOTS;
        self.ground_speed_knots = Some(speed);
        if vx != 0.0 || vy != 0.0 {
            let track = vx.atan2(vy).to_degrees();
            self.track_deg = Some((track + 360.0) % 360.0);
        }
    }

    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// Eligible for ADS-B callsign enrichment: no callsign yet, a live
    /// track, and at least one usable key.
    pub fn wants_enrichment(&self) -> bool {
        self.callsign.is_none()
            && !self.frozen
            && !self.pseudo
            && (self.mode_s_hex.is_some() || self.reported_squawk.is_some())
    }
}
