//! Surface-movement radar track model (airport-scoped ASDE-X tracks).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One surface radar track, keyed by (airport, track id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceTrack {
    pub airport: String,
    pub track_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squawk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aircraft_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_feet: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_knots: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// ERAM cross-reference identifier carried in the feed's enhanced data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eram_gufi: Option<String>,
    pub last_seen: DateTime<Utc>,
    /// Enrichment overlay, re-derived by the correlator on every broadcast.
    /// Display only; never written back into the en-route store.
    #[serde(default, skip_serializing_if = "SurfaceOverlay::is_empty")]
    pub overlay: SurfaceOverlay,
}

/// Fields stitched onto a surface track from SFDPS and TDLS at broadcast
/// time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SurfaceOverlay {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrival_procedure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runway: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_code: Option<String>,
}

impl SurfaceOverlay {
    pub fn is_empty(&self) -> bool {
        self.origin.is_none()
            && self.destination.is_none()
            && self.arrival_procedure.is_none()
            && self.route.is_none()
            && self.gate.is_none()
            && self.runway.is_none()
            && self.gate_code.is_none()
    }
}

impl SurfaceTrack {
    pub fn new(airport: String, track_id: String, now: DateTime<Utc>) -> Self {
        Self {
            airport,
            track_id,
            callsign: None,
            squawk: None,
            aircraft_type: None,
            target_type: None,
            latitude: None,
            longitude: None,
            altitude_feet: None,
            speed_knots: None,
            heading: None,
            eram_gufi: None,
            last_seen: now,
            overlay: SurfaceOverlay::default(),
        }
    }

    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_omitted_when_empty() {
        let track = SurfaceTrack::new("KATL".to_string(), "1024".to_string(), Utc::now());
        let json = serde_json::to_string(&track).unwrap();
        assert!(!json.contains("overlay"));
    }

    #[test]
    fn test_overlay_serialized_when_present() {
        let mut track = SurfaceTrack::new("KATL".to_string(), "1024".to_string(), Utc::now());
        track.overlay.gate_code = Some("B12".to_string());
        let json = serde_json::to_string(&track).unwrap();
        assert!(json.contains("gate_code"));
    }
}
