//! Tower event model: datalink clearances and departure events per
//! (airport, aircraft id).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TowerEventKind {
    /// Pre-departure clearance delivered over datalink.
    DatalinkClearance {
        #[serde(skip_serializing_if = "Option::is_none")]
        header: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
    /// Gate push / taxi / takeoff milestone set.
    Departure {
        #[serde(skip_serializing_if = "Option::is_none")]
        gate: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        runway: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        clearance_time: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        taxi_time: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        takeoff_time: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TowerEvent {
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beacon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aircraft_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eram_gufi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sfdps_gufi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(flatten)]
    pub kind: TowerEventKind,
}

/// Ordered event history for one aircraft at one airport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TowerAircraft {
    pub airport: String,
    pub aircraft_id: String,
    pub events: Vec<TowerEvent>,
    pub last_seen: DateTime<Utc>,
}

impl TowerAircraft {
    pub fn new(airport: String, aircraft_id: String, now: DateTime<Utc>) -> Self {
        Self {
            airport,
            aircraft_id,
            events: Vec::new(),
            last_seen: now,
        }
    }

    pub fn push(&mut self, event: TowerEvent, now: DateTime<Utc>) {
        self.events.push(event);
        self.last_seen = now;
    }

    /// Latest gate and runway across the departure events, newest wins.
    pub fn latest_gate_runway(&self) -> (Option<&str>, Option<&str>) {
        let mut gate = None;
        let mut runway = None;
        for ev in &self.events {
            if let TowerEventKind::Departure {
                gate: g, runway: r, ..
            } = &ev.kind
            {
                if g.is_some() {
                    gate = g.as_deref();
                }
                if r.is_some() {
                    runway = r.as_deref();
                }
            }
        }
        (gate, runway)
    }

    /// Latest filed destination seen on any event.
    pub fn latest_destination(&self) -> Option<&str> {
        self.events
            .iter()
            .rev()
            .find_map(|ev| ev.destination.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_gate_runway_newest_wins() {
        let now = Utc::now();
        let mut ac = TowerAircraft::new("KCLT".to_string(), "AAL1225".to_string(), now);
        ac.push(
            TowerEvent {
                at: now,
                beacon: None,
                aircraft_type: None,
                computer_id: None,
                eram_gufi: None,
                sfdps_gufi: None,
                destination: None,
                kind: TowerEventKind::Departure {
                    gate: Some("C10".to_string()),
                    runway: Some("18C".to_string()),
                    clearance_time: None,
                    taxi_time: None,
                    takeoff_time: None,
                },
            },
            now,
        );
        ac.push(
            TowerEvent {
                at: now,
                beacon: None,
                aircraft_type: None,
                computer_id: None,
                eram_gufi: None,
                sfdps_gufi: None,
                destination: None,
                kind: TowerEventKind::Departure {
                    gate: Some("C12".to_string()),
                    runway: None,
                    clearance_time: None,
                    taxi_time: None,
                    takeoff_time: None,
                },
            },
            now,
        );
        let (gate, runway) = ac.latest_gate_runway();
        assert_eq!(gate, Some("C12"));
        assert_eq!(runway, Some("18C"));
    }

    #[test]
    fn test_event_kind_serialization_tags() {
        let ev = TowerEvent {
            at: Utc::now(),
            beacon: Some("2345".to_string()),
            aircraft_type: None,
            computer_id: Some("86J".to_string()),
            eram_gufi: None,
            sfdps_gufi: None,
            destination: None,
            kind: TowerEventKind::DatalinkClearance {
                header: Some("CLX 0312".to_string()),
                body: Some("CLEARED TO KBOS".to_string()),
            },
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"kind\":\"datalink_clearance\""));
        let back: TowerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
