//! Feed handlers: decode broker deliveries and apply them to the store.
//!
//! One handler per session. The en-route handler expects flight-list
//! documents on every delivery; the terminal handler routes by topic prefix
//! and counts whatever it does not recognize.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::{debug, warn};

use crate::broker::MessageHandler;
use crate::stats::Stats;
use crate::store::Store;
use crate::telemetry::Telemetry;
use crate::{merge, sfdps, smes, tais, tdes, xmltree};

/// How many decode failures get logged at full detail before sampling.
const LOGGED_DECODE_FAILURES: u64 = 5;

pub struct SfdpsIngest {
    pub store: Arc<Store>,
    pub telemetry: Arc<Telemetry>,
    pub stats: Arc<Stats>,
    failures: AtomicU64,
}

impl SfdpsIngest {
    pub fn new(store: Arc<Store>, telemetry: Arc<Telemetry>, stats: Arc<Stats>) -> Self {
        Self {
            store,
            telemetry,
            stats,
            failures: AtomicU64::new(0),
        }
    }

    fn note_failure(&self, payload: &str, error: &dyn std::fmt::Display) {
        self.stats.count_decode_error();
        metrics::counter!("ingest.sfdps_decode_failed").increment(1);
        let count = self.failures.fetch_add(1, Ordering::Relaxed);
        if count < LOGGED_DECODE_FAILURES {
            warn!(error = %error, "SFDPS decode failed: {}", truncate(payload, 200));
        }
    }
}

impl MessageHandler for SfdpsIngest {
    fn handle(&self, _topic: &str, payload: &str) {
        self.stats.count_message();
        let batch = match sfdps::decode(payload) {
            Ok(batch) => batch,
            Err(e) => {
                self.note_failure(payload, &e);
                return;
            }
        };
        for _ in 0..batch.dropped {
            self.stats.count_decode_error();
            metrics::counter!("ingest.sfdps_missing_gufi").increment(1);
        }
        let now = Utc::now();
        for update in &batch.updates {
            if self.telemetry.sample(&update.source).is_none() {
                self.telemetry.record_sample(&update.source, payload);
                if let Ok(tree) = xmltree::parse(payload) {
                    self.telemetry.record_tree("sfdps", &tree);
                }
            }
            merge::apply_sfdps(&self.store, update, Some(payload), now);
        }
    }
}

pub struct TerminalIngest {
    pub store: Arc<Store>,
    pub telemetry: Arc<Telemetry>,
    pub stats: Arc<Stats>,
    failures: AtomicU64,
}

impl TerminalIngest {
    pub fn new(store: Arc<Store>, telemetry: Arc<Telemetry>, stats: Arc<Stats>) -> Self {
        Self {
            store,
            telemetry,
            stats,
            failures: AtomicU64::new(0),
        }
    }

    fn note_failure(&self, family: &str, payload: &str, error: &dyn std::fmt::Display) {
        self.stats.count_decode_error();
        metrics::counter!("ingest.terminal_decode_failed", "family" => family.to_string())
            .increment(1);
        let count = self.failures.fetch_add(1, Ordering::Relaxed);
        if count < LOGGED_DECODE_FAILURES {
            warn!(error = %error, family, "terminal decode failed: {}", truncate(payload, 200));
        }
    }
}

/// Family token from a topic string, matching either `SMES/...` or
/// dot-separated subject spellings.
fn family_of(topic: &str) -> Option<&'static str> {
    for segment in topic.split(['/', '.']) {
        match segment {
            "SMES" => return Some("SMES"),
            "TAIS" => return Some("TAIS"),
            "TDES" => return Some("TDES"),
            _ => {}
        }
    }
    None
}

impl MessageHandler for TerminalIngest {
    fn handle(&self, topic: &str, payload: &str) {
        self.stats.count_message();
        let now = Utc::now();
        match family_of(topic) {
            Some("SMES") => match smes::decode(payload) {
                Ok(batch) => {
                    if self.telemetry.sample("SMES").is_none() {
                        self.telemetry.record_sample("SMES", payload);
                        if let Ok(tree) = xmltree::parse(payload) {
                            self.telemetry.record_tree("smes", &tree);
                        }
                    }
                    for update in &batch.updates {
                        merge::apply_smes(&self.store, &batch.airport, update, now);
                    }
                }
                Err(e) => self.unexpected_or_failure("SMES", payload, &e),
            },
            Some("TAIS") => match tais::decode(payload) {
                Ok(batch) => {
                    if self.telemetry.sample("TAIS").is_none() {
                        self.telemetry.record_sample("TAIS", payload);
                        if let Ok(tree) = xmltree::parse(payload) {
                            self.telemetry.record_tree("tais", &tree);
                        }
                    }
                    for update in &batch.updates {
                        merge::apply_tais(&self.store, &batch.facility, update, now);
                    }
                }
                Err(e) => self.unexpected_or_failure("TAIS", payload, &e),
            },
            Some("TDES") => match tdes::decode(payload) {
                Ok(tdes::TdesOutcome::Event(update)) => {
                    if self.telemetry.sample("TDES").is_none() {
                        self.telemetry.record_sample("TDES", payload);
                    }
                    merge::apply_tdes(&self.store, &update, now);
                }
                Ok(tdes::TdesOutcome::Ignored) => {}
                Err(e) => self.unexpected_or_failure("TDES", payload, &e),
            },
            _ => {
                metrics::counter!("ingest.terminal_topic_skipped").increment(1);
                debug!(topic, "delivery on unhandled topic");
            }
        }
    }
}

impl TerminalIngest {
    /// Unexpected root elements are silently counted and sampled; anything
    /// else is a decode failure.
    fn unexpected_or_failure(&self, family: &str, payload: &str, error: &anyhow::Error) {
        let message = error.to_string();
        if let Some(root) = message.strip_prefix("unexpected root element ") {
            let count = self.telemetry.record_unknown_root(root);
            if count == 1 {
                self.telemetry.record_sample(root, payload);
            }
            metrics::counter!("ingest.unexpected_root").increment(1);
        } else {
            self.note_failure(family, payload, error);
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Stats;

    fn terminal_ingest() -> TerminalIngest {
        TerminalIngest::new(
            Arc::new(Store::new()),
            Arc::new(Telemetry::new()),
            Stats::new(Vec::new()),
        )
    }

    #[test]
    fn test_family_of_topic_forms() {
        assert_eq!(family_of("SMES/KATL/positions"), Some("SMES"));
        assert_eq!(family_of("swim.terminal.TAIS.A80"), Some("TAIS"));
        assert_eq!(family_of("TDES/KCLT"), Some("TDES"));
        assert_eq!(family_of("swim.terminal.DATIS.KCLT"), None);
    }

    #[test]
    fn test_sfdps_ingest_end_to_end() {
        let store = Arc::new(Store::new());
        let ingest = SfdpsIngest::new(
            store.clone(),
            Arc::new(Telemetry::new()),
            Stats::new(Vec::new()),
        );
        let xml = r#"<mc><m><flight source="FH" centre="ZBW">
            <gufi>g1</gufi>
            <flightIdentification aircraftIdentification="JBU123" computerId="482"/>
          </flight></m></mc>"#;
        ingest.handle("swim.sfdps.fdps", xml);
        let record = store.flights.get("g1").unwrap();
        assert_eq!(record.callsign.as_deref(), Some("JBU123"));
        assert_eq!(record.computer_ids.get("ZBW").map(String::as_str), Some("482"));
        assert_eq!(ingest.stats.messages_total.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_terminal_ingest_routes_by_topic() {
        let ingest = terminal_ingest();
        let smes_xml = r#"<asdexMsg><airport>KATL</airport>
            <positionReport full="false"><track>7</track>
              <latitude>33.64</latitude><longitude>-84.43</longitude>
            </positionReport></asdexMsg>"#;
        ingest.handle("SMES/KATL", smes_xml);
        assert!(
            ingest
                .store
                .surface
                .contains_key(&("KATL".to_string(), "7".to_string()))
        );

        let tais_xml = r#"<TATrackAndFlightPlan src="A80">
            <record><track><trackNum>412</trackNum><lat>33.7</lat><lon>-84.5</lon></track></record>
          </TATrackAndFlightPlan>"#;
        ingest.handle("TAIS/A80", tais_xml);
        assert!(ingest.store.terminal.contains_key(&("A80".to_string(), 412)));
    }

    #[test]
    fn test_unexpected_root_is_counted_not_failed() {
        let ingest = terminal_ingest();
        ingest.handle("SMES/KATL", "<SafetyLogicAlert><x/></SafetyLogicAlert>");
        let roots = ingest.telemetry.unknown_roots_snapshot();
        assert_eq!(roots.get("SafetyLogicAlert"), Some(&1));
        assert_eq!(ingest.stats.decode_errors.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_malformed_payload_counts_decode_error() {
        let ingest = terminal_ingest();
        ingest.handle("TAIS/A80", "this is not xml");
        assert_eq!(ingest.stats.decode_errors.load(Ordering::Relaxed), 1);
    }
}
