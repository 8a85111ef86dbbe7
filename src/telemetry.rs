//! Wire-format discovery telemetry.
//!
//! Records every element path and attribute name seen per message family,
//! plus one sample payload per source tag, for the debug endpoints. All maps
//! are bounded; hostile or malformed input can never grow them without
//! limit.

use std::collections::BTreeMap;

use dashmap::{DashMap, DashSet};

use crate::xmltree::Element;

/// Upper bound on distinct element paths tracked per family.
const MAX_PATHS: usize = 5_000;

/// Upper bound on retained sample payloads.
const MAX_SAMPLES: usize = 64;

/// Samples larger than this are truncated.
const MAX_SAMPLE_BYTES: usize = 16 * 1024;

#[derive(Default)]
pub struct Telemetry {
    /// "family path" -> attribute names seen at that path.
    paths: DashMap<String, DashSet<String>>,
    /// Source tag -> first payload seen for it.
    samples: DashMap<String, String>,
    /// Unexpected root element -> occurrence count.
    unknown_roots: DashMap<String, u64>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk a decoded tree, recording every path and its attribute names.
    pub fn record_tree(&self, family: &str, root: &Element) {
        if self.paths.len() >= MAX_PATHS {
            return;
        }
        root.walk_paths(&mut |path, el| {
            if self.paths.len() >= MAX_PATHS {
                return;
            }
            let key = format!("{family} {path}");
            let attrs = self.paths.entry(key).or_default();
            for (name, _) in &el.attributes {
                attrs.insert(name.clone());
            }
        });
    }

    /// Keep the first payload seen per source tag.
    pub fn record_sample(&self, tag: &str, payload: &str) {
        if self.samples.len() >= MAX_SAMPLES || self.samples.contains_key(tag) {
            return;
        }
        let truncated = if payload.len() > MAX_SAMPLE_BYTES {
            let mut end = MAX_SAMPLE_BYTES;
            while !payload.is_char_boundary(end) {
                end -= 1;
            }
            &payload[..end]
        } else {
            payload
        };
        self.samples.insert(tag.to_string(), truncated.to_string());
    }

    /// Count an unexpected root element. Returns the running count so the
    /// caller can sample its logging.
    pub fn record_unknown_root(&self, name: &str) -> u64 {
        if self.unknown_roots.len() >= MAX_SAMPLES && !self.unknown_roots.contains_key(name) {
            return 0;
        }
        let mut count = self.unknown_roots.entry(name.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn sample(&self, tag: &str) -> Option<String> {
        self.samples.get(tag).map(|s| s.value().clone())
    }

    pub fn sample_tags(&self) -> Vec<String> {
        self.samples.iter().map(|e| e.key().clone()).collect()
    }

    /// Sorted path -> attribute list view for the discovery endpoint.
    pub fn paths_snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.paths
            .iter()
            .map(|entry| {
                let mut attrs: Vec<String> =
                    entry.value().iter().map(|a| a.key().clone()).collect();
                attrs.sort();
                (entry.key().clone(), attrs)
            })
            .collect()
    }

    pub fn unknown_roots_snapshot(&self) -> BTreeMap<String, u64> {
        self.unknown_roots
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmltree::parse;

    #[test]
    fn test_paths_and_attributes_recorded() {
        let telemetry = Telemetry::new();
        let tree = parse(
            r#"<flight source="TH"><enRoute><position coastIndicator="COASTING"/></enRoute></flight>"#,
        )
        .unwrap();
        telemetry.record_tree("sfdps", &tree);
        let paths = telemetry.paths_snapshot();
        assert_eq!(paths["sfdps flight"], vec!["source"]);
        assert_eq!(
            paths["sfdps flight/enRoute/position"],
            vec!["coastIndicator"]
        );
    }

    #[test]
    fn test_first_sample_per_tag_wins() {
        let telemetry = Telemetry::new();
        telemetry.record_sample("TH", "<first/>");
        telemetry.record_sample("TH", "<second/>");
        assert_eq!(telemetry.sample("TH").as_deref(), Some("<first/>"));
    }

    #[test]
    fn test_sample_truncated() {
        let telemetry = Telemetry::new();
        let big = "x".repeat(MAX_SAMPLE_BYTES * 2);
        telemetry.record_sample("AF", &big);
        assert_eq!(telemetry.sample("AF").unwrap().len(), MAX_SAMPLE_BYTES);
    }

    #[test]
    fn test_unknown_root_counting_is_bounded() {
        let telemetry = Telemetry::new();
        assert_eq!(telemetry.record_unknown_root("WeirdRoot"), 1);
        assert_eq!(telemetry.record_unknown_root("WeirdRoot"), 2);
        for i in 0..200 {
            telemetry.record_unknown_root(&format!("Root{i}"));
        }
        assert!(telemetry.unknown_roots_snapshot().len() <= MAX_SAMPLES + 1);
    }
}
