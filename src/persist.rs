//! Warm cache and daily archive persistence.
//!
//! The warm cache survives a quick restart: every non-cancelled flight is
//! snapshotted to a temp file, fsynced, and atomically renamed over the
//! cache file. Purged flights append one JSON line to the day's archive
//! file; an hourly budget check deletes the oldest files, never the current
//! day. Every failure here is logged and survived; persistence is advisory.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::flights::{FlightEvent, FlightRecord};
use crate::store::Store;

/// A warm cache older than this is ignored on startup.
const CACHE_MAX_AGE_SECS: i64 = 3600;

const CACHE_FILE: &str = "cache.json";

#[derive(Debug, Serialize, Deserialize)]
struct WarmCacheFile {
    #[serde(rename = "savedAt")]
    saved_at: DateTime<Utc>,
    flights: Vec<FlightRecord>,
}

/// End-of-flight archive line.
#[derive(Debug, Serialize, Deserialize)]
pub struct ArchiveRecord {
    #[serde(flatten)]
    pub flight: FlightRecord,
    /// The full event history, beyond the bounded ring the record carries.
    pub event_history: Vec<FlightEvent>,
    pub purged_at: DateTime<Utc>,
}

pub struct WarmCache {
    dir: PathBuf,
}

impl WarmCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn cache_path(&self) -> PathBuf {
        self.dir.join(CACHE_FILE)
    }

    /// Snapshot every non-cancelled flight. Derived fields that only live in
    /// the event log are backfilled first so they survive the round trip.
    pub fn save(&self, store: &Store) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let flights: Vec<FlightRecord> = store
            .flights
            .iter()
            .filter(|e| !e.value().is_cancelled())
            .map(|e| {
                let mut record = e.value().clone();
                backfill_flight_type(&mut record);
                record
            })
            .collect();
        let count = flights.len();
        let payload = serde_json::to_vec(&WarmCacheFile {
            saved_at: Utc::now(),
            flights,
        })?;

        let tmp_path = self.dir.join(format!("{CACHE_FILE}.tmp"));
        {
            let mut tmp = std::fs::File::create(&tmp_path)?;
            tmp.write_all(&payload)?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, self.cache_path())?;
        info!(flights = count, "warm cache saved");
        Ok(())
    }

    /// Restore flights from the cache when it is fresh enough. Returns the
    /// number restored.
    pub fn load(&self, store: &Store) -> Result<usize> {
        let path = self.cache_path();
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Ok(0),
        };
        let file: WarmCacheFile = serde_json::from_str(&raw).context("warm cache unreadable")?;
        let age = Utc::now().signed_duration_since(file.saved_at).num_seconds();
        if age > CACHE_MAX_AGE_SECS {
            info!(age_secs = age, "warm cache too old, starting cold");
            return Ok(0);
        }
        let mut restored = 0;
        for record in file.flights {
            if let Some(fdps) = &record.fdps_gufi {
                store.eram_index.insert(fdps.clone(), record.gufi.clone());
            }
            store.flights.insert(record.gufi.clone(), record);
            restored += 1;
        }
        info!(flights = restored, "warm cache restored");
        Ok(restored)
    }
}

/// The flight type only rides on a handful of messages; recover it from an
/// archived raw payload when the live field never got set.
fn backfill_flight_type(record: &mut FlightRecord) {
    if record.flight_type.is_some() {
        return;
    }
    for event in record.events.iter().rev() {
        if let Some(raw) = &event.raw
            && let Some(value) = extract_attr(raw, "flightType")
        {
            record.flight_type = Some(value);
            return;
        }
    }
}

fn extract_attr(raw: &str, attr: &str) -> Option<String> {
    let needle = format!("{attr}=\"");
    let start = raw.find(&needle)? + needle.len();
    let end = raw[start..].find('"')? + start;
    let value = &raw[start..end];
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Daily archive writer. Appends are serialized through a bounded channel
/// drained by one background task, so file writes never contend.
#[derive(Clone)]
pub struct DailyArchive {
    dir: PathBuf,
    sender: flume::Sender<ArchiveRecord>,
}

impl DailyArchive {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let (sender, receiver) = flume::bounded::<ArchiveRecord>(4096);
        let writer_dir = dir.clone();
        tokio::spawn(async move {
            while let Ok(record) = receiver.recv_async().await {
                let path = writer_dir.join(format!(
                    "{}.jsonl",
                    record.purged_at.format("%Y-%m-%d")
                ));
                if let Err(e) = append_line(&path, &record) {
                    error!(error = %e, path = %path.display(), "archive append failed");
                }
            }
        });
        Ok(Self { dir, sender })
    }

    /// Queue one end-of-flight record. Cancelled flights never archive.
    pub fn append(&self, flight: FlightRecord, purged_at: DateTime<Utc>) {
        if flight.is_cancelled() {
            return;
        }
        let record = ArchiveRecord {
            event_history: flight.event_archive.clone(),
            flight,
            purged_at,
        };
        if self.sender.try_send(record).is_err() {
            warn!("archive queue full, end-of-flight record dropped");
            metrics::counter!("persist.archive_dropped").increment(1);
        }
    }

    /// Days with an archive file, newest first.
    pub fn dates(&self) -> Vec<String> {
        let mut days: Vec<String> = std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| {
                        let name = e.file_name().to_string_lossy().into_owned();
                        name.strip_suffix(".jsonl").map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default();
        days.sort();
        days.reverse();
        days
    }

    /// Case-insensitive substring search over one day's records.
    pub fn search(&self, date: &str, query: &str, limit: usize) -> Vec<serde_json::Value> {
        let path = self.dir.join(format!("{date}.jsonl"));
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return Vec::new();
        };
        let query = query.to_ascii_uppercase();
        raw.lines()
            .filter(|line| query.is_empty() || line.to_ascii_uppercase().contains(&query))
            .filter_map(|line| serde_json::from_str(line).ok())
            .take(limit)
            .collect()
    }

    /// Delete oldest archive days until total size fits the budget; the
    /// current day is never deleted.
    pub fn enforce_budget(&self, budget_bytes: u64, today: NaiveDate) {
        let mut files: Vec<(String, PathBuf, u64)> = std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| {
                        let name = e.file_name().to_string_lossy().into_owned();
                        let day = name.strip_suffix(".jsonl")?.to_string();
                        let size = e.metadata().ok()?.len();
                        Some((day, e.path(), size))
                    })
                    .collect()
            })
            .unwrap_or_default();
        files.sort();

        let mut total: u64 = files.iter().map(|(_, _, size)| size).sum();
        let today_name = today.format("%Y-%m-%d").to_string();
        for (day, path, size) in files {
            if total <= budget_bytes {
                break;
            }
            if day == today_name {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    info!(%day, freed = size, "archive day deleted for budget");
                    total -= size;
                }
                Err(e) => warn!(error = %e, %day, "archive delete failed"),
            }
        }
    }
}

fn append_line(path: &Path, record: &ArchiveRecord) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let line = serde_json::to_string(record)?;
    writeln!(file, "{line}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_warm_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WarmCache::new(dir.path().to_path_buf());
        let store = Store::new();
        let now = Utc::now();

        let mut record = FlightRecord::new("g1".to_string(), now);
        record.callsign = Some("JBU123".to_string());
        record.fdps_gufi = Some("XREF".to_string());
        record.record_position(40.0, -75.0, now);
        record.record_position(40.1, -75.1, now);
        store.flights.insert("g1".to_string(), record);

        let mut cancelled = FlightRecord::new("cx".to_string(), now);
        cancelled.apply_status(crate::flights::FlightStatus::Cancelled);
        store.flights.insert("cx".to_string(), cancelled);

        cache.save(&store).unwrap();

        let restored_store = Store::new();
        let restored = cache.load(&restored_store).unwrap();
        assert_eq!(restored, 1);
        let back = restored_store.flights.get("g1").unwrap();
        assert_eq!(back.callsign.as_deref(), Some("JBU123"));
        assert_eq!(back.positions.len(), 1);
        assert_eq!(
            restored_store.resolve_eram_gufi("XREF").as_deref(),
            Some("g1")
        );
    }

    #[test]
    fn test_stale_cache_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WarmCache::new(dir.path().to_path_buf());
        let file = WarmCacheFile {
            saved_at: Utc::now() - Duration::hours(2),
            flights: vec![FlightRecord::new("g1".to_string(), Utc::now())],
        };
        std::fs::write(
            dir.path().join(CACHE_FILE),
            serde_json::to_string(&file).unwrap(),
        )
        .unwrap();
        let store = Store::new();
        assert_eq!(cache.load(&store).unwrap(), 0);
        assert!(store.flights.is_empty());
    }

    #[test]
    fn test_backfill_flight_type_from_raw_event() {
        let mut record = FlightRecord::new("g1".to_string(), Utc::now());
        record.record_event(FlightEvent {
            at: Utc::now(),
            source: "AF".to_string(),
            centre: None,
            summary: "Amendment".to_string(),
            raw: Some(r#"<flight source="AF" flightType="SCHEDULED">...</flight>"#.to_string()),
        });
        backfill_flight_type(&mut record);
        assert_eq!(record.flight_type.as_deref(), Some("SCHEDULED"));
    }

    #[tokio::test]
    async fn test_archive_append_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let archive = DailyArchive::new(dir.path().to_path_buf()).unwrap();
        let now = Utc::now();

        let mut flight = FlightRecord::new("g1".to_string(), now);
        flight.callsign = Some("JBU123".to_string());
        archive.append(flight, now);

        let mut cancelled = FlightRecord::new("cx".to_string(), now);
        cancelled.apply_status(crate::flights::FlightStatus::Cancelled);
        archive.append(cancelled, now);

        // Let the writer task drain
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let dates = archive.dates();
        assert_eq!(dates.len(), 1);
        let hits = archive.search(&dates[0], "jbu123", 10);
        assert_eq!(hits.len(), 1);
        assert!(archive.search(&dates[0], "cx", 10).is_empty());
    }

    #[tokio::test]
    async fn test_budget_never_deletes_today() {
        let dir = tempfile::tempdir().unwrap();
        let archive = DailyArchive::new(dir.path().to_path_buf()).unwrap();
        let today = Utc::now().date_naive();
        let today_name = today.format("%Y-%m-%d").to_string();
        std::fs::write(dir.path().join("2020-01-01.jsonl"), "x".repeat(1000)).unwrap();
        std::fs::write(dir.path().join("2020-01-02.jsonl"), "x".repeat(1000)).unwrap();
        std::fs::write(
            dir.path().join(format!("{today_name}.jsonl")),
            "x".repeat(1000),
        )
        .unwrap();

        archive.enforce_budget(1500, today);
        assert!(!dir.path().join("2020-01-01.jsonl").exists());
        assert!(dir.path().join(format!("{today_name}.jsonl")).exists());
    }
}
