//! Environment configuration.
//!
//! Everything is optional with workable defaults; the JSON-valued variables
//! (enrichment regions, military coverage) follow the deployed configuration
//! format.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// One broker connection plus its durable queue.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub name: String,
    pub url: String,
    pub vpn: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub queue: String,
}

/// Regional enrichment circle.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrichRegion {
    pub lat: f64,
    pub lon: f64,
    #[serde(default = "default_region_radius")]
    pub radius_nm: f64,
}

fn default_region_radius() -> f64 {
    250.0
}

/// Military injection coverage circle, tagged with the facility that gets
/// the synthesized tracks.
#[derive(Debug, Clone, Deserialize)]
pub struct CoverageArea {
    pub facility: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default = "default_coverage_radius")]
    pub radius_nm: f64,
}

fn default_coverage_radius() -> f64 {
    150.0
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sfdps: BrokerConfig,
    pub terminal: BrokerConfig,
    pub adsb_base_url: String,
    pub enrich_regions: Vec<EnrichRegion>,
    pub enrich_refresh: Duration,
    pub military_coverage: Vec<CoverageArea>,
    pub nasr_dir: PathBuf,
    pub nasr_url_base: String,
    pub cache_dir: PathBuf,
    pub history_dir: PathBuf,
    pub archive_budget_bytes: u64,
    pub gate_codes_file: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub http_addr: String,
    pub flight_idle_minutes: i64,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_json<T: serde::de::DeserializeOwned>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, var = name, "invalid JSON in environment, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// The default enrichment coverage: five circles over CONUS.
fn default_regions() -> Vec<EnrichRegion> {
    [
        (42.0, -73.5),
        (33.7, -84.4),
        (41.9, -89.0),
        (32.9, -97.0),
        (37.6, -119.0),
    ]
    .into_iter()
    .map(|(lat, lon)| EnrichRegion {
        lat,
        lon,
        radius_nm: default_region_radius(),
    })
    .collect()
}

impl Config {
    pub fn from_env() -> Self {
        let broker = |prefix: &str, name: &str, default_queue: &str| BrokerConfig {
            name: name.to_string(),
            url: env_or(&format!("{prefix}_URL"), "nats://localhost:4222"),
            vpn: env_opt(&format!("{prefix}_VPN")),
            username: env_opt(&format!("{prefix}_USER")),
            password: env_opt(&format!("{prefix}_PASS")),
            queue: env_or(&format!("{prefix}_QUEUE"), default_queue),
        };
        Self {
            sfdps: broker("SWIM_SFDPS", "sfdps", "swim.sfdps.>"),
            terminal: broker("SWIM_TERMINAL", "terminal", "swim.terminal.>"),
            adsb_base_url: env_or("ADSB_BASE_URL", "https://api.airplanes.live"),
            enrich_regions: env_json("ENRICH_REGIONS", default_regions()),
            enrich_refresh: Duration::from_secs(
                env_or("ENRICH_REFRESH_SECS", "60").parse().unwrap_or(60),
            ),
            military_coverage: env_json("MILITARY_COVERAGE", Vec::new()),
            nasr_dir: PathBuf::from(env_or("NASR_DIR", "nasr-data")),
            nasr_url_base: env_or(
                "NASR_URL",
                "https://nfdc.faa.gov/webContent/28DaySub/extra",
            ),
            cache_dir: PathBuf::from(env_or("FLIGHT_CACHE_DIR", "flight-cache")),
            history_dir: PathBuf::from(env_or("FLIGHT_HISTORY_DIR", "flight-history")),
            archive_budget_bytes: env_or("ARCHIVE_BUDGET_GB", "14")
                .parse::<u64>()
                .unwrap_or(14)
                * 1024
                * 1024
                * 1024,
            gate_codes_file: Some(PathBuf::from(env_or("GATE_CODES_FILE", "gate-codes.json"))),
            static_dir: env_opt("STATIC_DIR").map(PathBuf::from),
            http_addr: env_or("HTTP_ADDR", "0.0.0.0:8080"),
            flight_idle_minutes: env_or("FLIGHT_IDLE_MINUTES", "60").parse().unwrap_or(60),
        }
    }
}
