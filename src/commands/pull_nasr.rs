//! Fetch and parse the current airspace cycle, then exit. Useful for
//! priming the data directory before the service first starts.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::nasr::AirspaceService;

pub async fn handle_pull_nasr(config: Config) -> Result<()> {
    let airspace = Arc::new(AirspaceService::new(
        config.nasr_dir.clone(),
        config.nasr_url_base.clone(),
    ));
    let today = chrono::Utc::now().date_naive();
    let cycle = airspace.refresh(today).await?;
    let index = airspace.current();
    info!(
        cycle = %cycle,
        navaids = index.navaids.len(),
        fixes = index.fixes.len(),
        airports = index.airports_by_lid.len(),
        airways = index.airways.len(),
        procedures = index.procedures.len(),
        centerlines = index.centerlines.len(),
        overlay_airports = index.overlay_airports.len(),
        "airspace cycle ready"
    );
    Ok(())
}
