//! The full service: broker sessions, merge pipeline, enrichment, broadcast
//! ticks, sweeps, persistence, and the web server, all torn down together on
//! the shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adsb::{AdsbClient, Enricher};
use crate::broadcast::{Broadcaster, StaleWindows};
use crate::broker::BrokerSession;
use crate::config::Config;
use crate::correlate::GateCodes;
use crate::ingest::{SfdpsIngest, TerminalIngest};
use crate::nasr::AirspaceService;
use crate::persist::{DailyArchive, WarmCache};
use crate::route::RouteResolver;
use crate::stats::{BrokerHealth, Stats};
use crate::store::Store;
use crate::telemetry::Telemetry;
use crate::web::{self, AppState};

const FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);
const CALLSIGN_INDEX_INTERVAL: Duration = Duration::from_secs(30);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const SILENCE_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const WARM_CACHE_INTERVAL: Duration = Duration::from_secs(300);
const ARCHIVE_BUDGET_INTERVAL: Duration = Duration::from_secs(3600);

pub async fn handle_run(config: Config) -> Result<()> {
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("metrics recorder installs once at startup");

    let store = Arc::new(Store::new());
    let telemetry = Arc::new(Telemetry::new());
    let sfdps_health = BrokerHealth::new("sfdps");
    let terminal_health = BrokerHealth::new("terminal");
    let stats = Stats::new(vec![sfdps_health.clone(), terminal_health.clone()]);
    let gate_codes = Arc::new(GateCodes::new(config.gate_codes_file.clone()));

    // Warm cache first so the map is populated before the feeds catch up
    let warm_cache = Arc::new(WarmCache::new(config.cache_dir.clone()));
    match warm_cache.load(&store) {
        Ok(0) => {}
        Ok(n) => info!(flights = n, "resumed from warm cache"),
        Err(e) => warn!(error = %e, "warm cache load failed, starting cold"),
    }
    store.rebuild_callsign_index();

    let archive = DailyArchive::new(config.history_dir.clone())?;

    let airspace = Arc::new(AirspaceService::new(
        config.nasr_dir.clone(),
        config.nasr_url_base.clone(),
    ));
    {
        let today = chrono::Utc::now().date_naive();
        if let Err(e) = airspace.refresh(today).await {
            warn!(error = %e, "initial airspace cycle load failed, resolver starts empty");
        }
    }
    let resolver = Arc::new(RouteResolver::new(airspace.clone()));

    let windows = StaleWindows {
        flights: chrono::Duration::minutes(config.flight_idle_minutes),
        ..StaleWindows::default()
    };
    let broadcaster = Arc::new(Broadcaster::new(store.clone(), gate_codes.clone(), windows));

    let shutdown = CancellationToken::new();

    // Broker sessions
    let sfdps_session = BrokerSession::new(
        config.sfdps.clone(),
        Arc::new(SfdpsIngest::new(
            store.clone(),
            telemetry.clone(),
            stats.clone(),
        )),
        sfdps_health.clone(),
    );
    tokio::spawn(sfdps_session.run(shutdown.clone()));

    let terminal_session = BrokerSession::new(
        config.terminal.clone(),
        Arc::new(TerminalIngest::new(
            store.clone(),
            telemetry.clone(),
            stats.clone(),
        )),
        terminal_health.clone(),
    );
    tokio::spawn(terminal_session.run(shutdown.clone()));

    // Enrichment loops
    let adsb_client = Arc::new(AdsbClient::new(config.adsb_base_url.clone())?);
    let enricher = Arc::new(Enricher::new(
        adsb_client,
        store.clone(),
        config.enrich_regions.clone(),
        config.military_coverage.clone(),
        config.enrich_refresh,
    ));
    tokio::spawn(enricher.clone().run_regional(shutdown.clone()));
    tokio::spawn(enricher.run_military(shutdown.clone()));

    // Airspace daily refresh
    tokio::spawn(airspace.clone().run(shutdown.clone()));

    // Broadcast flush tick
    {
        let broadcaster = broadcaster.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(FLUSH_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tick.tick() => broadcaster.flush(),
                }
            }
        });
    }

    // Staleness sweep; purged flights become archive lines
    {
        let broadcaster = broadcaster.clone();
        let archive = archive.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tick.tick() => {
                        let now = chrono::Utc::now();
                        for flight in broadcaster.sweep(now) {
                            archive.append(flight, now);
                        }
                    }
                }
            }
        });
    }

    // Callsign secondary index rebuild
    {
        let store = store.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(CALLSIGN_INDEX_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tick.tick() => store.rebuild_callsign_index(),
                }
            }
        });
    }

    // Stats heartbeat and silence warnings
    {
        let stats = stats.clone();
        let store = store.clone();
        let broadcaster = broadcaster.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut beat = tokio::time::interval(HEARTBEAT_INTERVAL);
            let mut silence = tokio::time::interval(SILENCE_CHECK_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = beat.tick() => {
                        let snapshot = stats.snapshot(&store, HEARTBEAT_INTERVAL.as_secs_f64());
                        metrics::gauge!("store.active_flights").set(snapshot.active_flights as f64);
                        broadcaster.send_stats(&snapshot);
                    }
                    _ = silence.tick() => stats.warn_on_silence(),
                }
            }
        });
    }

    // Warm cache save
    {
        let warm_cache = warm_cache.clone();
        let store = store.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(WARM_CACHE_INTERVAL);
            tick.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tick.tick() => {
                        if let Err(e) = warm_cache.save(&store) {
                            error!(error = %e, "warm cache save failed");
                        }
                    }
                }
            }
        });
    }

    // Archive size budget
    {
        let archive = archive.clone();
        let budget = config.archive_budget_bytes;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(ARCHIVE_BUDGET_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tick.tick() => {
                        archive.enforce_budget(budget, chrono::Utc::now().date_naive());
                    }
                }
            }
        });
    }

    // Web server
    let app_state = AppState {
        store: store.clone(),
        broadcaster,
        resolver,
        airspace,
        gate_codes,
        stats,
        telemetry,
        archive,
        metrics_handle,
        static_dir: config.static_dir.clone(),
    };
    let http_addr = config.http_addr.clone();
    let web_shutdown = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = web_shutdown.cancelled() => {}
            result = web::serve(&http_addr, app_state) => {
                if let Err(e) = result {
                    error!(error = %e, "web server exited");
                }
            }
        }
    });

    wait_for_signal().await;
    info!("shutdown signal received");

    // Stop timers and sessions first, then snapshot state
    shutdown.cancel();
    if let Err(e) = warm_cache.save(&store) {
        error!(error = %e, "final warm cache save failed");
    }
    // Give spawned tasks a moment to observe cancellation
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installs");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
