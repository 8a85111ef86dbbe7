//! HTTP surface: REST endpoints, per-scope WebSocket streams, health and
//! metrics, static front-end files.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::{
    Json, Router,
    body::Body,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;
use uuid::Uuid;

use crate::broadcast::{Broadcaster, Scope};
use crate::correlate::{AirportPatterns, GateCodes};
use crate::nasr::AirspaceService;
use crate::persist::DailyArchive;
use crate::route::RouteResolver;
use crate::stats::Stats;
use crate::store::Store;
use crate::telemetry::Telemetry;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub broadcaster: Arc<Broadcaster>,
    pub resolver: Arc<RouteResolver>,
    pub airspace: Arc<AirspaceService>,
    pub gate_codes: Arc<GateCodes>,
    pub stats: Arc<Stats>,
    pub telemetry: Arc<Telemetry>,
    pub archive: DailyArchive,
    pub metrics_handle: PrometheusHandle,
    pub static_dir: Option<PathBuf>,
}

async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string()[..8].to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    info!(
        "{} {} [{}] {} in {:.2}ms",
        method,
        path,
        request_id,
        response.status().as_u16(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    response
}

pub async fn serve(addr: &str, state: AppState) -> Result<()> {
    let static_dir = state.static_dir.clone();

    let api = Router::new()
        .route("/stats", get(get_stats))
        .route("/flights/{id}", get(get_flight))
        .route("/route/{id}", get(get_route))
        .route("/nasr/status", get(nasr_status))
        .route("/nasr/find/{id}", get(nasr_find))
        .route("/nasr/airways", get(nasr_airways))
        .route("/nasr/procedures", get(nasr_procedures))
        .route("/nasr/procgeo", get(nasr_procgeo))
        .route("/nasr/navaids", get(nasr_navaids))
        .route("/nasr/airports", get(nasr_airports))
        .route("/nasr/centerlines", get(nasr_centerlines))
        .route("/asdex", get(asdex_airports))
        .route("/asdex/{airport}", get(asdex_airport))
        .route(
            "/asdex/{airport}/gatecodes",
            get(get_gatecodes).put(put_gatecodes),
        )
        .route("/tdls", get(tdls_airports))
        .route("/tdls/{airport}", get(tdls_airport))
        .route("/tdls/{airport}/{aircraft_id}", get(tdls_aircraft))
        .route("/tais", get(tais_facilities))
        .route("/tais/{facility}", get(tais_facility))
        .route("/history", get(history_search))
        .route("/history/dates", get(history_dates))
        .route("/debug/samples", get(debug_sample_tags))
        .route("/debug/samples/{tag}", get(debug_sample))
        .route("/debug/paths", get(debug_paths))
        .route("/debug/roots", get(debug_roots));

    let ws = Router::new()
        .route("/flights", get(ws_flights))
        .route("/asdex/{airport}", get(ws_asdex))
        .route("/tais/{facility}", get(ws_tais))
        .route("/tdls/{airport}", get(ws_tdls))
        .route("/scope/{facility}", get(ws_scope));

    let mut app = Router::new()
        .nest("/api", api)
        .nest("/ws", ws)
        .route("/healthz", get(healthz))
        .route("/metrics", get(render_metrics))
        .with_state(state)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(CorsLayer::permissive());

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("web server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.stats.peek(&state.store, 5.0))
}

async fn get_flight(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.flights.get(&id) {
        Some(record) => Json(record.value().clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "no such flight").into_response(),
    }
}

async fn get_route(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(record) = state.store.flights.get(&id) else {
        return (StatusCode::NOT_FOUND, "no such flight").into_response();
    };
    let origin = record.origin.clone().unwrap_or_default();
    let destination = record.destination.clone().unwrap_or_default();
    let route = record.route_text.clone().unwrap_or_default();
    drop(record);
    if route.is_empty() && origin.is_empty() {
        return (StatusCode::NOT_FOUND, "flight has no filed route").into_response();
    }
    Json(state.resolver.resolve(&origin, &destination, &route).as_ref().clone()).into_response()
}

async fn nasr_status(State(state): State<AppState>) -> impl IntoResponse {
    let index = state.airspace.current();
    Json(json!({
        "cycle": index.cycle,
        "navaids": index.navaids.len(),
        "fixes": index.fixes.len(),
        "airports": index.airports_by_lid.len(),
        "airways": index.airways.len(),
        "procedures": index.procedures.len(),
        "centerlines": index.centerlines.len(),
    }))
}

async fn nasr_find(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let near = match (
        params.get("lat").and_then(|v| v.parse().ok()),
        params.get("lon").and_then(|v| v.parse().ok()),
    ) {
        (Some(lat), Some(lon)) => Some((lat, lon)),
        _ => None,
    };
    let index = state.airspace.current();
    match index.point(&id.to_ascii_uppercase(), near) {
        Some(point) => Json(point.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "no such point").into_response(),
    }
}

async fn nasr_airways(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let index = state.airspace.current();
    let kind = params.get("type").cloned().unwrap_or_default();
    let mut ids: Vec<&String> = index
        .airways
        .keys()
        .filter(|id| kind.is_empty() || id.starts_with(&kind))
        .collect();
    ids.sort();
    Json(json!({ "airways": ids }))
}

async fn nasr_procedures(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let index = state.airspace.current();
    let airport = params.get("airport").cloned().unwrap_or_default();
    let kind = params.get("type").map(|t| t.to_ascii_uppercase());
    let matches: Vec<_> = index
        .procedures
        .values()
        .flatten()
        .filter(|p| airport.is_empty() || p.airport == airport)
        .filter(|p| match kind.as_deref() {
            Some("SID") => p.kind == crate::nasr::ProcedureKind::Sid,
            Some("STAR") => p.kind == crate::nasr::ProcedureKind::Star,
            _ => true,
        })
        .collect();
    Json(matches).into_response()
}

async fn nasr_procgeo(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(q) = params.get("q") else {
        return (StatusCode::BAD_REQUEST, "missing q").into_response();
    };
    let index = state.airspace.current();
    let Some(instances) = index.procedure(&q.to_ascii_uppercase()) else {
        return (StatusCode::NOT_FOUND, "no such procedure").into_response();
    };
    let kind = params.get("type").map(|t| t.to_ascii_uppercase());
    let geo: Vec<_> = instances
        .iter()
        .filter(|p| match kind.as_deref() {
            Some("SID") => p.kind == crate::nasr::ProcedureKind::Sid,
            Some("STAR") => p.kind == crate::nasr::ProcedureKind::Star,
            _ => true,
        })
        .map(|p| {
            let resolve = |fixes: &[String]| -> Vec<serde_json::Value> {
                fixes
                    .iter()
                    .filter_map(|f| index.point(f, None))
                    .map(|pt| json!({ "id": pt.id, "lat": pt.lat, "lon": pt.lon }))
                    .collect()
            };
            let transitions: HashMap<&String, Vec<serde_json::Value>> = p
                .transitions
                .iter()
                .map(|(name, fixes)| (name, resolve(fixes)))
                .collect();
            json!({
                "id": p.id,
                "airport": p.airport,
                "kind": p.kind,
                "body": resolve(&p.body),
                "transitions": transitions,
            })
        })
        .collect();
    Json(geo).into_response()
}

async fn nasr_navaids(State(state): State<AppState>) -> impl IntoResponse {
    let index = state.airspace.current();
    let all: Vec<_> = index.navaids.values().flatten().cloned().collect();
    Json(all)
}

async fn nasr_airports(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.airspace.current().overlay_airports.clone())
}

async fn nasr_centerlines(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.airspace.current().centerlines.clone())
}

async fn asdex_airports(State(state): State<AppState>) -> impl IntoResponse {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for entry in state.store.surface.iter() {
        *counts.entry(entry.key().0.clone()).or_insert(0) += 1;
    }
    Json(counts)
}

async fn asdex_airport(State(state): State<AppState>, Path(airport): Path<String>) -> impl IntoResponse {
    let keys: Vec<_> = state
        .store
        .surface
        .iter()
        .filter(|e| e.key().0 == airport)
        .map(|e| e.key().clone())
        .collect();
    let mut tracks = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(mut entry) = state.store.surface.get_mut(&key) {
            crate::correlate::correlate_surface(&state.store, &state.gate_codes, entry.value_mut());
            tracks.push(entry.value().clone());
        }
    }
    Json(tracks)
}

async fn get_gatecodes(State(state): State<AppState>, Path(airport): Path<String>) -> impl IntoResponse {
    Json(state.gate_codes.airport(&airport))
}

async fn put_gatecodes(
    State(state): State<AppState>,
    Path(airport): Path<String>,
    Json(patterns): Json<AirportPatterns>,
) -> Response {
    match state.gate_codes.set_airport(&airport, patterns) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn tdls_airports(State(state): State<AppState>) -> impl IntoResponse {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for entry in state.store.tower.iter() {
        *counts.entry(entry.key().0.clone()).or_insert(0) += 1;
    }
    Json(counts)
}

async fn tdls_airport(State(state): State<AppState>, Path(airport): Path<String>) -> impl IntoResponse {
    let aircraft: Vec<_> = state
        .store
        .tower
        .iter()
        .filter(|e| e.key().0 == airport)
        .map(|e| e.value().clone())
        .collect();
    Json(aircraft)
}

async fn tdls_aircraft(
    State(state): State<AppState>,
    Path((airport, aircraft_id)): Path<(String, String)>,
) -> Response {
    match state.store.tower_lookup_ci(&airport, &aircraft_id) {
        Some(aircraft) => Json(aircraft).into_response(),
        None => (StatusCode::NOT_FOUND, "no such aircraft").into_response(),
    }
}

async fn tais_facilities(State(state): State<AppState>) -> impl IntoResponse {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for entry in state.store.terminal.iter() {
        *counts.entry(entry.key().0.clone()).or_insert(0) += 1;
    }
    Json(counts)
}

async fn tais_facility(State(state): State<AppState>, Path(facility): Path<String>) -> impl IntoResponse {
    let tracks: Vec<_> = state
        .store
        .terminal
        .iter()
        .filter(|e| e.key().0 == facility)
        .map(|e| e.value().clone())
        .collect();
    Json(tracks)
}

async fn history_search(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let query = params.get("q").cloned().unwrap_or_default();
    let date = match params.get("date") {
        Some(date) => date.clone(),
        None => match state.archive.dates().into_iter().next() {
            Some(latest) => latest,
            None => return Json(Vec::<serde_json::Value>::new()).into_response(),
        },
    };
    Json(state.archive.search(&date, &query, 500)).into_response()
}

async fn history_dates(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.archive.dates())
}

async fn debug_sample_tags(State(state): State<AppState>) -> impl IntoResponse {
    let mut tags = state.telemetry.sample_tags();
    tags.sort();
    Json(tags)
}

async fn debug_sample(State(state): State<AppState>, Path(tag): Path<String>) -> Response {
    match state.telemetry.sample(&tag) {
        Some(xml) => ([("content-type", "application/xml")], xml).into_response(),
        None => (StatusCode::NOT_FOUND, "no sample for tag").into_response(),
    }
}

async fn debug_paths(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.telemetry.paths_snapshot())
}

async fn debug_roots(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.telemetry.unknown_roots_snapshot())
}

async fn healthz(State(state): State<AppState>) -> Response {
    let sessions: Vec<_> = state
        .stats
        .sessions
        .iter()
        .map(|s| {
            json!({
                "name": s.name,
                "connected": s.is_connected(),
                "silence_secs": s.silence_secs(),
            })
        })
        .collect();
    let any_connected = state.stats.sessions.iter().any(|s| s.is_connected());
    let status = if any_connected || state.stats.sessions.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!({ "sessions": sessions }))).into_response()
}

async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}

async fn ws_flights(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_scope(socket, state, Scope::Flights))
}

async fn ws_asdex(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(airport): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_scope(socket, state, Scope::Surface(airport)))
}

async fn ws_tais(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(facility): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_scope(socket, state, Scope::Terminal(facility)))
}

async fn ws_tdls(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(airport): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_scope(socket, state, Scope::Tower(airport)))
}

async fn ws_scope(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(facility): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_scope(socket, state, Scope::ScopeProto(facility)))
}

/// Pump a subscription queue into a WebSocket until either side closes.
async fn stream_scope(socket: WebSocket, state: AppState, scope: Scope) {
    let subscription = state.broadcaster.subscribe(scope);
    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            outbound = subscription.queue.pop() => {
                if sender.send(Message::Text(outbound.into())).await.is_err() {
                    break;
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
    state.broadcaster.unsubscribe(subscription.id);
}
