//! In-memory stand-in for the parking backend.
//!
//! Serves the REST endpoints the viewer reads (records in the backend's
//! snake_case shape) and a `/ws` endpoint that forwards every status change
//! as a `spot_update` message.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use foundation::GeoBounds;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use streaming::{Spot, SpotId, SpotStatus};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Backend's hard cap on viewport page size.
pub const MAX_LIMIT: usize = 500;
pub const DEFAULT_LIMIT: usize = 100;

const CITIES: [(&str, f64, f64); 2] = [("Athens", 37.9838, 23.7275), ("Larissa", 39.6390, 22.4191)];
const SPOTS_PER_CITY: i64 = 12;

/// Spot record as the backend serializes it.
#[derive(Debug, Clone, Serialize)]
pub struct SpotRecord {
    pub id: SpotId,
    pub latitude: f64,
    pub longitude: f64,
    pub location: String,
    pub status: &'static str,
    pub price_per_hour: Option<f64>,
    pub city: Option<String>,
    pub area: Option<String>,
    pub last_updated: Option<String>,
}

impl From<&Spot> for SpotRecord {
    fn from(spot: &Spot) -> Self {
        Self {
            id: spot.id,
            latitude: spot.latitude,
            longitude: spot.longitude,
            location: spot.location.clone(),
            status: spot.status.as_str(),
            price_per_hour: spot.price_per_hour,
            city: spot.city.clone(),
            area: spot.area.clone(),
            last_updated: spot.last_updated.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ViewportPage {
    pub spots: Vec<SpotRecord>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct ViewportQuery {
    #[serde(rename = "swLat")]
    pub sw_lat: f64,
    #[serde(rename = "swLng")]
    pub sw_lng: f64,
    #[serde(rename = "neLat")]
    pub ne_lat: f64,
    #[serde(rename = "neLng")]
    pub ne_lng: f64,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// Shared backend state: the spot table plus the update broadcaster.
#[derive(Clone)]
pub struct BackendState {
    spots: Arc<RwLock<BTreeMap<SpotId, Spot>>>,
    updates: broadcast::Sender<String>,
    /// Artificial latency for viewport queries with exactly these bounds.
    slow_viewports: Arc<RwLock<Vec<(GeoBounds, Duration)>>>,
}

impl Default for BackendState {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendState {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(1024);
        Self {
            spots: Arc::new(RwLock::new(BTreeMap::new())),
            updates,
            slow_viewports: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Athens and Larissa, twelve spots each (ids 1..=24).
    pub fn seeded() -> Self {
        let state = Self::new();
        let now = chrono::Utc::now().to_rfc3339();
        let mut id = 1;
        for (city, lat, lng) in CITIES {
            for i in 0..SPOTS_PER_CITY {
                state.insert(Spot {
                    id,
                    latitude: lat + (i % 4) as f64 * 0.002,
                    longitude: lng + (i / 4) as f64 * 0.002,
                    location: format!("{city} spot {}", i + 1),
                    status: SpotStatus::ALL[(id % 4) as usize],
                    price_per_hour: Some(1.5 + (i % 3) as f64 * 0.5),
                    last_updated: Some(now.clone()),
                    city: Some(city.to_string()),
                    area: Some(format!("Zone {}", i / 4 + 1)),
                });
                id += 1;
            }
        }
        state
    }

    pub fn insert(&self, spot: Spot) {
        self.spots.write().insert(spot.id, spot);
    }

    pub fn get(&self, id: SpotId) -> Option<Spot> {
        self.spots.read().get(&id).cloned()
    }

    pub fn ids(&self) -> Vec<SpotId> {
        self.spots.read().keys().copied().collect()
    }

    pub fn all(&self) -> Vec<Spot> {
        self.spots.read().values().cloned().collect()
    }

    /// Spots inside `bounds`, optionally filtered by status, capped at `limit`.
    pub fn in_viewport(
        &self,
        bounds: GeoBounds,
        status: Option<SpotStatus>,
        limit: usize,
    ) -> Vec<Spot> {
        self.spots
            .read()
            .values()
            .filter(|s| bounds.contains(s.latitude, s.longitude))
            .filter(|s| status.map_or(true, |st| s.status == st))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Hold every viewport query for `bounds` for `delay` before answering.
    pub fn delay_viewport(&self, bounds: GeoBounds, delay: Duration) {
        let mut slow = self.slow_viewports.write();
        slow.retain(|(b, _)| *b != bounds);
        slow.push((bounds, delay));
    }

    pub fn viewport_delay(&self, bounds: GeoBounds) -> Option<Duration> {
        self.slow_viewports
            .read()
            .iter()
            .find(|(b, _)| *b == bounds)
            .map(|(_, delay)| *delay)
    }

    /// Change a spot's status and broadcast it. Returns `false` for an
    /// unknown id.
    pub fn set_status(&self, id: SpotId, status: SpotStatus) -> bool {
        let now = chrono::Utc::now().to_rfc3339();
        let city = {
            let mut spots = self.spots.write();
            let Some(spot) = spots.get_mut(&id) else {
                return false;
            };
            spot.status = status;
            spot.last_updated = Some(now.clone());
            spot.city.clone()
        };
        let message = json!({
            "type": "spot_update",
            "spot_id": id,
            "status": status.as_str(),
            "city": city,
            "timestamp": now,
        });
        self.broadcast(message.to_string());
        true
    }

    /// Push a raw text frame to every connected client.
    pub fn broadcast(&self, text: String) {
        // No receivers is fine; nobody is listening yet.
        let _ = self.updates.send(text);
    }

    pub fn subscriber_count(&self) -> usize {
        self.updates.receiver_count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.updates.subscribe()
    }
}

pub fn router(state: BackendState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::OPTIONS]);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/parking/spots/in_viewport", get(get_in_viewport))
        .route("/api/parking/spots", get(get_all_spots))
        .route("/api/parking/spots/:id", get(get_spot))
        .route("/ws", get(ws_upgrade))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}

async fn get_in_viewport(
    State(state): State<BackendState>,
    Query(q): Query<ViewportQuery>,
) -> Response {
    let status = match q.status.as_deref().filter(|s| !s.is_empty()) {
        None => None,
        Some(raw) => match SpotStatus::parse(raw) {
            Some(s) => Some(s),
            None => {
                return (StatusCode::BAD_REQUEST, format!("unknown status {raw}")).into_response()
            }
        },
    };
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("limit must be in 1..={MAX_LIMIT}"),
        )
            .into_response();
    }

    let bounds = GeoBounds::new(q.sw_lat, q.sw_lng, q.ne_lat, q.ne_lng);
    if let Some(delay) = state.viewport_delay(bounds) {
        debug!("holding viewport {bounds:?} for {delay:?}");
        tokio::time::sleep(delay).await;
    }
    let spots: Vec<SpotRecord> = state
        .in_viewport(bounds, status, limit)
        .iter()
        .map(SpotRecord::from)
        .collect();
    debug!("viewport {bounds:?} -> {} spots", spots.len());
    Json(ViewportPage {
        total: spots.len(),
        spots,
    })
    .into_response()
}

async fn get_all_spots(State(state): State<BackendState>) -> Json<Vec<SpotRecord>> {
    Json(state.all().iter().map(SpotRecord::from).collect())
}

async fn get_spot(State(state): State<BackendState>, Path(id): Path<SpotId>) -> Response {
    match state.get(id) {
        Some(spot) => Json(SpotRecord::from(&spot)).into_response(),
        None => (StatusCode::NOT_FOUND, "spot not found").into_response(),
    }
}

async fn ws_upgrade(State(state): State<BackendState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: BackendState) {
    let session_id = Uuid::new_v4();
    let mut updates = state.subscribe();
    let (mut ws_tx, mut ws_rx) = socket.split();
    info!("ws session {session_id} connected");

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(text) => {
                    if let Err(e) = ws_tx.send(Message::Text(text)).await {
                        warn!("ws session {session_id} send failed: {e}");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("ws session {session_id} lagged, skipped {n} updates");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("ws session {session_id} receive error: {e}");
                    break;
                }
            },
        }
    }

    info!("ws session {session_id} disconnected");
}

/// Random status changes, in the manner of a field sensor feed.
#[derive(Debug, Clone, Copy)]
pub struct PublisherConfig {
    pub interval: Duration,
    pub batch: usize,
    /// Chance that a picked spot actually changes status.
    pub change_probability: f64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            batch: 3,
            change_probability: 0.8,
        }
    }
}

pub fn spawn_publisher(state: BackendState, config: PublisherConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        loop {
            ticker.tick().await;
            for (id, status) in pick_changes(&state, config) {
                if state.set_status(id, status) {
                    debug!("published spot {id} -> {status}");
                }
            }
        }
    })
}

fn pick_changes(state: &BackendState, config: PublisherConfig) -> Vec<(SpotId, SpotStatus)> {
    let mut rng = rand::thread_rng();
    let ids = state.ids();
    let picked: Vec<SpotId> = ids
        .choose_multiple(&mut rng, config.batch.min(ids.len()))
        .copied()
        .collect();

    picked
        .into_iter()
        .filter_map(|id| {
            let current = state.get(id)?.status;
            let next = if rng.gen_bool(config.change_probability.clamp(0.0, 1.0)) {
                let others: Vec<SpotStatus> =
                    SpotStatus::ALL.into_iter().filter(|s| *s != current).collect();
                *others.choose(&mut rng)?
            } else {
                current
            };
            Some((id, next))
        })
        .collect()
}
