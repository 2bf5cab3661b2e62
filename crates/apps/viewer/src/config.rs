//! Viewer configuration: CLI/env arguments and their validated form.

use std::time::Duration;

use clap::Parser;
use foundation::math::LatLng;
use foundation::GeoBounds;
use streaming::{BackoffPolicy, SpotStatus};
use url::Url;

use crate::error::ViewerError;

pub const DEFAULT_API_BASE: &str = "http://localhost:8000/api";
pub const DEFAULT_LIMIT: u32 = 200;

/// Athens centre.
pub const DEFAULT_BOUNDS: GeoBounds = GeoBounds {
    sw_lat: 37.9,
    sw_lng: 23.6,
    ne_lat: 38.1,
    ne_lng: 23.9,
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Live parking-spot viewer")]
pub struct Args {
    /// REST base, e.g. http://localhost:8000/api
    #[arg(long, env = "PARKVIEW_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Push channel URL; derived from the REST base when omitted.
    #[arg(long, env = "PARKVIEW_WS_URL")]
    pub ws_url: Option<String>,

    #[arg(long, env = "PARKVIEW_LIMIT", default_value_t = DEFAULT_LIMIT)]
    pub limit: u32,

    /// Only fetch spots with this status.
    #[arg(long, env = "PARKVIEW_STATUS", value_parser = parse_status)]
    pub status: Option<SpotStatus>,

    /// Viewport as swLat,swLng,neLat,neLng.
    #[arg(long, value_parser = parse_bounds, allow_hyphen_values = true)]
    pub bounds: Option<GeoBounds>,

    #[arg(long, default_value_t = 500)]
    pub backoff_floor_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    pub backoff_ceiling_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    pub request_timeout_ms: u64,

    #[arg(long, env = "PARKVIEW_TOKEN")]
    pub token: Option<String>,

    /// Load every spot before the first viewport fetch.
    #[arg(long)]
    pub bootstrap: bool,

    /// Fetch unknown spots referenced by live updates.
    #[arg(long)]
    pub enrich: bool,

    /// Report the nearest available spot from lat,lng.
    #[arg(long, value_parser = parse_origin, allow_hyphen_values = true)]
    pub origin: Option<LatLng>,
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub api_base: Url,
    pub ws_url: Url,
    pub limit: u32,
    pub status: Option<SpotStatus>,
    pub bounds: GeoBounds,
    pub backoff: BackoffPolicy,
    pub request_timeout: Duration,
    pub token: Option<String>,
    pub bootstrap: bool,
    pub enrich: bool,
    /// Capacity of the live event channel.
    pub event_buffer: usize,
}

impl ViewerConfig {
    /// Defaults for everything but the REST base.
    pub fn new(api_base: &str) -> Result<Self, ViewerError> {
        let api_base = parse_http_url(api_base)?;
        let ws_url = derive_ws_url(&api_base)?;
        Ok(Self {
            api_base,
            ws_url,
            limit: DEFAULT_LIMIT,
            status: None,
            bounds: DEFAULT_BOUNDS,
            backoff: BackoffPolicy::default(),
            request_timeout: Duration::from_secs(10),
            token: None,
            bootstrap: false,
            enrich: false,
            event_buffer: 256,
        })
    }

    pub fn from_args(args: &Args) -> Result<Self, ViewerError> {
        let mut cfg = Self::new(&args.api_base)?;
        if let Some(ws) = &args.ws_url {
            cfg.ws_url = Url::parse(ws)?;
            if !matches!(cfg.ws_url.scheme(), "ws" | "wss") {
                return Err(ViewerError::Config(format!("ws url must be ws(s): {ws}")));
            }
        }
        if args.limit == 0 {
            return Err(ViewerError::Config("limit must be positive".to_string()));
        }
        cfg.limit = args.limit;
        cfg.status = args.status;
        if let Some(bounds) = args.bounds {
            cfg.bounds = bounds;
        }
        cfg.backoff = BackoffPolicy::new(
            Duration::from_millis(args.backoff_floor_ms),
            Duration::from_millis(args.backoff_ceiling_ms),
        );
        cfg.request_timeout = Duration::from_millis(args.request_timeout_ms.max(1));
        cfg.token = args.token.clone().filter(|t| !t.trim().is_empty());
        cfg.bootstrap = args.bootstrap;
        cfg.enrich = args.enrich;
        Ok(cfg)
    }
}

fn parse_http_url(text: &str) -> Result<Url, ViewerError> {
    let url = Url::parse(text.trim())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ViewerError::Config(format!(
            "api base must be http(s), got {other}"
        ))),
    }
}

/// `http://host:port/anything` → `ws://host:port/ws` (`https` → `wss`).
pub fn derive_ws_url(api_base: &Url) -> Result<Url, ViewerError> {
    let scheme = match api_base.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(ViewerError::Config(format!(
                "cannot derive a websocket url from {other}"
            )))
        }
    };
    let mut ws = api_base.clone();
    ws.set_scheme(scheme)
        .map_err(|_| ViewerError::Config(format!("cannot switch {api_base} to {scheme}")))?;
    ws.set_path("/ws");
    ws.set_query(None);
    ws.set_fragment(None);
    Ok(ws)
}

fn parse_status(text: &str) -> Result<SpotStatus, String> {
    SpotStatus::parse(text).ok_or_else(|| format!("unknown status: {text}"))
}

fn parse_bounds(text: &str) -> Result<GeoBounds, String> {
    GeoBounds::parse(text).ok_or_else(|| format!("expected swLat,swLng,neLat,neLng: {text}"))
}

fn parse_origin(text: &str) -> Result<LatLng, String> {
    LatLng::parse(text).ok_or_else(|| format!("expected lat,lng: {text}"))
}
