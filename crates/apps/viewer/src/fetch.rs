//! REST access to the parking backend.
//!
//! Every record is passed through the checked normalizer; records without a
//! usable id or coordinates are dropped with a warning instead of failing
//! the whole page.

use foundation::GeoBounds;
use serde_json::Value;
use streaming::{normalize_record, Spot, SpotId, SpotStatus};
use tracing::{debug, warn};
use url::Url;

use crate::config::ViewerConfig;
use crate::error::ViewerError;

#[derive(Debug, Clone)]
pub struct SpotApi {
    client: reqwest::Client,
    base: Url,
    limit: u32,
    token: Option<String>,
}

impl SpotApi {
    pub fn new(config: &ViewerConfig) -> Result<Self, ViewerError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base: config.api_base.clone(),
            limit: config.limit,
            token: config.token.clone(),
        })
    }

    /// `GET /parking/spots/in_viewport` for one bounding box.
    pub async fn fetch_viewport(
        &self,
        bounds: GeoBounds,
        status: Option<SpotStatus>,
    ) -> Result<Vec<Spot>, ViewerError> {
        let url = self.endpoint(&["parking", "spots", "in_viewport"])?;
        let mut query = vec![
            ("swLat", bounds.sw_lat.to_string()),
            ("swLng", bounds.sw_lng.to_string()),
            ("neLat", bounds.ne_lat.to_string()),
            ("neLng", bounds.ne_lng.to_string()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(status) = status {
            query.push(("status", status.as_str().to_string()));
        }
        let body = self.get_json(url.clone(), &query).await?.ok_or_else(|| {
            ViewerError::Status {
                status: reqwest::StatusCode::NOT_FOUND,
                url: url.to_string(),
            }
        })?;
        let spots = normalize_page(body);
        debug!("viewport fetch returned {} spots", spots.len());
        Ok(spots)
    }

    /// `GET /parking/spots`: every spot the backend knows.
    pub async fn fetch_all(&self) -> Result<Vec<Spot>, ViewerError> {
        let url = self.endpoint(&["parking", "spots"])?;
        let body = self.get_json(url.clone(), &[]).await?.ok_or_else(|| {
            ViewerError::Status {
                status: reqwest::StatusCode::NOT_FOUND,
                url: url.to_string(),
            }
        })?;
        Ok(normalize_page(body))
    }

    /// `GET /parking/spots/{id}`; `Ok(None)` when the backend has no such spot.
    pub async fn fetch_spot(&self, id: SpotId) -> Result<Option<Spot>, ViewerError> {
        let id = id.to_string();
        let url = self.endpoint(&["parking", "spots", &id])?;
        let Some(body) = self.get_json(url, &[]).await? else {
            return Ok(None);
        };
        let spot = normalize_record(&body);
        if spot.is_none() {
            warn!("dropping malformed spot record for id {id}");
        }
        Ok(spot)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ViewerError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ViewerError::Config(format!("{} cannot be a base url", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<Option<Value>, ViewerError> {
        let mut req = self.client.get(url.clone()).query(query);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ViewerError::Status {
                status: resp.status(),
                url: url.to_string(),
            });
        }
        Ok(Some(resp.json::<Value>().await?))
    }
}

/// Accepts `{spots: [...]}` pages as well as bare arrays.
fn normalize_page(body: Value) -> Vec<Spot> {
    let records = match body {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("spots") {
            Some(Value::Array(items)) => items,
            _ => {
                warn!("response carries no spot list");
                Vec::new()
            }
        },
        _ => {
            warn!("unexpected response shape");
            Vec::new()
        }
    };

    let total = records.len();
    let spots: Vec<Spot> = records.iter().filter_map(normalize_record).collect();
    if spots.len() < total {
        warn!("dropped {} malformed spot records", total - spots.len());
    }
    spots
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn endpoint_appends_to_base_path() {
        let api = SpotApi::new(&ViewerConfig::new("http://localhost:8000/api/").unwrap()).unwrap();
        let url = api.endpoint(&["parking", "spots", "in_viewport"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/parking/spots/in_viewport");

        let api = SpotApi::new(&ViewerConfig::new("http://localhost:8000/api").unwrap()).unwrap();
        let url = api.endpoint(&["parking", "spots", "7"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/parking/spots/7");
    }

    #[test]
    fn page_drops_malformed_records() {
        let body = json!({
            "spots": [
                {"id": 1, "latitude": 37.98, "longitude": 23.73, "status": "Available"},
                {"id": 2, "status": "Occupied"},
                {"latitude": 1.0, "longitude": 2.0},
                {"spot_id": "3", "lat": "38.0", "lng": 23.7, "price_per_hour": 2.5}
            ],
            "total": 4
        });
        let spots = normalize_page(body);
        let ids: Vec<SpotId> = spots.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(spots[1].price_per_hour, Some(2.5));
    }

    #[test]
    fn page_accepts_bare_arrays() {
        let body = json!([{"id": 5, "lat": 39.63, "lng": 22.41}]);
        assert_eq!(normalize_page(body).len(), 1);
        assert!(normalize_page(json!({"total": 0})).is_empty());
        assert!(normalize_page(json!("nope")).is_empty());
    }
}
