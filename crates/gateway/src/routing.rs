//! OSRM-compatible HTTP routing provider

use async_trait::async_trait;
use resq_core::{GeoPoint, RoutingConfig};
use resq_dispatch::{RouteError, RoutePath, RouteProvider};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{GatewayError, Result};

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
    distance: f64,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    /// `[lng, lat]` pairs
    coordinates: Vec<[f64; 2]>,
}

/// Driving routes from an OSRM `route/v1` service
#[derive(Debug, Clone)]
pub struct OsrmRouteProvider {
    http: reqwest::Client,
    base: String,
}

impl OsrmRouteProvider {
    /// Provider for the service at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Url::parse(base_url)?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Provider for the configured URL, if one is set.
    pub fn from_config(routing: &RoutingConfig, timeout: Duration) -> Result<Option<Self>> {
        routing
            .provider_url
            .as_deref()
            .map(|url| Self::new(url, timeout))
            .transpose()
    }

    fn route_url(&self, from: GeoPoint, to: GeoPoint) -> Result<Url> {
        let raw = format!(
            "{}/route/v1/driving/{},{};{},{}?overview=full&geometries=geojson",
            self.base, from.lng, from.lat, to.lng, to.lat
        );
        Ok(Url::parse(&raw)?)
    }
}

fn parse_route(body: OsrmResponse) -> std::result::Result<RoutePath, RouteError> {
    match body.code.as_str() {
        "Ok" => {}
        "NoRoute" | "NoSegment" => return Err(RouteError::NoRoute),
        other => {
            return Err(RouteError::InvalidResponse(
                body.message.unwrap_or_else(|| other.to_string()),
            ))
        }
    }
    let route = body.routes.into_iter().next().ok_or(RouteError::NoRoute)?;
    let points = route
        .geometry
        .coordinates
        .into_iter()
        .map(|[lng, lat]| GeoPoint::new(lat, lng))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| RouteError::InvalidResponse(e.to_string()))?;
    Ok(RoutePath {
        points,
        distance_m: route.distance,
        duration_s: route.duration,
    })
}

#[async_trait]
impl RouteProvider for OsrmRouteProvider {
    async fn route(&self, from: GeoPoint, to: GeoPoint) -> std::result::Result<RoutePath, RouteError> {
        let url = self.route_url(from, to)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(GatewayError::from)?;

        // OSRM answers NoRoute with a 400 and a JSON body
        let status = response.status();
        let body: OsrmResponse = match response.json().await {
            Ok(body) => body,
            Err(e) if status.is_success() => return Err(GatewayError::from(e).into()),
            Err(_) => {
                return Err(GatewayError::Status {
                    status: status.as_u16(),
                    body: String::new(),
                }
                .into())
            }
        };
        let path = parse_route(body)?;
        debug!(points = path.points.len(), distance_m = path.distance_m, "Route computed");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FROM: GeoPoint = GeoPoint { lat: 9.68, lng: 80.01 };
    const TO: GeoPoint = GeoPoint { lat: 9.6615, lng: 80.0255 };

    #[test]
    fn test_route_url_uses_lng_lat_order() {
        let provider =
            OsrmRouteProvider::new("https://router.example/", Duration::from_secs(5)).unwrap();
        let url = provider.route_url(FROM, TO).unwrap();
        assert_eq!(url.path(), "/route/v1/driving/80.01,9.68;80.0255,9.6615");
        assert_eq!(url.query(), Some("overview=full&geometries=geojson"));
    }

    #[test]
    fn test_parse_ok_route() {
        let body: OsrmResponse = serde_json::from_value(json!({
            "code": "Ok",
            "routes": [{
                "geometry": { "type": "LineString", "coordinates": [[80.01, 9.68], [80.02, 9.67], [80.0255, 9.6615]] },
                "distance": 2875.4,
                "duration": 312.9
            }]
        }))
        .unwrap();
        let path = parse_route(body).unwrap();
        assert_eq!(path.points.len(), 3);
        assert_eq!(path.points[0], FROM);
        assert_eq!(path.points[2], TO);
        assert_eq!(path.duration_s, Some(312.9));
    }

    #[test]
    fn test_parse_no_route() {
        let body: OsrmResponse =
            serde_json::from_value(json!({ "code": "NoRoute", "message": "Impossible route" }))
                .unwrap();
        assert_eq!(parse_route(body), Err(RouteError::NoRoute));
    }

    #[test]
    fn test_parse_other_code() {
        let body: OsrmResponse =
            serde_json::from_value(json!({ "code": "InvalidQuery", "message": "bad coords" }))
                .unwrap();
        assert_eq!(
            parse_route(body),
            Err(RouteError::InvalidResponse("bad coords".into()))
        );
    }

    #[test]
    fn test_no_provider_configured() {
        let routing = RoutingConfig::default();
        assert!(OsrmRouteProvider::from_config(&routing, Duration::from_secs(5))
            .unwrap()
            .is_none());
    }
}
