//! BRouter HTTP client
//!
//! Requests `{base}?lonlats=lon,lat|lon,lat&profile=..&format=geojson` and
//! reads the route's LineString. Failures come back as plain-text bodies.

use anyhow::{Context, Result};
use geojson::{GeoJson, Geometry, Value};
use std::str::FromStr;
use tracing::{debug, warn};
use track::{Coordinates, GeoPoint, RoutingError, RoutingService};

use super::RouterConfig;

/// BRouter client
pub struct BRouterClient {
    base_url: String,
    profile: String,
    client: reqwest::Client,
}

impl BRouterClient {
    /// Create new BRouter client
    pub fn new(config: &RouterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            base_url: config.base_url.clone(),
            profile: config.profile.clone(),
            client,
        })
    }

    fn lonlats(waypoints: &[Coordinates]) -> String {
        waypoints
            .iter()
            .map(|c| format!("{:.6},{:.6}", c.lon, c.lat))
            .collect::<Vec<_>>()
            .join("|")
    }
}

fn transport_error(err: reqwest::Error) -> RoutingError {
    if err.is_timeout() {
        RoutingError::Timeout
    } else {
        RoutingError::Other(err.to_string())
    }
}

#[async_trait::async_trait]
impl RoutingService for BRouterClient {
    fn name(&self) -> &str {
        "brouter"
    }

    async fn route(&self, waypoints: &[Coordinates]) -> Result<Vec<GeoPoint>, RoutingError> {
        let lonlats = Self::lonlats(waypoints);
        debug!(%lonlats, profile = %self.profile, "requesting route");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("lonlats", lonlats.as_str()),
                ("profile", self.profile.as_str()),
                ("alternativeidx", "0"),
                ("format", "geojson"),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            warn!(%status, body = %body.trim(), "routing request rejected");
            return Err(RoutingError::from_message(&body));
        }
        parse_geojson_route(&body)
    }
}

fn line_points(geometry: &Geometry) -> Option<Vec<GeoPoint>> {
    let Value::LineString(positions) = &geometry.value else {
        return None;
    };
    let points = positions
        .iter()
        .filter(|p| p.len() >= 2)
        .map(|p| {
            let point = GeoPoint::new(Coordinates::new(p[1], p[0]));
            match p.get(2) {
                Some(elevation) => point.with_elevation(*elevation),
                None => point,
            }
        })
        .collect();
    Some(points)
}

/// Extracts the first LineString of a GeoJSON route. A third coordinate is
/// read as elevation.
pub fn parse_geojson_route(body: &str) -> Result<Vec<GeoPoint>, RoutingError> {
    let geojson = GeoJson::from_str(body).map_err(|_| RoutingError::from_message(body))?;
    let points = match &geojson {
        GeoJson::FeatureCollection(collection) => collection
            .features
            .iter()
            .find_map(|f| f.geometry.as_ref().and_then(line_points)),
        GeoJson::Feature(feature) => feature.geometry.as_ref().and_then(line_points),
        GeoJson::Geometry(geometry) => line_points(geometry),
    };
    match points {
        Some(points) if !points.is_empty() => Ok(points),
        _ => Err(RoutingError::Other("route contains no line".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RouterKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const ROUTE: &str = r#"{
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": { "track-length": "1234" },
            "geometry": {
                "type": "LineString",
                "coordinates": [[7.0, 46.0, 512.5], [7.001, 46.002, 520.0], [7.003, 46.003]]
            }
        }]
    }"#;

    #[test]
    fn test_parse_route_with_elevation() {
        let points = parse_geojson_route(ROUTE).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].coordinates, Coordinates::new(46.0, 7.0));
        assert_eq!(points[0].elevation, Some(512.5));
        assert_eq!(points[2].elevation, None);
    }

    #[test]
    fn test_plain_text_body_is_classified() {
        let err = parse_geojson_route("via1-position not mapped in existing datafile").unwrap_err();
        assert_eq!(err, RoutingError::Unmapped(track::WaypointRole::Via));

        let err = parse_geojson_route(r#"{"type": "Point", "coordinates": [7.0, 46.0]}"#).unwrap_err();
        assert!(matches!(err, RoutingError::Other(_)));
    }

    #[test]
    fn test_lonlats_order() {
        let lonlats = BRouterClient::lonlats(&[Coordinates::new(46.0, 7.0), Coordinates::new(46.5, 7.25)]);
        assert_eq!(lonlats, "7.000000,46.000000|7.250000,46.500000");
    }

    /// Serves one canned HTTP response and hands back the request line.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/brouter", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).lines().next().unwrap_or_default().to_string()
        });
        (url, handle)
    }

    #[tokio::test]
    async fn test_route_over_http() {
        let (url, server) = serve_once("200 OK", ROUTE).await;
        let client = BRouterClient::new(&RouterConfig::new(RouterKind::BRouter).with_base_url(url)).unwrap();

        let points = client
            .route(&[Coordinates::new(46.0, 7.0), Coordinates::new(46.003, 7.003)])
            .await
            .unwrap();
        assert_eq!(points.len(), 3);

        let request_line = server.await.unwrap();
        assert!(request_line.starts_with("GET /brouter?lonlats="), "{request_line}");
        assert!(request_line.contains("format=geojson"));
        assert!(request_line.contains("profile=trekking"));
    }

    #[tokio::test]
    async fn test_service_error_over_http() {
        let (url, server) = serve_once(
            "500 Internal Server Error",
            "to-position not mapped in existing datafile\n",
        )
        .await;
        let client = BRouterClient::new(&RouterConfig::new(RouterKind::BRouter).with_base_url(url)).unwrap();

        let err = client
            .route(&[Coordinates::new(46.0, 7.0), Coordinates::new(80.0, 7.0)])
            .await
            .unwrap_err();
        assert_eq!(err, RoutingError::Unmapped(track::WaypointRole::To));
        server.await.unwrap();
    }
}
