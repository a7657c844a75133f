/// Routing services
///
/// Concrete implementations of `track::RoutingService`:
/// - BRouter-style HTTP API
/// - Offline straight-line router

pub mod brouter;
pub mod straight_line;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub use brouter::{parse_geojson_route, BRouterClient};
pub use straight_line::StraightLineRouter;
pub use track::{RoutingError, RoutingService};

/// Router type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterKind {
    /// BRouter HTTP API
    #[serde(rename = "brouter")]
    BRouter,
    /// Straight legs between waypoints, no network
    #[serde(rename = "straight_line")]
    StraightLine,
}

impl std::fmt::Display for RouterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BRouter => write!(f, "brouter"),
            Self::StraightLine => write!(f, "straight_line"),
        }
    }
}

/// Router configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Router type
    pub kind: RouterKind,

    /// API endpoint URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Routing profile
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Distance between generated points of the straight-line router (meters)
    #[serde(default = "default_spacing")]
    pub spacing_m: f64,
}

fn default_base_url() -> String {
    "https://brouter.de/brouter".to_string()
}

fn default_profile() -> String {
    "trekking".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_spacing() -> f64 {
    50.0
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new(RouterKind::BRouter)
    }
}

impl RouterConfig {
    /// Create new router config
    pub fn new(kind: RouterKind) -> Self {
        Self {
            kind,
            base_url: default_base_url(),
            profile: default_profile(),
            timeout_secs: default_timeout(),
            spacing_m: default_spacing(),
        }
    }

    /// With API endpoint
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// With routing profile
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    /// With timeout
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// With straight-line spacing
    pub fn with_spacing(mut self, meters: f64) -> Self {
        self.spacing_m = meters;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Save configuration to JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Load configuration from JSON
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }
}

/// Router factory for creating routing services
pub struct RouterFactory;

impl RouterFactory {
    /// Create router from config
    pub fn create(config: &RouterConfig) -> Result<Box<dyn RoutingService>> {
        match config.kind {
            RouterKind::BRouter => Ok(Box::new(BRouterClient::new(config)?)),
            RouterKind::StraightLine => Ok(Box::new(StraightLineRouter::new(config.spacing_m))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_config() {
        let config = RouterConfig::new(RouterKind::BRouter)
            .with_base_url("http://localhost:17777/brouter")
            .with_profile("fastbike")
            .with_timeout(5);

        assert_eq!(config.kind, RouterKind::BRouter);
        assert_eq!(config.base_url, "http://localhost:17777/brouter");
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("router.json");
        let config = RouterConfig::new(RouterKind::StraightLine).with_spacing(25.0);
        config.save(&path).unwrap();

        let loaded = RouterConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(std::fs::read_to_string(&path).unwrap().contains("\"straight_line\""));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: RouterConfig = serde_json::from_str(r#"{ "kind": "brouter" }"#).unwrap();
        assert_eq!(config.profile, "trekking");
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_factory() {
        let router = RouterFactory::create(&RouterConfig::new(RouterKind::StraightLine)).unwrap();
        assert_eq!(router.name(), "straight-line");
        let router = RouterFactory::create(&RouterConfig::default()).unwrap();
        assert_eq!(router.name(), "brouter");
    }
}
