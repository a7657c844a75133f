//! Routing service contract and failure taxonomy
//!
//! A routing service turns 2 or 3 ordered waypoints into a realistic path
//! between them. Concrete services live in the `routing` crate.

use std::fmt;
use thiserror::Error;

use crate::{Coordinates, GeoPoint};

/// Which requested waypoint the service could not map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaypointRole {
    From,
    Via,
    To,
}

impl fmt::Display for WaypointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::From => write!(f, "start"),
            Self::Via => write!(f, "intermediate"),
            Self::To => write!(f, "destination"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RoutingError {
    #[error("the {0} position could not be mapped to a road")]
    Unmapped(WaypointRole),
    #[error("the routing service timed out")]
    Timeout,
    #[error("routing failed: {0}")]
    Other(String),
}

impl RoutingError {
    /// Classifies a raw failure message returned by a routing service.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("from-position not mapped") {
            Self::Unmapped(WaypointRole::From)
        } else if lower.contains("via1-position not mapped") || lower.contains("via-position not mapped") {
            Self::Unmapped(WaypointRole::Via)
        } else if lower.contains("to-position not mapped") {
            Self::Unmapped(WaypointRole::To)
        } else if lower.contains("time-out") || lower.contains("timeout") {
            Self::Timeout
        } else {
            Self::Other(message.trim().to_string())
        }
    }
}

/// Routing service trait
#[async_trait::async_trait]
pub trait RoutingService: Send + Sync {
    /// Service name, for logging
    fn name(&self) -> &str;

    /// Returns an ordered path through `waypoints` (2 or 3 of them).
    async fn route(&self, waypoints: &[Coordinates]) -> Result<Vec<GeoPoint>, RoutingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_service_messages() {
        assert_eq!(
            RoutingError::from_message("from-position not mapped in existing datafile"),
            RoutingError::Unmapped(WaypointRole::From)
        );
        assert_eq!(
            RoutingError::from_message("via1-position not mapped in existing datafile"),
            RoutingError::Unmapped(WaypointRole::Via)
        );
        assert_eq!(
            RoutingError::from_message("to-position not mapped in existing datafile"),
            RoutingError::Unmapped(WaypointRole::To)
        );
        assert_eq!(
            RoutingError::from_message("operation killed by thread-priority-watchdog (Time-out)"),
            RoutingError::Timeout
        );
        assert_eq!(
            RoutingError::from_message(" no track found \n"),
            RoutingError::Other("no track found".to_string())
        );
    }
}
