//! Per-point cumulative statistics of a segment, used by speed projection.

use serde::{Deserialize, Serialize};

use crate::TrackPoint;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalStatistics {
    /// Kilometers covered while moving.
    pub distance_moving: f64,
    pub distance_total: f64,
    /// Seconds spent moving.
    pub time_moving: f64,
    pub time_total: f64,
    /// Average moving speed in km/h, zero when no moving time is known.
    pub speed_moving: f64,
}

/// Cumulative values up to and including each point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalStatistics {
    pub distance_moving: Vec<f64>,
    pub time_moving: Vec<f64>,
    pub time_total: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentStatistics {
    pub global: GlobalStatistics,
    pub local: LocalStatistics,
}

impl SegmentStatistics {
    /// An interval counts as moving when its speed reaches
    /// `min_moving_speed_kmh`. Intervals without timestamps contribute their
    /// distance as moving distance and no time.
    pub fn compute(points: &[TrackPoint], min_moving_speed_kmh: f64) -> Self {
        let n = points.len();
        let mut local = LocalStatistics {
            distance_moving: Vec::with_capacity(n),
            time_moving: Vec::with_capacity(n),
            time_total: Vec::with_capacity(n),
        };
        let mut global = GlobalStatistics::default();

        for (i, point) in points.iter().enumerate() {
            if i > 0 {
                let previous = &points[i - 1];
                let km = previous.distance_to(point) / 1000.0;
                global.distance_total += km;

                let seconds = match (previous.time(), point.time()) {
                    (Some(a), Some(b)) => Some(((b - a).num_milliseconds() as f64 / 1000.0).max(0.0)),
                    _ => None,
                };
                match seconds {
                    Some(s) if s > 0.0 => {
                        global.time_total += s;
                        if km / s * 3600.0 >= min_moving_speed_kmh {
                            global.distance_moving += km;
                            global.time_moving += s;
                        }
                    }
                    _ => global.distance_moving += km,
                }
            }
            local.distance_moving.push(global.distance_moving);
            local.time_moving.push(global.time_moving);
            local.time_total.push(global.time_total);
        }

        if global.time_moving > 0.0 {
            global.speed_moving = global.distance_moving / global.time_moving * 3600.0;
        }
        Self { global, local }
    }

    pub fn len(&self) -> usize {
        self.local.distance_moving.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
