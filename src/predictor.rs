//! Predictor: queue trend, short-horizon arrival forecast, and a
//! heavy-traffic probability derived from metrics.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::metrics::RoadMetrics;
use crate::types::{Approach, QUEUE_HISTORY_WINDOW_SECONDS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueTrend {
    Increasing,
    Stable,
    Decreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CongestionLevel {
    Low,
    Medium,
    High,
}

/// Per approach, per tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub queue_trend: QueueTrend,
    pub arrivals_10s: f64,
    pub arrivals_30s: f64,
    pub heavy_traffic_probability: f64,
    pub congestion_level: CongestionLevel,
    pub predicted_eta_clear_seconds: f64,
}

/// Per-approach ordered `(timestamp, waiting_count)` history, evicted past
/// 30s. Stateful only in this window; [`Predictor::reset`] clears
/// it.
pub struct Predictor {
    history: HashMap<Approach, VecDeque<(u64, u32)>>,
}

impl Default for Predictor {
    fn default() -> Self {
        Self::new()
    }
}

impl Predictor {
    pub fn new() -> Self {
        let mut history = HashMap::new();
        for a in Approach::ALL {
            history.insert(a, VecDeque::new());
        }
        Predictor { history }
    }

    pub fn predict(
        &mut self,
        metrics: &HashMap<Approach, RoadMetrics>,
        current_time: u64,
    ) -> HashMap<Approach, Prediction> {
        let mut out = HashMap::new();
        for a in Approach::ALL {
            let Some(m) = metrics.get(&a) else { continue };
            let hist = self.history.entry(a).or_default();
            hist.push_back((current_time, m.waiting_count));
            while let Some(&(t, _)) = hist.front() {
                if current_time.saturating_sub(t) > QUEUE_HISTORY_WINDOW_SECONDS {
                    hist.pop_front();
                } else {
                    break;
                }
            }

            out.insert(a, predict_one(hist, m, current_time));
        }
        out
    }

    pub fn reset(&mut self) {
        for a in Approach::ALL {
            self.history.insert(a, VecDeque::new());
        }
    }
}

fn predict_one(
    history: &VecDeque<(u64, u32)>,
    metrics: &RoadMetrics,
    current_time: u64,
) -> Prediction {
    let oldest = history.front().copied().unwrap_or((current_time, metrics.waiting_count));
    let delta = metrics.waiting_count as i64 - oldest.1 as i64;
    let trend = if delta > 2 {
        QueueTrend::Increasing
    } else if delta < -2 {
        QueueTrend::Decreasing
    } else {
        QueueTrend::Stable
    };

    let span = current_time.saturating_sub(oldest.0).max(1) as f64;
    let slope = delta as f64 / span;

    let arrivals_10s = metrics.arrival_rate_vpm / 6.0;
    let arrivals_30s = metrics.arrival_rate_vpm / 2.0;

    let c_norm = (metrics.congestion_percent / 100.0).clamp(0.0, 1.0);
    let t_norm = match trend {
        QueueTrend::Increasing => 1.0,
        QueueTrend::Stable => 0.0,
        QueueTrend::Decreasing => -1.0,
    };
    let t_norm = t_norm.max(0.0);
    let f_norm = ((metrics.arrival_rate_vpm - metrics.departure_rate_vpm) / 30.0).clamp(0.0, 1.0);

    let probability = (100.0 * (0.5 * c_norm + 0.3 * t_norm + 0.2 * f_norm)).clamp(0.0, 100.0);

    let level = if probability >= 60.0 {
        CongestionLevel::High
    } else if probability >= 30.0 {
        CongestionLevel::Medium
    } else {
        CongestionLevel::Low
    };

    let predicted_eta_clear_seconds = if trend == QueueTrend::Increasing {
        metrics.eta_clear_seconds + slope.max(0.0) * 10.0
    } else {
        metrics.eta_clear_seconds
    };

    Prediction {
        queue_trend: trend,
        arrivals_10s,
        arrivals_30s,
        heavy_traffic_probability: probability,
        congestion_level: level,
        predicted_eta_clear_seconds,
    }
}
