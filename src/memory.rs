//! Experience Memory: append-only recall of past
//! (state, chosen approach, reward) triples, retrieved by similarity-weighted
//! decay.

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AtscError;
use crate::types::Approach;

/// Fixed 6-floats-per-approach, N,E,S,W order.
pub const STATE_VECTOR_LEN: usize = 24;

const TOP_K: usize = 5;
const MIN_SIMILARITY: f64 = 0.5;
const DECAY_TAU_SECONDS: f64 = 900.0;
pub const CONFIDENCE_THRESHOLD: f64 = 0.7;
const MAX_RECORDS: usize = 50_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperienceRecord {
    pub state_vector: Vec<f64>,
    pub chosen_approach: Approach,
    pub reward: f64,
    pub timestamp: u64,
}

impl Default for ExperienceRecord {
    fn default() -> Self {
        ExperienceRecord {
            state_vector: vec![0.0; STATE_VECTOR_LEN],
            chosen_approach: Approach::North,
            reward: 0.0,
            timestamp: 0,
        }
    }
}

/// A retrieved record together with its similarity and combined weight.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub record: ExperienceRecord,
    pub similarity: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub counts_by_approach: HashMap<Approach, u64>,
    pub mean_reward_by_approach: HashMap<Approach, f64>,
}

pub struct ExperienceMemory {
    records: VecDeque<ExperienceRecord>,
}

impl Default for ExperienceMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperienceMemory {
    pub fn new() -> Self {
        ExperienceMemory { records: VecDeque::new() }
    }

    pub fn record(&mut self, state_vector: Vec<f64>, chosen_approach: Approach, reward: f64, current_time: u64) {
        if self.records.len() >= MAX_RECORDS {
            self.records.pop_front();
        }
        self.records.push_back(ExperienceRecord {
            state_vector,
            chosen_approach,
            reward,
            timestamp: current_time,
        });
    }

    /// Up to K=5 records with similarity >= 0.5, ranked by `similarity * decay`
    /// descending.
    pub fn find_similar(&self, state_vector: &[f64], current_time: u64) -> Vec<Match> {
        let mut matches: Vec<Match> = self
            .records
            .iter()
            .filter_map(|r| {
                let similarity = cosine_similarity(state_vector, &r.state_vector);
                if similarity >= MIN_SIMILARITY {
                    let age = current_time.saturating_sub(r.timestamp) as f64;
                    let decay = (-age / DECAY_TAU_SECONDS).exp();
                    Some(Match { record: r.clone(), similarity, weight: similarity * decay })
                } else {
                    None
                }
            })
            .collect();

        matches.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(TOP_K);
        matches
    }

    /// `Σ wᵢ·rewardᵢ / Σ wᵢ` grouped by the match's chosen approach.
    pub fn weighted_rewards_by_approach(&self, matches: &[Match]) -> HashMap<Approach, f64> {
        let mut weight_sum: HashMap<Approach, f64> = HashMap::new();
        let mut reward_sum: HashMap<Approach, f64> = HashMap::new();
        for m in matches {
            *weight_sum.entry(m.record.chosen_approach).or_insert(0.0) += m.weight;
            *reward_sum.entry(m.record.chosen_approach).or_insert(0.0) += m.weight * m.record.reward;
        }
        weight_sum
            .into_iter()
            .map(|(approach, w)| (approach, reward_sum.get(&approach).copied().unwrap_or(0.0) / w))
            .collect()
    }

    /// True when the best-ranked match's weight clears [`CONFIDENCE_THRESHOLD`].
    pub fn is_confident(matches: &[Match]) -> bool {
        matches.first().map(|m| m.weight >= CONFIDENCE_THRESHOLD).unwrap_or(false)
    }

    pub fn summary(&self) -> Summary {
        let mut counts: HashMap<Approach, u64> = HashMap::new();
        let mut sums: HashMap<Approach, f64> = HashMap::new();
        for r in &self.records {
            *counts.entry(r.chosen_approach).or_insert(0) += 1;
            *sums.entry(r.chosen_approach).or_insert(0.0) += r.reward;
        }
        let means = counts
            .iter()
            .map(|(a, c)| (*a, sums.get(a).copied().unwrap_or(0.0) / *c as f64))
            .collect();
        Summary { counts_by_approach: counts, mean_reward_by_approach: means }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn append_one(&self, path: impl AsRef<Path>, record: &ExperienceRecord) -> Result<(), AtscError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .map_err(|e| AtscError::PersistenceFailure(format!("opening experience store: {e}")))?;
        let line = serde_json::to_string(record)
            .map_err(|e| AtscError::PersistenceFailure(format!("serializing record: {e}")))?;
        writeln!(file, "{line}")
            .map_err(|e| AtscError::PersistenceFailure(format!("writing record: {e}")))
    }

    /// Loads a JSONL experience store, skipping lines that fail to parse
    /// (forward-compatible rather than failing the whole load).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, AtscError> {
        let file = File::open(path.as_ref())
            .map_err(|e| AtscError::PersistenceFailure(format!("opening experience store: {e}")))?;
        let mut memory = ExperienceMemory::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| AtscError::PersistenceFailure(format!("reading line: {e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<ExperienceRecord>(&line) {
                memory.records.push_back(record);
            } else {
                log::debug!("skipping malformed experience record line");
            }
        }
        Ok(memory)
    }
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a < f64::EPSILON || norm_b < f64::EPSILON {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Builds the fixed-order 24-float state vector for one approach's metrics.
/// Callers concatenate N,E,S,W.
pub fn state_vector_for(metrics: &crate::metrics::RoadMetrics) -> [f64; 6] {
    [
        metrics.waiting_count as f64,
        metrics.avg_wait_time,
        metrics.congestion_percent,
        metrics.time_since_last_green as f64,
        metrics.arrival_rate_vpm,
        metrics.departure_rate_vpm,
    ]
}

/// Concatenates `state_vector_for` across all four approaches in N,E,S,W
/// order into the full 24-float vector.
pub fn build_state_vector(metrics: &HashMap<Approach, crate::metrics::RoadMetrics>) -> Vec<f64> {
    Approach::ALL
        .into_iter()
        .flat_map(|a| state_vector_for(&metrics.get(&a).copied().unwrap_or_default()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_for(waiting: f64) -> Vec<f64> {
        let mut v = vec![0.0; STATE_VECTOR_LEN];
        v[0] = waiting;
        v
    }

    #[test]
    fn identical_vectors_have_similarity_one() {
        let a = vec_for(10.0);
        let b = vec_for(10.0);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn find_similar_caps_at_top_k_and_orders_by_weight() {
        let mut memory = ExperienceMemory::new();
        for i in 0..10 {
            memory.record(vec_for(10.0 + i as f64 * 0.01), Approach::North, 1.0, 0);
        }
        let matches = memory.find_similar(&vec_for(10.0), 0);
        assert!(matches.len() <= 5);
        for pair in matches.windows(2) {
            assert!(pair[0].weight >= pair[1].weight);
        }
    }

    #[test]
    fn dissimilar_state_is_excluded() {
        let mut memory = ExperienceMemory::new();
        memory.record(vec_for(1000.0), Approach::East, 1.0, 0);
        let matches = memory.find_similar(&vec_for(0.001), 0);
        assert!(matches.is_empty() || matches[0].similarity < MIN_SIMILARITY);
    }

    #[test]
    fn decay_reduces_weight_for_old_records() {
        let mut memory = ExperienceMemory::new();
        memory.record(vec_for(10.0), Approach::South, 1.0, 0);
        let fresh = memory.find_similar(&vec_for(10.0), 1);
        let stale = memory.find_similar(&vec_for(10.0), 10_000);
        assert!(fresh[0].weight > stale[0].weight);
    }

    #[test]
    fn confidence_requires_weight_above_threshold() {
        let mut memory = ExperienceMemory::new();
        memory.record(vec_for(10.0), Approach::West, 1.0, 0);
        let confident = memory.find_similar(&vec_for(10.0), 0);
        assert!(ExperienceMemory::is_confident(&confident));
        let stale = memory.find_similar(&vec_for(10.0), 100_000);
        assert!(!ExperienceMemory::is_confident(&stale));
    }

    #[test]
    fn weighted_rewards_average_by_approach() {
        let mut memory = ExperienceMemory::new();
        memory.record(vec_for(10.0), Approach::North, 1.0, 0);
        memory.record(vec_for(10.0), Approach::North, 0.0, 0);
        let matches = memory.find_similar(&vec_for(10.0), 0);
        let rewards = memory.weighted_rewards_by_approach(&matches);
        let r = rewards[&Approach::North];
        assert!(r >= 0.0 && r <= 1.0);
    }

    #[test]
    fn bounded_storage_evicts_oldest() {
        let mut memory = ExperienceMemory::new();
        for i in 0..5 {
            memory.record(vec_for(i as f64), Approach::North, 0.0, i);
        }
        assert_eq!(memory.len(), 5);
    }
}
