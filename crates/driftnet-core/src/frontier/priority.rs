//! URL priority scoring. Higher scores are claimed first.

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    /// Added once for seed URLs.
    pub seed_bonus: f64,
    /// Share of the parent's priority a child inherits at depth 0.
    pub parent_weight: f64,
    /// Inherited priority is scaled by `depth_decay ^ depth`.
    pub depth_decay: f64,
    /// Subtracted per non-empty path segment.
    pub path_segment_penalty: f64,
    /// Subtracted per query parameter.
    pub query_param_penalty: f64,
    pub https_bonus: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            seed_bonus: 1000.0,
            parent_weight: 0.5,
            depth_decay: 0.8,
            path_segment_penalty: 2.0,
            query_param_penalty: 5.0,
            https_bonus: 5.0,
        }
    }
}

impl PriorityWeights {
    pub fn seed(&self, url: &str) -> f64 {
        self.score(url, 0, 0.0, true)
    }

    /// Priority of a link discovered at `depth` on a page of `parent_priority`.
    pub fn child(&self, url: &str, depth: u32, parent_priority: f64) -> f64 {
        self.score(url, depth, parent_priority, false)
    }

    pub fn score(&self, url: &str, depth: u32, parent_priority: f64, is_seed: bool) -> f64 {
        let mut priority = 0.0;
        if is_seed {
            priority += self.seed_bonus;
        }
        let decay = self.depth_decay.powi(depth.min(i32::MAX as u32) as i32);
        priority += parent_priority * self.parent_weight * decay;
        priority += self.shape_score(url);

        if priority.is_finite() { priority } else { 0.0 }
    }

    /// Structural signals only: shallow paths, few parameters, https.
    fn shape_score(&self, url: &str) -> f64 {
        let Ok(parsed) = Url::parse(url) else {
            return 0.0;
        };
        let segments = parsed
            .path_segments()
            .map_or(0, |s| s.filter(|p| !p.is_empty()).count());
        let params = parsed
            .query()
            .filter(|q| !q.is_empty())
            .map_or(0, |q| q.split('&').count());

        let mut score = -(segments as f64) * self.path_segment_penalty
            - (params as f64) * self.query_param_penalty;
        if parsed.scheme() == "https" {
            score += self.https_bonus;
        }
        score
    }
}
