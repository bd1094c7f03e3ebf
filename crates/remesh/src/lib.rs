//! Auto-remesh scheduler.
//!
//! The daemon probes every known peer's RTT on a fixed cadence and feeds
//! the samples here. Each cycle the scheduler ranks peers by health
//! (rolling RTT average, penalized by recent probe failures), picks the
//! top-K as the target connected set, and emits the connect/disconnect
//! delta against the currently connected set.

#![deny(unsafe_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Policy knobs for remesh decisions.
#[derive(Clone, Copy, Debug)]
pub struct RemeshPolicy {
    /// Upper bound on simultaneously connected peers (the K in top-K).
    pub max_connected: usize,
    /// Score penalty applied at a 100% failure ratio, in milliseconds.
    pub failure_penalty_ms: f64,
    /// Rolling window length for RTT averaging.
    pub rtt_window: usize,
    /// RTT assumed for peers that have never answered a probe.
    pub unknown_rtt_ms: f64,
}

impl Default for RemeshPolicy {
    fn default() -> Self {
        Self {
            max_connected: 5,
            failure_penalty_ms: 1000.0,
            rtt_window: 10,
            unknown_rtt_ms: 750.0,
        }
    }
}

/// Health snapshot for one peer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeerHealth {
    /// Rolling average RTT over the sample window; `None` until a probe
    /// succeeds.
    pub avg_rtt_ms: Option<f64>,
    /// Successful probes divided by total probes.
    pub success_ratio: f64,
    /// Total probes recorded.
    pub probes: u64,
}

/// Connection state the daemon observes for a peer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerSnapshot {
    /// Peer id.
    pub peer_id: String,
    /// Currently connected.
    pub is_connected: bool,
}

/// Connect/disconnect delta produced by one remesh cycle.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RemeshDecision {
    /// Peers to connect.
    pub connect: Vec<String>,
    /// Peers to disconnect.
    pub disconnect: Vec<String>,
}

impl RemeshDecision {
    /// `true` when the mesh already matches the target.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.connect.is_empty() && self.disconnect.is_empty()
    }
}

#[derive(Debug, Default)]
struct Health {
    rtt_samples: VecDeque<f64>,
    successes: u64,
    failures: u64,
}

impl Health {
    fn avg_rtt(&self) -> Option<f64> {
        if self.rtt_samples.is_empty() {
            None
        } else {
            Some(self.rtt_samples.iter().sum::<f64>() / self.rtt_samples.len() as f64)
        }
    }

    fn failure_ratio(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            0.0
        } else {
            self.failures as f64 / total as f64
        }
    }
}

/// Latency-driven peer selector.
pub struct RemeshScheduler {
    policy: RemeshPolicy,
    health: Mutex<HashMap<String, Health>>,
}

impl RemeshScheduler {
    /// Creates a scheduler with the given policy.
    #[must_use]
    pub fn new(policy: RemeshPolicy) -> Self {
        Self {
            policy,
            health: Mutex::new(HashMap::new()),
        }
    }

    /// Records one probe result. A failed probe carries no RTT.
    pub fn record_probe(&self, peer_id: &str, rtt_ms: i64, success: bool) {
        let mut health = self.health.lock().expect("health map poisoned");
        let entry = health.entry(peer_id.to_owned()).or_default();
        if success && rtt_ms >= 0 {
            entry.successes += 1;
            entry.rtt_samples.push_back(rtt_ms as f64);
            while entry.rtt_samples.len() > self.policy.rtt_window {
                entry.rtt_samples.pop_front();
            }
        } else {
            entry.failures += 1;
        }
    }

    /// Health snapshot for one peer.
    #[must_use]
    pub fn peer_health(&self, peer_id: &str) -> Option<PeerHealth> {
        let health = self.health.lock().expect("health map poisoned");
        health.get(peer_id).map(|entry| PeerHealth {
            avg_rtt_ms: entry.avg_rtt(),
            success_ratio: 1.0 - entry.failure_ratio(),
            probes: entry.successes + entry.failures,
        })
    }

    /// Forgets a peer's history (e.g. after it was removed from storage).
    pub fn forget_peer(&self, peer_id: &str) {
        self.health.lock().expect("health map poisoned").remove(peer_id);
    }

    /// Desirability score: negative average RTT, penalized by the recent
    /// failure ratio. Higher is better.
    fn score(&self, peer_id: &str, health: &HashMap<String, Health>) -> f64 {
        health.get(peer_id).map_or(
            -self.policy.unknown_rtt_ms,
            |entry| {
                let rtt = entry.avg_rtt().unwrap_or(self.policy.unknown_rtt_ms);
                -rtt - entry.failure_ratio() * self.policy.failure_penalty_ms
            },
        )
    }

    /// Computes the connect/disconnect delta for the given mesh state.
    #[must_use]
    pub fn decide(&self, snapshot: &[PeerSnapshot]) -> RemeshDecision {
        let health = self.health.lock().expect("health map poisoned");

        let mut ranked: Vec<&PeerSnapshot> = snapshot.iter().collect();
        ranked.sort_by(|a, b| {
            self.score(&b.peer_id, &health)
                .partial_cmp(&self.score(&a.peer_id, &health))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let target: Vec<&str> = ranked
            .iter()
            .take(self.policy.max_connected)
            .map(|peer| peer.peer_id.as_str())
            .collect();

        let mut decision = RemeshDecision::default();
        for peer in snapshot {
            let in_target = target.contains(&peer.peer_id.as_str());
            if peer.is_connected && !in_target {
                decision.disconnect.push(peer.peer_id.clone());
            } else if !peer.is_connected && in_target {
                decision.connect.push(peer.peer_id.clone());
            }
        }

        if !decision.is_noop() {
            tracing::info!(
                connect = decision.connect.len(),
                disconnect = decision.disconnect.len(),
                "remesh decision"
            );
        }
        decision
    }

    /// Estimated RTT improvement of applying `decision` to `snapshot`:
    /// the average RTT of the previously connected subset minus the
    /// average of the would-be connected subset, clamped at zero.
    #[must_use]
    pub fn estimated_improvement_ms(
        &self,
        snapshot: &[PeerSnapshot],
        decision: &RemeshDecision,
    ) -> f64 {
        let health = self.health.lock().expect("health map poisoned");
        let rtt_of = |peer_id: &str| -> f64 {
            health
                .get(peer_id)
                .and_then(Health::avg_rtt)
                .unwrap_or(self.policy.unknown_rtt_ms)
        };

        let previous: Vec<f64> = snapshot
            .iter()
            .filter(|peer| peer.is_connected)
            .map(|peer| rtt_of(&peer.peer_id))
            .collect();
        let next: Vec<f64> = snapshot
            .iter()
            .filter(|peer| {
                let connecting = decision.connect.contains(&peer.peer_id);
                let dropping = decision.disconnect.contains(&peer.peer_id);
                (peer.is_connected && !dropping) || connecting
            })
            .map(|peer| rtt_of(&peer.peer_id))
            .collect();

        if previous.is_empty() || next.is_empty() {
            return 0.0;
        }
        let pre = previous.iter().sum::<f64>() / previous.len() as f64;
        let post = next.iter().sum::<f64>() / next.len() as f64;
        (pre - post).max(0.0)
    }
}
