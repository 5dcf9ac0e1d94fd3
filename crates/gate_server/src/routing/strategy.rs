//! Node selection strategies.
//!
//! Every strategy shares the same pre-check: no candidates means no
//! selection, and a single candidate is returned without consulting the
//! algorithm. Strategies work on indices so the same object can pick from
//! live directory instances or from the static node-id list.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Available selection algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    RoundRobin,
    Random,
    ConsistentHash,
    Designated,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::RoundRobin,
        StrategyKind::Random,
        StrategyKind::ConsistentHash,
        StrategyKind::Designated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::RoundRobin => "round_robin",
            StrategyKind::Random => "random",
            StrategyKind::ConsistentHash => "consistent_hash",
            StrategyKind::Designated => "designated",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown route strategy '{s}', expected one of: round_robin, random, consistent_hash, designated"
                )
            })
    }
}

/// Picks one of N candidates, optionally keyed by a player id.
pub trait RouteStrategy: Send + Sync + fmt::Debug {
    fn kind(&self) -> StrategyKind;

    /// Algorithm step for a live instance list. Only called with `count >= 2`.
    fn pick(&self, count: usize, player_id: Option<i64>) -> usize;

    /// Algorithm step for the static node-id list. Only called with
    /// `count >= 2`. Defaults to [`RouteStrategy::pick`].
    fn pick_node_id(&self, count: usize, player_id: Option<i64>) -> usize {
        self.pick(count, player_id)
    }

    /// Index of the chosen live instance, `None` when there are none.
    fn select(&self, count: usize, player_id: Option<i64>) -> Option<usize> {
        match count {
            0 => None,
            1 => Some(0),
            n => Some(self.pick(n, player_id) % n),
        }
    }

    /// Index of the chosen static node id, `None` when there are none.
    fn select_node_id(&self, count: usize, player_id: Option<i64>) -> Option<usize> {
        match count {
            0 => None,
            1 => Some(0),
            n => Some(self.pick_node_id(n, player_id) % n),
        }
    }
}

impl dyn RouteStrategy {
    /// Chooses from a slice of live instances.
    pub fn choose<'a, T>(&self, candidates: &'a [T], player_id: Option<i64>) -> Option<&'a T> {
        self.select(candidates.len(), player_id)
            .and_then(|index| candidates.get(index))
    }

    /// Chooses from a slice of static node ids.
    pub fn choose_node_id<'a, T>(
        &self,
        node_ids: &'a [T],
        player_id: Option<i64>,
    ) -> Option<&'a T> {
        self.select_node_id(node_ids.len(), player_id)
            .and_then(|index| node_ids.get(index))
    }
}

/// Cycles through candidates with one counter shared by every caller.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RouteStrategy for RoundRobin {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RoundRobin
    }

    fn pick(&self, count: usize, _player_id: Option<i64>) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % count
    }
}

/// Uniform random choice per call.
#[derive(Debug, Default)]
pub struct Random;

impl RouteStrategy for Random {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Random
    }

    fn pick(&self, count: usize, _player_id: Option<i64>) -> usize {
        rand::thread_rng().gen_range(0..count)
    }
}

/// Hashes the player id onto the candidate list.
///
/// This is modulo hashing, not a hash ring: a player keeps its node only as
/// long as the candidate list is unchanged. Without a player id the live
/// instance list falls back to round-robin while the static node-id list
/// falls back to its first entry.
#[derive(Debug)]
pub struct ConsistentHash {
    fallback: Arc<RoundRobin>,
}

impl ConsistentHash {
    pub fn new(fallback: Arc<RoundRobin>) -> Self {
        Self { fallback }
    }

    /// `|hash(player_id)| mod count`, folding the id to 32 bits first.
    pub fn index_for(player_id: i64, count: usize) -> usize {
        let folded = (player_id ^ ((player_id as u64) >> 32) as i64) as i32;
        folded.unsigned_abs() as usize % count
    }
}

impl Default for ConsistentHash {
    fn default() -> Self {
        Self::new(Arc::new(RoundRobin::new()))
    }
}

impl RouteStrategy for ConsistentHash {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ConsistentHash
    }

    fn pick(&self, count: usize, player_id: Option<i64>) -> usize {
        match player_id {
            Some(id) => Self::index_for(id, count),
            None => self.fallback.pick(count, None),
        }
    }

    fn pick_node_id(&self, count: usize, player_id: Option<i64>) -> usize {
        match player_id {
            Some(id) => Self::index_for(id, count),
            None => 0,
        }
    }
}

/// Always the first candidate, for pinned or test routing.
#[derive(Debug, Default)]
pub struct Designated;

impl RouteStrategy for Designated {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Designated
    }

    fn pick(&self, _count: usize, _player_id: Option<i64>) -> usize {
        0
    }
}

/// One shared instance of every strategy.
#[derive(Debug, Clone)]
pub struct RouteStrategies {
    round_robin: Arc<RoundRobin>,
    random: Arc<Random>,
    consistent_hash: Arc<ConsistentHash>,
    designated: Arc<Designated>,
}

impl RouteStrategies {
    pub fn new() -> Self {
        let round_robin = Arc::new(RoundRobin::new());
        Self {
            consistent_hash: Arc::new(ConsistentHash::new(round_robin.clone())),
            round_robin,
            random: Arc::new(Random),
            designated: Arc::new(Designated),
        }
    }

    pub fn get(&self, kind: StrategyKind) -> Arc<dyn RouteStrategy> {
        match kind {
            StrategyKind::RoundRobin => self.round_robin.clone(),
            StrategyKind::Random => self.random.clone(),
            StrategyKind::ConsistentHash => self.consistent_hash.clone(),
            StrategyKind::Designated => self.designated.clone(),
        }
    }
}

impl Default for RouteStrategies {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("node-{i}")).collect()
    }

    #[test]
    fn empty_and_single_candidate_precheck() {
        let strategies = RouteStrategies::new();
        for kind in StrategyKind::ALL {
            let strategy = strategies.get(kind);
            assert_eq!(strategy.select(0, Some(1)), None, "{kind}");
            assert_eq!(strategy.select_node_id(0, None), None, "{kind}");
            assert_eq!(strategy.select(1, Some(99)), Some(0), "{kind}");
            assert_eq!(strategy.select_node_id(1, None), Some(0), "{kind}");
        }
    }

    #[test]
    fn round_robin_visits_every_candidate_in_order() {
        for n in 2..=7 {
            let strategy: Arc<dyn RouteStrategy> = Arc::new(RoundRobin::new());
            let list = nodes(n);
            let picked: Vec<&String> = (0..n * 3)
                .map(|_| strategy.choose(&list, None).unwrap())
                .collect();
            for (i, node) in picked.iter().enumerate() {
                assert_eq!(*node, &list[i % n]);
            }
        }
    }

    #[test]
    fn round_robin_counter_is_shared_across_callers() {
        let strategy = RoundRobin::new();
        assert_eq!(strategy.select(3, Some(1)), Some(0));
        assert_eq!(strategy.select(3, Some(2)), Some(1));
        assert_eq!(strategy.select_node_id(3, None), Some(2));
        assert_eq!(strategy.select(3, None), Some(0));
    }

    #[test]
    fn random_stays_in_range() {
        let strategy = Random;
        for _ in 0..1000 {
            let index = strategy.select(5, None).unwrap();
            assert!(index < 5);
        }
    }

    #[test]
    fn consistent_hash_is_deterministic() {
        let strategy = ConsistentHash::default();
        for player in [1i64, 42, 1_000_007, -5, i64::MAX, i64::MIN] {
            let first = strategy.select(4, Some(player));
            for _ in 0..10 {
                assert_eq!(strategy.select(4, Some(player)), first);
                assert_eq!(strategy.select_node_id(4, Some(player)), first);
            }
        }
    }

    #[test]
    fn consistent_hash_matches_folded_hash() {
        // small non-negative ids hash to themselves
        assert_eq!(ConsistentHash::index_for(7, 3), 1);
        assert_eq!(ConsistentHash::index_for(-7, 3), 0);
        // high bits are folded into the low word
        let id = (1i64 << 32) | 2;
        assert_eq!(ConsistentHash::index_for(id, 5), 3);
    }

    #[test]
    fn consistent_hash_without_player_falls_back() {
        let fallback = Arc::new(RoundRobin::new());
        let strategy = ConsistentHash::new(fallback.clone());

        // instance list: round-robin through the shared counter
        assert_eq!(strategy.select(3, None), Some(0));
        assert_eq!(strategy.select(3, None), Some(1));
        assert_eq!(fallback.select(3, None), Some(2));

        // node-id list: always the first entry
        for _ in 0..5 {
            assert_eq!(strategy.select_node_id(3, None), Some(0));
        }
    }

    #[test]
    fn designated_is_always_first() {
        let strategy: Arc<dyn RouteStrategy> = Arc::new(Designated);
        let list = nodes(4);
        for player in [None, Some(1), Some(2)] {
            assert_eq!(strategy.choose(&list, player), Some(&list[0]));
            assert_eq!(strategy.choose_node_id(&list, player), Some(&list[0]));
        }
    }

    #[test]
    fn strategy_kind_parsing() {
        assert_eq!("round_robin".parse::<StrategyKind>(), Ok(StrategyKind::RoundRobin));
        assert_eq!("Consistent-Hash".parse::<StrategyKind>(), Ok(StrategyKind::ConsistentHash));
        assert!("ring".parse::<StrategyKind>().is_err());
        for kind in StrategyKind::ALL {
            assert_eq!(kind.to_string().parse::<StrategyKind>(), Ok(kind));
        }
    }

    #[test]
    fn registry_hands_out_matching_kinds() {
        let strategies = RouteStrategies::new();
        for kind in StrategyKind::ALL {
            assert_eq!(strategies.get(kind).kind(), kind);
        }
    }
}
