//! Server ranking strategies.

use crate::models::ServerRow;

/// Maps a server to an ordering key; higher keys are tried first.
///
/// Ties are broken by creation order, so implementations only need to
/// express preference, not a total order.
pub trait RankingStrategy: Send + Sync {
    fn rank_key(&self, server: &ServerRow) -> i64;
}

/// Manual priority only. Quality fields are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityRanking;

impl RankingStrategy for PriorityRanking {
    fn rank_key(&self, server: &ServerRow) -> i64 {
        server.priority
    }
}

/// Sort servers by descending rank key, ties by ascending id.
pub fn rank_servers(strategy: &dyn RankingStrategy, servers: &mut [ServerRow]) {
    servers.sort_by_cached_key(|s| (std::cmp::Reverse(strategy.rank_key(s)), s.id));
}
