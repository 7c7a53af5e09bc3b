use crate::models::{SocialEdge, UserId};
use std::collections::{BTreeMap, BTreeSet};

/// Undirected trust graph. Self-loops are dropped.
#[derive(Debug, Clone, Default)]
pub struct SocialGraph {
    adj: BTreeMap<UserId, BTreeSet<UserId>>,
}

impl SocialGraph {
    pub fn from_edges<I: IntoIterator<Item = SocialEdge>>(edges: I) -> Self {
        let mut graph = SocialGraph::default();
        for e in edges {
            graph.add(e.a, e.b);
        }
        graph
    }

    pub fn add(&mut self, a: UserId, b: UserId) {
        if a == b {
            return;
        }
        self.adj.entry(a).or_default().insert(b);
        self.adj.entry(b).or_default().insert(a);
    }

    /// Trusted neighbours of `user`, ascending.
    pub fn neighbors(&self, user: UserId) -> impl Iterator<Item = UserId> + '_ {
        self.adj.get(&user).into_iter().flatten().copied()
    }

    pub fn num_edges(&self) -> usize {
        self.adj.values().map(BTreeSet::len).sum::<usize>() / 2
    }
}
