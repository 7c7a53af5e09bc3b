use crate::models::{ItemId, RatingEdge, UserId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Column-oriented mini-batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub users: Vec<UserId>,
    pub items: Vec<ItemId>,
    pub labels: Vec<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl FromIterator<RatingEdge> for Batch {
    fn from_iter<I: IntoIterator<Item = RatingEdge>>(iter: I) -> Self {
        let mut batch = Batch::default();
        for e in iter {
            batch.users.push(e.user);
            batch.items.push(e.item);
            batch.labels.push(e.rating);
        }
        batch
    }
}

/// A partition served as mini-batches.
///
/// Shuffling is reseeded per epoch from `seed + epoch`, so a run is
/// reproducible end to end.
#[derive(Debug, Clone)]
pub struct RatingStream {
    edges: Vec<RatingEdge>,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
}

impl RatingStream {
    pub fn new(edges: Vec<RatingEdge>, batch_size: usize) -> Self {
        Self {
            edges,
            batch_size: batch_size.max(1),
            shuffle: false,
            seed: 0,
        }
    }

    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        self.edges.len().div_ceil(self.batch_size)
    }

    pub fn edges(&self) -> &[RatingEdge] {
        &self.edges
    }

    /// Batches for one pass over the partition.
    pub fn batches(&self, epoch: usize) -> BatchIter<'_> {
        let mut order: Vec<usize> = (0..self.edges.len()).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        BatchIter {
            stream: self,
            order,
            pos: 0,
        }
    }
}

pub struct BatchIter<'a> {
    stream: &'a RatingStream,
    order: Vec<usize>,
    pos: usize,
}

impl Iterator for BatchIter<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.pos >= self.order.len() {
            return None;
        }
        let end = (self.pos + self.stream.batch_size).min(self.order.len());
        let batch = self.order[self.pos..end]
            .iter()
            .map(|&i| self.stream.edges[i])
            .collect();
        self.pos = end;
        Some(batch)
    }
}
