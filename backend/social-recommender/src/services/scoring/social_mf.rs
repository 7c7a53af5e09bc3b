//! Trust-aware matrix factorization.
//!
//! A user's representation mixes their own embedding with the mean embedding
//! of a sampled subset of trusted neighbours:
//!
//!   h_u = p_u + mean(p_v for v in S_u)
//!   r̂(u, i) = μ + b_u + b_i + h_u · q_i
//!
//! `S_u` is the first `ceil(percent * |N(u)|)` neighbours in ascending id
//! order. The loss is mean squared error.

use super::{RatingModel, Scorer};
use crate::config::ModelConfig;
use crate::error::{AppError, Result};
use crate::models::{ItemId, ParamStore, Tensor, UserId};
use crate::services::dataset::{Batch, SocialGraph};
use ndarray::{Array1, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

pub const USER_EMBEDDING: &str = "user_embedding";
pub const ITEM_EMBEDDING: &str = "item_embedding";
pub const USER_BIAS: &str = "user_bias";
pub const ITEM_BIAS: &str = "item_bias";
pub const GLOBAL_BIAS: &str = "global_bias";

/// Half-width of the uniform initialization range.
const INIT_SCALE: f32 = 0.1;

pub struct SocialMf {
    params: ParamStore,
    neighbors: Vec<Vec<UserId>>,
    num_users: usize,
    num_items: usize,
    dim: usize,
}

impl SocialMf {
    pub fn new(
        num_users: usize,
        num_items: usize,
        config: &ModelConfig,
        social: &SocialGraph,
        global_mean: f32,
    ) -> Self {
        let dim = config.embed_dim;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let mut params = ParamStore::new();
        params.insert(
            USER_EMBEDDING.to_string(),
            Tensor::from_shape_fn((num_users, dim), |_| rng.gen_range(-INIT_SCALE..INIT_SCALE)),
        );
        params.insert(
            ITEM_EMBEDDING.to_string(),
            Tensor::from_shape_fn((num_items, dim), |_| rng.gen_range(-INIT_SCALE..INIT_SCALE)),
        );
        params.insert(USER_BIAS.to_string(), Tensor::zeros((num_users, 1)));
        params.insert(ITEM_BIAS.to_string(), Tensor::zeros((num_items, 1)));
        params.insert(
            GLOBAL_BIAS.to_string(),
            Tensor::from_elem((1, 1), global_mean),
        );

        let neighbors = sample_neighbors(social, num_users, config.percent);
        debug!(
            num_users,
            num_items,
            dim,
            sampled_edges = neighbors.iter().map(Vec::len).sum::<usize>(),
            "Initialized SocialMf"
        );

        Self {
            params,
            neighbors,
            num_users,
            num_items,
            dim,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn sampled_neighbors(&self, user: UserId) -> &[UserId] {
        self.neighbors
            .get(user as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn check_ids(&self, users: &[UserId], items: &[ItemId]) -> Result<()> {
        if users.len() != items.len() {
            return Err(AppError::Model(format!(
                "{} users but {} items in batch",
                users.len(),
                items.len()
            )));
        }
        if let Some(u) = users.iter().find(|&&u| u as usize >= self.num_users) {
            return Err(AppError::Model(format!(
                "user {} outside embedding table of {}",
                u, self.num_users
            )));
        }
        if let Some(i) = items.iter().find(|&&i| i as usize >= self.num_items) {
            return Err(AppError::Model(format!(
                "item {} outside embedding table of {}",
                i, self.num_items
            )));
        }
        Ok(())
    }

    fn user_repr(&self, user: UserId) -> Array1<f32> {
        let p = &self.params[USER_EMBEDDING];
        let mut h = p.row(user as usize).to_owned();
        let sampled = self.sampled_neighbors(user);
        if !sampled.is_empty() {
            let weight = 1.0 / sampled.len() as f32;
            for &v in sampled {
                h.scaled_add(weight, &p.row(v as usize));
            }
        }
        h
    }

    fn predict_one(&self, h: ArrayView1<f32>, user: UserId, item: ItemId) -> f32 {
        let q = self.params[ITEM_EMBEDDING].row(item as usize);
        self.params[GLOBAL_BIAS][[0, 0]]
            + self.params[USER_BIAS][[user as usize, 0]]
            + self.params[ITEM_BIAS][[item as usize, 0]]
            + h.dot(&q)
    }
}

fn sample_neighbors(social: &SocialGraph, num_users: usize, percent: f32) -> Vec<Vec<UserId>> {
    (0..num_users as UserId)
        .map(|u| {
            let all: Vec<UserId> = social
                .neighbors(u)
                .filter(|&v| (v as usize) < num_users)
                .collect();
            let keep = (percent * all.len() as f32).ceil() as usize;
            all.into_iter().take(keep).collect()
        })
        .collect()
}

impl Scorer for SocialMf {
    fn forward(&self, users: &[UserId], items: &[ItemId]) -> Result<Array1<f32>> {
        self.check_ids(users, items)?;
        let mut out = Array1::zeros(users.len());
        // Candidate batches repeat one user; reuse its representation.
        let mut cached: Option<(UserId, Array1<f32>)> = None;
        for (j, (&u, &i)) in users.iter().zip(items).enumerate() {
            let h = match cached.take() {
                Some((cu, h)) if cu == u => h,
                _ => self.user_repr(u),
            };
            out[j] = self.predict_one(h.view(), u, i);
            cached = Some((u, h));
        }
        Ok(out)
    }
}

impl RatingModel for SocialMf {
    fn loss(&self, batch: &Batch) -> Result<f32> {
        if batch.is_empty() {
            return Ok(0.0);
        }
        let preds = self.forward(&batch.users, &batch.items)?;
        let sse: f32 = preds
            .iter()
            .zip(&batch.labels)
            .map(|(p, y)| (p - y) * (p - y))
            .sum();
        Ok(sse / batch.len() as f32)
    }

    fn loss_and_gradients(&self, batch: &Batch) -> Result<(f32, ParamStore)> {
        self.check_ids(&batch.users, &batch.items)?;
        let mut grads: ParamStore = self
            .params
            .iter()
            .map(|(k, v)| (k.clone(), Tensor::zeros(v.raw_dim())))
            .collect();
        if batch.is_empty() {
            return Ok((0.0, grads));
        }

        let n = batch.len() as f32;
        let mut sse = 0.0;
        for ((&u, &i), &y) in batch.users.iter().zip(&batch.items).zip(&batch.labels) {
            let h = self.user_repr(u);
            let err = self.predict_one(h.view(), u, i) - y;
            sse += err * err;
            let g = 2.0 * err / n;

            let q = self.params[ITEM_EMBEDDING].row(i as usize);
            if let Some(t) = grads.get_mut(GLOBAL_BIAS) {
                t[[0, 0]] += g;
            }
            if let Some(t) = grads.get_mut(USER_BIAS) {
                t[[u as usize, 0]] += g;
            }
            if let Some(t) = grads.get_mut(ITEM_BIAS) {
                t[[i as usize, 0]] += g;
            }
            if let Some(t) = grads.get_mut(ITEM_EMBEDDING) {
                t.row_mut(i as usize).scaled_add(g, &h);
            }
            if let Some(t) = grads.get_mut(USER_EMBEDDING) {
                t.row_mut(u as usize).scaled_add(g, &q);
                let sampled = self.sampled_neighbors(u);
                if !sampled.is_empty() {
                    let share = g / sampled.len() as f32;
                    for &v in sampled {
                        t.row_mut(v as usize).scaled_add(share, &q);
                    }
                }
            }
        }
        Ok((sse / n, grads))
    }

    fn parameters(&self) -> &ParamStore {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut ParamStore {
        &mut self.params
    }

    fn load_parameters(&mut self, state: ParamStore) -> Result<()> {
        if state.len() != self.params.len() {
            return Err(AppError::Model(format!(
                "expected {} parameters, got {}",
                self.params.len(),
                state.len()
            )));
        }
        for (name, current) in &self.params {
            match state.get(name) {
                Some(t) if t.shape() == current.shape() => {}
                Some(t) => {
                    return Err(AppError::Model(format!(
                        "parameter {} has shape {:?}, expected {:?}",
                        name,
                        t.shape(),
                        current.shape()
                    )))
                }
                None => {
                    return Err(AppError::Model(format!("missing parameter {}", name)));
                }
            }
        }
        self.params = state;
        Ok(())
    }
}
