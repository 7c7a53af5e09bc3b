//! Adam with L2 weight decay folded into the gradient.
//!
//! Update for parameter `p` with gradient `g` at step `t`:
//!   g' = g + wd * p
//!   m  = b1 * m + (1 - b1) * g'
//!   v  = b2 * v + (1 - b2) * g'^2
//!   p -= lr * (m / (1 - b1^t)) / (sqrt(v / (1 - b2^t)) + eps)

use super::Optimizer;
use crate::error::{AppError, Result};
use crate::models::{OptimizerState, ParamStore, Tensor};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
pub struct AdamConfig {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    pub weight_decay: f32,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            lr: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

impl AdamConfig {
    pub fn new(lr: f32, weight_decay: f32) -> Self {
        Self {
            lr,
            weight_decay,
            ..Default::default()
        }
    }
}

pub struct Adam {
    config: AdamConfig,
    step: u64,
    first_moment: BTreeMap<String, Tensor>,
    second_moment: BTreeMap<String, Tensor>,
}

const FIRST_PREFIX: &str = "m.";
const SECOND_PREFIX: &str = "v.";

impl Adam {
    pub fn new(config: AdamConfig) -> Self {
        Self {
            config,
            step: 0,
            first_moment: BTreeMap::new(),
            second_moment: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    pub fn steps_taken(&self) -> u64 {
        self.step
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut ParamStore, grads: &ParamStore) -> Result<()> {
        self.step += 1;
        let AdamConfig {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
        } = self.config;
        let t = self.step as i32;
        let bias1 = 1.0 - beta1.powi(t);
        let bias2 = 1.0 - beta2.powi(t);

        for (name, grad) in grads {
            let param = params
                .get_mut(name)
                .ok_or_else(|| AppError::Model(format!("gradient for unknown parameter {}", name)))?;
            if param.shape() != grad.shape() {
                return Err(AppError::Model(format!(
                    "gradient shape {:?} does not match parameter {} {:?}",
                    grad.shape(),
                    name,
                    param.shape()
                )));
            }

            let mut g = grad.clone();
            if weight_decay != 0.0 {
                g.scaled_add(weight_decay, &*param);
            }

            let m = self
                .first_moment
                .entry(name.clone())
                .or_insert_with(|| Tensor::zeros(param.raw_dim()));
            m.zip_mut_with(&g, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);

            let v = self
                .second_moment
                .entry(name.clone())
                .or_insert_with(|| Tensor::zeros(param.raw_dim()));
            v.zip_mut_with(&g, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);

            ndarray::Zip::from(param)
                .and(&*m)
                .and(&*v)
                .for_each(|p, &m, &v| {
                    let m_hat = m / bias1;
                    let v_hat = v / bias2;
                    *p -= lr * m_hat / (v_hat.sqrt() + eps);
                });
        }
        Ok(())
    }

    fn state(&self) -> OptimizerState {
        let buffers = self
            .first_moment
            .iter()
            .map(|(k, t)| (format!("{}{}", FIRST_PREFIX, k), t.clone()))
            .chain(
                self.second_moment
                    .iter()
                    .map(|(k, t)| (format!("{}{}", SECOND_PREFIX, k), t.clone())),
            )
            .collect();
        OptimizerState {
            step: self.step,
            buffers,
        }
    }

    fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        let mut first = BTreeMap::new();
        let mut second = BTreeMap::new();
        for (key, tensor) in state.buffers {
            if let Some(name) = key.strip_prefix(FIRST_PREFIX) {
                first.insert(name.to_string(), tensor);
            } else if let Some(name) = key.strip_prefix(SECOND_PREFIX) {
                second.insert(name.to_string(), tensor);
            } else {
                return Err(AppError::Model(format!(
                    "unexpected optimizer buffer {}",
                    key
                )));
            }
        }
        self.step = state.step;
        self.first_moment = first;
        self.second_moment = second;
        Ok(())
    }
}
