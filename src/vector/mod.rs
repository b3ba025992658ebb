//! Vectorized environments.
//!
//! Two runners implement [`VectorEnv`]:
//! - [`SyncVectorEnv`] steps N instances one after another in the calling thread
//!   and is the reference behavior.
//! - [`AsyncVectorEnv`] isolates every instance in its own worker thread and
//!   must produce exactly the same results, optionally moving observations
//!   through a [`SharedResultBuffer`] instead of the reply channel.

pub mod async_env;
pub mod shared;
pub mod sync;
pub mod worker;

use std::fmt;

use crate::core::{GymError, Info, Result, Step};
use crate::registry::EnvSpec;
use crate::spaces::{Batched, Space};
use crate::utils::rng::split_n;

pub use async_env::{AsyncConfig, AsyncVectorEnv, CloseReport};
pub use shared::{SharedResultBuffer, SlotWriter};
pub use sync::SyncVectorEnv;
pub use worker::{CommandKind, WorkerState};

/// How a batched `seed` call is expanded into one seed per slot.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Seeds {
    /// Every instance reseeds from OS entropy.
    Entropy,
    /// Slot `i` gets `base + i`.
    Base(u64),
    /// Slot `i` gets the `i`-th sub-seed of `SeedSequence::new(root)`.
    Split(u64),
    /// One explicit seed per slot.
    PerEnv(Vec<u64>),
}

impl Seeds {
    /// The per-slot seeds for a batch of `n` instances.
    pub fn resolve(&self, n: usize) -> Result<Vec<Option<u64>>> {
        match self {
            Seeds::Entropy => Ok(vec![None; n]),
            Seeds::Base(base) => Ok((0..n).map(|i| Some(base.wrapping_add(i as u64))).collect()),
            Seeds::Split(root) => Ok(split_n(*root, n).into_iter().map(Some).collect()),
            Seeds::PerEnv(seeds) => {
                if seeds.len() != n {
                    return Err(GymError::Configuration(format!(
                        "expected {n} seeds, one per environment, got {}",
                        seeds.len()
                    )));
                }
                Ok(seeds.iter().copied().map(Some).collect())
            }
        }
    }
}

impl From<u64> for Seeds { fn from(v: u64) -> Self { Seeds::Base(v) } }
impl From<Vec<u64>> for Seeds { fn from(v: Vec<u64>) -> Self { Seeds::PerEnv(v) } }
impl From<&[u64]> for Seeds { fn from(v: &[u64]) -> Self { Seeds::PerEnv(v.to_vec()) } }

impl From<Option<u64>> for Seeds {
    fn from(v: Option<u64>) -> Self {
        match v {
            Some(s) => Seeds::Base(s),
            None => Seeds::Entropy,
        }
    }
}

/// Result of one batched step. Every vector has one entry per slot, in slot order.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchStep<Obs> {
    pub observations: Vec<Obs>,
    pub rewards: Vec<f32>,
    pub terminated: Vec<bool>,
    pub truncated: Vec<bool>,
    pub infos: Vec<Info>,
}

impl<Obs> BatchStep<Obs> {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            observations: Vec::with_capacity(n),
            rewards: Vec::with_capacity(n),
            terminated: Vec::with_capacity(n),
            truncated: Vec::with_capacity(n),
            infos: Vec::with_capacity(n),
        }
    }

    /// Append the step of the next slot.
    pub fn push(&mut self, step: Step<Obs>) {
        self.observations.push(step.observation);
        self.rewards.push(step.reward);
        self.terminated.push(step.terminated);
        self.truncated.push(step.truncated);
        self.infos.push(step.info);
    }

    /// Number of slots.
    pub fn len(&self) -> usize { self.rewards.len() }
    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool { self.rewards.is_empty() }

    /// Per-slot episode end flags (`terminated || truncated`).
    pub fn dones(&self) -> Vec<bool> {
        self.terminated.iter().zip(&self.truncated).map(|(&t, &u)| t || u).collect()
    }
}

impl<Obs> FromIterator<Step<Obs>> for BatchStep<Obs> {
    fn from_iter<I: IntoIterator<Item = Step<Obs>>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut batch = BatchStep::with_capacity(iter.size_hint().0);
        for step in iter { batch.push(step); }
        batch
    }
}

/// A batch of N environment instances driven as one environment.
pub trait VectorEnv {
    type Obs;
    type Act;
    type ObsSpace: Space<Element = Self::Obs> + Clone;
    type ActSpace: Space<Element = Self::Act> + Clone;

    /// Number of instances in the batch.
    fn num_envs(&self) -> usize;

    /// Observation space of one instance.
    fn single_observation_space(&self) -> &Self::ObsSpace;

    /// Action space of one instance.
    fn single_action_space(&self) -> &Self::ActSpace;

    /// Observation space of the whole batch.
    fn observation_space(&self) -> Batched<Self::ObsSpace> {
        Batched::new(self.single_observation_space().clone(), self.num_envs())
    }

    /// Action space of the whole batch; `sample` yields one action per slot.
    fn action_space(&self) -> Batched<Self::ActSpace> {
        Batched::new(self.single_action_space().clone(), self.num_envs())
    }

    /// Seed every instance.
    fn seed(&mut self, seeds: Seeds) -> Result<()>;

    /// Reset every instance and return the initial observations in slot order.
    fn reset(&mut self) -> Result<Vec<Self::Obs>>;

    /// Step every instance with its action. Finished episodes are reset in place.
    fn step(&mut self, actions: Vec<Self::Act>) -> Result<BatchStep<Self::Obs>>;

    /// Release every instance. Idempotent.
    fn close(&mut self);

    /// Whether `close` has run.
    fn is_closed(&self) -> bool;
}

/// Reject a batch of actions that cannot be dispatched slot by slot.
pub(crate) fn validate_actions<S: Space>(space: &S, actions: &[S::Element], n: usize) -> Result<()> {
    if actions.len() != n {
        return Err(GymError::Configuration(format!(
            "expected {n} actions, one per environment, got {}",
            actions.len()
        )));
    }
    if let Some(i) = actions.iter().position(|a| !space.has_shape(a)) {
        return Err(GymError::Configuration(format!(
            "action {i} does not match the shape of the action space"
        )));
    }
    Ok(())
}

/// Reject an observation whose shape disagrees with the declared space.
pub(crate) fn check_observation<S: Space>(space: &S, obs: &S::Element) -> Result<()> {
    if space.has_shape(obs) {
        Ok(())
    } else {
        Err(GymError::InvalidObservation("observation does not match the shape of the observation space".into()))
    }
}

/// Reject an empty batch or specs whose `index` is not their position.
pub(crate) fn check_specs(specs: &[EnvSpec]) -> Result<()> {
    if specs.is_empty() {
        return Err(GymError::Configuration("a vector env needs at least one environment".into()));
    }
    if let Some((i, spec)) = specs.iter().enumerate().find(|(i, s)| s.index != *i) {
        return Err(GymError::Configuration(format!(
            "spec at position {i} carries index {}", spec.index
        )));
    }
    Ok(())
}

/// Reject an instance whose spaces differ from those of slot 0.
pub(crate) fn check_same_spaces<O, A>(index: usize, expected: (&O, &A), actual: (&O, &A)) -> Result<()>
where
    O: PartialEq + fmt::Debug,
    A: PartialEq + fmt::Debug,
{
    if expected.0 != actual.0 {
        return Err(GymError::Configuration(format!(
            "environment {index} declares observation space {:?}, expected {:?}",
            actual.0, expected.0
        )));
    }
    if expected.1 != actual.1 {
        return Err(GymError::Configuration(format!(
            "environment {index} declares action space {:?}, expected {:?}",
            actual.1, expected.1
        )));
    }
    Ok(())
}
