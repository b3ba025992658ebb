// A synchronous vector environment running N instances in a loop.

use std::fmt;

use log::debug;

use crate::core::{Env, GymError, Result};
use crate::registry::{EnvFn, EnvSpec};
use crate::vector::{check_observation, check_same_spaces, check_specs, validate_actions, BatchStep, CommandKind, Seeds, VectorEnv};

/// Runs N instances of an environment in the current thread.
///
/// - Construct with `SyncVectorEnv::new("MyEnv-v0", n, env_fn(|spec| Ok(MyEnv::new(spec))))`
/// - Step with a batch of actions: `step(actions)`
/// - Seed then reset: `seed(Seeds::Base(0))`, `reset()`
///
/// Instance `i` is always called before instance `i + 1`, and the first
/// failing instance aborts the call. Its results are the reference that
/// [`AsyncVectorEnv`](crate::vector::AsyncVectorEnv) must reproduce.
pub struct SyncVectorEnv<E: Env> {
    envs: Vec<E>,
    specs: Vec<EnvSpec>,
    observation_space: E::ObsSpace,
    action_space: E::ActSpace,
    closed: bool,
}

impl<E: Env> SyncVectorEnv<E>
where
    E::ObsSpace: Clone + PartialEq + fmt::Debug,
    E::ActSpace: Clone + PartialEq + fmt::Debug,
{
    /// Create `n` instances of `id` using the provided factory.
    pub fn new<S: Into<String>>(id: S, n: usize, env_fn: EnvFn<E>) -> Result<Self> {
        Self::from_specs(EnvSpec::new(id).batch(n), env_fn)
    }

    /// Create one instance per spec, in order.
    pub fn from_specs(specs: Vec<EnvSpec>, env_fn: EnvFn<E>) -> Result<Self> {
        check_specs(&specs)?;

        let mut envs: Vec<E> = Vec::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            match env_fn(spec) {
                Ok(env) => envs.push(env),
                Err(e) => {
                    envs.iter_mut().for_each(|env| env.close());
                    return Err(e.in_env(i, CommandKind::Spawn));
                }
            }
        }

        let observation_space = envs[0].observation_space();
        let action_space = envs[0].action_space();
        for (i, env) in envs.iter().enumerate().skip(1) {
            let checked = check_same_spaces(
                i,
                (&observation_space, &action_space),
                (&env.observation_space(), &env.action_space()),
            );
            if let Err(e) = checked {
                envs.iter_mut().for_each(|env| env.close());
                return Err(e);
            }
        }

        debug!("SyncVectorEnv started {} instances of {}", envs.len(), specs[0].id);
        Ok(Self { envs, specs, observation_space, action_space, closed: false })
    }
}

impl<E: Env> SyncVectorEnv<E> {
    /// Number of contained environments.
    pub fn len(&self) -> usize { self.envs.len() }
    /// Whether there are no environments.
    pub fn is_empty(&self) -> bool { self.envs.is_empty() }

    /// Specs the instances were built from, in slot order.
    pub fn specs(&self) -> &[EnvSpec] { &self.specs }

    /// Get immutable access to underlying envs (advanced usage).
    pub fn envs(&self) -> &[E] { &self.envs }
    /// Get mutable access to underlying envs (advanced usage).
    pub fn envs_mut(&mut self) -> &mut [E] { &mut self.envs }

    fn ensure_open(&self) -> Result<()> {
        if self.closed { Err(GymError::Closed) } else { Ok(()) }
    }

    /// Seed every instance, slot `i` with the `i`-th resolved seed.
    pub fn seed(&mut self, seeds: Seeds) -> Result<()> {
        self.ensure_open()?;
        let seeds = seeds.resolve(self.envs.len())?;
        for (i, (env, seed)) in self.envs.iter_mut().zip(seeds).enumerate() {
            env.seed(seed).map_err(|e| e.in_env(i, CommandKind::Seed))?;
        }
        Ok(())
    }

    /// Reset all environments.
    pub fn reset(&mut self) -> Result<Vec<E::Obs>> {
        self.ensure_open()?;
        let space = &self.observation_space;
        self.envs
            .iter_mut()
            .enumerate()
            .map(|(i, e)| {
                let obs = e.reset().map_err(|err| err.in_env(i, CommandKind::Reset))?;
                check_observation(space, &obs).map_err(|err| err.in_env(i, CommandKind::Reset))?;
                Ok(obs)
            })
            .collect()
    }

    /// Step all environments with a batch of actions.
    /// The length of `actions` must equal `self.len()`.
    pub fn step(&mut self, actions: Vec<E::Act>) -> Result<BatchStep<E::Obs>> {
        self.ensure_open()?;
        validate_actions(&self.action_space, &actions, self.envs.len())?;

        let mut batch = BatchStep::with_capacity(self.envs.len());
        for (i, (env, action)) in self.envs.iter_mut().zip(actions).enumerate() {
            let mut step = env.step(action).map_err(|e| e.in_env(i, CommandKind::Step))?;
            if step.done() {
                step.observation = env.reset().map_err(|e| e.in_env(i, CommandKind::Step))?;
            }
            check_observation(&self.observation_space, &step.observation).map_err(|e| e.in_env(i, CommandKind::Step))?;
            batch.push(step);
        }
        Ok(batch)
    }

    /// Close all environments. Later calls do nothing.
    pub fn close(&mut self) {
        if self.closed { return; }
        for e in &mut self.envs { e.close(); }
        self.closed = true;
        debug!("SyncVectorEnv closed {} instances", self.envs.len());
    }
}

impl<E: Env> Drop for SyncVectorEnv<E> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<E: Env> VectorEnv for SyncVectorEnv<E>
where
    E::ObsSpace: Clone,
    E::ActSpace: Clone,
{
    type Obs = E::Obs;
    type Act = E::Act;
    type ObsSpace = E::ObsSpace;
    type ActSpace = E::ActSpace;

    fn num_envs(&self) -> usize { self.envs.len() }
    fn single_observation_space(&self) -> &E::ObsSpace { &self.observation_space }
    fn single_action_space(&self) -> &E::ActSpace { &self.action_space }
    fn seed(&mut self, seeds: Seeds) -> Result<()> { SyncVectorEnv::seed(self, seeds) }
    fn reset(&mut self) -> Result<Vec<E::Obs>> { SyncVectorEnv::reset(self) }
    fn step(&mut self, actions: Vec<E::Act>) -> Result<BatchStep<E::Obs>> { SyncVectorEnv::step(self, actions) }
    fn close(&mut self) { SyncVectorEnv::close(self) }
    fn is_closed(&self) -> bool { self.closed }
}
