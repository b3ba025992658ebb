// Shared fixture: a small seeded environment with optional fault injection.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gym_vector::utils::{rng_from_optional_seed, rng_from_seed, RngStream};
use gym_vector::{env_fn, BoxSpace, Discrete, Env, EnvFn, EnvSpec, GymError, Info, MultiDiscrete, Result, Step};
use rand::distributions::{Distribution, Uniform};

pub const DEFAULT_MAX_STEPS: u32 = 25;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Misbehavior to inject into specific slots.
#[derive(Clone, Default)]
pub struct Faults {
    /// `(slot, n)`: the n-th step of that slot returns an error.
    pub fail_step: Option<(usize, u32)>,
    /// `(slot, n)`: the n-th step of that slot panics.
    pub panic_step: Option<(usize, u32)>,
    /// `(slot, d)`: closing that slot blocks for `d`.
    pub hang_on_close: Option<(usize, Duration)>,
    /// Building that slot fails.
    pub fail_spawn: Option<usize>,
    /// That slot declares a wider observation space.
    pub wide_space: Option<usize>,
    /// Counts every `close` call.
    pub closes: Option<Arc<AtomicUsize>>,
}

/// A point drifting in four dimensions; action `a` nudges axis `a % 4`.
pub struct Drift {
    index: usize,
    rng: RngStream,
    pos: [f32; 4],
    t: u32,
    steps_taken: u32,
    max_steps: u32,
    faults: Faults,
}

impl Drift {
    pub fn new(spec: &EnvSpec, faults: Faults) -> Result<Self> {
        if faults.fail_spawn == Some(spec.index) {
            return Err(GymError::NotReady(format!("slot {} cannot be built", spec.index)));
        }
        Ok(Self {
            index: spec.index,
            rng: rng_from_seed(spec.index as u64),
            pos: [0.0; 4],
            t: 0,
            steps_taken: 0,
            max_steps: spec.max_episode_steps.unwrap_or(DEFAULT_MAX_STEPS),
            faults,
        })
    }

    fn hits(&self, fault: Option<(usize, u32)>) -> bool {
        fault == Some((self.index, self.steps_taken))
    }
}

impl Env for Drift {
    type Obs = [f32; 4];
    type Act = u32;
    type ObsSpace = BoxSpace<f32, 4>;
    type ActSpace = Discrete;

    fn observation_space(&self) -> BoxSpace<f32, 4> {
        let high = if self.faults.wide_space == Some(self.index) { 20.0 } else { 10.0 };
        BoxSpace::new([-high; 4], [high; 4])
    }

    fn action_space(&self) -> Discrete { Discrete::new(6) }

    fn seed(&mut self, seed: Option<u64>) -> Result<()> {
        self.rng = rng_from_optional_seed(seed);
        Ok(())
    }

    fn reset(&mut self) -> Result<[f32; 4]> {
        let start = Uniform::new_inclusive(-0.05f32, 0.05);
        self.t = 0;
        for x in &mut self.pos {
            *x = start.sample(&mut self.rng);
        }
        Ok(self.pos)
    }

    fn step(&mut self, action: u32) -> Result<Step<[f32; 4]>> {
        if action >= 6 {
            return Err(GymError::InvalidAction(format!("{action} is not in Discrete(6)")));
        }
        self.steps_taken += 1;
        if self.hits(self.faults.fail_step) {
            return Err(GymError::Other(format!("slot {} gave up", self.index)));
        }
        if self.hits(self.faults.panic_step) {
            panic!("slot {} exploded", self.index);
        }

        let noise = Uniform::new_inclusive(-0.01f32, 0.01);
        let push = if action >= 4 { -0.1 } else { 0.1 };
        self.pos[(action % 4) as usize] += push + noise.sample(&mut self.rng);
        self.t += 1;

        let reward = -self.pos.iter().map(|x| x.abs()).sum::<f32>();
        let terminated = self.pos.iter().any(|x| x.abs() > 0.5);
        let truncated = !terminated && self.t >= self.max_steps;
        let mut info = Info::new();
        info.insert("t", self.t.into());
        Ok(Step::new(self.pos, reward, terminated, truncated, info))
    }

    fn close(&mut self) {
        if let Some((slot, d)) = self.faults.hang_on_close {
            if slot == self.index {
                thread::sleep(d);
            }
        }
        if let Some(closes) = &self.faults.closes {
            closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub fn drift_fn(faults: Faults) -> EnvFn<Drift> {
    env_fn(move |spec: &EnvSpec| Drift::new(spec, faults.clone()))
}

pub fn drift() -> EnvFn<Drift> {
    drift_fn(Faults::default())
}

/// Three counters in `0..4`; action `a` bumps counter `a`, and the episode
/// ends once any counter reaches 3.
pub struct Tally {
    index: usize,
    rng: RngStream,
    counts: Vec<u32>,
    steps_taken: u32,
    /// `(slot, n)`: the n-th step of that slot reports four counters.
    long_obs: Option<(usize, u32)>,
}

impl Tally {
    pub fn new(spec: &EnvSpec, long_obs: Option<(usize, u32)>) -> Self {
        Self { index: spec.index, rng: rng_from_seed(spec.index as u64), counts: vec![0; 3], steps_taken: 0, long_obs }
    }
}

impl Env for Tally {
    type Obs = Vec<u32>;
    type Act = u32;
    type ObsSpace = MultiDiscrete;
    type ActSpace = Discrete;

    fn observation_space(&self) -> MultiDiscrete { MultiDiscrete::new(vec![4; 3]) }
    fn action_space(&self) -> Discrete { Discrete::new(3) }

    fn seed(&mut self, seed: Option<u64>) -> Result<()> {
        self.rng = rng_from_optional_seed(seed);
        Ok(())
    }

    fn reset(&mut self) -> Result<Vec<u32>> {
        let start = Uniform::new(0u32, 2);
        self.counts = (0..3).map(|_| start.sample(&mut self.rng)).collect();
        Ok(self.counts.clone())
    }

    fn step(&mut self, action: u32) -> Result<Step<Vec<u32>>> {
        if action >= 3 {
            return Err(GymError::InvalidAction(format!("{action} is not in Discrete(3)")));
        }
        self.steps_taken += 1;
        self.counts[action as usize] += 1;
        let terminated = self.counts.iter().any(|&c| c >= 3);
        let mut observation = self.counts.clone();
        if self.long_obs == Some((self.index, self.steps_taken)) {
            observation.push(0);
        }
        Ok(Step::new(observation, action as f32, terminated, false, Info::new()))
    }
}

pub fn tally_fn(long_obs: Option<(usize, u32)>) -> EnvFn<Tally> {
    env_fn(move |spec: &EnvSpec| Ok(Tally::new(spec, long_obs)))
}
