//! Parallel vector environment: one worker thread per instance.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::core::{Env, GymError, Result, Step};
use crate::registry::{EnvFn, EnvSpec};
use crate::spaces::FlatSpace;
use crate::vector::shared::SharedResultBuffer;
use crate::vector::worker::{CloseOutcome, Command, Delivered, ObsSlot, Reply, SlotBinding, WorkerHandle};
use crate::vector::{
    check_same_spaces, check_specs, validate_actions, BatchStep, CommandKind, Seeds, VectorEnv, WorkerState,
};

/// Settings for [`AsyncVectorEnv`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AsyncConfig {
    /// Move observations through a [`SharedResultBuffer`] instead of the reply channel.
    pub shared_memory: bool,
    /// How long `close` waits for workers to acknowledge before detaching them.
    pub close_grace: Duration,
    /// Worker threads are named `<thread_name>-<index>`.
    pub thread_name: String,
    /// Stack size of worker threads; the platform default when `None`.
    pub stack_size: Option<usize>,
}

impl Default for AsyncConfig {
    fn default() -> Self {
        Self {
            shared_memory: true,
            close_grace: Duration::from_secs(5),
            thread_name: "gym-vector-worker".to_string(),
            stack_size: None,
        }
    }
}

impl AsyncConfig {
    pub fn with_shared_memory(mut self, enabled: bool) -> Self {
        self.shared_memory = enabled;
        self
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    pub fn with_thread_name<S: Into<String>>(mut self, name: S) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

/// What happened to the workers during shutdown.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloseReport {
    /// Workers that closed their instance and were joined.
    pub acknowledged: usize,
    /// Workers that missed the grace period and were detached.
    pub terminated: usize,
    /// Workers whose thread was already gone.
    pub crashed: usize,
    pub elapsed: Duration,
}

type SlotReader<S, O> = fn(&S, &SharedResultBuffer, usize, &mut Vec<u64>) -> Result<O>;

fn read_flat<S: FlatSpace>(space: &S, buffer: &SharedResultBuffer, slot: usize, scratch: &mut Vec<u64>) -> Result<S::Element> {
    buffer.read_element(space, slot, scratch)
}

struct SharedSlots<S, O> {
    buffer: Arc<SharedResultBuffer>,
    read: SlotReader<S, O>,
}

struct Pending {
    kind: CommandKind,
    // Per worker: the error raised while dispatching, if any.
    undelivered: Vec<Option<GymError>>,
}

/// Runs N instances of an environment, each in its own worker thread.
///
/// Results are identical to [`SyncVectorEnv`](crate::vector::SyncVectorEnv)
/// for the same factory, seeds and actions. A batched call waits for every
/// worker, then fails with the error of the lowest failing slot if any failed.
///
/// Workers are never recreated. A worker whose instance failed refuses every
/// later command except close, and a worker whose thread died is not contacted
/// again; both surface as [`GymError::Communication`] for their slot.
pub struct AsyncVectorEnv<E: Env> {
    id: String,
    workers: Vec<WorkerHandle<E>>,
    observation_space: E::ObsSpace,
    action_space: E::ActSpace,
    shared: Option<SharedSlots<E::ObsSpace, E::Obs>>,
    scratch: Vec<u64>,
    pending: Option<Pending>,
    config: AsyncConfig,
    closed: bool,
}

impl<E: Env> AsyncVectorEnv<E>
where
    E: 'static,
    E::Obs: Send + 'static,
    E::Act: Send + 'static,
    E::ObsSpace: Clone + PartialEq + fmt::Debug + Send + 'static,
    E::ActSpace: Clone + PartialEq + fmt::Debug + Send + 'static,
{
    /// Spawn `n` workers running `id`.
    pub fn new<S: Into<String>>(id: S, n: usize, env_fn: EnvFn<E>, config: AsyncConfig) -> Result<Self>
    where
        E::ObsSpace: FlatSpace,
    {
        Self::from_specs(EnvSpec::new(id).batch(n), env_fn, config)
    }

    /// Spawn one worker per spec. Honors `config.shared_memory`.
    pub fn from_specs(specs: Vec<EnvSpec>, env_fn: EnvFn<E>, config: AsyncConfig) -> Result<Self>
    where
        E::ObsSpace: FlatSpace,
    {
        check_specs(&specs)?;
        let (observation_space, action_space) = probe(&specs[0], &env_fn)?;

        if !config.shared_memory {
            let slots = specs.iter().map(|_| None).collect();
            return Self::launch(specs, env_fn, config, (observation_space, action_space), None, slots);
        }

        let buffer = SharedResultBuffer::for_space(&observation_space, specs.len());
        let slots = (0..specs.len())
            .map(|i| {
                let binding = SlotBinding::new(buffer.writer(i), observation_space.clone());
                Some(Box::new(binding) as Box<dyn ObsSlot<E::Obs>>)
            })
            .collect();
        let shared = SharedSlots { buffer, read: read_flat::<E::ObsSpace> };
        Self::launch(specs, env_fn, config, (observation_space, action_space), Some(shared), slots)
    }

    /// Like [`new`](Self::new) for observation types without a flat layout.
    ///
    /// Observations always travel through the reply channel; a config asking
    /// for shared memory is rejected.
    pub fn new_opaque<S: Into<String>>(id: S, n: usize, env_fn: EnvFn<E>, config: AsyncConfig) -> Result<Self> {
        Self::from_specs_opaque(EnvSpec::new(id).batch(n), env_fn, config)
    }

    pub fn from_specs_opaque(specs: Vec<EnvSpec>, env_fn: EnvFn<E>, config: AsyncConfig) -> Result<Self> {
        if config.shared_memory {
            return Err(GymError::Configuration(
                "shared memory needs an observation space with a flat layout".into(),
            ));
        }
        check_specs(&specs)?;
        let spaces = probe(&specs[0], &env_fn)?;
        let slots = specs.iter().map(|_| None).collect();
        Self::launch(specs, env_fn, config, spaces, None, slots)
    }

    fn launch(
        specs: Vec<EnvSpec>,
        env_fn: EnvFn<E>,
        config: AsyncConfig,
        spaces: (E::ObsSpace, E::ActSpace),
        shared: Option<SharedSlots<E::ObsSpace, E::Obs>>,
        slots: Vec<Option<Box<dyn ObsSlot<E::Obs>>>>,
    ) -> Result<Self> {
        let n = specs.len();
        let (observation_space, action_space) = spaces;
        let mut venv = Self {
            id: specs[0].id.clone(),
            workers: Vec::with_capacity(n),
            observation_space,
            action_space,
            shared,
            scratch: Vec::new(),
            pending: None,
            config,
            closed: false,
        };

        for (spec, slot) in specs.into_iter().zip(slots) {
            match WorkerHandle::spawn(spec, Arc::clone(&env_fn), slot, &venv.config) {
                Ok(worker) => venv.workers.push(worker),
                Err(e) => {
                    venv.shutdown();
                    return Err(e);
                }
            }
        }

        if let Err(e) = venv.await_ready() {
            venv.shutdown();
            return Err(e);
        }

        info!(
            "AsyncVectorEnv started {n} workers for {} (shared memory: {})",
            venv.id,
            venv.shared.is_some()
        );
        Ok(venv)
    }

    fn await_ready(&mut self) -> Result<()> {
        let mut first_error = None;
        for worker in &mut self.workers {
            let checked = match worker.recv() {
                Ok(Reply::Ready { observation_space, action_space }) => check_same_spaces(
                    worker.index(),
                    (&self.observation_space, &self.action_space),
                    (&observation_space, &action_space),
                ),
                Ok(other) => Err(unexpected(worker.index(), CommandKind::Spawn, other.name())),
                Err(e) => Err(e),
            };
            if let Err(e) = checked {
                note_failure(&mut first_error, e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Build one instance on the calling thread to learn the spaces, then close it.
fn probe<E: Env>(spec: &EnvSpec, env_fn: &EnvFn<E>) -> Result<(E::ObsSpace, E::ActSpace)> {
    let mut env = env_fn(spec).map_err(|e| e.in_env(spec.index, CommandKind::Spawn))?;
    let spaces = (env.observation_space(), env.action_space());
    env.close();
    Ok(spaces)
}

fn unexpected(index: usize, command: CommandKind, reply: &str) -> GymError {
    GymError::Communication { index, reason: format!("unexpected {reply} reply to {command}") }
}

fn note_failure(first: &mut Option<GymError>, error: GymError) {
    match first {
        None => *first = Some(error),
        Some(_) => warn!("further failure in the same batched call: {error}"),
    }
}

impl<E: Env> AsyncVectorEnv<E> {
    /// Number of workers.
    pub fn num_envs(&self) -> usize { self.workers.len() }

    pub fn config(&self) -> &AsyncConfig { &self.config }

    /// Whether observations travel through a shared result buffer.
    pub fn uses_shared_memory(&self) -> bool { self.shared.is_some() }

    /// Orchestrator-side state of every worker, in slot order.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers.iter().map(WorkerHandle::state).collect()
    }

    pub fn is_closed(&self) -> bool { self.closed }

    fn ensure_ready_for(&self, kind: CommandKind) -> Result<()> {
        if self.closed {
            return Err(GymError::Closed);
        }
        if let Some(pending) = &self.pending {
            debug!("refusing {kind} while {} is pending", pending.kind);
            return Err(GymError::AlreadyPending { pending: pending.kind });
        }
        Ok(())
    }

    fn dispatch(&mut self, kind: CommandKind, commands: impl IntoIterator<Item = Command<E::Act>>) {
        let undelivered = self.workers.iter_mut().zip(commands).map(|(w, c)| w.send(c).err()).collect();
        self.pending = Some(Pending { kind, undelivered });
    }

    /// Fan-in barrier: one reply per worker, in slot order.
    fn collect(&mut self, expected: CommandKind) -> Result<Vec<Reply<E>>> {
        if self.closed {
            return Err(GymError::Closed);
        }
        let pending = match self.pending.take() {
            Some(p) if p.kind == expected => p,
            other => {
                self.pending = other;
                return Err(GymError::NoAsyncCallPending { expected });
            }
        };

        let mut replies = Vec::with_capacity(self.workers.len());
        let mut first_error = None;
        for (worker, undelivered) in self.workers.iter_mut().zip(pending.undelivered) {
            let reply = match undelivered {
                Some(e) => Err(e),
                None => worker.recv(),
            };
            match reply {
                Ok(reply) => replies.push(reply),
                Err(e) => note_failure(&mut first_error, e),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(replies),
        }
    }

    fn observation(&mut self, index: usize, delivered: Delivered<E::Obs>) -> Result<E::Obs> {
        let slot = match delivered {
            Delivered::Inline(obs) => return Ok(obs),
            Delivered::InSlot => self.workers[index].slot(),
        };
        match (&self.shared, slot) {
            (Some(shared), Some(slot)) => (shared.read)(&self.observation_space, &shared.buffer, slot, &mut self.scratch),
            _ => Err(GymError::Communication {
                index,
                reason: "observation reported in a slot the worker does not own".into(),
            }),
        }
    }

    /// Start resetting every worker.
    pub fn reset_async(&mut self) -> Result<()> {
        self.ensure_ready_for(CommandKind::Reset)?;
        let n = self.workers.len();
        self.dispatch(CommandKind::Reset, (0..n).map(|_| Command::Reset));
        Ok(())
    }

    /// Wait for the reset started by [`reset_async`](Self::reset_async).
    pub fn reset_wait(&mut self) -> Result<Vec<E::Obs>> {
        let replies = self.collect(CommandKind::Reset)?;
        let mut observations = Vec::with_capacity(replies.len());
        for (i, reply) in replies.into_iter().enumerate() {
            match reply {
                Reply::Reset(delivered) => observations.push(self.observation(i, delivered)?),
                other => return Err(unexpected(i, CommandKind::Reset, other.name())),
            }
        }
        Ok(observations)
    }

    /// Reset every instance and return the initial observations in slot order.
    pub fn reset(&mut self) -> Result<Vec<E::Obs>> {
        self.reset_async()?;
        self.reset_wait()
    }

    /// Validate `actions` and send action `i` to worker `i`.
    pub fn step_async(&mut self, actions: Vec<E::Act>) -> Result<()> {
        self.ensure_ready_for(CommandKind::Step)?;
        validate_actions(&self.action_space, &actions, self.workers.len())?;
        self.dispatch(CommandKind::Step, actions.into_iter().map(Command::Step));
        Ok(())
    }

    /// Wait for the step started by [`step_async`](Self::step_async).
    pub fn step_wait(&mut self) -> Result<BatchStep<E::Obs>> {
        let replies = self.collect(CommandKind::Step)?;
        let mut batch = BatchStep::with_capacity(replies.len());
        for (i, reply) in replies.into_iter().enumerate() {
            match reply {
                Reply::Step(step) => {
                    let observation = self.observation(i, step.observation)?;
                    batch.push(Step::new(observation, step.reward, step.terminated, step.truncated, step.info));
                }
                other => return Err(unexpected(i, CommandKind::Step, other.name())),
            }
        }
        Ok(batch)
    }

    /// Step every instance. Finished episodes are reset by their worker.
    pub fn step(&mut self, actions: Vec<E::Act>) -> Result<BatchStep<E::Obs>> {
        self.step_async(actions)?;
        self.step_wait()
    }

    /// Start seeding every worker with its resolved seed.
    pub fn seed_async(&mut self, seeds: Seeds) -> Result<()> {
        self.ensure_ready_for(CommandKind::Seed)?;
        let seeds = seeds.resolve(self.workers.len())?;
        self.dispatch(CommandKind::Seed, seeds.into_iter().map(Command::Seed));
        Ok(())
    }

    pub fn seed_wait(&mut self) -> Result<()> {
        let replies = self.collect(CommandKind::Seed)?;
        for (i, reply) in replies.into_iter().enumerate() {
            if !matches!(reply, Reply::Seeded) {
                return Err(unexpected(i, CommandKind::Seed, reply.name()));
            }
        }
        Ok(())
    }

    pub fn seed(&mut self, seeds: Seeds) -> Result<()> {
        self.seed_async(seeds)?;
        self.seed_wait()
    }

    /// Close every worker and report how each one went.
    ///
    /// Replies to a call still in flight are discarded. All workers share one
    /// deadline of `close_grace`; those that miss it are detached. Calling this
    /// again returns an empty report.
    pub fn shutdown(&mut self) -> CloseReport {
        if self.closed {
            return CloseReport::default();
        }
        self.closed = true;
        let start = Instant::now();
        let deadline = start + self.config.close_grace;
        if let Some(pending) = self.pending.take() {
            debug!("discarding replies to pending {}", pending.kind);
        }

        for worker in &mut self.workers {
            worker.request_close();
        }
        let mut report = CloseReport::default();
        for worker in &mut self.workers {
            match worker.await_close(deadline) {
                CloseOutcome::Acknowledged => report.acknowledged += 1,
                CloseOutcome::Terminated => report.terminated += 1,
                CloseOutcome::Crashed => report.crashed += 1,
            }
        }
        report.elapsed = start.elapsed();

        info!(
            "AsyncVectorEnv closed {} workers for {}: {} acknowledged, {} terminated, {} crashed in {:?}",
            self.workers.len(),
            self.id,
            report.acknowledged,
            report.terminated,
            report.crashed,
            report.elapsed
        );
        report
    }

    /// Close every worker. Later calls do nothing.
    pub fn close(&mut self) {
        self.shutdown();
    }
}

impl<E: Env> Drop for AsyncVectorEnv<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<E: Env> VectorEnv for AsyncVectorEnv<E>
where
    E::ObsSpace: Clone,
    E::ActSpace: Clone,
{
    type Obs = E::Obs;
    type Act = E::Act;
    type ObsSpace = E::ObsSpace;
    type ActSpace = E::ActSpace;

    fn num_envs(&self) -> usize { self.workers.len() }
    fn single_observation_space(&self) -> &E::ObsSpace { &self.observation_space }
    fn single_action_space(&self) -> &E::ActSpace { &self.action_space }
    fn seed(&mut self, seeds: Seeds) -> Result<()> { AsyncVectorEnv::seed(self, seeds) }
    fn reset(&mut self) -> Result<Vec<E::Obs>> { AsyncVectorEnv::reset(self) }
    fn step(&mut self, actions: Vec<E::Act>) -> Result<BatchStep<E::Obs>> { AsyncVectorEnv::step(self, actions) }
    fn close(&mut self) { AsyncVectorEnv::close(self) }
    fn is_closed(&self) -> bool { self.closed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Info;
    use crate::registry::env_fn;
    use crate::spaces::{BoxSpace, Discrete};

    struct Ramp {
        index: usize,
        t: f32,
    }

    impl Env for Ramp {
        type Obs = [f32; 2];
        type Act = u32;
        type ObsSpace = BoxSpace<f32, 2>;
        type ActSpace = Discrete;
        fn observation_space(&self) -> BoxSpace<f32, 2> { BoxSpace::new([0.0; 2], [100.0; 2]) }
        fn action_space(&self) -> Discrete { Discrete::new(3) }
        fn reset(&mut self) -> Result<[f32; 2]> {
            self.t = 0.0;
            Ok([self.index as f32, self.t])
        }
        fn step(&mut self, a: u32) -> Result<Step<[f32; 2]>> {
            self.t += a as f32 * 0.5;
            Ok(Step::new([self.index as f32, self.t], self.t, self.t >= 2.0, false, Info::new()))
        }
    }

    fn ramps(n: usize, config: AsyncConfig) -> AsyncVectorEnv<Ramp> {
        AsyncVectorEnv::new("Ramp-v0", n, env_fn(|s: &EnvSpec| Ok(Ramp { index: s.index, t: 0.0 })), config).unwrap()
    }

    #[test]
    fn config_defaults_and_builders() {
        let c = AsyncConfig::default();
        assert!(c.shared_memory);
        assert_eq!(c.close_grace, Duration::from_secs(5));
        assert_eq!(c.thread_name, "gym-vector-worker");
        let c = c.with_shared_memory(false).with_stack_size(1 << 20).with_thread_name("w");
        assert!(!c.shared_memory);
        assert_eq!(c.stack_size, Some(1 << 20));
        assert_eq!(c.thread_name, "w");
    }

    #[test]
    fn shared_and_inline_paths_agree() {
        for shared in [true, false] {
            let mut v = ramps(3, AsyncConfig::default().with_shared_memory(shared));
            assert_eq!(v.uses_shared_memory(), shared);
            assert_eq!(v.reset().unwrap(), vec![[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]]);
            let s = v.step(vec![1, 2, 0]).unwrap();
            assert_eq!(s.observations, vec![[0.0, 0.5], [1.0, 1.0], [2.0, 0.0]]);
            assert_eq!(s.rewards, vec![0.5, 1.0, 0.0]);
            let s = v.step(vec![0, 2, 0]).unwrap();
            // slot 1 hit t = 2.0 and was reset by its worker
            assert_eq!(s.terminated, vec![false, true, false]);
            assert_eq!(s.rewards[1], 2.0);
            assert_eq!(s.observations[1], [1.0, 0.0]);
            assert_eq!(v.worker_states(), vec![WorkerState::Idle; 3]);
        }
    }

    #[test]
    fn split_phase_calls_must_pair_up() {
        let mut v = ramps(2, AsyncConfig::default());
        assert_eq!(v.step_wait().unwrap_err(), GymError::NoAsyncCallPending { expected: CommandKind::Step });
        v.reset_async().unwrap();
        assert_eq!(v.step_async(vec![0, 0]).unwrap_err(), GymError::AlreadyPending { pending: CommandKind::Reset });
        assert_eq!(v.step_wait().unwrap_err(), GymError::NoAsyncCallPending { expected: CommandKind::Step });
        assert_eq!(v.reset_wait().unwrap().len(), 2);
    }

    #[test]
    fn close_with_a_call_in_flight_still_acknowledges() {
        let mut v = ramps(2, AsyncConfig::default());
        v.reset_async().unwrap();
        let report = v.shutdown();
        assert_eq!(report.acknowledged, 2);
        assert_eq!(report.terminated, 0);
        assert_eq!(v.worker_states(), vec![WorkerState::Closed; 2]);
        assert_eq!(v.shutdown(), CloseReport::default());
        assert_eq!(v.reset().unwrap_err(), GymError::Closed);
    }

    #[test]
    fn opaque_constructor_rejects_shared_memory() {
        let made = AsyncVectorEnv::new_opaque(
            "Ramp-v0",
            2,
            env_fn(|s: &EnvSpec| Ok(Ramp { index: s.index, t: 0.0 })),
            AsyncConfig::default(),
        );
        assert!(matches!(made, Err(GymError::Configuration(_))));
    }
}
