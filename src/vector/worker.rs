//! Worker threads: one environment instance per thread, driven by commands.
//!
//! A worker builds its instance on its own thread, reports the instance's
//! spaces, then serves commands until it is told to close or the orchestrator
//! goes away. Errors travel back as [`Reply::Failed`] records on the same
//! channel as normal results.
//!
//! ```text
//! starting ──► idle ◄──► busy ──► closed
//!                          │        ▲
//!                          └► errored
//! ```

use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, trace, warn};

use crate::core::{Env, GymError, Result, Step};
use crate::registry::{EnvFn, EnvSpec};
use crate::spaces::FlatSpace;
use crate::vector::async_env::AsyncConfig;
use crate::vector::check_observation;
use crate::vector::shared::SlotWriter;

/// Which operation a command, reply, or error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Building the instance from its spec.
    Spawn,
    Reset,
    Step,
    Seed,
    Close,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Spawn => "spawn",
            CommandKind::Reset => "reset",
            CommandKind::Step => "step",
            CommandKind::Seed => "seed",
            CommandKind::Close => "close",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a worker, as tracked by the orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Spawned, instance not reported ready yet.
    Starting,
    /// Waiting for a command.
    Idle,
    /// A command was dispatched and its reply is outstanding.
    Busy,
    /// The instance failed; only `close` is still honored.
    Errored,
    /// The thread is gone (panic or disconnect).
    Crashed,
    Closed,
}

/// Orchestrator → worker.
pub(crate) enum Command<A> {
    Reset,
    Step(A),
    Seed(Option<u64>),
    Close,
}

impl<A> Command<A> {
    pub(crate) fn kind(&self) -> CommandKind {
        match self {
            Command::Reset => CommandKind::Reset,
            Command::Step(_) => CommandKind::Step,
            Command::Seed(_) => CommandKind::Seed,
            Command::Close => CommandKind::Close,
        }
    }
}

/// Where an observation ended up.
pub(crate) enum Delivered<O> {
    /// Moved through the reply channel.
    Inline(O),
    /// Written to the worker's slot of the shared result buffer.
    InSlot,
}

/// Error record sent instead of a result.
pub(crate) struct Failure {
    pub command: CommandKind,
    pub error: GymError,
    /// The worker refused the command because an earlier one failed.
    pub repeated: bool,
}

/// Worker → orchestrator.
pub(crate) enum Reply<E: Env> {
    Ready { observation_space: E::ObsSpace, action_space: E::ActSpace },
    Reset(Delivered<E::Obs>),
    Step(Step<Delivered<E::Obs>>),
    Seeded,
    Closed,
    Failed(Failure),
}

impl<E: Env> Reply<E> {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Reply::Ready { .. } => "ready",
            Reply::Reset(_) => "reset",
            Reply::Step(_) => "step",
            Reply::Seeded => "seeded",
            Reply::Closed => "closed",
            Reply::Failed(_) => "failed",
        }
    }
}

/// Worker-side access to its slot of the shared result buffer.
pub(crate) trait ObsSlot<O>: Send {
    fn slot(&self) -> usize;
    fn store(&mut self, obs: &O) -> Result<()>;
}

/// A slot writer paired with the space that knows how to flatten observations.
pub(crate) struct SlotBinding<S> {
    writer: SlotWriter,
    space: S,
    scratch: Vec<u64>,
}

impl<S: FlatSpace> SlotBinding<S> {
    pub(crate) fn new(writer: SlotWriter, space: S) -> Self {
        let scratch = vec![0; space.flat_dim()];
        Self { writer, space, scratch }
    }
}

impl<S: FlatSpace + Send> ObsSlot<S::Element> for SlotBinding<S> {
    fn slot(&self) -> usize { self.writer.slot() }

    fn store(&mut self, obs: &S::Element) -> Result<()> {
        self.writer.write_element(&self.space, obs, &mut self.scratch)
    }
}

struct Worker<E: Env> {
    index: usize,
    env: E,
    observation_space: E::ObsSpace,
    slot: Option<Box<dyn ObsSlot<E::Obs>>>,
    state: WorkerState,
    failure: Option<GymError>,
}

/// Body of a worker thread.
pub(crate) fn run<E: Env>(
    spec: EnvSpec,
    env_fn: EnvFn<E>,
    slot: Option<Box<dyn ObsSlot<E::Obs>>>,
    commands: Receiver<Command<E::Act>>,
    replies: Sender<Reply<E>>,
) {
    let index = spec.index;
    match slot.as_ref() {
        Some(slot) => debug!("worker {index} starting {} writing to slot {}", spec.id, slot.slot()),
        None => debug!("worker {index} starting {}", spec.id),
    }

    let mut env = match env_fn(&spec) {
        Ok(env) => env,
        Err(error) => {
            warn!("worker {index} could not build {}: {error}", spec.id);
            let _ = replies.send(Reply::Failed(Failure { command: CommandKind::Spawn, error, repeated: false }));
            return;
        }
    };

    let observation_space = env.observation_space();
    let ready = Reply::Ready { observation_space: env.observation_space(), action_space: env.action_space() };
    if replies.send(ready).is_err() {
        env.close();
        return;
    }

    let mut worker = Worker { index, env, observation_space, slot, state: WorkerState::Idle, failure: None };
    worker.serve(&commands, &replies);
}

impl<E: Env> Worker<E> {
    fn serve(&mut self, commands: &Receiver<Command<E::Act>>, replies: &Sender<Reply<E>>) {
        while let Ok(command) = commands.recv() {
            trace!("worker {} received {}", self.index, command.kind());
            let reply = self.handle(command);
            let closing = matches!(reply, Reply::Closed);
            if replies.send(reply).is_err() || closing {
                break;
            }
        }
        // Also reached when the orchestrator dropped its end without a close.
        self.shut();
    }

    fn handle(&mut self, command: Command<E::Act>) -> Reply<E> {
        let kind = command.kind();
        if kind != CommandKind::Close {
            if let Some(error) = &self.failure {
                return Reply::Failed(Failure { command: kind, error: error.clone(), repeated: true });
            }
            self.state = WorkerState::Busy;
        }

        match self.execute(command) {
            Ok(reply) => {
                if self.state == WorkerState::Busy {
                    self.state = WorkerState::Idle;
                }
                reply
            }
            Err(error) => {
                warn!("worker {} failed during {kind}: {error}", self.index);
                self.state = WorkerState::Errored;
                self.failure = Some(error.clone());
                Reply::Failed(Failure { command: kind, error, repeated: false })
            }
        }
    }

    fn execute(&mut self, command: Command<E::Act>) -> Result<Reply<E>> {
        match command {
            Command::Reset => {
                let obs = self.env.reset()?;
                Ok(Reply::Reset(self.deliver(obs)?))
            }
            Command::Step(action) => {
                let mut step = self.env.step(action)?;
                if step.done() {
                    step.observation = self.env.reset()?;
                }
                let observation = self.deliver(step.observation)?;
                Ok(Reply::Step(Step::new(observation, step.reward, step.terminated, step.truncated, step.info)))
            }
            Command::Seed(seed) => {
                self.env.seed(seed)?;
                Ok(Reply::Seeded)
            }
            Command::Close => {
                self.shut();
                Ok(Reply::Closed)
            }
        }
    }

    fn deliver(&mut self, obs: E::Obs) -> Result<Delivered<E::Obs>> {
        check_observation(&self.observation_space, &obs)?;
        match &mut self.slot {
            Some(slot) => {
                slot.store(&obs)?;
                Ok(Delivered::InSlot)
            }
            None => Ok(Delivered::Inline(obs)),
        }
    }

    fn shut(&mut self) {
        if self.state == WorkerState::Closed { return; }
        self.env.close();
        self.state = WorkerState::Closed;
        debug!("worker {} closed", self.index);
    }
}

/// How a worker left during shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CloseOutcome {
    Acknowledged,
    Terminated,
    Crashed,
}

/// The orchestrator's end of one worker.
pub(crate) struct WorkerHandle<E: Env> {
    index: usize,
    commands: Option<Sender<Command<E::Act>>>,
    replies: Receiver<Reply<E>>,
    thread: Option<JoinHandle<()>>,
    state: WorkerState,
    // Slot of the shared result buffer this worker writes, if any.
    slot: Option<usize>,
}

impl<E: Env> WorkerHandle<E> {
    /// Spawn the worker thread for `spec`.
    pub(crate) fn spawn(
        spec: EnvSpec,
        env_fn: EnvFn<E>,
        slot: Option<Box<dyn ObsSlot<E::Obs>>>,
        config: &AsyncConfig,
    ) -> Result<Self>
    where
        E: 'static,
        E::Obs: Send + 'static,
        E::Act: Send + 'static,
        E::ObsSpace: Send + 'static,
        E::ActSpace: Send + 'static,
    {
        let index = spec.index;
        let slot_index = slot.as_ref().map(|s| s.slot());
        let (command_tx, command_rx) = unbounded();
        let (reply_tx, reply_rx) = unbounded();

        let mut builder = thread::Builder::new().name(format!("{}-{}", config.thread_name, index));
        if let Some(size) = config.stack_size {
            builder = builder.stack_size(size);
        }
        let thread = builder
            .spawn(move || run::<E>(spec, env_fn, slot, command_rx, reply_tx))
            .map_err(|e| GymError::Communication { index, reason: format!("failed to spawn worker thread: {e}") })?;

        Ok(Self {
            index,
            commands: Some(command_tx),
            replies: reply_rx,
            thread: Some(thread),
            state: WorkerState::Starting,
            slot: slot_index,
        })
    }

    pub(crate) fn index(&self) -> usize { self.index }
    pub(crate) fn state(&self) -> WorkerState { self.state }
    pub(crate) fn slot(&self) -> Option<usize> { self.slot }

    fn unreachable(&self, reason: impl Into<String>) -> GymError {
        GymError::Communication { index: self.index, reason: reason.into() }
    }

    /// Dispatch a command without waiting for its reply.
    pub(crate) fn send(&mut self, command: Command<E::Act>) -> Result<()> {
        match self.state {
            WorkerState::Crashed => return Err(self.unreachable("worker thread is no longer running")),
            WorkerState::Closed => return Err(self.unreachable("worker is closed")),
            _ => {}
        }
        let sent = match &self.commands {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        };
        if !sent {
            self.state = WorkerState::Crashed;
            return Err(self.unreachable("command channel disconnected"));
        }
        if self.state != WorkerState::Errored {
            self.state = WorkerState::Busy;
        }
        Ok(())
    }

    /// Block until the worker replies, turning error records into errors.
    pub(crate) fn recv(&mut self) -> Result<Reply<E>> {
        let reply = match self.replies.recv() {
            Ok(reply) => reply,
            Err(_) => {
                self.state = WorkerState::Crashed;
                return Err(self.unreachable("worker disconnected before replying"));
            }
        };
        match reply {
            Reply::Failed(failure) => {
                self.state = WorkerState::Errored;
                if failure.repeated {
                    Err(self.unreachable(format!(
                        "refused {} after an earlier failure: {}",
                        failure.command, failure.error
                    )))
                } else {
                    Err(failure.error.in_env(self.index, failure.command))
                }
            }
            Reply::Closed => {
                self.state = WorkerState::Closed;
                Ok(Reply::Closed)
            }
            other => {
                self.state = WorkerState::Idle;
                Ok(other)
            }
        }
    }

    /// Ask the worker to close, unless it is already gone.
    pub(crate) fn request_close(&mut self) {
        if matches!(self.state, WorkerState::Crashed | WorkerState::Closed) { return; }
        let sent = self.commands.as_ref().map(|tx| tx.send(Command::Close).is_ok()).unwrap_or(false);
        if !sent {
            self.state = WorkerState::Crashed;
        }
    }

    /// Wait until `deadline` for the close acknowledgment, skipping replies to
    /// any call that was still in flight. A worker that misses the deadline is
    /// detached: its channels are dropped so it exits on its next channel operation.
    pub(crate) fn await_close(&mut self, deadline: Instant) -> CloseOutcome {
        let outcome = match self.state {
            WorkerState::Closed => CloseOutcome::Acknowledged,
            WorkerState::Crashed => CloseOutcome::Crashed,
            _ => loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match self.replies.recv_timeout(remaining) {
                    Ok(Reply::Closed) => break CloseOutcome::Acknowledged,
                    Ok(stale) => trace!("worker {} discarded {} reply while closing", self.index, stale.name()),
                    Err(RecvTimeoutError::Timeout) => break CloseOutcome::Terminated,
                    Err(RecvTimeoutError::Disconnected) => break CloseOutcome::Crashed,
                }
            },
        };

        self.commands = None;
        match outcome {
            CloseOutcome::Terminated => {
                warn!("worker {} did not acknowledge close in time; detaching it", self.index);
                self.thread = None;
            }
            _ => self.join(),
        }
        self.state = WorkerState::Closed;
        outcome
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("worker {} panicked", self.index);
            }
        }
    }
}
