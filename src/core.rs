// Core traits and types: the environment capability driven by the vector runners.

use crate::spaces::Space;
use crate::vector::CommandKind;

/// A minimal info map attached to every step.
/// It stores small numbers of key-value pairs in insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Info {
    entries: Vec<(String, InfoValue)>,
}

impl Info {
    /// Create an empty Info map.
    pub fn new() -> Self { Self { entries: Vec::new() } }

    /// Insert or replace a key with the given value.
    pub fn insert<K: Into<String>>(&mut self, key: K, value: InfoValue) {
        let k = key.into();
        if let Some((_, v)) = self.entries.iter_mut().find(|(kk, _)| kk == &k) {
            *v = value;
        } else {
            self.entries.push((k, value));
        }
    }

    /// Get a reference to a value by key.
    pub fn get(&self, key: &str) -> Option<&InfoValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Iterate over entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &InfoValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Number of entries.
    pub fn len(&self) -> usize { self.entries.len() }
}

/// A small set of value types commonly used in info maps.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InfoValue {
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
}

impl From<bool> for InfoValue { fn from(v: bool) -> Self { InfoValue::Bool(v) } }
impl From<i64> for InfoValue { fn from(v: i64) -> Self { InfoValue::I64(v) } }
impl From<i32> for InfoValue { fn from(v: i32) -> Self { InfoValue::I64(v as i64) } }
impl From<u32> for InfoValue { fn from(v: u32) -> Self { InfoValue::I64(v as i64) } }
impl From<f64> for InfoValue { fn from(v: f64) -> Self { InfoValue::F64(v) } }
impl From<f32> for InfoValue { fn from(v: f32) -> Self { InfoValue::F64(v as f64) } }
impl From<&str> for InfoValue { fn from(v: &str) -> Self { InfoValue::Str(v.to_string()) } }
impl From<String> for InfoValue { fn from(v: String) -> Self { InfoValue::Str(v) } }

/// A step result from the environment.
#[derive(Clone, Debug, PartialEq)]
pub struct Step<Obs> {
    pub observation: Obs,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
    pub info: Info,
}

impl<Obs> Step<Obs> {
    pub fn new(observation: Obs, reward: f32, terminated: bool, truncated: bool, info: Info) -> Self {
        Self { observation, reward, terminated, truncated, info }
    }

    /// Whether the episode ended on this step, either way.
    pub fn done(&self) -> bool { self.terminated || self.truncated }

    /// Replace the observation, keeping reward, flags and info.
    pub fn map_observation<O2, F: FnOnce(Obs) -> O2>(self, f: F) -> Step<O2> {
        Step::new(f(self.observation), self.reward, self.terminated, self.truncated, self.info)
    }
}

/// Errors across environments and vector runners.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GymError {
    #[error("Invalid action: {0}")]
    InvalidAction(String),
    #[error("Invalid observation: {0}")]
    InvalidObservation(String),
    #[error("Environment not ready: {0}")]
    NotReady(String),
    #[error("Operation not supported: {0}")]
    NotSupported(String),
    #[error("Other error: {0}")]
    Other(String),

    /// The batch itself is malformed; raised before any instance is touched.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An environment instance failed while executing `command`.
    #[error("Environment {index} failed during {command}: {source}")]
    Environment {
        index: usize,
        command: CommandKind,
        #[source]
        source: Box<GymError>,
    },

    /// A worker could not be reached or is no longer usable.
    #[error("Worker {index} unreachable: {reason}")]
    Communication { index: usize, reason: String },

    #[error("Cannot start a new call while `{pending}` is still pending")]
    AlreadyPending { pending: CommandKind },

    #[error("Calling `{expected}_wait` without a pending `{expected}_async` call")]
    NoAsyncCallPending { expected: CommandKind },

    #[error("Vector environment is closed")]
    Closed,
}

impl GymError {
    /// Attribute an instance error to the instance at `index`.
    pub fn in_env(self, index: usize, command: CommandKind) -> Self {
        GymError::Environment { index, command, source: Box::new(self) }
    }

    /// Index of the instance this error is attributed to, if any.
    pub fn env_index(&self) -> Option<usize> {
        match self {
            GymError::Environment { index, .. } | GymError::Communication { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Convenience alias for results using GymError.
pub type Result<T> = std::result::Result<T, GymError>;

/// The environment capability every runner drives.
///
/// Implementations are opaque to the vector runners: they only need to
/// declare their spaces and honor seed/reset/step/close. An instance used by
/// [`AsyncVectorEnv`](crate::vector::AsyncVectorEnv) is built inside its
/// worker thread, so the type itself does not have to be `Send`.
pub trait Env {
    type Obs;
    type Act;
    type ObsSpace: Space<Element = Self::Obs>;
    type ActSpace: Space<Element = Self::Act>;

    /// The space every observation of this environment lives in.
    fn observation_space(&self) -> Self::ObsSpace;

    /// The space every accepted action lives in.
    fn action_space(&self) -> Self::ActSpace;

    /// Re-seed internal RNGs. `None` asks for fresh entropy.
    fn seed(&mut self, _seed: Option<u64>) -> Result<()> { Ok(()) }

    /// Reset the environment to an initial state.
    fn reset(&mut self) -> Result<Self::Obs>;

    /// Apply an action and advance the environment by one step.
    fn step(&mut self, action: Self::Act) -> Result<Step<Self::Obs>>;

    /// Close and release any external resources.
    fn close(&mut self) {}
}
