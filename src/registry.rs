//! Environment factories and an explicit registry to construct environments by id.
//!
//! There is no global registry: a [`Registry`] is an ordinary value owned by
//! the caller, and every vector env receives the [`EnvFn`] it should call.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::{Env, GymError, Result};
use crate::vector::{AsyncConfig, AsyncVectorEnv, SyncVectorEnv};

/// Description of one environment instance inside a batch.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvSpec {
    /// Identifier like "CartPole-v1".
    pub id: String,
    /// Slot of this instance in its batch.
    pub index: usize,
    /// Suggested max episode steps, forwarded to the factory.
    pub max_episode_steps: Option<u32>,
}

impl EnvSpec {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self { id: id.into(), index: 0, max_episode_steps: None }
    }

    pub fn with_max_episode_steps(mut self, steps: u32) -> Self {
        self.max_episode_steps = Some(steps);
        self
    }

    /// Copy of this spec placed at slot `index`.
    pub fn at(&self, index: usize) -> Self {
        Self { index, ..self.clone() }
    }

    /// The `n` specs of a batch built from this template, indexed 0..n.
    pub fn batch(&self, n: usize) -> Vec<EnvSpec> {
        (0..n).map(|i| self.at(i)).collect()
    }
}

/// Factory that builds one environment instance from its spec.
///
/// Parallel workers call it on their own thread, so it must be `Send + Sync`
/// even though the environment it returns need not be.
pub type EnvFn<E> = Arc<dyn Fn(&EnvSpec) -> Result<E> + Send + Sync>;

/// Wrap a closure into an [`EnvFn`].
pub fn env_fn<E, F>(f: F) -> EnvFn<E>
where
    F: Fn(&EnvSpec) -> Result<E> + Send + Sync + 'static,
{
    Arc::new(f)
}

struct Entry<E> {
    spec: EnvSpec,
    factory: EnvFn<E>,
}

/// Maps environment ids to their spec template and factory.
pub struct Registry<E> {
    entries: HashMap<String, Entry<E>>,
}

impl<E> Default for Registry<E> {
    fn default() -> Self { Self { entries: HashMap::new() } }
}

impl<E> fmt::Debug for Registry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("ids", &self.ids()).finish()
    }
}

impl<E> Registry<E> {
    pub fn new() -> Self { Self::default() }

    /// Register a spec template and its factory. Ids must be unique.
    pub fn register(&mut self, spec: EnvSpec, factory: EnvFn<E>) -> Result<()> {
        if self.entries.contains_key(&spec.id) {
            return Err(GymError::Configuration(format!("Env id already registered: {}", spec.id)));
        }
        self.entries.insert(spec.id.clone(), Entry { spec, factory });
        Ok(())
    }

    /// Registered spec template for `id`.
    pub fn spec(&self, id: &str) -> Option<&EnvSpec> {
        self.entries.get(id).map(|e| &e.spec)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    fn entry(&self, id: &str) -> Result<&Entry<E>> {
        self.entries
            .get(id)
            .ok_or_else(|| GymError::Configuration(format!("Unknown environment id: {}", id)))
    }

    /// The factory registered for `id`.
    pub fn factory(&self, id: &str) -> Result<EnvFn<E>> {
        Ok(Arc::clone(&self.entry(id)?.factory))
    }

    /// Construct a single instance of `id` at slot 0.
    pub fn make(&self, id: &str) -> Result<E> {
        let entry = self.entry(id)?;
        (entry.factory)(&entry.spec)
    }
}

impl<E: Env> Registry<E> {
    /// Build a sequential vector env of `n` instances of `id`.
    pub fn make_sync(&self, id: &str, n: usize) -> Result<SyncVectorEnv<E>>
    where
        E::ObsSpace: Clone + PartialEq + fmt::Debug,
        E::ActSpace: Clone + PartialEq + fmt::Debug,
    {
        let entry = self.entry(id)?;
        SyncVectorEnv::from_specs(entry.spec.batch(n), Arc::clone(&entry.factory))
    }

    /// Build a parallel vector env of `n` instances of `id`.
    pub fn make_async(&self, id: &str, n: usize, config: AsyncConfig) -> Result<AsyncVectorEnv<E>>
    where
        E: 'static,
        E::Obs: Send + 'static,
        E::Act: Send + 'static,
        E::ObsSpace: crate::spaces::FlatSpace + Clone + PartialEq + fmt::Debug + Send + 'static,
        E::ActSpace: Clone + PartialEq + fmt::Debug + Send + 'static,
    {
        let entry = self.entry(id)?;
        AsyncVectorEnv::from_specs(entry.spec.batch(n), Arc::clone(&entry.factory), config)
    }
}
