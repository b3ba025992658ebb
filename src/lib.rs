pub mod core;
pub mod registry;
pub mod spaces;
pub mod utils;
pub mod vector;

pub use crate::core::{Env, GymError, Info, InfoValue, Result, Step};
pub use crate::registry::{env_fn, EnvFn, EnvSpec, Registry};
pub use crate::spaces::{Batched, BoxSpace, Discrete, FlatSpace, MultiBinary, MultiDiscrete, Space};
pub use crate::vector::{
    AsyncConfig, AsyncVectorEnv, BatchStep, CloseReport, CommandKind, Seeds, SyncVectorEnv, VectorEnv, WorkerState,
};
