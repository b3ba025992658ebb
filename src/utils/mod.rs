pub mod rng;

pub use rng::{RngStream, SeedSequence, rng_from_optional_seed, rng_from_seed, split_n};
