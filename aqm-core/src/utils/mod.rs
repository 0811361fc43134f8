pub mod random;

pub use random::UniformRandom;
